use std::path::PathBuf;
use std::process;

use clap::Args;

use super::{build_runtime, load_program, parse_assignment, resolve_config};

#[derive(Args)]
pub struct RunArgs {
    /// Program file
    pub input: PathBuf,
    /// Kernel to run
    #[arg(short, long)]
    pub kernel: String,
    /// Run the reverse kernel instead of the forward one
    #[arg(long)]
    pub grad: bool,
    /// Scalar kernel argument (repeatable, in order)
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<f64>,
    /// Fill a field with a value before running (NAME=VALUE)
    #[arg(long, value_parser = parse_assignment)]
    pub fill: Vec<(String, f64)>,
    /// Fill a field's gradient buffer before running (NAME=VALUE)
    #[arg(long, value_parser = parse_assignment)]
    pub seed: Vec<(String, f64)>,
    /// Fields to print afterwards (default: all)
    #[arg(long)]
    pub dump: Vec<String>,
    /// Settings file (default: nearest gradus.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

pub fn cmd_run(args: RunArgs) {
    let program = load_program(&args.input);
    let config = resolve_config(&args.input, args.config.as_ref());
    let mut rt = build_runtime(&program, config);

    for (name, value) in &args.fill {
        match rt.field_mut(name) {
            Ok(field) => field.fill(*value),
            Err(e) => exit_with(e),
        }
    }
    for (name, value) in &args.seed {
        if let Err(e) = rt.field_mut(name).and_then(|f| f.fill_grad(*value)) {
            exit_with(e);
        }
    }

    let result = if args.grad {
        rt.invoke_gradient(&args.kernel, &args.args)
    } else {
        rt.invoke(&args.kernel, &args.args)
    };
    if let Err(e) = result {
        exit_with(e);
    }

    let names: Vec<String> = if args.dump.is_empty() {
        rt.fields().iter().map(|f| f.name().to_string()).collect()
    } else {
        args.dump.clone()
    };
    for name in &names {
        let field = match rt.field(name) {
            Ok(f) => f,
            Err(e) => exit_with(e),
        };
        println!("{} = {:?}", name, field.data());
        if let Some(grad) = field.grad() {
            println!("{}.grad = {:?}", name, grad);
        }
    }
}

fn exit_with(e: impl std::fmt::Display) -> ! {
    eprintln!("error: {}", e);
    process::exit(1);
}
