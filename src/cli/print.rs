use std::path::PathBuf;
use std::process;

use clap::Args;

use super::{build_runtime, load_program, resolve_config};

#[derive(Args)]
pub struct PrintArgs {
    /// Program file
    pub input: PathBuf,
    /// Print only this kernel
    #[arg(short, long)]
    pub kernel: Option<String>,
    /// Also print each reverse kernel
    #[arg(long)]
    pub grad: bool,
}

pub fn cmd_print(args: PrintArgs) {
    let PrintArgs {
        input,
        kernel,
        grad,
    } = args;
    let program = load_program(&input);
    let mut rt = build_runtime(&program, resolve_config(&input, None));

    let names: Vec<String> = match kernel {
        Some(name) => {
            if program.kernel(&name).is_none() {
                eprintln!("error: no kernel '{}' in '{}'", name, input.display());
                process::exit(1);
            }
            vec![name]
        }
        None => program.kernels.iter().map(|k| k.node.name.clone()).collect(),
    };

    let mut failed = false;
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            println!();
        }
        if let Some(ir) = program.kernel(name) {
            print!("{}", ir);
        }
        if !grad {
            continue;
        }
        match rt.reverse_ir(name) {
            Ok(reverse) => {
                println!();
                print!("{}", reverse);
            }
            Err(e) => {
                eprintln!("error: {}", e);
                failed = true;
            }
        }
    }
    if failed {
        process::exit(1);
    }
}
