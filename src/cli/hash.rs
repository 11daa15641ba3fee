use std::path::PathBuf;

use clap::Args;
use gradus::ir::hash::hash_kernel;

use super::{build_runtime, load_program, resolve_config};

#[derive(Args)]
pub struct HashArgs {
    /// Program file
    pub input: PathBuf,
    /// Show full hash instead of short form
    #[arg(long)]
    pub full: bool,
}

pub fn cmd_hash(args: HashArgs) {
    let HashArgs { input, full } = args;
    let program = load_program(&input);
    let mut rt = build_runtime(&program, resolve_config(&input, None));

    let show = |hash: gradus::ContentHash| if full { hash.to_hex() } else { hash.to_string() };

    let names: Vec<String> = rt.kernel_names().map(str::to_string).collect();
    for name in names {
        let kernel = match rt.compile(&name) {
            Ok(k) => k,
            Err(e) => {
                eprintln!("error: {}", e);
                continue;
            }
        };
        println!("  {} {}", show(kernel.hash), name);
        match rt.reverse_ir(&name) {
            Ok(reverse) => println!(
                "  {} {}",
                show(hash_kernel(&reverse, &kernel.fields)),
                reverse.name
            ),
            Err(e) => eprintln!("  (no reverse kernel: {})", e),
        }
    }
}
