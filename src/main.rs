use clap::{Parser, Subcommand};

mod cli;

use cli::hash::{cmd_hash, HashArgs};
use cli::print::{cmd_print, PrintArgs};
use cli::run::{cmd_run, RunArgs};

#[derive(Parser)]
#[command(
    name = "gradus",
    version,
    about = "Kernels over array fields, differentiated in reverse"
)]
struct Cli {
    /// Log compile, derive and launch steps
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the kernels of a program file, and their reverse kernels
    Print(PrintArgs),
    /// Run a kernel forward or in reverse and dump the fields
    Run(RunArgs),
    /// Show content hashes of kernels and their reverse kernels
    Hash(HashArgs),
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Command::Print(args) => cmd_print(args),
        Command::Run(args) => cmd_run(args),
        Command::Hash(args) => cmd_hash(args),
    }
}
