//!
//! Compile configuration sources into materialized JSON artifacts.
//!
//! Usage: `formac <project-root> <source>...`

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "formac")]
#[command(about = "Compile configuration sources into materialized JSON artifacts")]
struct Args {
    /// Path to the project root (containing src/ and materialized_config/)
    project_root: PathBuf,

    /// Configuration sources to compile, relative to <project-root>/src
    #[arg(required = true)]
    sources: Vec<String>,

    /// Raise log verbosity to debug
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    forma_tools::init_logging(args.verbose);

    for source in &args.sources {
        if let Err(err) = forma_compiler::compile_source(&args.project_root, source) {
            error!("Error compiling config {source}, err: {err}");
            process::exit(1);
        }
    }
}
