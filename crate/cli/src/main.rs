use std::process;

use clap::Parser;
use mldsa_hsm_cli::{commands::Cli, error::result::CliResult};

fn main() {
    if let Some(err) = main_().err() {
        eprintln!("ERROR: {err}");
        process::exit(1);
    }
}

fn main_() -> CliResult<()> {
    Cli::parse().process()
}
