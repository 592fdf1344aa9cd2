use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mldsa_hsm_logger::log_init;
use tracing::debug;

use crate::{
    actions::{info::InfoAction, run::RunAction},
    config::HsmConfig,
    error::result::CliResult,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file location
    ///
    /// This is an alternative to the env variable `MLDSA_HSM_CONF`.
    /// Takes precedence over `MLDSA_HSM_CONF` env variable.
    #[arg(short, long)]
    pub conf: Option<PathBuf>,

    #[command(flatten)]
    pub hsm: HsmConfig,

    #[command(subcommand)]
    pub command: CliCommands,
}

#[derive(Subcommand, Debug)]
pub enum CliCommands {
    /// Generate a key pair, sign and verify (the default workflow)
    Run(RunAction),
    /// Show the library, its slots and their ML-DSA support
    Info(InfoAction),
}

impl Cli {
    /// Run the selected command.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the command fails.
    pub fn process(self) -> CliResult<()> {
        log_init(None);
        let hsm = self.hsm.merge_file(self.conf.as_deref())?;
        debug!("HSM configuration: {hsm:?}");
        match self.command {
            CliCommands::Run(action) => action.process(&hsm),
            CliCommands::Info(action) => action.process(&hsm),
        }
    }
}
