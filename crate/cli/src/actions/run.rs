use std::path::PathBuf;

use clap::Parser;
use mldsa_hsm_base::{DEFAULT_MESSAGE, WorkflowReport, run};
use tracing::info;

use crate::{
    armor::public_key_pem,
    config::{HsmConfig, KeyConfig},
    error::{
        CliError,
        result::{CliResult, CliResultHelper},
    },
};

/// Generate an ML-DSA key pair on the first token found, read back its public key,
/// sign a message with the private key and verify the signature with the public key.
///
/// The command fails if the signature does not verify.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct RunAction {
    #[clap(flatten)]
    pub key: KeyConfig,

    /// The message to sign
    #[clap(long, short = 'm', conflicts_with = "message_file")]
    pub message: Option<String>,

    /// Sign the content of this file instead
    #[clap(long)]
    pub message_file: Option<PathBuf>,

    /// Write the public key to this file, as PEM
    #[clap(long)]
    pub public_key_out: Option<PathBuf>,

    /// Write the raw signature to this file
    #[clap(long)]
    pub signature_out: Option<PathBuf>,

    /// Do not check the slot lists the ML-DSA mechanisms before using them
    #[clap(long)]
    pub skip_mechanism_check: bool,
}

impl RunAction {
    fn message(&self) -> CliResult<Vec<u8>> {
        if let Some(path) = &self.message_file {
            return std::fs::read(path)
                .with_context(|| format!("cannot read the message file {}", path.display()));
        }
        Ok(self
            .message
            .as_deref()
            .unwrap_or(DEFAULT_MESSAGE)
            .as_bytes()
            .to_vec())
    }

    /// Run the workflow against the configured HSM.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails or if the signature does not verify.
    pub fn process(&self, hsm: &HsmConfig) -> CliResult<()> {
        let config = self.key.workflow_config(
            hsm.credential()?,
            self.message()?,
            !self.skip_mechanism_check,
        )?;
        let provider = softhsm2_pkcs11_loader::load(Some(hsm.lib_path()))?;
        let report = run(provider, &config)?;
        self.output(&report)
    }

    /// Print the report, then export the public key and the signature.
    ///
    /// Nothing is exported when the signature does not verify.
    pub(crate) fn output(&self, report: &WorkflowReport) -> CliResult<()> {
        println!("Slot: {}", report.slot_id);
        println!("Public key label: {}", report.public_label);
        println!("Key id: {}", hex::encode(&report.id));
        println!("Scheme: {}", report.scheme);
        println!("Signature: {} bytes", report.signature.len());
        println!("Verification: {}", report.verification);
        if !report.verification.is_verified() {
            return Err(CliError::VerificationFailed);
        }

        let pem = public_key_pem(report.scheme.parameter_set, &report.public_key)?;
        println!("{pem}");
        if let Some(path) = &self.public_key_out {
            std::fs::write(path, &pem)?;
            info!("Public key written to {}", path.display());
        }
        if let Some(path) = &self.signature_out {
            std::fs::write(path, &report.signature)?;
            info!("Signature written to {}", path.display());
        }
        Ok(())
    }
}
