use clap::Parser;
use mldsa_hsm_base::{ParameterSet, Verification, WorkflowReport};

use crate::{
    actions::run::RunAction,
    commands::{Cli, CliCommands},
    config::KeyConfig,
    error::{CliError, result::CliResult},
};

fn run_action(dir: &std::path::Path) -> RunAction {
    let public_key_out = dir.join("pk.pem");
    let signature_out = dir.join("signature.bin");
    let cli = Cli::try_parse_from([
        "mldsa-hsm",
        "run",
        "--public-key-out",
        public_key_out.to_str().unwrap(),
        "--signature-out",
        signature_out.to_str().unwrap(),
    ])
    .unwrap();
    let CliCommands::Run(action) = cli.command else {
        panic!("expected the run command");
    };
    action
}

fn report(verification: Verification) -> WorkflowReport {
    let scheme = KeyConfig::default().scheme();
    WorkflowReport {
        slot_id: 0,
        public_label: "mldsa_pk".to_owned(),
        id: vec![1, 2, 3],
        scheme,
        public_key: vec![5; scheme.parameter_set.public_key_len()],
        signature: vec![9; scheme.parameter_set.signature_len()],
        verification,
    }
}

#[test]
fn test_output_writes_key_and_signature() -> CliResult<()> {
    let dir = tempfile::tempdir()?;
    let action = run_action(dir.path());
    action.output(&report(Verification::Verified))?;

    let pem = std::fs::read_to_string(dir.path().join("pk.pem"))?;
    assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----\n"));
    assert_eq!(
        std::fs::read(dir.path().join("signature.bin"))?.len(),
        ParameterSet::MlDsa65.signature_len()
    );
    Ok(())
}

#[test]
fn test_failed_verification_is_reported_before_export() -> CliResult<()> {
    let dir = tempfile::tempdir()?;
    let action = run_action(dir.path());
    let mut report = report(Verification::Failed);
    // verification is checked first, whatever the key looks like
    report.public_key.truncate(1300);
    assert!(matches!(
        action.output(&report),
        Err(CliError::VerificationFailed)
    ));
    assert!(!dir.path().join("pk.pem").exists());
    assert!(!dir.path().join("signature.bin").exists());
    Ok(())
}
