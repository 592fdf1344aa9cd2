//! Tests of the `mldsa-hsm` binary that need no HSM.
#![allow(clippy::unwrap_used)]

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

const PROG_NAME: &str = "mldsa-hsm";

fn cmd() -> Command {
    let mut cmd = Command::cargo_bin(PROG_NAME).unwrap();
    cmd.env_remove("MLDSA_HSM_LIB")
        .env_remove("MLDSA_HSM_CONF")
        .env_remove("HSM_USER_PASSWORD");
    cmd
}

#[test]
fn test_help() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run").and(predicate::str::contains("info")));
}

#[test]
fn test_missing_library() {
    cmd()
        .args([
            "--hsm-lib",
            "/nonexistent/libpkcs11.so",
            "--hsm-password",
            "super-secret-pin",
            "run",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(
            predicate::str::contains("ERROR: Error loading the library")
                .and(predicate::str::contains("super-secret-pin").not()),
        );
}

#[test]
fn test_missing_password() {
    cmd()
        .args(["--hsm-lib", "/nonexistent/libpkcs11.so", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("the user PIN is required"));
}

#[test]
fn test_unknown_parameter_set() {
    cmd()
        .args([
            "--hsm-password",
            "1234",
            "run",
            "--parameter-set",
            "ML-DSA-99",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ML-DSA-99"));
}

#[test]
fn test_configuration_file() {
    let dir = tempfile::tempdir().unwrap();
    let conf = dir.path().join("mldsa-hsm.toml");
    std::fs::write(
        &conf,
        "hsm_lib = \"/nonexistent/from-file.so\"\nhsm_password = \"1234\"\n",
    )
    .unwrap();
    cmd()
        .env("MLDSA_HSM_CONF", &conf)
        .arg("info")
        .assert()
        .failure()
        .stderr(predicate::str::contains("from-file.so"));
}
