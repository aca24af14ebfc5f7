//! Integration tests for the CLI binary.
//!
//! Verifies that the `tid` binary responds to basic flags, refuses to start
//! without configuration, and drives a `file://` ledger end to end.
//!
//! This test is registered as a [[test]] in the tourist-identity-cli crate
//! so that CARGO_BIN_EXE_tid is available.

use std::path::Path;
use std::process::{Command, Output};

const TID_VARS: &[&str] = &[
    "TID_CONFIG",
    "TID_LEDGER_URL",
    "TID_REGISTRY_ADDRESS",
    "TID_KEYSTORE",
    "TID_KEYSTORE_PASSPHRASE",
    "TID_SIGNING_KEY",
    "TID_INTERVAL",
    "TID_CALL_TIMEOUT",
];

/// Get a Command pointing to the `tid` binary with a clean `TID_*` environment.
fn tid_binary() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tid"));
    for var in TID_VARS {
        cmd.env_remove(var);
    }
    cmd
}

/// `tid` wired to a local ledger snapshot and a fixed signing seed.
fn tid_on_ledger(ledger: &Path) -> Command {
    let mut cmd = tid_binary();
    cmd.env("TID_LEDGER_URL", format!("file://{}", ledger.display()))
        .env("TID_REGISTRY_ADDRESS", "0xCliRegistry")
        .env("TID_SIGNING_KEY", "42".repeat(32));
    cmd
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn cli_responds_to_help() {
    let output = tid_binary()
        .arg("--help")
        .output()
        .expect("failed to execute tid --help");

    assert!(
        output.status.success(),
        "tid --help should exit with success, stderr: {}",
        stderr(&output)
    );
    let out = stdout(&output);
    assert!(out.contains("Usage"), "help output: {out}");
    for sub in ["run", "once", "register", "show", "list", "keygen", "address"] {
        assert!(out.contains(sub), "help should list `{sub}`: {out}");
    }
}

#[test]
fn cli_responds_to_version() {
    let output = tid_binary()
        .arg("--version")
        .output()
        .expect("failed to execute tid --version");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(
        out.contains("tid") && out.contains("0.3"),
        "tid --version should contain version info, got: {out}"
    );
}

#[test]
fn cli_exits_with_error_on_unknown_flag() {
    let output = tid_binary()
        .arg("--nonexistent-flag")
        .output()
        .expect("failed to execute tid");

    assert!(!output.status.success());
}

#[test]
fn cli_refuses_to_run_without_configuration() {
    let output = tid_binary().arg("once").output().expect("failed to execute tid");

    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(
        err.contains("Configuration error") && err.contains("TID_LEDGER_URL"),
        "expected configuration error, got: {err}"
    );
}

#[test]
fn cli_rejects_bad_duration() {
    let dir = tempfile::tempdir().unwrap();
    let output = tid_on_ledger(&dir.path().join("ledger.json"))
        .args(["register", "--kyc-hash", "QmKyc", "--duration", "soon"])
        .output()
        .expect("failed to execute tid");

    assert!(!output.status.success());
}

#[test]
fn cli_keygen_then_address() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = dir.path().join("signer.tkey");

    let output = tid_binary()
        .env("TID_KEYSTORE_PASSPHRASE", "correct-horse")
        .args(["keygen", "--out"])
        .arg(&keystore)
        .output()
        .expect("failed to execute tid keygen");
    assert!(output.status.success(), "keygen failed: {}", stderr(&output));
    assert!(keystore.exists());

    let created = stdout(&output);
    let address = created
        .lines()
        .find_map(|l| l.trim().strip_prefix("Address: "))
        .map(|a| a.trim().to_string())
        .expect("keygen should print the address");
    assert!(address.starts_with("tsa_"));

    // Reading the address does not need the passphrase.
    let output = tid_binary()
        .arg("address")
        .arg("--keystore")
        .arg(&keystore)
        .output()
        .expect("failed to execute tid address");
    assert!(output.status.success(), "address failed: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), address);

    // A second keygen onto the same path is refused.
    let output = tid_binary()
        .env("TID_KEYSTORE_PASSPHRASE", "correct-horse")
        .args(["keygen", "--out"])
        .arg(&keystore)
        .output()
        .expect("failed to execute tid keygen");
    assert!(!output.status.success());
}

#[test]
fn cli_register_show_and_reconcile_on_local_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("ledger.json");

    let output = tid_on_ledger(&ledger)
        .args([
            "register",
            "--kyc-hash",
            "QmKyc",
            "--duration",
            "1s",
            "--tourist-id",
            "T202510-55555",
        ])
        .output()
        .expect("failed to execute tid register");
    assert!(output.status.success(), "register failed: {}", stderr(&output));
    assert!(stdout(&output).contains("Registered T202510-55555"));

    let output = tid_on_ledger(&ledger)
        .arg("list")
        .output()
        .expect("failed to execute tid list");
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "T202510-55555");

    std::thread::sleep(std::time::Duration::from_millis(2_100));

    let output = tid_on_ledger(&ledger)
        .arg("once")
        .output()
        .expect("failed to execute tid once");
    assert!(output.status.success(), "once failed: {}", stderr(&output));
    let summary: serde_json::Value =
        serde_json::from_str(&stdout(&output)).expect("summary should be JSON");
    assert_eq!(summary["candidateCount"], 1);
    assert_eq!(summary["transitionedCount"], 1);

    let output = tid_on_ledger(&ledger)
        .args(["show", "T202510-55555", "--json"])
        .output()
        .expect("failed to execute tid show");
    assert!(output.status.success(), "show failed: {}", stderr(&output));
    let shown: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(shown["status"], 1);
    assert_eq!(shown["trackable"], false);
}

#[test]
fn cli_show_unknown_identity_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = tid_on_ledger(&dir.path().join("ledger.json"))
        .args(["show", "T000000-00000"])
        .output()
        .expect("failed to execute tid show");
    assert!(!output.status.success());
    assert!(stderr(&output).contains("not found"));
}
