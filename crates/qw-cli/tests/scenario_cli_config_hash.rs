//! `qw config-hash` prints the effective config without external services.
//!
//! # Invariants under test
//! - Output starts with `config_hash=`.
//! - An env override changes the hash.
//! - An invalid override fails with its error code.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn qw() -> Command {
    let mut cmd = Command::cargo_bin("qw").expect("qw binary");
    cmd.env_remove("QW_CONFIG_PATH")
        .env_remove("QW_WARN_QUEUE_SIZE")
        .env_remove("QW_DEL_QUEUE_SIZE");
    cmd
}

fn hash_line(out: &[u8]) -> String {
    String::from_utf8_lossy(out)
        .lines()
        .find(|l| l.starts_with("config_hash="))
        .expect("config_hash line")
        .to_string()
}

#[test]
fn env_override_changes_hash() {
    let a = qw().arg("config-hash").output().unwrap();
    assert!(a.status.success());
    let b = qw()
        .env("QW_DEL_QUEUE_SIZE", "987654")
        .arg("config-hash")
        .output()
        .unwrap();
    assert!(b.status.success());

    assert_ne!(hash_line(&a.stdout), hash_line(&b.stdout));
    assert!(String::from_utf8_lossy(&b.stdout).contains("987654"));
}

#[test]
fn delete_below_warn_is_rejected() {
    qw().env("QW_WARN_QUEUE_SIZE", "100")
        .env("QW_DEL_QUEUE_SIZE", "10")
        .arg("config-hash")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_THRESHOLDS_INVALID"));
}

#[test]
fn help_lists_operator_commands() {
    qw().arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("account"))
        .stdout(predicate::str::contains("queue"))
        .stdout(predicate::str::contains("tick"));
}
