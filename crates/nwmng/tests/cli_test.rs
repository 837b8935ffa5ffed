//! Integration tests for the `nwmng` binary.
//!
//! Argument handling, the argument cache and a short simulated session,
//! all without NCP hardware.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `nwmng` binary with env isolation.
fn nwmng_cmd(home: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("nwmng");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home)
        .env("XDG_CACHE_HOME", home)
        .env_remove("NWMNG_ARGS_CACHE")
        .env_remove("NWMNG_PROFILE")
        .env_remove("RUST_LOG");
    cmd
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn help_describes_the_tool() {
    let home = tempfile::tempdir().unwrap();
    nwmng_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("BLE Mesh")
                .and(predicate::str::contains("--simulate"))
                .and(predicate::str::contains("--args-cache")),
        );
}

#[test]
fn missing_mode_is_a_usage_error() {
    let home = tempfile::tempdir().unwrap();
    let cache = home.path().join("args.cache");
    nwmng_cmd(home.path())
        .arg("--args-cache")
        .arg(&cache)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("mode"));
}

// ── Argument cache ──────────────────────────────────────────────────

#[test]
fn transport_flags_are_cached_for_the_next_run() {
    let home = tempfile::tempdir().unwrap();
    let cache = home.path().join("args.cache");

    nwmng_cmd(home.path())
        .args(["--mode", "insecure", "--port", "/dev/ttyACM0", "--baud-rate", "115200"])
        .arg("--args-cache")
        .arg(&cache)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No NCP transport"));

    let text = std::fs::read_to_string(&cache).unwrap();
    assert!(text.contains("Port = /dev/ttyACM0"));
    assert!(text.contains("Baud Rate = 115200"));

    // Second run without flags picks everything up from the cache.
    nwmng_cmd(home.path())
        .arg("--args-cache")
        .arg(&cache)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("/dev/ttyACM0"));
}

#[test]
fn malformed_cache_is_reported() {
    let home = tempfile::tempdir().unwrap();
    let cache = home.path().join("args.cache");
    std::fs::write(&cache, "Encryption 0\n").unwrap();

    nwmng_cmd(home.path())
        .arg("--args-cache")
        .arg(&cache)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("line 1"));
}

// ── Simulated session ───────────────────────────────────────────────

#[test]
fn simulated_session_runs_shell_commands() {
    let home = tempfile::tempdir().unwrap();
    let profile = home.path().join("provisioner.toml");

    nwmng_cmd(home.path())
        .args(["--simulate", "2", "--color", "never"])
        .arg("--profile-path")
        .arg(&profile)
        .write_stdin("stats\nbogus\nquit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("provisioned").and(predicate::str::contains("removed")));

    let text = std::fs::read_to_string(&profile).unwrap();
    assert!(text.contains("[[subnets]]"));
}
