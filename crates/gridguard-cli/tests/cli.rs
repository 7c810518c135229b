//! End-to-end runs of the `gridguard` binary.

use std::process::{Command, Output};

use gridguard_core::GuardConfig;

fn gridguard(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gridguard"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run gridguard")
}

#[test]
fn config_prints_defaults() {
    let out = gridguard(&["config"]);
    assert!(out.status.success());

    let text = String::from_utf8(out.stdout).unwrap();
    assert_eq!(GuardConfig::from_toml_str(&text).unwrap(), GuardConfig::default());
}

#[test]
fn config_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gridguard.toml");
    std::fs::write(&path, "[breaker]\nk = 2.0\n").unwrap();

    let out = gridguard(&["--config", path.to_str().unwrap(), "config"]);
    assert!(out.status.success());
    let config = GuardConfig::from_toml_str(&String::from_utf8(out.stdout).unwrap()).unwrap();
    assert_eq!(config.breaker.k, 2.0);
}

#[test]
fn invalid_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gridguard.toml");
    std::fs::write(&path, "[balancer]\npick_attempts = 0\n").unwrap();

    let out = gridguard(&["--config", path.to_str().unwrap(), "config"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("pick_attempts"));
}

#[test]
fn simulate_emits_json() {
    for target in ["breaker", "shedder", "balancer"] {
        let out = gridguard(&["simulate", target, "--seconds", "3", "--format", "json"]);
        assert!(out.status.success(), "{target}: {}", String::from_utf8_lossy(&out.stderr));

        let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
        assert_eq!(json["phases"].as_array().unwrap().len(), 3, "{target}");
    }
}

#[test]
fn simulate_rejects_short_runs() {
    let out = gridguard(&["simulate", "breaker", "--seconds", "2"]);
    assert!(!out.status.success());
}
