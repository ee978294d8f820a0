//! CLI integration tests

use std::io::Write;
use std::process::{Command, Output};

fn blab(args: &[&str]) -> Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "burstlab-cli", "--"])
        .args(args)
        .env_remove("BURSTLAB_CONFIG")
        .output()
        .expect("Failed to execute command")
}

fn experiment_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(
        br#"
[plan]
count = 3
rate_floor = 10.0
rate_ceiling = 100.0
spike_probability = 0.0

[[endpoints]]
name = "home"
url = "http://frontend/"
weight = 0.7

[[endpoints]]
name = "cart"
url = "http://frontend/cart"
weight = 0.3
"#,
    )
    .unwrap();
    file
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = blab(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Burstlab"), "Should show app name");
    assert!(stdout.contains("plan"), "Should show plan command");
    assert!(stdout.contains("analyze"), "Should show analyze command");
    assert!(stdout.contains("show"), "Should show show command");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("--format"), "Should show format option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = blab(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("blab"), "Should show binary name");
}

#[test]
fn test_plan_help() {
    let output = blab(&["plan", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--config"), "Should show config option");
    assert!(stdout.contains("--seed"), "Should show seed option");
}

#[test]
fn test_analyze_help() {
    let output = blab(&["analyze", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--no-write"), "Should show no-write option");
}

#[test]
fn test_status_help() {
    let output = blab(&["status", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--runner-url"), "Should show runner-url option");
}

/// Same seed, same plan
#[test]
fn test_plan_json_is_reproducible() {
    let config = experiment_config();
    let path = config.path().to_str().unwrap();

    let first = blab(&["plan", "--config", path, "--seed", "42", "--format", "json"]);
    let second = blab(&["plan", "--config", path, "--seed", "42", "--format", "json"]);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert_eq!(first.stdout, second.stdout);

    let plan: serde_json::Value = serde_json::from_slice(&first.stdout).unwrap();
    assert_eq!(plan["seed"], 42);
    let bursts = plan["bursts"].as_array().unwrap();
    assert_eq!(bursts.len(), 3);
    for burst in bursts {
        assert_eq!(burst["kind"], "heavy_tail");
        let rate = burst["total_rate"].as_f64().unwrap();
        assert!((10.0..=100.0).contains(&rate));
    }
}

#[test]
fn test_show_missing_run_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = blab(&["show", dir.path().to_str().unwrap()]);

    assert!(!output.status.success(), "Missing manifest should fail");
}

#[test]
fn test_invalid_command() {
    let output = blab(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");
}

#[test]
fn test_missing_argument() {
    let output = blab(&["show"]);

    assert!(!output.status.success(), "Missing run_dir should fail");
}
