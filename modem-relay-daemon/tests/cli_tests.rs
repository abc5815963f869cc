//! Daemon CLI Tests
//!
//! Runs the daemon binary's one-shot subcommands against the simulated
//! modem and a temporary configuration file.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn daemon(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_modem-relay-daemon"))
        .arg("--config")
        .arg(config)
        .args(["--log-level", "warn"])
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("ADMIN_CHAT_ID")
        .env_remove("AT_PORT")
        .output()
        .expect("daemon binary runs")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    let output = daemon(&dir.path().join("daemon.toml"), &["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("Modem relay daemon v"));
}

/// dump-config writes the default file and prints it
#[test]
fn test_dump_config_creates_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("daemon.toml");

    let output = daemon(&path, &["dump-config"]);
    assert!(output.status.success());
    assert!(path.exists());

    let text = stdout(&output);
    assert!(text.contains("[engine]"));
    assert!(text.contains("name = \"modemmanager\""));
    assert!(text.contains("port = \"/dev/wwan0at0\""));
}

#[test]
fn test_env_override_in_dump() {
    let dir = TempDir::new().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_modem-relay-daemon"))
        .arg("--config")
        .arg(dir.path().join("daemon.toml"))
        .arg("dump-config")
        .env("ADMIN_CHAT_ID", "987654")
        .env("AT_PORT", "/dev/ttyUSB3")
        .output()
        .unwrap();

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("admin_chat_id = 987654"));
    assert!(text.contains("port = \"/dev/ttyUSB3\""));
}

#[test]
fn test_simulated_status_json() {
    let dir = TempDir::new().unwrap();
    let output = daemon(&dir.path().join("daemon.toml"), &["--simulate", "status", "--json"]);
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["state"]["value"], "registered");
    assert_eq!(report["access_technology"]["value"], "LTE");
    assert_eq!(report["signal_quality"]["value"], 72);
}

#[test]
fn test_simulated_list_sms() {
    let dir = TempDir::new().unwrap();
    let output = daemon(&dir.path().join("daemon.toml"), &["--simulate", "list-sms"]);
    assert!(output.status.success());

    let text = stdout(&output);
    assert!(text.starts_with("2 message(s):"));
    assert!(text.contains("From: +15550123"));
}

#[test]
fn test_unknown_engine_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("daemon.toml");
    std::fs::write(&path, "[engine]\nname = \"qmi\"\n").unwrap();

    let output = daemon(&path, &["status"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown engine 'qmi'"));
}
