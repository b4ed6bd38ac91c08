//! Integration tests for the `homedash` binary: argument parsing, help
//! output, and error exit codes, without a live hub.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// `homedash` with config and data directories pointed at `home` and
/// all `HOMEDASH_*` variables cleared.
fn homedash_cmd(home: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("homedash");
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env_remove("HOMEDASH_CONFIG")
        .env_remove("HOMEDASH_URL")
        .env_remove("HOMEDASH_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Address nothing listens on.
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = homedash_cmd(&home).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    homedash_cmd(&home).arg("--help").assert().success().stdout(
        predicate::str::contains("status")
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("login"))
            .and(predicate::str::contains("events")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    homedash_cmd(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("homedash"));
}

#[test]
fn test_events_requires_entity() {
    let home = tempfile::tempdir().unwrap();
    homedash_cmd(&home)
        .arg("events")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("<ENTITY>"));
}

// ── Offline commands ────────────────────────────────────────────────

#[test]
fn test_dashboard_prints_builtin_layout() {
    let home = tempfile::tempdir().unwrap();
    homedash_cmd(&home)
        .args(["dashboard", "--output", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("calendar.family"));
}

#[test]
fn test_dashboard_reads_user_document() {
    let home = tempfile::tempdir().unwrap();
    let dashboard = home.path().join("dash.json");
    std::fs::write(
        &dashboard,
        r#"{"rooms": {"Garage": [{"type": "switch", "entityId": "switch.garage_door"}]}}"#,
    )
    .unwrap();
    let config = home.path().join("config.toml");
    std::fs::write(
        &config,
        format!("dashboard = {:?}\n", dashboard.display().to_string()),
    )
    .unwrap();

    homedash_cmd(&home)
        .args(["dashboard", "--output", "plain", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("switch.garage_door"));
}

// ── Error exit codes ────────────────────────────────────────────────

#[test]
fn test_status_without_login_is_auth_error() {
    let home = tempfile::tempdir().unwrap();
    let output = homedash_cmd(&home)
        .args(["status", "--hub", "http://127.0.0.1:9"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("homedash login"));
}

#[test]
fn test_unreachable_hub_is_connection_error() {
    let home = tempfile::tempdir().unwrap();
    let output = homedash_cmd(&home)
        .args(["status", "--token", "llat", "--hub"])
        .arg(closed_port_url())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7), "{}", combined_output(&output));
}

#[test]
fn test_invalid_hub_url_is_general_error() {
    let home = tempfile::tempdir().unwrap();
    let output = homedash_cmd(&home)
        .args(["toggle", "light.kitchen", "--hub", "not a url"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(combined_output(&output).contains("hub.url"));
}
