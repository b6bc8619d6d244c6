//! CLI integration tests.
//!
//! These tests verify argument parsing, configuration loading and the
//! behaviour of the `citizen-shell` binary itself.

use std::ffi::OsString;
use std::io::Write;
use std::process::Command as Process;

use tempfile::NamedTempFile;

use citizen_shell::cli::{parse_args_from, Args};
use citizen_shell::config::Config;

fn args(args: &[&str]) -> Vec<OsString> {
    std::iter::once("citizen-shell")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

fn binary() -> Process {
    let mut process = Process::new(env!("CARGO_BIN_EXE_citizen-shell"));
    for var in [
        "CITIZEN_SHELL_PROGRAM",
        "CITIZEN_SHELL_CHECK_XC",
        "CITIZEN_SHELL_CHECK_ERR",
        "CITIZEN_SHELL_LOG_LEVEL",
        "RUST_LOG",
    ] {
        process.env_remove(var);
    }
    process
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_cli_full_options() {
    let result = parse_args_from(args(&[
        "-x",
        "-e",
        "--stream",
        "-C",
        "/tmp",
        "-E",
        "A=1",
        "-l",
        "debug",
        "--",
        "echo",
        "$A",
    ]))
    .unwrap();

    assert!(result.check_xc);
    assert!(result.check_err);
    assert!(result.stream);
    assert_eq!(result.cwd.unwrap().to_str().unwrap(), "/tmp");
    assert_eq!(result.env, vec![("A".to_string(), "1".to_string())]);
    assert_eq!(result.log_level, Some("debug".to_string()));
    assert_eq!(result.command, vec!["echo", "$A"]);
}

#[test]
fn test_cli_config_file() {
    let result = parse_args_from(args(&["-c", "/etc/citizen-shell.json", "true"])).unwrap();

    assert_eq!(
        result.config.unwrap().to_str().unwrap(),
        "/etc/citizen-shell.json"
    );
}

#[test]
fn test_cli_missing_option_value() {
    let result = parse_args_from(args(&["--cwd"]));
    assert!(result.is_err());
}

// ============================================================================
// Configuration Loading Tests
// ============================================================================

#[test]
fn test_config_from_json_file() {
    let json = r##"{
        "shell": {
            "program": "/bin/bash",
            "check_xc": true
        },
        "connection": {
            "username": "root",
            "ready_prompt": "# "
        },
        "reboot": {
            "command": "reboot -f",
            "timeout_secs": 120
        },
        "logging": {
            "level": "debug"
        }
    }"##;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.shell.program, "/bin/bash");
    assert!(config.shell.check_xc);
    assert!(!config.shell.check_err);
    assert_eq!(config.connection.username.as_deref(), Some("root"));
    assert_eq!(config.reboot.command, "reboot -f");
    assert_eq!(config.reboot_policy().timeout.as_secs(), 120);
    assert_eq!(config.logging.level, "debug");

    let handshake = config.handshake();
    assert_eq!(handshake.login_prompt.as_deref(), Some("login: "));
    assert!(handshake.password_prompt.is_none());
    assert_eq!(handshake.ready_prompt.as_deref(), Some("# "));
}

#[test]
fn test_config_cli_flags_over_file() {
    let json = r#"{"shell": {"check_err": false, "wait": true}}"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let mut config = Config::from_file(file.path()).unwrap();
    config.apply_args(&Args {
        check_err: true,
        stream: true,
        ..Args::default()
    });

    let policy = config.policy();
    assert!(policy.check_err);
    assert!(!policy.wait);
}

#[test]
fn test_config_invalid_json() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"{not json").unwrap();

    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_config_roundtrip() {
    let original = Config::default();
    let json = serde_json::to_string(&original).unwrap();
    let loaded: Config = serde_json::from_str(&json).unwrap();

    assert_eq!(original.shell.program, loaded.shell.program);
    assert_eq!(original.reboot.timeout_secs, loaded.reboot.timeout_secs);
}

// ============================================================================
// Binary Tests
// ============================================================================

#[test]
fn test_binary_prints_output() {
    let output = binary().args(["echo", "hello"]).output().unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello\n");
}

#[test]
fn test_binary_routes_stderr() {
    let output = binary().args(["--", ">&2 echo oops"]).output().unwrap();

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    assert_eq!(String::from_utf8_lossy(&output.stderr), "oops\n");
}

#[test]
fn test_binary_propagates_exit_code() {
    let output = binary().args(["exit", "5"]).output().unwrap();
    assert_eq!(output.status.code(), Some(5));

    let output = binary().args(["-x", "exit", "6"]).output().unwrap();
    assert_eq!(output.status.code(), Some(6));
    assert!(String::from_utf8_lossy(&output.stderr).contains("terminated with exit code 6"));
}

#[test]
fn test_binary_check_err_fails() {
    let output = binary().args(["-e", "--", ">&2 echo bad"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_binary_env_and_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().canonicalize().unwrap();

    let output = binary()
        .arg("-C")
        .arg(&path)
        .args(["-E", "NAME=world", "--", "echo $NAME; pwd -P"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        format!("world\n{}\n", path.display())
    );
}

#[test]
fn test_binary_streaming() {
    let output = binary()
        .args(["--stream", "--", "echo 1; echo 2"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "1\n2\n");
}

#[test]
#[cfg(unix)]
fn test_binary_pty_reboot_from_config() {
    let json = r#"{
        "reboot": {
            "command": "exit",
            "disconnect_delay_ms": 50,
            "poll_interval_ms": 50,
            "timeout_secs": 20
        }
    }"#;
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let output = binary()
        .arg("-c")
        .arg(file.path())
        .args(["--pty", "--reboot", "--", "echo back"])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "back\n");
}

#[test]
fn test_binary_reboot_without_connection() {
    let output = binary().args(["--reboot", "true"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_binary_without_command() {
    let output = binary().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_binary_version() {
    let output = binary().arg("--version").output().unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("citizen-shell "));
}
