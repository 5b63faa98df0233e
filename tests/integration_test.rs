//! Integration tests for WalletLink CLI commands

use std::fs;
use std::process::Command;

use tempfile::TempDir;

fn walletlink(dir: &TempDir) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_walletlink"));
    command.current_dir(dir.path());
    command.env_remove("RUST_LOG");
    command
}

/// Test that the help command works
#[test]
fn test_help_command() {
    let dir = TempDir::new().unwrap();
    let output = walletlink(&dir)
        .arg("--help")
        .output()
        .expect("Failed to execute help command");

    assert!(output.status.success(), "Help command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: walletlink"), "Should show usage");
    for command in ["connect", "status", "disconnect", "encode-init", "deploy", "config"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the version command works
#[test]
fn test_version_command() {
    let dir = TempDir::new().unwrap();
    let output = walletlink(&dir)
        .arg("--version")
        .output()
        .expect("Failed to execute version command");

    assert!(output.status.success(), "Version command should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("walletlink"), "Should show program name");
}

#[test]
fn test_encode_init_threshold() {
    let dir = TempDir::new().unwrap();
    let output = walletlink(&dir)
        .args([
            "encode-init",
            "ProposalVotingModule",
            "--param",
            "ProposalVotingModule_approvalThreshold=60",
        ])
        .output()
        .expect("Failed to execute encode-init");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("0x{:064x}", 60));
}

#[test]
fn test_encode_init_unknown_module_fails() {
    let dir = TempDir::new().unwrap();
    let output = walletlink(&dir)
        .args(["encode-init", "UnknownModule"])
        .output()
        .expect("Failed to execute encode-init");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown module"));
}

#[test]
fn test_status_without_session() {
    let dir = TempDir::new().unwrap();
    let output = walletlink(&dir)
        .arg("status")
        .output()
        .expect("Failed to execute status");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Not connected"));
}

#[test]
fn test_config_reset_writes_file() {
    let dir = TempDir::new().unwrap();
    let output = walletlink(&dir)
        .args(["--config-file", "walletlink.toml", "config", "reset"])
        .output()
        .expect("Failed to execute config reset");

    assert!(output.status.success());
    let written = fs::read_to_string(dir.path().join("walletlink.toml")).unwrap();
    assert!(written.contains("chain_id = 11155111"));
}

#[test]
fn test_deploy_dry_run_prints_plan() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("dao.toml"),
        "name = \"Chess Club\"\nProposalVotingModule_approvalThreshold = 70\n",
    )
    .unwrap();

    let output = walletlink(&dir)
        .args(["deploy", "--dao", "dao.toml", "--dry-run"])
        .output()
        .expect("Failed to execute deploy");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Chess Club"));
    assert!(stdout.contains("MemberModule"));
    assert!(stdout.contains("calldata: 0x"));
}
