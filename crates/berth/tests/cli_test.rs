#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("セルフホストパネル"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("ps"))
        .stdout(predicate::str::contains("logs"))
        .stdout(predicate::str::contains("events"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("berth"));
}

/// execコマンドはコマンド本体が必須
#[test]
fn test_exec_requires_command() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("exec").arg("web").assert().failure();
}

/// logsコマンドのヘルプに --follow が表示されることを確認
#[test]
fn test_logs_help() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("logs")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--follow"));
}

/// 不正なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

/// BERTH_CONFIG_PATH が存在しないファイルを指していたら Docker に触れる前に失敗する
#[test]
fn test_missing_config_path() {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.env("BERTH_CONFIG_PATH", "/nonexistent/berth.yaml")
        .arg("ps")
        .assert()
        .failure()
        .stderr(predicate::str::contains("設定ファイルが見つかりません"));
}

/// 不正な設定値はエラーになる
#[test]
fn test_invalid_config_value() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("berth.yaml");
    std::fs::write(&path, "compose_command: []\n").unwrap();

    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.env("BERTH_CONFIG_PATH", &path)
        .arg("ps")
        .assert()
        .failure()
        .stderr(predicate::str::contains("compose_command"));
}
