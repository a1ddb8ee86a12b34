//! Smoke tests for the taskrelay CLI
//!
//! These run the compiled binary against process providers built from `sh`
//! builtins, so they need no network access or API keys.

#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const CONFIG: &str = r#"
[defaults]
provider = "echo"

[providers.echo]
kind = "process"
command = "echo {prompt}"
expected_executables = ["sh"]
tries = 1

[providers.approver]
kind = "process"
command = ": {prompt}; echo 'LGTM, looks good to me.'"
expected_executables = ["sh"]
tries = 1

[providers.rejecter]
kind = "process"
command = ": {prompt}; echo 'Changes needed: add tests.'"
expected_executables = ["sh"]
tries = 1

[providers.broken]
kind = "process"
command = ": {prompt}; exit 3"
expected_executables = ["sh"]
tries = 2
backoff_secs = [0]
"#;

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

fn workspace() -> Workspace {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, CONFIG).unwrap();
    Workspace { dir, config }
}

fn taskrelay(ws: &Workspace, args: &[&str]) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("taskrelay"));
    cmd.current_dir(ws.dir.path())
        .env_remove("TASKRELAY_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(&ws.config)
        .args(args);
    cmd
}

#[test]
fn test_smoke_help() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("taskrelay"));
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dispatch"))
        .stdout(predicate::str::contains("iterate"))
        .stdout(predicate::str::contains("health"));
}

#[test]
fn test_smoke_health_for_one_provider() {
    let ws = workspace();
    taskrelay(&ws, &["health", "echo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"provider\": \"echo\""))
        .stdout(predicate::str::contains("\"status\": \"healthy\""));
}

#[test]
fn test_smoke_health_unknown_provider_is_invalid() {
    let ws = workspace();
    taskrelay(&ws, &["health", "nope"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown provider 'nope'"));
}

#[test]
fn test_smoke_dispatch_default_provider() {
    let ws = workspace();
    taskrelay(&ws, &["dispatch", "hello relay"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"completed\""))
        .stdout(predicate::str::contains("hello relay"));
}

#[test]
fn test_smoke_dispatch_reads_stdin() {
    let ws = workspace();
    taskrelay(&ws, &["dispatch", "--provider", "echo"])
        .write_stdin("from stdin")
        .assert()
        .success()
        .stdout(predicate::str::contains("from stdin"));
}

#[test]
fn test_smoke_unknown_provider_exits_2() {
    let ws = workspace();
    taskrelay(&ws, &["dispatch", "--provider", "nope", "hi"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_smoke_empty_prompt_exits_2() {
    let ws = workspace();
    taskrelay(&ws, &["dispatch", "   "]).assert().code(2);
}

#[test]
fn test_smoke_exhausted_retries_exit_3() {
    let ws = workspace();
    taskrelay(&ws, &["dispatch", "--provider", "broken", "hi"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("\"status\": \"failed\""))
        .stdout(predicate::str::contains("\"attempts\": 2"));
}

#[test]
fn test_smoke_fallback_after_failure() {
    let ws = workspace();
    taskrelay(
        &ws,
        &["dispatch", "--provider", "broken", "--fallback", "echo", "fallback works"],
    )
    .assert()
    .success()
    .stdout(predicate::str::contains("\"provider\": \"echo\""))
    .stdout(predicate::str::contains("\"fallback_from\": \"broken\""));
}

#[test]
fn test_smoke_iterate_approved_first_round() {
    let ws = workspace();
    taskrelay(
        &ws,
        &["iterate", "--worker", "echo", "--reviewer", "approver", "write a haiku"],
    )
    .assert()
    .success()
    .stdout(predicate::str::contains("\"status\": \"completed\""))
    .stdout(predicate::str::contains("\"iterations_used\": 1"));
}

#[test]
fn test_smoke_iterate_hits_max_iterations() {
    let ws = workspace();
    taskrelay(
        &ws,
        &[
            "iterate",
            "--worker",
            "echo",
            "--reviewer",
            "rejecter",
            "--max-iterations",
            "2",
            "write a haiku",
        ],
    )
    .assert()
    .success()
    .stdout(predicate::str::contains("\"status\": \"max_iterations_reached\""))
    .stdout(predicate::str::contains("\"iterations_used\": 2"));
}
