//! Integration tests for the CLI surface: target resolution, plan
//! printing, and exit codes. Nothing here executes an external toolchain.

use assert_cmd::Command;
use predicates::prelude::*;

fn capstan() -> Command {
    let mut cmd = Command::cargo_bin("capstan").unwrap();
    // isolate from any ambient option overrides
    for (key, _) in std::env::vars() {
        if key.starts_with("CAPSTAN_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

#[test]
fn help_flag_shows_usage() {
    capstan()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("--configuration"));
}

#[test]
fn unknown_target_fails_with_planning_exit_code() {
    capstan()
        .arg("does-not-exist")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown target 'does-not-exist'"));
}

#[test]
fn list_shows_registered_targets() {
    capstan()
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::contains("clean"))
        .stdout(predicate::str::contains("restore"))
        .stdout(predicate::str::contains("compile"))
        .stdout(predicate::str::contains("pack"))
        .stdout(predicate::str::contains("publish"));
}

#[test]
fn plan_for_publish_is_ordered_and_minimal() {
    capstan()
        .args(["publish", "--plan"])
        .assert()
        .success()
        .stdout(predicate::eq("restore\ncompile\npack\npublish\n"));
}

#[test]
fn plan_for_compile_excludes_clean() {
    capstan()
        .args(["compile", "--plan"])
        .assert()
        .success()
        .stdout(predicate::eq("restore\ncompile\n"));
}

#[test]
fn target_name_matching_is_case_insensitive() {
    capstan()
        .args(["PUBLISH", "--plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("publish"));
}
