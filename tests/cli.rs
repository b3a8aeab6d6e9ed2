// ABOUTME: Integration tests for the highk binary.
// ABOUTME: Exercises help output, offline volume commands and argument validation.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

/// Isolated state: an empty config file, a private data root and a socket path that exists.
struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("highk.yml"), "").unwrap();
        std::fs::write(dir.path().join("containerd.sock"), "").unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("highk"));
        cmd.env_remove("HIGHK_ADDRESS")
            .env_remove("HIGHK_NAMESPACE")
            .env_remove("HIGHK_CONFIG")
            .arg("--config")
            .arg(self.root().join("highk.yml"))
            .arg("--address")
            .arg(self.root().join("containerd.sock"))
            .arg("--data-root")
            .arg(self.root().join("data"));
        cmd
    }
}

#[test]
fn help_lists_the_commands() {
    Command::new(assert_cmd::cargo::cargo_bin!("highk"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("ps"))
        .stdout(predicate::str::contains("volume"))
        .stdout(predicate::str::contains("network"))
        .stdout(predicate::str::contains("namespace"))
        .stdout(predicate::str::contains("login"));
}

#[test]
fn internal_commands_are_hidden() {
    Command::new(assert_cmd::cargo::cargo_bin!("highk"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("internal").not());
}

#[test]
fn volume_create_then_list_and_inspect() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["volume", "create", "--label", "env=test", "cache"])
        .assert()
        .success()
        .stdout("cache\n");

    sandbox
        .cmd()
        .args(["volume", "ls"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("VOLUME NAME"))
        .stdout(predicate::str::contains("cache"));

    sandbox
        .cmd()
        .args(["volume", "ls", "-q"])
        .assert()
        .success()
        .stdout("cache\n");

    sandbox
        .cmd()
        .args(["volume", "inspect", "cache"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"env\": \"test\""));
}

#[test]
fn volumes_are_scoped_by_namespace() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["-n", "other", "volume", "create", "private"])
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["volume", "ls", "-q"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn inspecting_a_missing_volume_fails() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["volume", "inspect", "absent"])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("Error:"));
}

#[test]
fn detach_and_rm_are_exclusive() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["run", "-d", "--rm", "alpine"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be specified together"));
}

#[test]
fn invalid_namespace_is_rejected() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["--namespace", "Not Valid", "volume", "ls"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn password_flags_are_exclusive() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["login", "-u", "me", "-p", "secret", "--password-stdin"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}
