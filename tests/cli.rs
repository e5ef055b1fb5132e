use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CASE: &str = r#"
config:
  DEFAULT:
    log: false
pipeline:
  - tag: case
    attrs: { name: run1 }
    children:
      - tag: command
        attrs: { name: greet, command: "echo hello {name} > greet.txt" }
      - tag: mesh
        attrs: { name: unregistered }
      - tag: command
        attrs: { name: angle, command: "echo {angle} >> angles.txt" }
"#;

fn case_dir(doc: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("run1")).unwrap();
    fs::write(dir.path().join("case.yml"), doc).unwrap();
    dir
}

fn caseflow(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("caseflow").unwrap();
    cmd.env("HOME", home).env_remove("RUST_LOG");
    cmd
}

fn read(dir: &TempDir, file: &str) -> String {
    fs::read_to_string(dir.path().join("run1").join(file)).unwrap_or_default()
}

#[test]
fn test_run_case_document() {
    let dir = case_dir(CASE);

    caseflow(dir.path())
        .args(["run", "case.yml", "--context", "angle=7"])
        .current_dir(dir.path())
        .assert()
        .success();

    assert_eq!(read(&dir, "greet.txt"), "hello run1\n");
    assert_eq!(read(&dir, "angles.txt"), "7\n");
}

#[test]
fn test_task_kind_filter() {
    let dir = case_dir(CASE);

    caseflow(dir.path())
        .args(["run"])
        .arg(dir.path().join("case.yml"))
        .args(["--not", "command"])
        .assert()
        .success();

    assert_eq!(read(&dir, "greet.txt"), "");
}

#[test]
fn test_failing_task_stops_the_run() {
    let doc = r#"
pipeline:
  - tag: case
    attrs: { name: run1 }
    children:
      - tag: command
        attrs: { name: tolerated, command: "exit 5", fail_on_error: false }
      - tag: command
        attrs: { name: broken, command: "echo broken-output; exit 3" }
      - tag: command
        attrs: { name: after, command: "touch after.txt" }
"#;
    let dir = case_dir(doc);

    caseflow(dir.path())
        .args(["run", "case.yml"])
        .current_dir(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("broken"));

    assert!(!dir.path().join("run1/after.txt").exists());
    assert!(read(&dir, "log/broken").contains("broken-output"));
}

#[test]
fn test_missing_document() {
    let dir = tempfile::tempdir().unwrap();

    caseflow(dir.path())
        .args(["run", "nope.yml"])
        .current_dir(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.yml"));
}

#[test]
fn test_bad_range_is_reported() {
    let doc = r#"
pipeline:
  - tag: variation
    attrs: { variable: x, range: "5..0" }
    children:
      - tag: command
        attrs: { command: "true" }
"#;
    let dir = case_dir(doc);

    caseflow(dir.path())
        .args(["run", "case.yml"])
        .current_dir(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid range expression"));
}

#[test]
fn test_queue_without_master() {
    let dir = tempfile::tempdir().unwrap();
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    caseflow(dir.path())
        .args(["queue", "--port", &port.to_string(), "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not reachable"));
}
