//! Integration tests driving the `shlit` binary.
#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn shlit_cmd() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_shlit"));
    cmd.env_remove("SHLIT_LOG");
    cmd
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// A suite with one passing test and one expected failure.
fn passing_suite() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "lit.yaml", "name: demo\nsuffixes: [txt]\n");
    write(
        dir.path(),
        "a.txt",
        "# RUN: echo hello > %t\n# RUN: cat %t\n# CHECK: hello\n",
    );
    write(dir.path(), "sub/b.txt", "# XFAIL: *\n# RUN: false\n");
    dir
}

#[test]
fn run_passing_suite() {
    let dir = passing_suite();
    let output = shlit_cmd().arg("run").arg(dir.path()).output().unwrap();

    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        stdout(&output),
        stderr(&output)
    );
    let out = stdout(&output);
    assert!(out.contains("✓ PASS: a.txt"), "{out}");
    assert!(out.contains("✓ XFAIL: sub/b.txt"), "{out}");
    assert!(out.contains("2 tests in"), "{out}");
}

#[test]
fn run_failing_suite_exits_nonzero() {
    let dir = passing_suite();
    write(dir.path(), "c.txt", "# RUN: echo one\n# RUN: false\n# RUN: echo never\n");
    let output = shlit_cmd().arg("run").arg(dir.path()).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let out = stdout(&output);
    assert!(out.contains("✗ FAIL: c.txt"), "{out}");
    assert!(out.contains("line 2: command failed with exit code 1"), "{out}");
}

#[test]
fn run_json_output() {
    let dir = passing_suite();
    let output = shlit_cmd()
        .args(["run", "-o", "json"])
        .arg(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", stderr(&output));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["total"], 2);
    assert_eq!(value["counts"]["PASS"], 1);
    assert_eq!(value["counts"]["XFAIL"], 1);
    assert_eq!(value["results"][0]["name"], "a.txt");
    assert_eq!(value["results"][0]["commands"][1]["stdout"], "hello\n");
}

#[test]
fn run_junit_output() {
    let dir = passing_suite();
    write(dir.path(), "sub/c.txt", "# RUN: false\n");
    let output = shlit_cmd()
        .args(["run", "--output", "junit"])
        .arg(dir.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let xml = stdout(&output);
    assert!(xml.starts_with("<?xml"), "{xml}");
    assert!(xml.contains("<testsuites name=\"demo\" tests=\"3\" failures=\"1\""), "{xml}");
    assert!(xml.contains("<testsuite name=\"demo/sub\""), "{xml}");
    assert!(xml.contains("<failure message="), "{xml}");
}

#[test]
fn run_with_no_tests_fails() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "lit.yaml", "suffixes: [txt]\n");
    let output = shlit_cmd().arg("run").arg(dir.path()).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("No tests found"));
}

#[test]
fn run_with_broken_root_config_fails() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "lit.yaml", "suffixes: [txt\n");
    write(dir.path(), "a.txt", "# RUN: true\n");
    let output = shlit_cmd().arg("run").arg(dir.path()).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error loading suite config"));
}

#[test]
fn run_single_file() {
    let dir = passing_suite();
    let output = shlit_cmd()
        .arg("run")
        .arg(dir.path().join("a.txt"))
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("1 tests in"));
}

#[test]
fn run_filter_skips_other_tests() {
    let dir = passing_suite();
    write(dir.path(), "broken.txt", "# RUN: false\n");
    let output = shlit_cmd()
        .args(["run", "-f", "a.txt", "-v"])
        .arg(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", stdout(&output));
    let out = stdout(&output);
    assert!(out.contains("- SKIPPED: broken.txt"), "{out}");
    assert!(out.contains("filtered out"), "{out}");
}

#[test]
fn run_timeout_kills_the_test() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "lit.yaml", "suffixes: [txt]\n");
    write(dir.path(), "slow.txt", "# RUN: sleep 30\n");
    let output = shlit_cmd()
        .args(["run", "--timeout", "1"])
        .arg(dir.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let out = stdout(&output);
    assert!(out.contains("✗ TIMEOUT: slow.txt"), "{out}");
    assert!(out.contains("timed out after"), "{out}");
}

#[test]
fn run_pipefail_flag() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "lit.yaml", "suffixes: [txt]\n");
    write(dir.path(), "pipe.txt", "# RUN: false | true\n");

    let plain = shlit_cmd().arg("run").arg(dir.path()).output().unwrap();
    assert!(plain.status.success(), "{}", stdout(&plain));

    let strict = shlit_cmd()
        .args(["run", "--pipefail"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert_eq!(strict.status.code(), Some(1));
}

#[test]
fn run_keep_on_failure_in_local_exec_root() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "lit.yaml", "suffixes: [txt]\n");
    write(dir.path(), "bad.txt", "# RUN: echo left > marker\n# RUN: false\n");
    write(dir.path(), "good.txt", "# RUN: echo gone > marker\n");

    let output = shlit_cmd()
        .args(["run", "--exec-root", "local", "--keep-on-failure", "-j", "1"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("scratch directory kept at"));

    let runs: Vec<_> = fs::read_dir(dir.path().join(".shlit"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(runs.len(), 1);
    let kept: Vec<_> = fs::read_dir(&runs[0])
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(kept.len(), 1);
    assert_eq!(fs::read_to_string(kept[0].join("marker")).unwrap(), "left\n");
}

#[test]
fn validate_reports_each_test() {
    let dir = passing_suite();
    let output = shlit_cmd().arg("validate").arg(dir.path()).output().unwrap();
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("All 2 test(s) valid"));

    write(dir.path(), "bad.txt", "# RUN: echo 'unterminated\n");
    let output = shlit_cmd().arg("validate").arg(dir.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("✗ bad.txt: line 1"), "{}", stderr(&output));
}

#[test]
fn init_scaffolds_a_runnable_suite() {
    let dir = TempDir::new().unwrap();
    let suite = dir.path().join("suite");

    let output = shlit_cmd().arg("init").arg(&suite).output().unwrap();
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(suite.join("lit.yaml").is_file());

    let output = shlit_cmd().arg("run").arg(&suite).output().unwrap();
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        stdout(&output),
        stderr(&output)
    );

    let again = shlit_cmd().arg("init").arg(&suite).output().unwrap();
    assert_eq!(again.status.code(), Some(1));
    assert!(stderr(&again).contains("already exists"));
}

#[test]
fn schema_describes_override_files() {
    let output = shlit_cmd().arg("schema").output().unwrap();
    assert!(output.status.success());
    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(schema["properties"]["suffixes"].is_object());
    assert!(schema["properties"]["exec_root"].is_object());
}
