//! Integration tests for the `testframe` command-line tool.

use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

fn testframe_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_testframe"))
}

fn describe_output(output: &Output) -> String {
    format!(
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn list_prints_discovered_files_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let specs = temp_dir.path().join("specs");
    fs::create_dir_all(specs.join("nested")).unwrap();
    fs::write(specs.join("b_spec.rs"), "").unwrap();
    fs::write(specs.join("nested/a_spec.rs"), "").unwrap();
    fs::write(specs.join("helpers.rs"), "").unwrap();
    fs::write(
        temp_dir.path().join("testframe.yaml"),
        "version: 1\ntest_dir: specs\n",
    )
    .unwrap();

    let output = testframe_cmd()
        .arg("list")
        .arg(temp_dir.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", describe_output(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let b = stdout.find("b_spec.rs").unwrap();
    let a = stdout.find("a_spec.rs").unwrap();
    assert!(b < a, "files should be listed in sorted path order");
    assert!(!stdout.contains("helpers.rs"));
    assert!(stdout.contains("2 test file(s)"));
}

#[test]
fn list_without_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    let output = testframe_cmd()
        .arg("list")
        .arg(temp_dir.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("No config file found"));
}

#[test]
fn list_with_toml_config_and_custom_pattern() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("login_test.rs"), "").unwrap();
    fs::write(temp_dir.path().join("login_spec.rs"), "").unwrap();
    fs::write(
        temp_dir.path().join("testframe.toml"),
        "version = 1\npattern = \"_test\\\\.rs$\"\n",
    )
    .unwrap();

    let output = testframe_cmd()
        .arg("list")
        .arg(temp_dir.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", describe_output(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("login_test.rs"));
    assert!(!stdout.contains("login_spec.rs"));
}

#[test]
fn init_writes_a_loadable_config_once() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("suite/testframe.yaml");

    let output = testframe_cmd().arg("init").arg(&path).output().unwrap();
    assert!(output.status.success(), "{}", describe_output(&output));
    assert!(path.exists());

    let config = testframe::loader::load_config(path.parent().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(config.test_dir.as_deref(), Some(std::path::Path::new("tests")));
    assert_eq!(config.globals["MODE"], "local");

    let again = testframe_cmd().arg("init").arg(&path).output().unwrap();
    assert_eq!(again.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));
}

#[test]
fn schema_describes_config_fields() {
    let output = testframe_cmd().arg("schema").output().unwrap();
    assert!(output.status.success(), "{}", describe_output(&output));

    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let properties = &schema["properties"];
    for field in ["version", "test_dir", "pattern", "globals", "components"] {
        assert!(properties.get(field).is_some(), "missing {field}");
    }
}
