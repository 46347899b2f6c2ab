//! Smoke tests -- verify the binary runs and the subcommands are wired.

use assert_cmd::Command;

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("awp.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("autowebperf")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("web-performance audits"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("autowebperf")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("autowebperf"));
}

#[test]
fn test_pipeline_subcommands_exist() {
    for sub in ["run", "recurring", "retrieve", "import-tests"] {
        Command::cargo_bin("autowebperf")
            .unwrap()
            .args([sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_recurring_has_activate_only_flag() {
    Command::cargo_bin("autowebperf")
        .unwrap()
        .args(["recurring", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--activate-only"));
}

#[test]
fn test_missing_api_key_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        &dir,
        r#"
[engine]
connector = "memory"
data_sources = ["psi"]
"#,
    );
    Command::cargo_bin("autowebperf")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .env_remove("RUST_LOG")
        .assert()
        .failure()
        .stderr(predicates::str::contains("psiApiKey"));
}

#[test]
fn test_run_on_empty_store_prints_summary() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        &dir,
        r#"
[engine]
connector = "memory"
data_sources = ["psi"]

[connector.env_vars]
psiApiKey = "test-key"
"#,
    );
    Command::cargo_bin("autowebperf")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["run", "--filter", "selected"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"results\": []"));
}

#[test]
fn test_import_tests_into_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("awp.db");
    let config = write_config(
        &dir,
        &format!("[connector]\npath = {:?}\n", db.display().to_string()),
    );
    let tests = dir.path().join("tests.json");
    std::fs::write(
        &tests,
        r#"[{"url": "https://example.com", "psi": {"settings": {}}}]"#,
    )
    .unwrap();

    Command::cargo_bin("autowebperf")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("import-tests")
        .arg("--file")
        .arg(&tests)
        .assert()
        .success()
        .stdout(predicates::str::contains("Imported 1 tests."));
    assert!(db.exists());
}
