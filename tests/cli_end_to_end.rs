use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;

fn reportpress() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("reportpress"));
    cmd.env_remove("REPORTPRESS_CONFIG_FILE")
        .env("REPORTPRESS__LOGGING__LEVEL", "warn");
    cmd
}

#[test]
fn check_lists_pages_in_order() {
    let dir = tempfile::tempdir().expect("tmp dir");
    fs::write(dir.path().join("page_2.html"), "two").expect("write");
    fs::write(dir.path().join("page_1.html"), "one").expect("write");
    fs::write(dir.path().join("page_1.css"), "p { margin: 0; }").expect("write");
    fs::write(dir.path().join("cover.html"), "cover").expect("write");

    let assert = reportpress()
        .arg("check")
        .arg("--template-dir")
        .arg(dir.path())
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    let lines: Vec<&str> = stdout.lines().map(str::trim).collect();
    assert_eq!(
        lines,
        vec!["0  cover.html", "1  page_1.html (+css)", "2  page_2.html"]
    );
}

#[test]
fn check_fails_for_missing_template_directory() {
    let dir = tempfile::tempdir().expect("tmp dir");

    reportpress()
        .arg("check")
        .arg("--template-dir")
        .arg(dir.path().join("absent"))
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(contains("setup"));
}

#[test]
fn generate_rejects_malformed_json_before_launching_chromium() {
    let dir = tempfile::tempdir().expect("tmp dir");
    fs::write(dir.path().join("page_1.html"), "{{ title }}").expect("write");
    let output = dir.path().join("report.pdf");

    reportpress()
        .arg("generate")
        .arg("--template-dir")
        .arg(dir.path())
        .arg("--chrome-path")
        .arg(dir.path().join("no-such-chrome"))
        .arg("--data")
        .arg("{not json")
        .arg("--output")
        .arg(&output)
        .assert()
        .failure()
        .code(1)
        .stderr(contains("invalid JSON"));

    assert!(!output.exists());
}

#[test]
fn generate_requires_exactly_one_data_source() {
    reportpress()
        .arg("generate")
        .arg("--output")
        .arg("out.pdf")
        .assert()
        .failure()
        .stderr(contains("--data"));
}
