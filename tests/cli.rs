//! CLI test cases.
//!
//! Tests that run the full OCR pipeline need poppler and tesseract installed,
//! and are ignored by default.

use assert_cmd::Command;
use predicates::prelude::*;

/// Create a new `Command` with our binary, isolated from any `.env` settings
/// that would pick a storage backend.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("pdf-keyword-extractor").unwrap();
    cmd.env_remove("BUCKET_NAME").env_remove("OUTPUT_DIR");
    cmd
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_match_finds_keywords_in_text() {
    cmd()
        .arg("match")
        .arg("tests/fixtures/page.txt")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#""Capacity": "Capacity: 5000 persons""#,
        ))
        .stdout(predicate::str::contains(
            r#""VIP Attending": "VlP Attending: Yes""#,
        ))
        .stdout(predicate::str::contains(
            r#""Weather Severity": "Weather Severity: Low""#,
        ))
        .stdout(predicate::str::contains("Parking Capacity").not());
}

#[test]
fn test_match_reads_stdin() {
    cmd()
        .arg("match")
        .write_stdin("Congestion Risk: High\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#""Congestion Risk": "Congestion Risk: High""#,
        ));
}

#[test]
fn test_schema() {
    cmd()
        .arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("ExtractionResult"))
        .stdout(predicate::str::contains("pages"));
}

#[test]
fn test_extract_rejects_non_pdf() {
    let out = tempfile::TempDir::new().unwrap();
    cmd()
        .arg("extract")
        .arg("--output-dir")
        .arg(out.path())
        .arg("tests/fixtures/page.txt")
        .assert()
        .failure()
        .stderr(predicate::str::contains("only PDF files are allowed"));
}

#[test]
fn test_extract_checks_every_name_first() {
    let out = tempfile::TempDir::new().unwrap();
    cmd()
        .arg("extract")
        .arg("--output-dir")
        .arg(out.path())
        .arg("tests/fixtures/two_pages.pdf")
        .arg("tests/fixtures/page.txt")
        .assert()
        .failure()
        .stderr(predicate::str::contains("only PDF files are allowed"));
    assert!(!out.path().join("two_pages.json").exists());
}

#[test]
fn test_extract_requires_storage() {
    cmd()
        .arg("extract")
        .arg("tests/fixtures/two_pages.pdf")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no result storage configured"));
}

#[test]
#[ignore = "Requires poppler-utils and tesseract to be installed"]
fn test_extract_two_page_pdf() {
    let out = tempfile::TempDir::new().unwrap();
    cmd()
        .arg("extract")
        .arg("--output-dir")
        .arg(out.path())
        .arg("tests/fixtures/two_pages.pdf")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""filename":"two_pages.pdf""#))
        .stdout(predicate::str::contains("Capacity"))
        .stdout(predicate::str::contains("Congestion Risk"));
    assert!(out.path().join("two_pages.json").exists());
}
