//! CLI integration tests for the `check` and `run` subcommands.
//!
//! Uses `assert_cmd` to spawn the `riskscript` binary and verify
//! exit codes, stdout content, and stderr content. Rule and model
//! fixtures are written into temporary directories.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn riskscript() -> Command {
    cargo_bin_cmd!("riskscript")
}

const CONFIDENTIALITY_RULE: &str = r#"
id: sensitive-asset
title: Sensitive Technical Asset
description: Asset holds data above internal confidentiality
supported-tags: []
risk:
  match:
    if:
      greater:
        first: "{confidentiality}"
        second: internal
        as: confidentiality
  data:
    parameter: tech_asset
    severity: calculate_severity(likely, high)
    exploitation_likelihood: likely
    exploitation_impact: high
"#;

const MODEL_YAML: &str = r#"
technical_assets:
  db:
    id: db
    title: Customer Database
    confidentiality: strictly-confidential
  cdn:
    id: cdn
    title: Static Content
    confidentiality: public
"#;

/// Write `content` to `name` inside `dir` and return the path.
fn fixture(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    riskscript()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Threat-model risk rule evaluator"));
}

#[test]
fn version_exits_0() {
    riskscript()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("riskscript"));
}

// ──────────────────────────────────────────────
// 2. Check subcommand
// ──────────────────────────────────────────────

#[test]
fn check_valid_rule_prints_ok() {
    let dir = TempDir::new().unwrap();
    let rule = fixture(&dir, "rule.yaml", CONFIDENTIALITY_RULE);
    riskscript()
        .arg("check")
        .arg(&rule)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok: sensitive-asset"));
}

#[test]
fn check_invalid_rule_exits_1_with_fragment() {
    let dir = TempDir::new().unwrap();
    let rule = fixture(
        &dir,
        "broken.yaml",
        "id: broken\nrisk:\n  match:\n    frobnicate: {}\n",
    );
    riskscript()
        .arg("check")
        .arg(&rule)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unexpected expression keyword"))
        .stderr(predicate::str::contains("frobnicate"));
}

#[test]
fn check_directory_reports_each_rule() {
    let dir = TempDir::new().unwrap();
    fixture(&dir, "a.yaml", CONFIDENTIALITY_RULE);
    fixture(
        &dir,
        "b.yml",
        "id: always\nrisk:\n  match:\n    return: true\n",
    );
    riskscript()
        .arg("check")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("ok: sensitive-asset"))
        .stdout(predicate::str::contains("ok: always"));
}

#[test]
fn check_json_output() {
    let dir = TempDir::new().unwrap();
    let rule = fixture(&dir, "rule.yaml", CONFIDENTIALITY_RULE);
    let assert = riskscript()
        .args(["--output", "json", "check"])
        .arg(&rule)
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(results[0]["id"], "sensitive-asset");
    assert_eq!(results[0]["status"], "ok");
}

#[test]
fn check_missing_file_exits_1() {
    riskscript()
        .args(["check", "/nonexistent/rule.yaml"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("could not read"));
}

// ──────────────────────────────────────────────
// 3. Run subcommand
// ──────────────────────────────────────────────

#[test]
fn run_prints_matching_risks_with_explanations() {
    let dir = TempDir::new().unwrap();
    let rule = fixture(&dir, "rule.yaml", CONFIDENTIALITY_RULE);
    let model = fixture(&dir, "model.yaml", MODEL_YAML);
    riskscript()
        .arg("run")
        .arg(&rule)
        .arg("--model")
        .arg(&model)
        .assert()
        .success()
        .stdout(predicate::str::contains("== sensitive-asset@db =="))
        .stdout(predicate::str::contains(
            "Risk 'Sensitive Technical Asset' has been flagged for technical asset 'db' because",
        ))
        .stdout(predicate::str::contains(
            "confidentiality of technical asset 'db' is greater than internal",
        ))
        .stdout(predicate::str::contains("'Severity' is 'elevated'"))
        .stdout(predicate::str::contains("sensitive-asset@cdn").not())
        .stdout(predicate::str::contains("1 risk(s) generated by 1 rule(s)"));
}

#[test]
fn run_json_model_and_json_output() {
    let dir = TempDir::new().unwrap();
    let rule = fixture(&dir, "rule.yaml", CONFIDENTIALITY_RULE);
    let model = fixture(
        &dir,
        "model.json",
        r#"{"technical_assets": {"vault": {"id": "vault", "confidentiality": "confidential"}}}"#,
    );
    let assert = riskscript()
        .args(["--output", "json", "run"])
        .arg(&rule)
        .arg("--model")
        .arg(&model)
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let reports: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let risk = &reports[0]["risks"][0];
    assert_eq!(risk["synthetic_id"], "sensitive-asset@vault");
    assert_eq!(risk["most_relevant_technical_asset"], "vault");
    assert_eq!(risk["fields"]["severity"], "elevated");
    assert!(reports[0]["failures"].as_array().unwrap().is_empty());
}

#[test]
fn run_reports_subject_failures_and_exits_1() {
    let dir = TempDir::new().unwrap();
    let rule = fixture(&dir, "rule.yaml", CONFIDENTIALITY_RULE);
    let model = fixture(
        &dir,
        "model.yaml",
        "technical_assets:\n  odd:\n    confidentiality: top-secret\n  db:\n    confidentiality: confidential\n",
    );
    riskscript()
        .arg("run")
        .arg(&rule)
        .arg("--model")
        .arg(&model)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("== sensitive-asset@db =="))
        .stderr(predicate::str::contains("failed for technical asset 'odd'"))
        .stderr(predicate::str::contains("unknown confidentiality value \"top-secret\""));
}

#[test]
fn run_honours_call_depth_from_config() {
    let dir = TempDir::new().unwrap();
    let rule = fixture(
        &dir,
        "rule.yaml",
        r#"
id: recursive
title: Recursive
risk:
  utils:
    forever:
      do:
        return: forever()
  match:
    return: forever()
"#,
    );
    let model = fixture(&dir, "model.yaml", MODEL_YAML);
    let config = fixture(&dir, "riskscript.toml", "[eval]\nmax_call_depth = 4\n");
    riskscript()
        .arg("run")
        .arg(&rule)
        .arg("--model")
        .arg(&model)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("call depth limit of 4 exceeded"));
}

#[test]
fn run_quiet_suppresses_output() {
    let dir = TempDir::new().unwrap();
    let rule = fixture(&dir, "rule.yaml", CONFIDENTIALITY_RULE);
    let model = fixture(&dir, "model.yaml", MODEL_YAML);
    riskscript()
        .args(["--quiet", "run"])
        .arg(&rule)
        .arg("--model")
        .arg(&model)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn run_invalid_model_exits_1() {
    let dir = TempDir::new().unwrap();
    let rule = fixture(&dir, "rule.yaml", CONFIDENTIALITY_RULE);
    let model = fixture(&dir, "model.json", "{not json");
    riskscript()
        .arg("run")
        .arg(&rule)
        .arg("--model")
        .arg(&model)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid JSON"));
}
