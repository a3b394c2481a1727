use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;

use recast_test::{SnapshotFile, load_snapshot, pricing, rectangle, resolve};

fn recast() -> Command {
    let mut cmd = Command::cargo_bin("recast").unwrap();
    cmd.env_remove("RECAST_CONFIG").env_remove("RUST_LOG");
    cmd
}

// ── Catalog ──────────────────────────────────────────────────────

#[test]
fn list_prints_every_recipe_as_json() {
    let output = recast().args(["list", "--format", "json"]).output().unwrap();
    assert!(output.status.success());
    let entries: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(entries.len(), 71);
    assert!(entries.iter().all(|e| e["category"].is_string()));
}

#[test]
fn list_filters_by_category_and_glob() {
    recast()
        .args(["list", "--category", "generalization", "--filter", "Pull*"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PullUpField"))
        .stdout(predicate::str::contains("PullUpConstructorBody"))
        .stdout(predicate::str::contains("PushDownField").not())
        .stdout(predicate::str::contains("3 refactorings"));
}

#[test]
fn list_rejects_an_unknown_category() {
    recast()
        .args(["list", "--category", "astrology"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("unknown category"));
}

#[test]
fn show_describes_a_recipe() {
    recast()
        .args(["show", "replace temp with query"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Replace Temp with Query (ReplaceTempWithQuery)"))
        .stdout(predicate::str::contains("a local variable"))
        .stdout(predicate::str::contains("SplitTemporaryVariable"));
}

#[test]
fn show_unknown_recipe_exits_4() {
    recast()
        .args(["show", "Frobnicate"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Unknown refactoring: Frobnicate"));
}

#[test]
fn disabled_recipe_is_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("recast.toml");
    std::fs::write(&config, "[registry]\ndisabled = [\"SubstituteAlgorithm\"]\n").unwrap();
    recast()
        .arg("--config")
        .arg(&config)
        .args(["show", "SubstituteAlgorithm"])
        .assert()
        .code(4);
}

// ── Check ────────────────────────────────────────────────────────

#[test]
fn check_accepts_and_rejects() {
    let model = SnapshotFile::write(&pricing());
    recast()
        .arg("check")
        .arg(model.path())
        .args(["ReplaceTempWithQuery", "billing::Order::price::basePrice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is applicable"));

    recast()
        .arg("check")
        .arg(model.path())
        .args(["ReplaceTempWithQuery", "billing::Order::price::discountFactor"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("assigned more than once"))
        .stdout(predicate::str::contains("Try SplitTemporaryVariable first."));
}

#[test]
fn check_prints_json_verdicts() {
    let model = SnapshotFile::write(&pricing());
    let output = recast()
        .arg("check")
        .arg(model.path())
        .args(["InlineTemp", "billing::Order::price::discountFactor", "--format", "json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let verdict: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(verdict["verdict"], "rejected");
}

// ── Apply ────────────────────────────────────────────────────────

#[test]
fn apply_writes_model_and_log() {
    let model = SnapshotFile::write(&pricing());
    let out = model.sibling("out.json");
    let log = model.sibling("log.json");
    recast()
        .arg("apply")
        .arg(model.path())
        .args(["ReplaceTempWithQuery", "billing::Order::price::basePrice"])
        .arg("--output")
        .arg(&out)
        .arg("--log")
        .arg(&log)
        .assert()
        .success()
        .stderr(predicate::str::contains("ReplaceTempWithQuery committed"));

    let refactored = load_snapshot(&out).unwrap();
    resolve(&refactored, "billing::Order::basePrice");

    let log: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&log).unwrap()).unwrap();
    assert_eq!(log["recipe"], "ReplaceTempWithQuery");
    assert!(!log["entries"].as_array().unwrap().is_empty());
}

#[test]
fn apply_with_params_prints_model_to_stdout() {
    let model = SnapshotFile::write(&pricing());
    let output = recast()
        .arg("apply")
        .arg(model.path())
        .args(["RenameMethod", "billing::Order::price", "-p", "name=total", "-q"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    let reloaded: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(reloaded["symbols"].as_array().unwrap().iter().any(|s| s["name"] == "total"));
}

#[test]
fn verbose_apply_logs_the_commit() {
    let model = SnapshotFile::write(&pricing());
    recast()
        .arg("apply")
        .arg(model.path())
        .args(["RenameMethod", "billing::Order::price", "-p", "name=total", "-v"])
        .assert()
        .success()
        .stderr(predicate::str::contains("model loaded").not())
        .stderr(predicate::str::contains("refactoring committed"));

    recast()
        .arg("apply")
        .arg(model.path())
        .args(["RenameMethod", "billing::Order::price", "-p", "name=total", "-vv"])
        .assert()
        .success()
        .stderr(predicate::str::contains("model loaded"));
}

#[test]
fn default_verbosity_keeps_info_events_quiet() {
    let model = SnapshotFile::write(&pricing());
    recast()
        .arg("apply")
        .arg(model.path())
        .args(["RenameMethod", "billing::Order::price", "-p", "name=total"])
        .assert()
        .success()
        .stderr(predicate::str::contains("refactoring committed").not());
}

#[test]
fn apply_to_missing_target_exits_1() {
    let model = SnapshotFile::write(&pricing());
    recast()
        .arg("apply")
        .arg(model.path())
        .args(["InlineTemp", "billing::Order::nowhere"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Target not found"));
}

// ── Batch ────────────────────────────────────────────────────────

fn split_and_replace(model: &SnapshotFile) -> std::path::PathBuf {
    let requests = json!([
        {"recipe": "SplitTemporaryVariable", "target": "geometry::Rect::report::temp"},
        {"recipe": "ReplaceTempWithQuery", "target": "geometry::Rect::report::temp"},
        {"recipe": "ReplaceTempWithQuery", "target": "geometry::Rect::report::temp2",
         "params": {"name": "area"}},
    ]);
    let path = model.sibling("requests.json");
    std::fs::write(&path, requests.to_string()).unwrap();
    path
}

#[test]
fn batch_applies_requests_in_order() {
    let model = SnapshotFile::write(&rectangle());
    let requests = split_and_replace(&model);
    let out = model.sibling("out.json");
    recast()
        .arg("batch")
        .arg(model.path())
        .arg(&requests)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("3 refactorings committed"));

    let refactored = load_snapshot(&out).unwrap();
    resolve(&refactored, "geometry::Rect::temp");
    resolve(&refactored, "geometry::Rect::area");
}

#[test]
fn batch_dry_run_checks_against_the_original_model() {
    let model = SnapshotFile::write(&rectangle());
    let requests = split_and_replace(&model);
    recast()
        .arg("batch")
        .arg(model.path())
        .arg(&requests)
        .arg("--dry-run")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("ok        SplitTemporaryVariable"))
        .stderr(predicate::str::contains("request 2"));
}

// ── Usage ────────────────────────────────────────────────────────

#[test]
fn missing_model_exits_10() {
    recast()
        .args(["check", "/nonexistent/model.json", "InlineTemp", "a::b"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("Cannot read model"));
}

#[test]
fn usage_errors_exit_10() {
    recast().arg("apply").assert().code(10);
    recast().arg("--version").assert().success();
}
