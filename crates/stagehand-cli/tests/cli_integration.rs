use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn stagehand() -> Command {
    let mut cmd = Command::cargo_bin("stagehand").unwrap();
    cmd.env_remove("RUST_LOG")
        .arg("--config")
        .arg(fixture_path("config.json"));
    cmd
}

#[test]
fn test_help_exits_zero() {
    Command::cargo_bin("stagehand")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("stagehand"));
}

#[test]
fn test_tree_prints_normalized_elements() {
    let assert = stagehand()
        .arg("tree")
        .arg(fixture_path("login.json"))
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.starts_with("window:0"), "{stdout}");
    assert!(stdout.contains("  textfield:0 [email] \"Email\""), "{stdout}");
    assert!(stdout.contains("securetextfield:0 [password]"), "{stdout}");
    assert!(stdout.contains("button:1 [help] \"Help\" (hidden)"), "{stdout}");
}

#[test]
fn test_tree_json_output() {
    let assert = stagehand()
        .args(["--format", "json", "tree"])
        .arg(fixture_path("home.json"))
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let elements: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let ids: Vec<&str> = elements
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["window:0", "statictext:0", "cell:0", "cell:1"]);
}

#[test]
fn test_query_matches_and_misses() {
    stagehand()
        .arg("query")
        .arg(fixture_path("login.json"))
        .arg("button[label^=Log]")
        .assert()
        .success()
        .stdout(predicate::str::contains("button:0 [login]"))
        .stdout(predicate::str::contains("help").not());

    stagehand()
        .arg("query")
        .arg(fixture_path("login.json"))
        .args(["Sign Up", "--using", "label"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no matches"));
}

#[test]
fn test_query_rejects_bad_selectors() {
    stagehand()
        .arg("query")
        .arg(fixture_path("login.json"))
        .arg("button[label")
        .assert()
        .code(2);

    stagehand()
        .arg("query")
        .arg(fixture_path("login.json"))
        .args(["login", "--using", "xpath"])
        .assert()
        .code(2);
}

#[test]
fn test_missing_snapshot_is_io_error() {
    stagehand()
        .arg("tree")
        .arg(fixture_path("nope.json"))
        .assert()
        .code(4)
        .stderr(predicate::str::contains("nope.json"));
}

#[test]
fn test_run_passing_test() {
    stagehand()
        .arg("run")
        .arg(fixture_path("assets"))
        .arg("smoke")
        .arg("--snapshot")
        .arg(fixture_path("login.json"))
        .arg("--snapshot")
        .arg(fixture_path("home.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("ok   storeAs user"))
        .stdout(predicate::str::contains("    ok   typeIn email"))
        .stdout(predicate::str::contains("ok   execute login"))
        .stdout(predicate::str::contains("ok   assertHasCount cell"))
        .stdout(predicate::str::contains("PASSED smoke"));
}

#[test]
fn test_run_failing_test_exits_one() {
    stagehand()
        .arg("run")
        .arg(fixture_path("assets"))
        .arg("broken")
        .arg("--snapshot")
        .arg(fixture_path("login.json"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILED broken"))
        .stderr(predicate::str::contains(
            "Should execute `broken`: Should find `Sign Up`: no elements were found after 1 attempts",
        ));
}

#[test]
fn test_run_retries_flag_overrides_config() {
    stagehand()
        .arg("run")
        .arg(fixture_path("assets"))
        .arg("broken")
        .args(["--retries", "3"])
        .arg("--snapshot")
        .arg(fixture_path("login.json"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("after 3 attempts"));
}

#[test]
fn test_run_malformed_asset_fails() {
    stagehand()
        .arg("run")
        .arg(fixture_path("assets"))
        .arg("malformed")
        .arg("--snapshot")
        .arg(fixture_path("login.json"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("test `malformed` is malformed"));
}

#[test]
fn test_run_resolves_module_assets() {
    stagehand()
        .arg("run")
        .arg(fixture_path("assets"))
        .arg("cart")
        .args(["--module", "checkout"])
        .arg("--snapshot")
        .arg(fixture_path("home.json"))
        .assert()
        .success();

    stagehand()
        .arg("run")
        .arg(fixture_path("assets"))
        .arg("cart")
        .arg("--snapshot")
        .arg(fixture_path("home.json"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("screen `cart` was not found"));
}

#[test]
fn test_run_json_journal() {
    let assert = stagehand()
        .args(["--format", "json", "run"])
        .arg(fixture_path("assets"))
        .arg("smoke")
        .arg("--snapshot")
        .arg(fixture_path("login.json"))
        .arg("--snapshot")
        .arg(fixture_path("home.json"))
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let records: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let last = records.last().unwrap();
    assert_eq!(last["verb"], "execute");
    assert_eq!(last["target"], "smoke");
    assert_eq!(last["verdict"], "passed");
    assert!(records.iter().all(|r| r["verdict"] == "passed"));
}

#[test]
fn test_run_requires_snapshots() {
    stagehand()
        .arg("run")
        .arg(fixture_path("assets"))
        .arg("smoke")
        .assert()
        .code(2);
}
