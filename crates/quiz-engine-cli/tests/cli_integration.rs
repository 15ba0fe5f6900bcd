use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", ulid::Ulid::new()));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_qz<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_qz"))
        .args(args)
        .env_remove("QUIZ_ENGINE_DB")
        .env_remove("QUIZ_ENGINE_SEED")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute qz binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_qz(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "qz command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn payload_len(value: &Value) -> usize {
    value
        .get("payload")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or_else(|| panic!("expected array payload: {value}"))
}

/// Seeds one category with `count` items and returns their ids.
fn seed_catalog(db: &str, count: usize) -> (i64, Vec<i64>) {
    let category = run_json(["--db", db, "category", "add", "--name", "valvular"]);
    let category_id = as_i64(&category, "id");
    let category_arg = category_id.to_string();

    let mut item_ids = Vec::new();
    for index in 1..=count {
        let media = format!("audio/valve-{index}.mp3");
        let answer = format!("valve sound {index}");
        let item = run_json([
            "--db",
            db,
            "item",
            "add",
            "--media",
            media.as_str(),
            "--answer",
            answer.as_str(),
            "--category",
            category_arg.as_str(),
        ]);
        item_ids.push(as_i64(&item, "id"));
    }
    (category_id, item_ids)
}

// Test IDs: TCLI-001
#[test]
fn db_schema_version_and_migrate_report_contract_version() {
    let dir = unique_temp_dir("quiz-engine-cli-db");
    let db = dir.join("quiz.sqlite3");
    let db = path_str(&db);

    let before = run_json(["--db", db, "db", "schema-version"]);
    assert_eq!(as_str(&before, "contract_version"), "cli.v1");
    assert_eq!(as_i64(&before, "current_version"), 0);

    let plan = run_json(["--db", db, "db", "migrate", "--dry-run"]);
    assert_eq!(plan.get("dry_run").and_then(Value::as_bool), Some(true));

    let applied = run_json(["--db", db, "db", "migrate"]);
    assert_eq!(as_i64(&applied, "after_version"), 1);
    assert_eq!(applied.get("up_to_date").and_then(Value::as_bool), Some(true));

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLI-002
#[test]
fn catalog_and_category_exact_flow() {
    let dir = unique_temp_dir("quiz-engine-cli-catalog");
    let db = dir.join("quiz.sqlite3");
    let db = path_str(&db);
    let (category_id, _) = seed_catalog(db, 5);
    let category_arg = category_id.to_string();

    let categories = run_json(["--db", db, "category", "list"]);
    assert_eq!(payload_len(&categories), 1);

    let items = run_json(["--db", db, "item", "list", "--category", category_arg.as_str()]);
    assert_eq!(payload_len(&items), 5);

    let outcome = run_json([
        "--db",
        db,
        "--seed",
        "11",
        "strategy",
        "run",
        "category_exact",
        "--category",
        category_arg.as_str(),
    ]);
    assert_eq!(as_str(&outcome, "status"), "completed");
    assert_eq!(as_i64(&outcome, "itemCount"), 10);
    let items = outcome
        .get("items")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing items: {outcome}"));
    for item in items {
        let incorrect = item
            .get("incorrectAnswers")
            .and_then(Value::as_array)
            .unwrap_or_else(|| panic!("missing incorrectAnswers: {item}"));
        assert_eq!(incorrect.len(), 3);
        assert!(!incorrect.contains(&item["correctAnswer"]));
    }

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLI-003
#[test]
fn recorded_responses_drive_stats_and_rotation() {
    let dir = unique_temp_dir("quiz-engine-cli-responses");
    let db = dir.join("quiz.sqlite3");
    let db = path_str(&db);
    let (_, item_ids) = seed_catalog(db, 6);

    let first = format!("{}:incorrect", item_ids[0]);
    let second = format!("{}:correct", item_ids[1]);
    let recorded = run_json([
        "--db",
        db,
        "response",
        "record",
        "--learner",
        "3",
        "--result",
        first.as_str(),
        "--result",
        second.as_str(),
        "--at",
        "2026-03-01T09:00:00Z",
    ]);
    assert_eq!(as_i64(&recorded, "recorded"), 2);

    let stats = run_json(["--db", db, "learner", "stats", "--learner", "3"]);
    assert_eq!(as_i64(&stats, "attempts"), 2);
    assert_eq!(as_i64(&stats, "correct"), 1);

    let outcome =
        run_json(["--db", db, "strategy", "run", "unseen_or_stale", "--learner", "3"]);
    assert_eq!(as_str(&outcome, "status"), "completed");
    assert_eq!(as_str(&outcome, "selectionKind"), "mixed");
    assert_eq!(as_i64(&outcome, "unseenCount"), 4);
    assert_eq!(as_i64(&outcome, "staleCount"), 2);
    assert_eq!(as_i64(&outcome, "rotatedCount"), 2);

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLI-004
#[test]
fn strategy_errors_print_error_outcomes() {
    let dir = unique_temp_dir("quiz-engine-cli-errors");
    let db = dir.join("quiz.sqlite3");
    let db = path_str(&db);
    seed_catalog(db, 3);

    let missing = run_json(["--db", db, "strategy", "run", "past_correct"]);
    assert_eq!(as_str(&missing, "status"), "error");
    assert_eq!(as_str(&missing, "errorKind"), "validation");

    let small = run_json(["--db", db, "strategy", "run", "uniform_random"]);
    assert_eq!(as_str(&small, "errorKind"), "insufficient_data");
    assert!(as_str(&small, "message").contains("below_threshold"));

    let listed = run_json(["--db", db, "strategy", "list"]);
    assert_eq!(payload_len(&listed), 11);

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLI-005
#[test]
fn invalid_writes_exit_non_zero() {
    let dir = unique_temp_dir("quiz-engine-cli-invalid");
    let db = dir.join("quiz.sqlite3");
    let db = path_str(&db);
    seed_catalog(db, 4);

    let unknown_item =
        run_qz(["--db", db, "response", "record", "--learner", "1", "--result", "999:correct"]);
    assert!(!unknown_item.status.success());

    let bad_verdict =
        run_qz(["--db", db, "response", "record", "--learner", "1", "--result", "1:maybe"]);
    assert!(!bad_verdict.status.success());

    let self_pair = run_qz(["--db", db, "similarity", "items", "--a", "1", "--b", "1"]);
    assert!(!self_pair.status.success());

    let _ = fs::remove_dir_all(&dir);
}
