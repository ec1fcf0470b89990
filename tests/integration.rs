use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const CHAT_ID: &str = "-1001234567890";

fn chidx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("chidx");
    path
}

fn write_export(path: &Path) {
    let now = chrono::Utc::now().timestamp();
    let messages: Vec<serde_json::Value> = (1..=6)
        .map(|id| {
            let text = match id {
                2 => serde_json::json!(["내일 ", {"type": "bold", "text": "회의록"}, " 공유 부탁드립니다"]),
                4 => serde_json::json!(""),
                _ => serde_json::json!(format!("배포 일정 메시지 {}", id)),
            };
            serde_json::json!({
                "id": id,
                "type": if id == 5 { "service" } else { "message" },
                "date_unixtime": (now - 3600 * (10 - id)).to_string(),
                "from_id": "user42",
                "text": text,
            })
        })
        .collect();

    let export = serde_json::json!({
        "name": "개발팀",
        "type": "private_supergroup",
        "id": 1234567890i64,
        "messages": messages,
    });
    fs::write(path, serde_json::to_string_pretty(&export).unwrap()).unwrap();
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let export_dir = root.join("export");
    fs::create_dir_all(&export_dir).unwrap();
    write_export(&export_dir.join("result.json"));

    let config_content = format!(
        r#"[db]
path = "{}/data/messages.sqlite"

[ingest]
batch_size = 2
connect_backoff_ms = 1

[source]
export_path = "{}/export/result.json"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("chidx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_chidx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = chidx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run chidx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn index(config: &Path) {
    let (_, stderr, success) = run_chidx(config, &["index", "--chat-id", CHAT_ID, "--quiet"]);
    assert!(success, "index failed: {}", stderr);
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, _, success) = run_chidx(&config, &["init"]);
    assert!(success);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/messages.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (_, _, first) = run_chidx(&config, &["init"]);
    let (_, _, second) = run_chidx(&config, &["init"]);
    assert!(first && second);
}

#[test]
fn test_chats_table() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_chidx(&config, &["chats", "--format", "table"]);
    assert!(success, "chats failed: {}", stderr);
    assert!(stdout.contains(CHAT_ID));
    assert!(stdout.contains("supergroup"));
    assert!(stdout.contains("Total: 1 chats"));
}

#[test]
fn test_index_then_stats() {
    let (_tmp, config) = setup_test_env();
    index(&config);

    let (stdout, _, success) = run_chidx(&config, &["stats"]);
    assert!(success);
    assert!(stdout.contains(CHAT_ID));
    assert!(stdout.contains("Messages:    4"));
}

#[test]
fn test_index_json_progress_events() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_chidx(
        &config,
        &["index", "--chat-id", CHAT_ID, "--json-progress"],
    );
    assert!(success, "index failed: {}", stderr);

    let events: Vec<serde_json::Value> = stderr
        .lines()
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();
    assert_eq!(events.first().unwrap()["type"], "start");
    let last = events.last().unwrap();
    assert_eq!(last["type"], "complete");
    assert_eq!(last["total"], 4);
    assert!(events
        .iter()
        .any(|e| e["type"] == "progress" && e["total"].is_null()));
}

#[test]
fn test_index_twice_adds_nothing() {
    let (_tmp, config) = setup_test_env();
    index(&config);
    index(&config);

    let (stdout, _, _) = run_chidx(&config, &["search", "메시지", "--json"]);
    let v: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(v["count"], 3);
}

#[test]
fn test_search_json() {
    let (_tmp, config) = setup_test_env();
    index(&config);

    let (stdout, stderr, success) = run_chidx(&config, &["search", "회의록", "--json"]);
    assert!(success, "search failed: {}", stderr);
    let v: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(v["count"], 1);
    let hit = &v["results"][0];
    assert_eq!(hit["id"], 2);
    assert_eq!(hit["text"], "내일 회의록 공유 부탁드립니다");
    assert_eq!(hit["link"], "tg://privatepost?channel=1234567890&post=2");
}

#[test]
fn test_search_newest_first() {
    let (_tmp, config) = setup_test_env();
    index(&config);

    let (stdout, _, success) = run_chidx(&config, &["search", "배포 일정", "--json"]);
    assert!(success);
    let v: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let ids: Vec<i64> = v["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![6, 3, 1]);
}

#[test]
fn test_search_human_output() {
    let (_tmp, config) = setup_test_env();
    index(&config);

    let (stdout, _, success) = run_chidx(&config, &["search", "회의록"]);
    assert!(success);
    assert!(stdout.contains("Found 1 result(s)"));
    assert!(stdout.contains("\x1b[1;33m회의록\x1b[0m"));
}

#[test]
fn test_search_query_too_short() {
    let (_tmp, config) = setup_test_env();
    index(&config);

    let (stdout, _, success) = run_chidx(&config, &["search", "회의", "--json"]);
    assert!(!success);
    let v: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(v["code"], "QUERY_TOO_SHORT");
}

#[test]
fn test_search_before_index() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_chidx(&config, &["search", "회의록", "--json"]);
    assert!(!success);
    let v: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(v["code"], "DB_NOT_FOUND");
}

#[test]
fn test_index_without_chat_id() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_chidx(&config, &["index", "--json-progress"]);
    assert!(!success);
    assert!(stderr.contains("\"code\":\"CONFIG_ERROR\""));

    let (_, stderr, success) = run_chidx(&config, &["index", "--quiet"]);
    assert!(!success);
    assert!(stderr.contains("CONFIG_ERROR"));
}

#[test]
fn test_index_unknown_chat() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_chidx(&config, &["index", "--chat-id", "42", "--quiet"]);
    assert!(!success);
    assert!(stderr.contains("SOURCE_ERROR"));
}

#[test]
fn test_replicate_requires_replica_section() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_chidx(&config, &["replicate", "--quiet"]);
    assert!(!success);
    assert!(stderr.contains("CONFIG_ERROR"));
}

#[test]
fn test_missing_config_file() {
    let (tmp, _) = setup_test_env();
    let (_, stderr, success) = run_chidx(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("CONFIG_ERROR"));
}
