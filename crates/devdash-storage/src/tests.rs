//! Tests for devdash storage backends

use super::*;
use devdash_mapping::catalog::{worktree_apps, worktree_pipelines};
use devdash_mapping::{AppName, MappingEditor, PipelineId, WorktreeId};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

fn test_store() -> PostgrestStore {
    PostgrestStore::new(&PostgrestConfig::new("https://demo.supabase.co", "secret")).unwrap()
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_env_lookup_prefers_first_non_empty() {
    let config = PostgrestConfig::from_lookup(lookup(&[
        ("SUPABASE_URL", ""),
        ("CLI_SUPABASE_URL", "https://cli.supabase.co"),
        ("SUPABASE_SERVICE_ROLE_KEY", "service"),
        ("SUPABASE_KEY", "anon"),
    ]))
    .unwrap();

    assert_eq!(config.url, "https://cli.supabase.co");
    assert_eq!(config.api_key, "service");
    assert_eq!(config.timeout_secs, 30);
}

#[test]
fn test_env_lookup_falls_back_to_cli_key() {
    let config = PostgrestConfig::from_lookup(lookup(&[
        ("SUPABASE_URL", "https://demo.supabase.co"),
        ("CLI_SUPABASE_KEY", "cli-key"),
    ]))
    .unwrap();
    assert_eq!(config.api_key, "cli-key");
}

#[test]
fn test_env_lookup_missing_key() {
    let err = PostgrestConfig::from_lookup(lookup(&[("SUPABASE_URL", "https://demo.supabase.co")]))
        .unwrap_err();
    match err {
        ConfigError::MissingEnv(names) => assert!(names.contains("SUPABASE_SERVICE_ROLE_KEY")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_debug_redacts_api_key() {
    let config = PostgrestConfig::new("https://demo.supabase.co", "top-secret");
    let debug = format!("{config:?}");
    assert!(!debug.contains("top-secret"));
    assert!(debug.contains("redacted"));
}

#[test]
fn test_rest_base() {
    let base = PostgrestConfig::new("https://demo.supabase.co/", "k")
        .rest_base()
        .unwrap();
    assert_eq!(base.as_str(), "https://demo.supabase.co/rest/v1/");

    let err = PostgrestConfig::new("ftp://demo", "k").rest_base().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    assert!(PostgrestConfig::new("not a url", "k").rest_base().is_err());
}

#[test]
fn test_store_spec_parse() {
    assert_eq!(StoreSpec::parse("postgrest").unwrap(), StoreSpec::Postgrest);
    assert_eq!(StoreSpec::parse(" Memory ").unwrap(), StoreSpec::Memory);
    assert_eq!(
        "file:/tmp/map.json".parse::<StoreSpec>().unwrap(),
        StoreSpec::File("/tmp/map.json".into())
    );
    assert!(StoreSpec::parse("file:").is_err());
    assert!(StoreSpec::parse("mysql").is_err());
    assert_eq!(StoreSpec::File("a.json".into()).to_string(), "file:a.json");
}

#[test]
fn test_backend_config_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("devdash.json");
    std::fs::write(
        &path,
        json!({
            "store": "postgrest",
            "postgrest": { "url": "https://demo.supabase.co", "api_key": "k", "timeout_secs": 5 }
        })
        .to_string(),
    )
    .unwrap();

    let config = BackendConfig::load(&path).unwrap();
    assert_eq!(config.store, StoreSpec::Postgrest);
    assert_eq!(config.postgrest().unwrap().timeout_secs, 5);

    std::fs::write(&path, r#"{"store": "sqlite"}"#).unwrap();
    assert!(BackendConfig::load(&path).is_err());
}

#[test]
fn test_open_backend() {
    let memory = BackendConfig {
        store: StoreSpec::Memory,
        postgrest: None,
    };
    assert_eq!(open_backend(&memory).unwrap().kind(), "memory");

    let unconfigured = BackendConfig {
        store: StoreSpec::Postgrest,
        postgrest: None,
    };
    assert!(open_backend(&unconfigured).is_err());

    let configured = BackendConfig {
        store: StoreSpec::Postgrest,
        postgrest: Some(PostgrestConfig::new("https://demo.supabase.co", "k")),
    };
    assert_eq!(open_backend(&configured).unwrap().kind(), "postgrest");
}

// ============================================================================
// PostgREST wire format
// ============================================================================

#[test]
fn test_list_url() {
    let url = test_store()
        .with_page_size(500)
        .list_url(&worktree_apps(), 1500)
        .unwrap();
    assert_eq!(
        url.as_str(),
        "https://demo.supabase.co/rest/v1/worktree_app_mappings\
         ?select=worktree_id%2Capp_name&order=worktree_id%2Capp_name&limit=500&offset=1500"
    );
}

#[test]
fn test_content_range_total() {
    assert_eq!(postgrest::content_range_total("0-999/1234"), Some(1234));
    assert_eq!(postgrest::content_range_total("*/0"), Some(0));
    assert_eq!(postgrest::content_range_total("0-999/*"), None);
    assert_eq!(postgrest::content_range_total("garbage"), None);
}

#[test]
fn test_match_url_filters_both_columns() {
    let worktree = WorktreeId::new_v4();
    let url = test_store()
        .match_url(&worktree_apps(), &worktree, &AppName::new("web"))
        .unwrap();
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(
        pairs,
        vec![
            ("worktree_id".to_string(), format!("eq.{worktree}")),
            ("app_name".to_string(), "eq.web".to_string()),
        ]
    );
}

#[test]
fn test_insert_body() {
    let worktree = WorktreeId::new_v4();
    let pipeline = PipelineId::new_v4();
    let body = postgrest::insert_body(&worktree_pipelines(), &worktree, &pipeline);
    assert_eq!(
        body,
        json!({ "worktree_id": worktree.to_string(), "pipeline_id": pipeline.to_string() })
    );
}

#[test]
fn test_error_message() {
    let body = r#"{"code":"23505","message":"duplicate key value","details":"Key exists."}"#;
    assert_eq!(
        postgrest::error_message(body),
        "duplicate key value (Key exists.)"
    );
    assert_eq!(
        postgrest::error_message(r#"{"message":"permission denied"}"#),
        "permission denied"
    );
    assert_eq!(postgrest::error_message("  Bad Gateway "), "Bad Gateway");
    assert_eq!(postgrest::error_message(""), "empty response");
}

#[test]
fn test_decode_rows() {
    let relation = devdash_mapping::Relation::<String, i64>::new("t", "name", "n").unwrap();
    let rows = vec![json!({"name": "a", "n": 1}), json!({"name": "b", "n": "2"})];
    let tuples = postgrest::decode_rows(&relation, &rows).unwrap();
    assert_eq!(tuples.len(), 2);
    assert_eq!(tuples[1].right, 2);

    let missing = vec![json!({"name": "a"})];
    assert!(matches!(
        postgrest::decode_rows(&relation, &missing),
        Err(StoreError::Decode(_))
    ));

    let bad = vec![json!({"name": "a", "n": true})];
    assert!(postgrest::decode_rows(&relation, &bad).is_err());

    let invalid_uuid = vec![json!({"worktree_id": "nope", "app_name": "web"})];
    assert!(postgrest::decode_rows(&worktree_apps(), &invalid_uuid).is_err());
}

// ============================================================================
// PostgREST over HTTP
// ============================================================================

/// One canned HTTP response.
struct Reply {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl Reply {
    fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    fn render(&self) -> String {
        let mut out = format!(
            "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            self.body.len()
        );
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|len| len.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serve `replies` in order, one connection each, and hand back the raw
/// requests once they are all answered.
async fn fake_postgrest(
    replies: Vec<Reply>,
) -> (PostgrestStore, tokio::task::JoinHandle<Vec<String>>) {
    use tokio::io::AsyncWriteExt;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let mut requests = Vec::new();
        for reply in replies {
            let (mut socket, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut socket).await);
            socket.write_all(reply.render().as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
        requests
    });
    let config = PostgrestConfig::new(&format!("http://{addr}"), "secret");
    (PostgrestStore::new(&config).unwrap(), server)
}

fn simple_relation() -> devdash_mapping::Relation<String, String> {
    devdash_mapping::Relation::new("worktree_app_mappings", "worktree_id", "app_name").unwrap()
}

#[tokio::test]
async fn test_postgrest_insert_sends_row_with_auth() {
    let (store, server) = fake_postgrest(vec![Reply::new(201, "")]).await;
    store
        .insert(&simple_relation(), &"w1".to_string(), &"web".to_string())
        .await
        .unwrap();

    let requests = server.await.unwrap();
    let request = &requests[0];
    let lower = request.to_lowercase();
    assert!(request.starts_with("POST /rest/v1/worktree_app_mappings HTTP/1.1"));
    assert!(lower.contains("apikey: secret"));
    assert!(lower.contains("authorization: bearer secret"));
    assert!(lower.contains("prefer: return=minimal"));
    let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
    let row: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(row, json!({ "worktree_id": "w1", "app_name": "web" }));
}

#[tokio::test]
async fn test_postgrest_delete_filters_both_columns() {
    let (store, server) = fake_postgrest(vec![Reply::new(204, "")]).await;
    store
        .delete(&simple_relation(), &"w1".to_string(), &"web".to_string())
        .await
        .unwrap();

    let requests = server.await.unwrap();
    assert!(requests[0]
        .starts_with("DELETE /rest/v1/worktree_app_mappings?worktree_id=eq.w1&app_name=eq.web HTTP/1.1"));
    assert!(requests[0].to_lowercase().contains("authorization: bearer secret"));
}

#[tokio::test]
async fn test_postgrest_conflict_is_rejected_with_message() {
    let body = r#"{"code":"23505","message":"duplicate key value violates unique constraint","details":"Key already exists."}"#;
    let (store, server) = fake_postgrest(vec![Reply::new(409, body)]).await;
    let err = store
        .insert(&simple_relation(), &"w1".to_string(), &"web".to_string())
        .await
        .unwrap_err();
    server.await.unwrap();

    match err {
        StoreError::Rejected { status, message } => {
            assert_eq!(status, 409);
            assert_eq!(
                message,
                "duplicate key value violates unique constraint (Key already exists.)"
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_postgrest_closed_port_is_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store =
        PostgrestStore::new(&PostgrestConfig::new(&format!("http://{addr}"), "secret")).unwrap();
    let err = RelationStore::<String, String>::list_committed(&store, &simple_relation())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
}

#[tokio::test]
async fn test_postgrest_list_walks_pages_until_total() {
    let (store, server) = fake_postgrest(vec![
        Reply::new(200, r#"[{"worktree_id":"w1","app_name":"a"},{"worktree_id":"w1","app_name":"b"}]"#)
            .header("Content-Range", "0-1/3"),
        Reply::new(200, r#"[{"worktree_id":"w2","app_name":"a"}]"#).header("Content-Range", "2-2/3"),
    ])
    .await;
    let store = store.with_page_size(2);

    let tuples = store.list_committed(&simple_relation()).await.unwrap();
    assert_eq!(tuples.len(), 3);
    assert_eq!(tuples[2], devdash_mapping::RelationTuple::new("w2".to_string(), "a".to_string()));

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].contains("order=worktree_id%2Capp_name&limit=2&offset=0 "));
    assert!(requests[1].contains("limit=2&offset=2 "));
    assert!(requests[0].to_lowercase().contains("prefer: count=exact"));
}

#[tokio::test]
async fn test_postgrest_list_without_count_stops_on_short_page() {
    let (store, server) = fake_postgrest(vec![
        Reply::new(200, r#"[{"worktree_id":"w1","app_name":"a"},{"worktree_id":"w1","app_name":"b"}]"#)
            .header("Content-Range", "0-1/*"),
        Reply::new(200, "[]").header("Content-Range", "*/*"),
    ])
    .await;
    let store = store.with_page_size(2);

    let tuples = store.list_committed(&simple_relation()).await.unwrap();
    assert_eq!(tuples.len(), 2);
    assert_eq!(server.await.unwrap().len(), 2);
}

// ============================================================================
// JSON file store
// ============================================================================

#[tokio::test]
async fn test_file_store_missing_file_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::new(dir.path().join("absent.json"));
    let tuples = RelationStore::<WorktreeId, AppName>::list_committed(&store, &worktree_apps())
        .await
        .unwrap();
    assert!(tuples.is_empty());
}

#[tokio::test]
async fn test_file_store_insert_delete_persist() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("mappings.json");
    let relation = worktree_apps();
    let worktree = WorktreeId::new_v4();

    let store = JsonFileStore::new(&path);
    store.insert(&relation, &worktree, &AppName::new("web")).await.unwrap();
    store.insert(&relation, &worktree, &AppName::new("api")).await.unwrap();
    store.insert(&relation, &worktree, &AppName::new("api")).await.unwrap();
    store.delete(&relation, &worktree, &AppName::new("web")).await.unwrap();

    let reopened = JsonFileStore::new(&path);
    let tuples = reopened.list_committed(&relation).await.unwrap();
    assert_eq!(tuples.len(), 1);
    assert_eq!(tuples[0].left, worktree);
    assert_eq!(tuples[0].right, AppName::new("api"));

    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    assert!(!std::path::Path::new(&tmp).exists());
}

#[tokio::test]
async fn test_file_store_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mappings.json");
    std::fs::write(&path, "{ not json").unwrap();

    let store = JsonFileStore::new(&path);
    let err = RelationStore::<WorktreeId, AppName>::list_committed(&store, &worktree_apps())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Decode(_)));
}

#[tokio::test]
async fn test_editor_over_file_backend() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mappings.json");
    let backend = Arc::new(
        open_backend(&BackendConfig {
            store: StoreSpec::File(path.clone()),
            postgrest: None,
        })
        .unwrap(),
    );
    let worktree = WorktreeId::new_v4();

    let editor: MappingEditor<WorktreeId, AppName> =
        MappingEditor::new(worktree_apps(), backend.clone());
    editor.load().await.unwrap();
    editor.toggle(worktree, AppName::new("web")).unwrap();
    let report = editor.save().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.inserted.len(), 1);

    let fresh: MappingEditor<WorktreeId, AppName> = MappingEditor::new(worktree_apps(), backend);
    fresh.load().await.unwrap();
    assert!(fresh.is_effectively_member(&worktree, &AppName::new("web")));
    assert!(!fresh.has_unsaved_changes());
}
