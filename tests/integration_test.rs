//! Integration tests for folo.
//!
//! These tests verify end-to-end functionality including:
//! - Governed transport against a local scripted HTTP server
//! - Store persistence, search, and export over real tempdir files

use folo::api::{ApiClient, RelationAct};
use folo::config::{ApiConfig, Config, PacingConfig, SessionConfig};
use folo::error::FoloError;
use folo::export;
use folo::governor::Governor;
use folo::model::FollowedUser;
use folo::search::SearchService;
use folo::store::RelationStore;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

// =============================================================================
// Scripted HTTP server
// =============================================================================

/// Serve each canned JSON body once, in order, then stop. Returns the
/// bound address and a handle resolving to the number of requests
/// actually served.
async fn serve_envelopes(bodies: Vec<String>) -> (SocketAddr, JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut served = 0;
        for body in bodies {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            served += 1;
        }
        served
    });

    (addr, handle)
}

fn fast_pacing() -> PacingConfig {
    PacingConfig {
        enabled: true,
        min_delay_ms: 1,
        max_delay_ms: 2,
        max_retries: 3,
        base_backoff_ms: 1,
    }
}

fn test_client(addr: SocketAddr, pacing: &PacingConfig) -> ApiClient {
    let api = ApiConfig {
        base_url: format!("http://{addr}"),
        ..ApiConfig::default()
    };
    let mut session = SessionConfig::default();
    session
        .cookies
        .insert("DedeUserID".to_string(), "777".to_string());
    session
        .cookies
        .insert("bili_jct".to_string(), "csrf-token".to_string());

    ApiClient::new(&api, session, Arc::new(Governor::new(pacing))).unwrap()
}

fn envelope(code: i64, data: &str) -> String {
    format!(r#"{{"code":{code},"message":"","data":{data}}}"#)
}

// =============================================================================
// Transport
// =============================================================================

#[tokio::test]
async fn risk_control_exhausts_retry_budget_after_four_attempts() {
    let bodies = vec![envelope(-352, "null"); 4];
    let (addr, handle) = serve_envelopes(bodies).await;
    let client = test_client(addr, &fast_pacing());

    let err = client.following_page(1, 50).await.unwrap_err();
    match err {
        FoloError::RetriesExhausted { attempts } => assert_eq!(attempts, 4),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(handle.await.unwrap(), 4);
}

#[tokio::test]
async fn unauthenticated_fails_without_retry() {
    let bodies = vec![envelope(-101, "null"); 2];
    let (addr, handle) = serve_envelopes(bodies).await;
    let client = test_client(addr, &fast_pacing());

    let err = client.following_page(1, 50).await.unwrap_err();
    assert!(matches!(err, FoloError::Unauthenticated { code: -101 }));

    // Exactly one request went out; release the server with a throwaway
    // call so the handle resolves.
    let _ = client.account_info().await;
    assert_eq!(handle.await.unwrap(), 2);
}

#[tokio::test]
async fn following_page_decodes_wire_entries() {
    let data = r#"{"total": 2, "list": [
        {"mid": 101, "uname": "Ann", "sign": "rust streams", "mtime": 1700000000},
        {"mid": 102, "uname": "Anna", "sign": "", "mtime": 0}
    ]}"#;
    let (addr, handle) = serve_envelopes(vec![envelope(0, data)]).await;
    let client = test_client(addr, &fast_pacing());

    let page = client.following_page(1, 50).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.list.len(), 2);

    let users: Vec<FollowedUser> = page.list.into_iter().map(Into::into).collect();
    assert_eq!(users[0].id, "101");
    assert_eq!(users[0].bio, "rust streams");
    assert_eq!(users[1].followed_at, None);
    assert_eq!(handle.await.unwrap(), 1);
}

#[tokio::test]
async fn modify_relation_accepts_already_in_state() {
    let (addr, handle) = serve_envelopes(vec![envelope(22015, "null")]).await;
    let client = test_client(addr, &fast_pacing());

    client
        .modify_relation("101", RelationAct::Unfollow)
        .await
        .unwrap();
    assert_eq!(handle.await.unwrap(), 1);
}

// =============================================================================
// Store + search + export pipeline
// =============================================================================

fn user(id: &str, name: &str, bio: &str) -> FollowedUser {
    FollowedUser {
        id: id.to_string(),
        display_name: name.to_string(),
        bio: bio.to_string(),
        followed_at: Some(1_700_000_000),
        avatar_ref: String::new(),
        badges: BTreeMap::new(),
    }
}

#[test]
fn mirror_survives_reopen_and_stays_searchable() {
    let dir = TempDir::new().unwrap();

    {
        let store = RelationStore::open(dir.path()).unwrap();
        store.replace_all(vec![
            user("1", "Ann", "rust streams"),
            user("2", "Anna", "cooking videos"),
            user("3", "Bea", "rust compilers"),
        ]);
        store.persist().unwrap();
    }

    let store = RelationStore::open(dir.path()).unwrap();
    let snapshot = store.snapshot();
    assert_eq!(snapshot.total_count, 3);

    let service = SearchService::open(dir.path());
    let page = service.search(&snapshot, "rust", false, 1, 20);
    assert_eq!(page.total, 2);

    let prefix = service.search(&snapshot, "an", false, 1, 20);
    let ids: Vec<&str> = prefix.results.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, ["1", "2"]);
}

#[test]
fn export_round_trips_through_import() {
    let dir = TempDir::new().unwrap();
    let store = RelationStore::open(dir.path()).unwrap();
    store.replace_all(vec![user("1", "Ann", "bio"), user("2", "Bea", "")]);

    let path = export::export_snapshot(&store.snapshot(), dir.path()).unwrap();
    let imported = export::import_users(&path).unwrap();

    assert_eq!(imported.len(), 2);
    assert_eq!(imported[0].id, "1");
    assert_eq!(imported[0].display_name, "Ann");
    assert_eq!(imported[1].followed_at, Some(1_700_000_000));
}

#[test]
fn search_history_is_shared_across_sessions() {
    let dir = TempDir::new().unwrap();
    let store = RelationStore::open(dir.path()).unwrap();
    store.replace_all(vec![user("1", "Ann", "")]);
    let snapshot = store.snapshot();

    {
        let service = SearchService::open(dir.path());
        service.search(&snapshot, "ann", false, 1, 20);
        service.search(&snapshot, "bea", false, 1, 20);
    }

    let service = SearchService::open(dir.path());
    assert_eq!(service.history(10), vec!["bea", "ann"]);
}

#[test]
fn default_config_content_parses_back() {
    let content = Config::default_config_content();
    let parsed: Config = toml::from_str(&content).unwrap();
    assert_eq!(parsed.sync.page_size, 50);
    assert!(parsed.pacing.enabled);
}
