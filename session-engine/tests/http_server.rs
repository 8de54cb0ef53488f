//! Drives `HttpDiffServer` against a local axum app serving the webdiff
//! JSON endpoints.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};

use session_engine::server::{DiffServer, FileRequest, HttpDiffServer, RepoEntry, SessionId};
use session_engine::{SessionError, TransportError};

const FILES: usize = 2;
const COMMITS: usize = 30;

#[derive(Clone, Default)]
struct Recorded {
    file_queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    reload_bodies: Arc<Mutex<Vec<String>>>,
    no_cache_seen: Arc<AtomicBool>,
}

async fn file(
    State(rec): State<Recorded>,
    Path((_repo, idx)): Path<(usize, usize)>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    rec.file_queries.lock().unwrap().push(q.clone());
    if idx >= FILES {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Invalid index {idx}")})),
        )
            .into_response();
    }
    let truncated = q.get("no_truncate").map(String::as_str) != Some("1");
    Json(json!({
        "idx": idx,
        "thick": {"a": "a.txt", "b": "a.txt", "type": "change", "num_add": 1, "num_delete": 1},
        "truncated": truncated,
        "truncated_lines": if truncated { 1 } else { 0 },
        "truncated_bytes": if truncated { 1200 } else { 0 },
        "content_a": if truncated { Value::Null } else { json!("old\n") },
        "content_b": if truncated { Value::Null } else { json!("new\n") },
        "diff_ops": if truncated { json!([]) } else {
            json!([{"type": "replace", "before": [0, 1], "after": [0, 1]}])
        }
    }))
    .into_response()
}

async fn diff_changed(State(rec): State<Recorded>, headers: HeaderMap) -> Json<Value> {
    if headers
        .get(header::CACHE_CONTROL)
        .is_some_and(|v| v == "no-cache")
    {
        rec.no_cache_seen.store(true, Ordering::SeqCst);
    }
    Json(json!({"changed": true, "watch_enabled": true}))
}

async fn server_reload(
    State(rec): State<Recorded>,
    Path(repo): Path<usize>,
    body: Bytes,
) -> Response {
    rec.reload_bodies
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&body).into_owned());
    match repo {
        1 => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": "fatal: bad revision 'nope'"})),
        )
            .into_response(),
        2 => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        _ => Json(json!({"success": true, "message": "Reloaded"})).into_response(),
    }
}

async fn commits(Query(q): Query<HashMap<String, usize>>) -> Json<Value> {
    let limit = q.get("limit").copied().unwrap_or(25);
    let offset = q.get("offset").copied().unwrap_or(0);
    let end = (offset + limit).min(COMMITS);
    let page: Vec<Value> = (offset.min(COMMITS)..end)
        .map(|i| {
            let hash = format!("{i:02}{}", "ab".repeat(19));
            json!({
                "hash": &hash,
                "short_hash": &hash[..7],
                "message": format!("commit {i}"),
                "author": "Dev",
                "date": "2024-05-01T10:20:30+02:00",
                "relative": "1y ago"
            })
        })
        .collect();
    Json(json!({"commits": page, "branch": "main", "has_more": end < COMMITS}))
}

async fn files(Path(repo): Path<usize>) -> Json<Value> {
    if repo == 9 {
        return Json(json!({"changed": "not a list"}));
    }
    Json(json!({
        "changed": [{"path": "a.txt", "type": "change"}, {"path": "b.txt", "type": "add"}],
        "untracked": [{"path": "notes.txt", "size": 12}],
        "gitignored": []
    }))
}

async fn validate(Json(body): Json<Value>) -> Response {
    let path = body["path"].as_str().unwrap_or_default();
    if path.starts_with('/') {
        Json(json!({"valid": true, "label": body["label"], "path": path})).into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"valid": false, "error": "Path must be absolute"})),
        )
            .into_response()
    }
}

async fn update(Json(body): Json<Value>) -> Response {
    let repos = body["repos"].clone();
    if repos.as_array().is_some_and(|r| r.is_empty()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "At least one repository is required"})),
        )
            .into_response();
    }
    Json(json!({"success": true, "repos": repos})).into_response()
}

async fn spawn_server() -> (HttpDiffServer, Recorded) {
    let rec = Recorded::default();
    let app = Router::new()
        .route("/file/{repo}/{idx}", get(file))
        .route("/api/diff-changed/{repo}", get(diff_changed))
        .route("/api/server-reload/{repo}", post(server_reload))
        .route("/api/commits/{repo}", get(commits))
        .route("/api/files/{repo}", get(files))
        .route("/api/repos/validate", post(validate))
        .route("/api/repos/update", post(update))
        .with_state(rec.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = HttpDiffServer::new(&format!("http://{addr}/"), Duration::from_secs(5)).unwrap();
    (client, rec)
}

fn request(index: usize, no_truncate: bool) -> FileRequest {
    FileRequest {
        index,
        flags: vec!["-w".into(), "-U5".into()],
        normalize_json: true,
        no_truncate,
    }
}

#[tokio::test]
async fn file_request_carries_flags_and_switches() {
    let (server, rec) = spawn_server().await;

    let truncated = server.file_data(SessionId(0), &request(1, false)).await.unwrap();
    assert_eq!(truncated.idx, 1);
    assert!(truncated.truncation().is_some());

    let full = server.file_data(SessionId(0), &request(1, true)).await.unwrap();
    assert!(full.truncation().is_none());
    assert_eq!(full.content_b.as_deref(), Some("new\n"));

    let queries = rec.file_queries.lock().unwrap();
    assert_eq!(queries[0]["options"], "-w,-U5");
    assert_eq!(queries[0]["normalize_json"], "true");
    assert_eq!(queries[0]["no_truncate"], "0");
    assert_eq!(queries[1]["no_truncate"], "1");
}

#[tokio::test]
async fn bad_file_index_is_not_found() {
    let (server, _) = spawn_server().await;
    let err = server
        .file_data(SessionId(0), &request(5, false))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)));
}

#[tokio::test]
async fn change_poll_bypasses_caches() {
    let (server, rec) = spawn_server().await;
    let status = server.diff_changed(SessionId(0)).await.unwrap();
    assert!(status.changed && status.watch_enabled);
    assert!(rec.no_cache_seen.load(Ordering::SeqCst));
}

#[tokio::test]
async fn reload_body_only_sent_with_override() {
    let (server, rec) = spawn_server().await;

    let ok = server.reload(SessionId(0), None).await.unwrap();
    assert!(ok.success);
    let args = vec!["abc^..abc".to_string()];
    server.reload(SessionId(0), Some(args.as_slice())).await.unwrap();
    server.reload(SessionId(0), Some(&[][..])).await.unwrap();

    let bodies = rec.reload_bodies.lock().unwrap();
    assert_eq!(bodies[0], "");
    let sent: Value = serde_json::from_str(&bodies[1]).unwrap();
    assert_eq!(sent, json!({"git_args": ["abc^..abc"]}));
    let empty: Value = serde_json::from_str(&bodies[2]).unwrap();
    assert_eq!(empty, json!({"git_args": []}));
}

#[tokio::test]
async fn reload_error_body_is_server_reported() {
    let (server, _) = spawn_server().await;
    let err = server.reload(SessionId(1), None).await.unwrap_err();
    match err {
        SessionError::ServerReported(reason) => assert!(reason.contains("bad revision")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn reload_without_error_body_is_transport_error() {
    let (server, _) = spawn_server().await;
    let err = server.reload(SessionId(2), None).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Transport(TransportError::HttpStatus { status: 500, .. })
    ));
    assert_eq!(err.user_message(), "could not reach the diff server");
}

#[tokio::test]
async fn commit_pages_follow_limit_and_offset() {
    let (server, _) = spawn_server().await;

    let first = server.commits(SessionId(0), 25, 0).await.unwrap();
    assert_eq!(first.commits.len(), 25);
    assert!(first.has_more);
    assert_eq!(first.branch.as_deref(), Some("main"));

    let second = server.commits(SessionId(0), 25, 25).await.unwrap();
    assert_eq!(second.commits.len(), 5);
    assert!(!second.has_more);
    assert!(second.commits[0].authored_at().is_some());
    assert_ne!(first.commits[24].hash, second.commits[0].hash);
}

#[tokio::test]
async fn listing_decodes_and_bad_shape_is_decode_error() {
    let (server, _) = spawn_server().await;

    let listing = server.files(SessionId(0)).await.unwrap();
    assert_eq!(listing.changed.len(), 2);
    assert_eq!(listing.untracked[0].size, Some(12));

    let err = server.files(SessionId(9)).await.unwrap_err();
    assert!(matches!(err, SessionError::Decode(_)));
}

#[tokio::test]
async fn unknown_endpoint_is_not_found() {
    let (server, _) = spawn_server().await;
    let err = server.file_content(SessionId(0), "a.txt").await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)));
}

#[tokio::test]
async fn repo_management_round_trip() {
    let (server, _) = spawn_server().await;

    let ok = server.validate_repo("api", "/src/api").await.unwrap();
    assert!(ok.valid);
    let bad = server.validate_repo("api", "relative").await.unwrap();
    assert!(!bad.valid);
    assert_eq!(bad.error.as_deref(), Some("Path must be absolute"));

    let repos = vec![RepoEntry {
        label: "api".into(),
        path: "/src/api".into(),
    }];
    assert_eq!(server.update_repos(&repos).await.unwrap(), repos);

    let err = server.update_repos(&[]).await.unwrap_err();
    assert!(matches!(err, SessionError::ServerReported(_)));
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = HttpDiffServer::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    let err = server.diff_changed(SessionId(0)).await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)));
}
