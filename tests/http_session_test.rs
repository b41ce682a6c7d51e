//! Streamable HTTP transport tests.
//!
//! These drive the axum router in-process with `tower::ServiceExt::oneshot`
//! and cover the session lifecycle end to end.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tower::ServiceExt;

use sql_mcp_gateway::db::SqliteDataSource;
use sql_mcp_gateway::http::{router, AppState, SESSION_HEADER};
use sql_mcp_gateway::mcp::prompts::PromptRegistry;
use sql_mcp_gateway::mcp::resources::ResourceRegistry;
use sql_mcp_gateway::mcp::server::McpServer;
use sql_mcp_gateway::service::{NoteStore, SynonymMap, WeatherClient};
use sql_mcp_gateway::session::SessionManager;
use sql_mcp_gateway::tools;

struct TestGateway {
    app: Router,
    sessions: Arc<SessionManager>,
    _db: NamedTempFile,
}

fn sample_database() -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    let conn = rusqlite::Connection::open(file.path()).unwrap();
    conn.execute_batch(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         INSERT INTO customers (name) VALUES ('Alice'), ('Bob');",
    )
    .unwrap();
    file
}

fn gateway() -> TestGateway {
    let db = sample_database();
    let notes = Arc::new(NoteStore::with_seed_notes());
    let registry = tools::build_registry(
        Arc::new(SqliteDataSource::new(db.path())),
        Arc::new(SynonymMap::default()),
        Arc::new(WeatherClient::new("http://127.0.0.1:9").unwrap()),
        Arc::clone(&notes),
    )
    .unwrap();
    let server = Arc::new(McpServer::new(
        Arc::new(registry),
        PromptRegistry::new(Arc::clone(&notes)),
        ResourceRegistry::new(notes),
    ));
    let sessions = SessionManager::new(32, Duration::from_secs(30));

    TestGateway {
        app: router(AppState::new(server, Arc::clone(&sessions), None)),
        sessions,
        _db: db,
    }
}

fn initialize_body() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0.0"}
        }
    })
}

fn post(session: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json, text/event-stream");
    if let Some(id) = session {
        builder = builder.header(SESSION_HEADER, id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn bare(method: &str, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri("/mcp");
    if let Some(id) = session {
        builder = builder.header(SESSION_HEADER, id);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn first_chunk(response: Response) -> String {
    let mut stream = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("stream ended")
        .unwrap();
    String::from_utf8(chunk.to_vec()).unwrap()
}

async fn initialize(gw: &TestGateway) -> String {
    let response = gw
        .app
        .clone()
        .oneshot(post(None, &initialize_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response
        .headers()
        .get(SESSION_HEADER)
        .expect("session header")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_initialize_creates_session() {
    let gw = gateway();
    let response = gw
        .app
        .clone()
        .oneshot(post(None, &initialize_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response.headers().get(SESSION_HEADER).unwrap().clone();
    assert!(!session_id.is_empty());

    let body = body_json(response).await;
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["result"]["serverInfo"]["name"], "sql-mcp-gateway");
    assert_eq!(gw.sessions.len(), 1);
}

#[tokio::test]
async fn test_request_without_session_is_rejected() {
    let gw = gateway();
    let body = json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"});
    let response = gw.app.clone().oneshot(post(None, &body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(
        body["error"]["message"],
        "Bad Request: No valid session ID provided"
    );
    assert_eq!(body["id"], 7);
    assert!(gw.sessions.is_empty());
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let gw = gateway();
    let response = gw
        .app
        .clone()
        .oneshot(post(Some("no-such-session"), &initialize_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], -32000);
    assert!(gw.sessions.is_empty());
}

#[tokio::test]
async fn test_tools_list_and_call_over_session() {
    let gw = gateway();
    let session = initialize(&gw).await;

    let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
    let response = gw
        .app
        .clone()
        .oneshot(post(Some(&session), &list))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names[0], "list_tables");
    assert!(names.contains(&"read_data"));

    let call = json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "tools/call",
        "params": {"name": "read_data", "arguments": {"query": "SELECT name FROM customers ORDER BY id"}}
    });
    let response = gw
        .app
        .clone()
        .oneshot(post(Some(&session), &call))
        .await
        .unwrap();
    let body = body_json(response).await;
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Query executed successfully. Retrieved 2 record(s)"));
    assert!(text.contains("Alice"));
}

#[tokio::test]
async fn test_rejected_query_is_a_tool_result() {
    let gw = gateway();
    let session = initialize(&gw).await;

    let call = json!({
        "jsonrpc": "2.0",
        "id": 4,
        "method": "tools/call",
        "params": {"name": "read_data", "arguments": {"query": "DELETE FROM customers"}}
    });
    let response = gw
        .app
        .clone()
        .oneshot(post(Some(&session), &call))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert!(body.get("error").is_none());
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Security validation failed:"));
}

#[tokio::test]
async fn test_unparseable_body_is_parse_error() {
    let gw = gateway();
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["error"]["message"], "Parse error");
}

#[tokio::test]
async fn test_notification_is_accepted() {
    let gw = gateway();
    let session = initialize(&gw).await;

    let notification = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
    let response = gw
        .app
        .clone()
        .oneshot(post(Some(&session), &notification))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_unknown_method_over_session() {
    let gw = gateway();
    let session = initialize(&gw).await;

    let request = json!({"jsonrpc": "2.0", "id": 9, "method": "does/not/exist"});
    let response = gw
        .app
        .clone()
        .oneshot(post(Some(&session), &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32601);
    assert_eq!(body["id"], 9);
}

#[tokio::test]
async fn test_stream_only_post_is_delivered_on_get_stream() {
    let gw = gateway();
    let session = initialize(&gw).await;

    let ping = json!({"jsonrpc": "2.0", "id": 11, "method": "ping"});
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "text/event-stream")
        .header(SESSION_HEADER, &session)
        .body(Body::from(ping.to_string()))
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = gw
        .app
        .clone()
        .oneshot(bare("GET", Some(&session)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(SESSION_HEADER).unwrap().to_str().unwrap(),
        session
    );

    let chunk = first_chunk(response).await;
    assert!(chunk.contains("id: 1"));
    assert!(chunk.contains("event: message"));
    assert!(chunk.contains("\"id\":11"));
}

#[tokio::test]
async fn test_get_resumes_after_last_event_id() {
    let gw = gateway();
    let session = initialize(&gw).await;
    let transport = gw.sessions.lookup(&session).unwrap().transport;
    for n in 1..=3 {
        transport.push(&json!({"n": n})).unwrap();
    }

    let request = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(SESSION_HEADER, &session)
        .header("last-event-id", "2")
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let chunk = first_chunk(response).await;
    assert!(chunk.contains("id: 3"));
    assert!(chunk.contains("{\"n\":3}"));
}

#[tokio::test]
async fn test_second_get_stream_conflicts() {
    let gw = gateway();
    let session = initialize(&gw).await;

    let first = gw
        .app
        .clone()
        .oneshot(bare("GET", Some(&session)))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = gw
        .app
        .clone()
        .oneshot(bare("GET", Some(&session)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["error"]["code"], -32000);
    drop(first);
}

#[tokio::test]
async fn test_get_without_session_is_rejected() {
    let gw = gateway();
    let response = gw.app.clone().oneshot(bare("GET", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(
        body["error"]["message"],
        "Bad Request: No valid session ID provided"
    );
}

#[tokio::test]
async fn test_delete_terminates_session() {
    let gw = gateway();
    let session = initialize(&gw).await;

    let response = gw
        .app
        .clone()
        .oneshot(bare("DELETE", Some(&session)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(gw.sessions.is_empty());

    let again = gw
        .app
        .clone()
        .oneshot(bare("DELETE", Some(&session)))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);

    let list = json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"});
    let response = gw
        .app
        .clone()
        .oneshot(post(Some(&session), &list))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let gw = gateway();
    let a = initialize(&gw).await;
    let b = initialize(&gw).await;
    assert_ne!(a, b);

    gw.app
        .clone()
        .oneshot(bare("DELETE", Some(&a)))
        .await
        .unwrap();

    let ping = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
    let response = gw.app.clone().oneshot(post(Some(&b), &ping)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(gw.sessions.len(), 1);
}

#[tokio::test]
async fn test_health_reports_sessions() {
    let gw = gateway();
    initialize(&gw).await;

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sessions"], 1);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_metrics_disabled_is_not_found() {
    let gw = gateway();
    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_with_stuck_stream_reports_error_and_removes_session() {
    let gw = gateway();
    let session = initialize(&gw).await;

    // Held but never polled, so the stream cannot observe the close.
    let stream = gw
        .app
        .clone()
        .oneshot(bare("GET", Some(&session)))
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);

    let response = gw
        .app
        .clone()
        .oneshot(bare("DELETE", Some(&session)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32603);
    assert_eq!(
        body["error"]["message"],
        "Error handling session termination"
    );
    assert!(gw.sessions.is_empty());

    let again = gw
        .app
        .clone()
        .oneshot(bare("DELETE", Some(&session)))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(again).await["error"]["code"], -32000);
    drop(stream);
}

#[tokio::test]
async fn test_capabilities_without_session() {
    let gw = gateway();
    let request = Request::builder()
        .uri("/mcp/capabilities")
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["protocolVersion"], "2024-11-05");
    assert_eq!(body["serverInfo"]["name"], "sql-mcp-gateway");
    assert!(body["capabilities"]["tools"].is_object());
    assert!(body["capabilities"]["resources"].is_object());
    assert!(gw.sessions.is_empty());
}
