//! Streamable HTTP transport for MCP.
//!
//! A single `/mcp` path carries the whole session lifecycle:
//!
//! - `POST` - client-to-server JSON-RPC messages; `initialize` without a
//!   session header creates the session
//! - `GET` - server-push event stream, resumable with `last-event-id`
//! - `DELETE` - explicit session termination

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mcp::protocol::{error_codes, is_initialize_request, JsonRpcResponse, RequestId};
use crate::mcp::server::McpServer;
use crate::session::{Session, SessionManager};

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Header carrying the resumption marker on `GET`.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

const NO_SESSION_MESSAGE: &str = "Bad Request: No valid session ID provided";

/// HTTP server state.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<McpServer>,
    pub sessions: Arc<SessionManager>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        server: Arc<McpServer>,
        sessions: Arc<SessionManager>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            server,
            sessions,
            metrics,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route(
            "/mcp",
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .route("/mcp/capabilities", get(capabilities))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and run until a shutdown signal arrives.
pub async fn start_server(config: &Config, state: AppState) -> Result<()> {
    let sessions = Arc::clone(&state.sessions);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        "MCP Streamable HTTP server listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sessions))
        .await?;

    Ok(())
}

/// Wait for Ctrl-C or SIGTERM, then close every session.
async fn shutdown_signal(sessions: Arc<SessionManager>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutting down server...");
    sessions.destroy_all().await;
    info!("Shutdown complete");
}

fn header_session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn lookup_session(state: &AppState, headers: &HeaderMap) -> Option<Session> {
    header_session_id(headers).and_then(|id| state.sessions.lookup(id))
}

/// True when the client accepts only the event stream for responses.
fn wants_stream_only(headers: &HeaderMap) -> bool {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    accept.contains("text/event-stream") && !accept.contains("application/json")
}

fn rpc_error(status: StatusCode, id: Option<RequestId>, code: i32, message: &str) -> Response {
    (status, Json(JsonRpcResponse::failure(id, code, message))).into_response()
}

fn no_session(id: Option<RequestId>) -> Response {
    rpc_error(
        StatusCode::BAD_REQUEST,
        id,
        error_codes::SESSION_ERROR,
        NO_SESSION_MESSAGE,
    )
}

fn with_session(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// `POST /mcp`
async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            debug!("Rejecting unparseable body: {}", e);
            return rpc_error(
                StatusCode::BAD_REQUEST,
                None,
                error_codes::PARSE_ERROR,
                "Parse error",
            );
        }
    };

    let request_id = RequestId::from_raw(&message);
    let initialize = is_initialize_request(&message);

    let (session, created) = match header_session_id(&headers) {
        Some(id) => match state.sessions.lookup(id) {
            Some(session) => {
                debug!("Reusing transport for session {}", id);
                (session, false)
            }
            None => return no_session(request_id),
        },
        None if initialize => (state.sessions.create_session(), true),
        None => return no_session(request_id),
    };

    let Some(response) = state.server.handle_message(message).await else {
        return with_session(StatusCode::ACCEPTED.into_response(), &session.id);
    };

    if created && response.is_error() {
        warn!("Initialization failed, discarding session {}", session.id);
        if let Err(e) = state.sessions.destroy(&session.id).await {
            warn!("Error closing session {}: {}", session.id, e);
        }
        return (StatusCode::OK, Json(response)).into_response();
    }

    if !initialize && wants_stream_only(&headers) {
        match session.transport.push(&response) {
            Ok(event_id) => {
                debug!(
                    "Response queued as event {} for session {}",
                    event_id, session.id
                );
                return with_session(StatusCode::ACCEPTED.into_response(), &session.id);
            }
            Err(e) => warn!("Could not queue response on stream: {}", e),
        }
    }

    match serde_json::to_vec(&response) {
        Ok(body) => with_session(
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            &session.id,
        ),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            rpc_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                request_id,
                error_codes::INTERNAL_ERROR,
                "Internal server error",
            )
        }
    }
}

/// `GET /mcp`
async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session) = lookup_session(&state, &headers) else {
        return no_session(None);
    };

    let last_event_id = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    match last_event_id {
        Some(marker) => info!(
            "Client reconnecting to session {} with Last-Event-ID {}",
            session.id, marker
        ),
        None => info!("Establishing new SSE stream for session {}", session.id),
    }

    match session.transport.open_stream(last_event_id) {
        Ok(stream) => {
            let events = stream.map(|event| {
                Ok::<_, Infallible>(
                    Event::default()
                        .id(event.id.to_string())
                        .event("message")
                        .data(event.data),
                )
            });
            with_session(
                Sse::new(events)
                    .keep_alive(KeepAlive::default())
                    .into_response(),
                &session.id,
            )
        }
        Err(e @ Error::StreamConflict(_)) => rpc_error(
            StatusCode::CONFLICT,
            None,
            error_codes::SESSION_ERROR,
            &e.to_string(),
        ),
        Err(e) => {
            debug!("Cannot open stream for session {}: {}", session.id, e);
            no_session(None)
        }
    }
}

/// `DELETE /mcp`
async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session) = lookup_session(&state, &headers) else {
        return no_session(None);
    };

    info!("Received session termination request for {}", session.id);
    match state.sessions.destroy(&session.id).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => no_session(None),
        Err(e) => {
            error!("Error terminating session {}: {}", session.id, e);
            rpc_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                None,
                error_codes::INTERNAL_ERROR,
                "Error handling session termination",
            )
        }
    }
}

/// Server identity and capabilities, outside any session.
async fn capabilities(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.server.describe())
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": crate::VERSION,
        "timestamp": Utc::now().to_rfc3339(),
        "sessions": state.sessions.len(),
    }))
}

/// Prometheus scrape endpoint.
async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
