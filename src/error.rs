//! Error types for the SQL MCP gateway.

use thiserror::Error;

use crate::mcp::protocol::error_codes;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Protocol Errors =====
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    // ===== Tool Errors =====
    #[error("Invalid tool name: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidToolArguments(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool registry error: {0}")]
    Registry(String),

    // ===== Resource / Prompt Errors =====
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Unknown prompt: {0}")]
    PromptNotFound(String),

    // ===== Session Errors =====
    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Only one event stream is allowed per session: {0}")]
    StreamConflict(String),

    // ===== Upstream Errors =====
    #[error("API error: {status} {status_text} - {message}")]
    Api {
        status: u16,
        status_text: String,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout: operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
}

impl Error {
    /// Create an API error from HTTP response details.
    pub fn api(status: u16, status_text: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            status_text: status_text.into(),
            message: message.into(),
        }
    }

    /// The JSON-RPC error code this error surfaces as.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) | Self::ToolNotFound(_) | Self::ResourceNotFound(_) => {
                error_codes::INVALID_PARAMS
            }
            Self::SessionClosed(_) | Self::StreamConflict(_) => {
                error_codes::SESSION_ERROR
            }
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// Check if this error is retriable (transient upstream failures).
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 429 || (*status >= 500 && *status < 600),
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}
