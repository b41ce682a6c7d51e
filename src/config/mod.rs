//! Configuration management for the gateway.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the gateway.
#[derive(Parser, Debug, Clone)]
#[command(name = "sql-mcp-gateway")]
#[command(author = "SQL MCP Gateway Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MCP gateway exposing read-only SQL, weather and note tools over streamable HTTP")]
pub struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "MCP_HOST")]
    pub host: String,

    /// HTTP port
    #[arg(short, long, default_value = "3001", env = "PORT")]
    pub port: u16,

    /// SQLite database file queried by the database tools
    #[arg(long, default_value = "data.db", env = "DB_PATH")]
    pub database: PathBuf,

    /// Base URL of the weather API
    #[arg(long, default_value = "https://api.weather.gov", env = "WEATHER_API_URL")]
    pub weather_api_url: String,

    /// JSON file mapping business terms to table or column names
    #[arg(long, env = "SYNONYMS_PATH")]
    pub synonyms: Option<PathBuf>,

    /// Server-push events retained per session for resumption
    #[arg(long, default_value = "256", env = "MCP_EVENT_BUFFER")]
    pub event_buffer: usize,

    /// Seconds a disconnected stream may take to resume before its session closes
    #[arg(long, default_value = "30", env = "MCP_STREAM_GRACE_SECS")]
    pub stream_grace_secs: u64,

    /// Enable debug logging
    #[arg(short, long, env = "MCP_DEBUG")]
    pub debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "MCP_LOG_JSON")]
    pub log_json: bool,

    /// Expose Prometheus metrics on /metrics
    #[arg(long, env = "MCP_METRICS")]
    pub metrics: bool,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind address
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// SQLite database path
    pub database: PathBuf,
    /// Weather API base URL
    pub weather_api_url: String,
    /// Synonym dictionary path
    pub synonyms: Option<PathBuf>,
    /// Events kept per session
    pub event_buffer: usize,
    /// Stream resume grace period, seconds
    pub stream_grace_secs: u64,
    /// Debug mode
    pub debug: bool,
    /// JSON logs
    pub log_json: bool,
    /// Metrics enabled
    pub metrics: bool,
}

impl Config {
    pub fn stream_grace(&self) -> Duration {
        Duration::from_secs(self.stream_grace_secs)
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            database: args.database,
            weather_api_url: args.weather_api_url,
            synonyms: args.synonyms,
            event_buffer: args.event_buffer,
            stream_grace_secs: args.stream_grace_secs,
            debug: args.debug,
            log_json: args.log_json,
            metrics: args.metrics,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database: PathBuf::from("data.db"),
            weather_api_url: "https://api.weather.gov".to_string(),
            synonyms: None,
            event_buffer: 256,
            stream_grace_secs: 30,
            debug: false,
            log_json: false,
            metrics: false,
        }
    }
}
