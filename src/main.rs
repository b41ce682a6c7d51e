//! SQL MCP Gateway - streamable HTTP MCP server.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sql_mcp_gateway::config::{Args, Config};
use sql_mcp_gateway::db::SqliteDataSource;
use sql_mcp_gateway::http::{self, AppState};
use sql_mcp_gateway::mcp::prompts::PromptRegistry;
use sql_mcp_gateway::mcp::resources::ResourceRegistry;
use sql_mcp_gateway::mcp::server::McpServer;
use sql_mcp_gateway::metrics;
use sql_mcp_gateway::service::{NoteStore, SynonymMap, WeatherClient};
use sql_mcp_gateway::session::{spawn_resource_notifier, SessionManager};
use sql_mcp_gateway::tools;
use sql_mcp_gateway::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config: Config = args.into();

    init_logging(&config)?;

    info!("SQL MCP Gateway v{}", VERSION);
    info!("Database: {:?}", config.database);

    let notes = Arc::new(NoteStore::with_seed_notes());
    let synonyms = Arc::new(SynonymMap::load(config.synonyms.as_deref()));
    let source = Arc::new(SqliteDataSource::new(config.database.clone()));
    let weather = Arc::new(
        WeatherClient::new(&config.weather_api_url).context("Failed to build weather client")?,
    );

    let registry = tools::build_registry(source, synonyms, weather, Arc::clone(&notes))
        .context("Failed to register tools")?;
    info!("Registered {} MCP tools", registry.tool_count());

    let server = Arc::new(McpServer::new(
        Arc::new(registry),
        PromptRegistry::new(Arc::clone(&notes)),
        ResourceRegistry::new(Arc::clone(&notes)),
    ));
    let sessions = SessionManager::new(config.event_buffer, config.stream_grace());
    let _notifier = spawn_resource_notifier(notes.subscribe(), Arc::clone(&sessions));

    let metrics_handle = if config.metrics {
        Some(metrics::install_exporter().context("Failed to install metrics exporter")?)
    } else {
        None
    };

    let state = AppState::new(server, sessions, metrics_handle);
    http::start_server(&config, state)
        .await
        .context("HTTP server failed")?;

    Ok(())
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.log_json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {e}"))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {e}"))
    }
}
