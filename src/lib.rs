//! SQL MCP Gateway
//!
//! A Model Context Protocol server that exposes a read-only SQL database,
//! a weather API and an in-memory note store as MCP tools, resources and
//! prompts over the streamable HTTP transport.
//!
//! # Architecture
//!
//! 1. **Guard** (`guard`) - SQL validation, result sanitization and formatting
//! 2. **Data** (`db`, `service`) - SQLite access, synonyms, weather, notes
//! 3. **Tools** (`tools`) - MCP tools built on the data layer
//! 4. **MCP** (`mcp`) - Protocol types, tool registry and dispatch
//! 5. **Transport** (`session`, `http`) - Sessions, resumable event streams, HTTP routes

pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod http;
pub mod mcp;
pub mod metrics;
pub mod service;
pub mod session;
pub mod tools;

pub use error::{Error, Result};

/// Server version reported in `initialize` and `/health`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
