//! Model Context Protocol (MCP) implementation.
//!
//! # Architecture
//!
//! - `protocol` - JSON-RPC envelopes and MCP message types
//! - `handler` - Tool trait and registry
//! - `prompts` / `resources` - Prompt and resource catalogs
//! - `server` - Method dispatch
//! - `transport` - Per-session server-push event log

pub mod handler;
pub mod prompts;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod transport;

pub use handler::{ToolHandler, ToolRegistry};
pub use protocol::*;
pub use server::McpServer;
pub use transport::SessionTransport;
