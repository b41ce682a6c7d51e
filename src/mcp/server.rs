//! MCP server implementation: JSON-RPC envelope checks and method dispatch.

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::mcp::handler::ToolRegistry;
use crate::mcp::prompts::{ListPromptsResult, PromptRegistry};
use crate::mcp::protocol::*;
use crate::mcp::resources::ResourceRegistry;
use crate::metrics::{self, Timer};
use crate::VERSION;

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "sql-mcp-gateway";

/// MCP server.
///
/// Stateless between calls; one instance is shared by every session.
pub struct McpServer {
    tools: Arc<ToolRegistry>,
    prompts: PromptRegistry,
    resources: ResourceRegistry,
    name: String,
    version: String,
}

impl McpServer {
    /// Create a new MCP server.
    pub fn new(tools: Arc<ToolRegistry>, prompts: PromptRegistry, resources: ResourceRegistry) -> Self {
        Self {
            tools,
            prompts,
            resources,
            name: SERVER_NAME.to_string(),
            version: VERSION.to_string(),
        }
    }

    /// Handle one decoded JSON-RPC message.
    ///
    /// Returns `None` for notifications. Every failure, including a panic in a
    /// handler, comes back as an error response.
    pub async fn handle_message(&self, message: Value) -> Option<JsonRpcResponse> {
        if !message.is_object() {
            return Some(invalid_request(None));
        }

        let id = RequestId::from_raw(&message);
        if message.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            debug!("Rejecting envelope with bad protocol tag");
            return Some(invalid_request(id));
        }

        let req: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(req) => req,
            Err(e) => {
                debug!("Malformed envelope: {}", e);
                return Some(invalid_request(id));
            }
        };

        if req.is_notification() {
            self.handle_notification(&req);
            return None;
        }

        let id = req.id.clone();
        match AssertUnwindSafe(self.handle_request(req)).catch_unwind().await {
            Ok(response) => Some(response),
            Err(_) => {
                error!("Request handler panicked");
                Some(JsonRpcResponse::failure(
                    id,
                    error_codes::INTERNAL_ERROR,
                    "Internal error",
                ))
            }
        }
    }

    /// Handle a JSON-RPC request.
    async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        debug!("Handling request: {} (id: {:?})", req.method, req.id);
        let timer = Timer::start();

        let result = match req.method.as_str() {
            // Core
            "initialize" => self.handle_initialize(req.params),
            "ping" => Ok(serde_json::json!({})),
            // Tools
            "tools/list" => self.handle_list_tools(),
            "tools/call" => self.handle_call_tool(req.params).await,
            // Prompts
            "prompts/list" => self.handle_list_prompts(),
            "prompts/get" => self.handle_get_prompt(req.params).await,
            // Resources
            "resources/list" => self.handle_list_resources().await,
            "resources/read" => self.handle_read_resource(req.params).await,
            // Unknown
            _ => Err(Error::MethodNotFound(req.method.clone())),
        };

        metrics::record_request(&req.method, timer.elapsed_secs());

        match result {
            Ok(value) => JsonRpcResponse::success(req.id, value),
            Err(e) => error_response(req.id, &req.method, e),
        }
    }

    /// Handle a notification.
    fn handle_notification(&self, req: &JsonRpcRequest) {
        match req.method.as_str() {
            "notifications/initialized" => {
                info!("Client initialized");
            }
            "notifications/cancelled" => {
                let request_id = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("requestId"))
                    .cloned()
                    .unwrap_or(Value::Null);
                info!("Client cancelled request {}", request_id);
            }
            _ => {
                debug!("Unknown notification: {}", req.method);
            }
        }
    }

    /// Handle initialize request.
    fn handle_initialize(&self, params: Option<Value>) -> Result<Value> {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase")]
        struct InitParams {
            #[serde(default)]
            protocol_version: Option<String>,
            #[serde(default)]
            client_info: Option<ServerInfo>,
        }

        let init: InitParams = params
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        if let Some(client) = &init.client_info {
            info!("Client connected: {} v{}", client.name, client.version);
        }

        let protocol_version = match init.protocol_version {
            Some(v) if SUPPORTED_VERSIONS.contains(&v.as_str()) => v,
            Some(v) => {
                warn!("Client requested unsupported protocol version {}", v);
                MCP_VERSION.to_string()
            }
            None => MCP_VERSION.to_string(),
        };

        Ok(serde_json::to_value(self.initialize_result(protocol_version))?)
    }

    /// Server identity and capabilities at the default protocol version.
    pub fn describe(&self) -> InitializeResult {
        self.initialize_result(MCP_VERSION.to_string())
    }

    fn initialize_result(&self, protocol_version: String) -> InitializeResult {
        InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                resources: Some(ResourcesCapability {
                    subscribe: false,
                    list_changed: true,
                }),
                prompts: Some(PromptsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: self.name.clone(),
                version: self.version.clone(),
            },
        }
    }

    /// Handle list tools request.
    fn handle_list_tools(&self) -> Result<Value> {
        let result = ListToolsResult {
            tools: self.tools.list(),
        };
        Ok(serde_json::to_value(result)?)
    }

    /// Handle call tool request.
    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value> {
        let params: CallToolParams = parse_params(params)?;
        let arguments = params.arguments.unwrap_or_default();

        let outcome = self.tools.invoke(&params.name, arguments).await;
        if self.tools.has_tool(&params.name) {
            metrics::record_tool_call(&params.name, if outcome.is_ok() { "ok" } else { "error" });
        }

        let text = outcome?;
        Ok(serde_json::to_value(ToolResult::text(text))?)
    }

    /// Handle list prompts request.
    fn handle_list_prompts(&self) -> Result<Value> {
        let result = ListPromptsResult {
            prompts: self.prompts.list(),
            next_cursor: None,
        };
        Ok(serde_json::to_value(result)?)
    }

    /// Handle get prompt request.
    async fn handle_get_prompt(&self, params: Option<Value>) -> Result<Value> {
        #[derive(Deserialize)]
        struct GetPromptParams {
            name: String,
            #[serde(default)]
            arguments: HashMap<String, String>,
        }

        let params: GetPromptParams = parse_params(params)?;
        let result = self.prompts.get(&params.name, &params.arguments).await?;
        Ok(serde_json::to_value(result)?)
    }

    /// Handle list resources request.
    async fn handle_list_resources(&self) -> Result<Value> {
        let result = self.resources.list().await;
        Ok(serde_json::to_value(result)?)
    }

    /// Handle read resource request.
    async fn handle_read_resource(&self, params: Option<Value>) -> Result<Value> {
        #[derive(Deserialize)]
        struct ReadParams {
            uri: String,
        }

        let params: ReadParams = parse_params(params)?;
        let result = self.resources.read(&params.uri).await?;
        Ok(serde_json::to_value(result)?)
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let params = params.ok_or_else(|| Error::InvalidParams("Missing params".to_string()))?;
    serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))
}

fn invalid_request(id: Option<RequestId>) -> JsonRpcResponse {
    JsonRpcResponse::failure(id, error_codes::INVALID_REQUEST, "Invalid Request")
}

/// Convert a handler error into the response the client sees.
fn error_response(id: Option<RequestId>, method: &str, e: Error) -> JsonRpcResponse {
    let code = e.rpc_code();
    let message = match e {
        Error::MethodNotFound(_) => "Method not found".to_string(),
        Error::InvalidRequest(_) => "Invalid Request".to_string(),
        Error::ToolExecutionFailed(msg) => {
            warn!("Tool execution failed in {}: {}", method, msg);
            format!("Tool execution error: {}", msg)
        }
        Error::ToolNotFound(_)
        | Error::InvalidParams(_)
        | Error::ResourceNotFound(_)
        | Error::PromptNotFound(_) => e.to_string(),
        other => {
            error!("Internal error handling {}: {}", method, other);
            "Internal error".to_string()
        }
    };
    JsonRpcResponse::failure(id, code, message)
}
