//! Tool handler trait and the startup-built tool registry.

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::mcp::protocol::Tool;

/// Handler for MCP tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> Tool;

    /// Execute the tool with the given arguments, producing text output.
    async fn execute(&self, arguments: HashMap<String, Value>) -> Result<String>;
}

/// Fixed set of tools, built once at startup and read-only afterwards.
pub struct ToolRegistry {
    tools: Vec<(Tool, Arc<dyn ToolHandler>)>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Build the registry, rejecting malformed or duplicate tool definitions.
    pub fn new(handlers: Vec<Arc<dyn ToolHandler>>) -> Result<Self> {
        let mut tools = Vec::with_capacity(handlers.len());
        let mut index = HashMap::with_capacity(handlers.len());

        for handler in handlers {
            let tool = handler.definition();
            if tool.name.trim().is_empty() {
                return Err(Error::Registry("tool with an empty name".to_string()));
            }
            if tool.input_schema.get("type").and_then(Value::as_str) != Some("object") {
                return Err(Error::Registry(format!(
                    "tool '{}' must declare an object input schema",
                    tool.name
                )));
            }
            if index.contains_key(&tool.name) {
                return Err(Error::Registry(format!(
                    "duplicate tool name '{}'",
                    tool.name
                )));
            }
            index.insert(tool.name.clone(), tools.len());
            tools.push((tool, handler));
        }

        Ok(Self { tools, index })
    }

    /// Tool descriptors in registration order.
    pub fn list(&self) -> Vec<Tool> {
        self.tools.iter().map(|(tool, _)| tool.clone()).collect()
    }

    /// Check if a tool exists.
    pub fn has_tool(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Get the number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Invoke a tool by name.
    ///
    /// Handler failures, including panics, come back as
    /// [`Error::ToolExecutionFailed`] carrying the original message.
    pub async fn invoke(&self, name: &str, arguments: HashMap<String, Value>) -> Result<String> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;
        let handler = Arc::clone(&self.tools[idx].1);

        debug!("Invoking tool {}", name);
        match AssertUnwindSafe(handler.execute(arguments))
            .catch_unwind()
            .await
        {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e @ Error::ToolExecutionFailed(_))) => Err(e),
            Ok(Err(e)) => Err(Error::ToolExecutionFailed(e.to_string())),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Tool {} panicked: {}", name, message);
                Err(Error::ToolExecutionFailed(message))
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}

/// Helper macro for creating tool input schemas.
#[macro_export]
macro_rules! tool_schema {
    ($($json:tt)*) => {
        serde_json::json!({
            "type": "object",
            "properties": {
                $($json)*
            }
        })
    };
}

/// Helper to extract a required string argument.
pub fn get_string_arg(args: &HashMap<String, Value>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| {
            Error::InvalidToolArguments(format!("Missing required argument: {}", name))
        })
}

/// Helper to extract an optional string argument.
pub fn get_optional_string_arg(args: &HashMap<String, Value>, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(String::from)
}

/// Helper to extract a required numeric argument.
pub fn get_f64_arg(args: &HashMap<String, Value>, name: &str) -> Result<f64> {
    args.get(name).and_then(|v| v.as_f64()).ok_or_else(|| {
        Error::InvalidToolArguments(format!("Missing required argument: {}", name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TestTool {
        name: String,
    }

    #[async_trait]
    impl ToolHandler for TestTool {
        fn definition(&self) -> Tool {
            Tool {
                name: self.name.clone(),
                description: format!("Test tool: {}", self.name),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "input": { "type": "string" }
                    }
                }),
            }
        }

        async fn execute(&self, args: HashMap<String, Value>) -> Result<String> {
            let input = get_optional_string_arg(&args, "input").unwrap_or_default();
            Ok(format!("Executed {} with: {}", self.name, input))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "fails".to_string(),
                description: "Always fails".to_string(),
                input_schema: tool_schema! {},
            }
        }

        async fn execute(&self, _args: HashMap<String, Value>) -> Result<String> {
            Err(Error::Internal("connection refused".to_string()))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl ToolHandler for PanickingTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "panics".to_string(),
                description: "Always panics".to_string(),
                input_schema: tool_schema! {},
            }
        }

        async fn execute(&self, _args: HashMap<String, Value>) -> Result<String> {
            panic!("boom");
        }
    }

    fn tool(name: &str) -> Arc<dyn ToolHandler> {
        Arc::new(TestTool {
            name: name.to_string(),
        })
    }

    #[test]
    fn test_registry_lists_in_registration_order() {
        let registry = ToolRegistry::new(vec![tool("tool_b"), tool("tool_a")]).unwrap();

        assert_eq!(registry.tool_count(), 2);
        assert!(registry.has_tool("tool_a"));
        assert!(!registry.has_tool("nonexistent"));

        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["tool_b", "tool_a"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ToolRegistry::new(vec![tool("same"), tool("same")]);
        assert!(matches!(result, Err(Error::Registry(_))));
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = ToolRegistry::new(vec![tool("  ")]);
        assert!(matches!(result, Err(Error::Registry(_))));
    }

    #[tokio::test]
    async fn test_invoke() {
        let registry = ToolRegistry::new(vec![tool("echo")]).unwrap();
        let mut args = HashMap::new();
        args.insert("input".to_string(), json!("hello"));

        let text = registry.invoke("echo", args).await.unwrap();
        assert_eq!(text, "Executed echo with: hello");
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new(vec![tool("echo")]).unwrap();
        let err = registry.invoke("nope", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(ref n) if n == "nope"));
    }

    #[tokio::test]
    async fn test_invoke_wraps_handler_errors() {
        let registry = ToolRegistry::new(vec![Arc::new(FailingTool) as Arc<dyn ToolHandler>])
            .unwrap();
        let err = registry.invoke("fails", HashMap::new()).await.unwrap_err();
        match err {
            Error::ToolExecutionFailed(msg) => assert!(msg.contains("connection refused")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invoke_catches_panics() {
        let registry = ToolRegistry::new(vec![Arc::new(PanickingTool) as Arc<dyn ToolHandler>])
            .unwrap();
        let err = registry.invoke("panics", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::ToolExecutionFailed(ref m) if m == "boom"));
    }

    #[test]
    fn test_get_string_arg() {
        let mut args = HashMap::new();
        args.insert("name".to_string(), json!("value"));

        assert_eq!(get_string_arg(&args, "name").unwrap(), "value");
        assert!(get_string_arg(&args, "missing").is_err());
    }

    #[test]
    fn test_get_optional_string_arg() {
        let mut args = HashMap::new();
        args.insert("name".to_string(), json!("value"));

        assert_eq!(
            get_optional_string_arg(&args, "name"),
            Some("value".to_string())
        );
        assert_eq!(get_optional_string_arg(&args, "missing"), None);
    }

    #[test]
    fn test_get_f64_arg() {
        let mut args = HashMap::new();
        args.insert("latitude".to_string(), json!(38.9));
        args.insert("longitude".to_string(), json!(-77));

        assert_eq!(get_f64_arg(&args, "latitude").unwrap(), 38.9);
        assert_eq!(get_f64_arg(&args, "longitude").unwrap(), -77.0);
        assert!(get_f64_arg(&args, "missing").is_err());
    }
}
