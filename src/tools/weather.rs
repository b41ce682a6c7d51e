//! Weather lookup tools.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::mcp::handler::{get_f64_arg, get_string_arg, ToolHandler};
use crate::mcp::protocol::Tool;
use crate::service::WeatherClient;

/// Active alerts tool.
pub struct GetAlertsTool {
    client: Arc<WeatherClient>,
}

impl GetAlertsTool {
    pub fn new(client: Arc<WeatherClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for GetAlertsTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get_alerts".to_string(),
            description: "Get weather alerts for a US state.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "state": {
                        "type": "string",
                        "description": "Two-letter US state code (e.g. CA, NY)"
                    }
                },
                "required": ["state"]
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>) -> Result<String> {
        let state = get_string_arg(&args, "state")?;
        self.client.alerts(&state).await
    }
}

/// Forecast tool.
pub struct GetForecastTool {
    client: Arc<WeatherClient>,
}

impl GetForecastTool {
    pub fn new(client: Arc<WeatherClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for GetForecastTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get_forecast".to_string(),
            description: "Get weather forecast for a location.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "latitude": {
                        "type": "number",
                        "description": "Latitude of the location"
                    },
                    "longitude": {
                        "type": "number",
                        "description": "Longitude of the location"
                    }
                },
                "required": ["latitude", "longitude"]
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>) -> Result<String> {
        let latitude = get_f64_arg(&args, "latitude")?;
        let longitude = get_f64_arg(&args, "longitude")?;
        self.client.forecast(latitude, longitude).await
    }
}
