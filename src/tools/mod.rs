//! MCP tool implementations.
//!
//! - `database` - Schema exploration and the guarded read-only query tool (6 tools)
//! - `weather` - Weather alerts and forecasts (2 tools)
//! - `notes` - Note creation (1 tool)

pub mod database;
pub mod notes;
pub mod weather;

use std::sync::Arc;

use crate::db::DataSource;
use crate::error::Result;
use crate::mcp::handler::{ToolHandler, ToolRegistry};
use crate::service::{NoteStore, SynonymMap, WeatherClient};

/// Build the registry holding every tool.
pub fn build_registry(
    source: Arc<dyn DataSource>,
    synonyms: Arc<SynonymMap>,
    weather: Arc<WeatherClient>,
    notes: Arc<NoteStore>,
) -> Result<ToolRegistry> {
    let tools: Vec<Arc<dyn ToolHandler>> = vec![
        // Database tools (6)
        Arc::new(database::ListTablesTool::new(source.clone())),
        Arc::new(database::DescribeTableTool::new(
            source.clone(),
            synonyms.clone(),
        )),
        Arc::new(database::ListRelationshipsTool::new(source.clone())),
        Arc::new(database::ReadDataTool::new(source.clone())),
        Arc::new(database::GetExampleQueriesTool::new(source)),
        Arc::new(database::GetSynonymsTool::new(synonyms)),
        // Weather tools (2)
        Arc::new(weather::GetAlertsTool::new(weather.clone())),
        Arc::new(weather::GetForecastTool::new(weather)),
        // Note tools (1)
        Arc::new(notes::CreateNoteTool::new(notes)),
    ];

    ToolRegistry::new(tools)
}
