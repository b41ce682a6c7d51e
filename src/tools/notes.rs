//! Note creation tool.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::mcp::handler::{get_string_arg, ToolHandler};
use crate::mcp::protocol::Tool;
use crate::service::NoteStore;

/// Create note tool.
pub struct CreateNoteTool {
    store: Arc<NoteStore>,
}

impl CreateNoteTool {
    pub fn new(store: Arc<NoteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for CreateNoteTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "create_note".to_string(),
            description: "Create a new text note. The note becomes readable as a resource."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": "Title of the note"
                    },
                    "content": {
                        "type": "string",
                        "description": "Text content of the note"
                    }
                },
                "required": ["title", "content"]
            }),
        }
    }

    async fn execute(&self, args: HashMap<String, Value>) -> Result<String> {
        let title = get_string_arg(&args, "title")?;
        let content = get_string_arg(&args, "content")?;
        let note = self.store.create(&title, &content).await?;
        Ok(format!("Created note {}: {}", note.id, note.title))
    }
}
