//! MCP Resources Support
//!
//! Notes and a static sample document, exposed as readable resources.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::service::NoteStore;

const SAMPLE_URI: &str = "mcp://server/sample";
const SAMPLE_TEXT: &str = "This is a sample resource from the MCP server.";

/// A resource exposed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Resource contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

/// Result of resources/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of resources/read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

/// Parse `note:///<id>`.
fn parse_note_uri(uri: &str) -> Option<u64> {
    uri.strip_prefix("note:///")?.parse().ok()
}

/// Resource registry.
pub struct ResourceRegistry {
    notes: Arc<NoteStore>,
}

impl ResourceRegistry {
    pub fn new(notes: Arc<NoteStore>) -> Self {
        Self { notes }
    }

    /// Every note, followed by the sample resource.
    pub async fn list(&self) -> ListResourcesResult {
        let mut resources: Vec<Resource> = self
            .notes
            .list()
            .await
            .into_iter()
            .map(|note| Resource {
                uri: note.uri(),
                description: Some(format!("A text note: {}", note.title)),
                name: note.title,
                mime_type: Some("text/plain".to_string()),
            })
            .collect();

        resources.push(Resource {
            uri: SAMPLE_URI.to_string(),
            name: "Sample Resource".to_string(),
            description: Some("A sample resource".to_string()),
            mime_type: Some("text/plain".to_string()),
        });

        ListResourcesResult {
            resources,
            next_cursor: None,
        }
    }

    /// Read a resource by URI.
    pub async fn read(&self, uri: &str) -> Result<ReadResourceResult> {
        let text = if uri == SAMPLE_URI {
            SAMPLE_TEXT.to_string()
        } else {
            let id = parse_note_uri(uri).ok_or_else(|| Error::ResourceNotFound(uri.to_string()))?;
            self.notes
                .get(id)
                .await
                .ok_or_else(|| Error::ResourceNotFound(uri.to_string()))?
                .content
        };

        Ok(ReadResourceResult {
            contents: vec![ResourceContents {
                uri: uri.to_string(),
                mime_type: Some("text/plain".to_string()),
                text,
            }],
        })
    }
}
