//! MCP Prompt Templates
//!
//! Prompts composed from static instructions and the current note set.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::service::NoteStore;

/// A prompt argument definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// A prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// A prompt message (the actual content).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: PromptContent,
}

impl PromptMessage {
    fn user(content: PromptContent) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

/// Resource content embedded in a prompt message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

/// Prompt content types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptContent {
    Text { text: String },
    Resource { resource: EmbeddedResource },
}

impl PromptContent {
    fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Result of prompts/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    pub prompts: Vec<Prompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of prompts/get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

const EXPLORE_SCHEMA_TEMPLATE: &str = r#"I want to answer this question from the database: {{question}}

Work through it step by step:
1. Call list_tables to see which tables exist
2. Call get_synonyms and map the terms in the question to real tables and columns
3. Call describe_table and list_relationships for the tables involved
4. Call get_example_queries for similar questions
5. Write a single SELECT statement and run it with read_data

If read_data reports a security validation failure, rewrite the query as one plain SELECT."#;

/// Prompt registry.
pub struct PromptRegistry {
    notes: Arc<NoteStore>,
}

impl PromptRegistry {
    pub fn new(notes: Arc<NoteStore>) -> Self {
        Self { notes }
    }

    /// List all prompts.
    pub fn list(&self) -> Vec<Prompt> {
        vec![
            Prompt {
                name: "summarize_notes".to_string(),
                description: "Summarize all notes".to_string(),
                arguments: vec![],
            },
            Prompt {
                name: "explore_schema".to_string(),
                description: "Plan a safe read-only query that answers a question".to_string(),
                arguments: vec![PromptArgument {
                    name: "question".to_string(),
                    description: "The question to answer from the database".to_string(),
                    required: true,
                }],
            },
        ]
    }

    /// Get a prompt by name with arguments substituted.
    pub async fn get(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        match name {
            "summarize_notes" => Ok(self.summarize_notes().await),
            "explore_schema" => Ok(explore_schema(arguments)),
            _ => Err(Error::PromptNotFound(name.to_string())),
        }
    }

    async fn summarize_notes(&self) -> GetPromptResult {
        let mut messages = vec![PromptMessage::user(PromptContent::text(
            "Please summarize the following notes:",
        ))];
        for note in self.notes.list().await {
            messages.push(PromptMessage::user(PromptContent::Resource {
                resource: EmbeddedResource {
                    uri: note.uri(),
                    mime_type: Some("text/plain".to_string()),
                    text: note.content,
                },
            }));
        }
        messages.push(PromptMessage::user(PromptContent::text(
            "Provide a concise summary of all the notes above.",
        )));

        GetPromptResult {
            description: Some("Summarize all notes".to_string()),
            messages,
        }
    }
}

fn explore_schema(arguments: &HashMap<String, String>) -> GetPromptResult {
    let mut text = EXPLORE_SCHEMA_TEMPLATE.to_string();
    for (key, value) in arguments {
        text = text.replace(&format!("{{{{{}}}}}", key), value);
    }
    // Unfilled placeholders
    text = text.replace("{{question}}", "(no question given)");

    GetPromptResult {
        description: Some("Plan a safe read-only query that answers a question".to_string()),
        messages: vec![PromptMessage::user(PromptContent::text(text))],
    }
}
