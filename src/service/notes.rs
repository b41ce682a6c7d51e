//! In-memory note store backing the note tool, resources and prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use crate::error::{Error, Result};

/// A stored note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: u64,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Note {
    /// Resource URI of this note.
    pub fn uri(&self) -> String {
        format!("note:///{}", self.id)
    }
}

/// Change published whenever the note set is modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteEvent {
    Created { id: u64 },
}

#[derive(Debug)]
struct NoteState {
    notes: BTreeMap<u64, Note>,
    next_id: u64,
}

/// Note storage service.
pub struct NoteStore {
    state: RwLock<NoteState>,
    events: broadcast::Sender<NoteEvent>,
}

impl NoteStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(NoteState {
                notes: BTreeMap::new(),
                next_id: 1,
            }),
            events,
        }
    }

    /// Create a store with the two starter notes.
    pub fn with_seed_notes() -> Self {
        let (events, _) = broadcast::channel(64);
        let now = Utc::now();
        let mut notes = BTreeMap::new();
        for (id, title, content) in [
            (1, "First Note", "This is note 1"),
            (2, "Second Note", "This is note 2"),
        ] {
            notes.insert(
                id,
                Note {
                    id,
                    title: title.to_string(),
                    content: content.to_string(),
                    created_at: now,
                },
            );
        }
        Self {
            state: RwLock::new(NoteState { notes, next_id: 3 }),
            events,
        }
    }

    /// Add a note and notify subscribers.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use sql_mcp_gateway::service::NoteStore;
    ///
    /// let store = NoteStore::new();
    /// let note = store.create("Groceries", "Milk, eggs").await.unwrap();
    /// assert_eq!(note.uri(), format!("note:///{}", note.id));
    /// # });
    /// ```
    pub async fn create(&self, title: &str, content: &str) -> Result<Note> {
        if title.trim().is_empty() {
            return Err(Error::InvalidToolArguments(
                "Note title must not be empty".to_string(),
            ));
        }
        if content.trim().is_empty() {
            return Err(Error::InvalidToolArguments(
                "Note content must not be empty".to_string(),
            ));
        }

        let note = {
            let mut state = self.state.write().await;
            let id = state.next_id;
            state.next_id += 1;
            let note = Note {
                id,
                title: title.to_string(),
                content: content.to_string(),
                created_at: Utc::now(),
            };
            state.notes.insert(id, note.clone());
            note
        };

        info!("Created note {}: {}", note.id, note.title);
        // No subscribers is fine.
        let _ = self.events.send(NoteEvent::Created { id: note.id });
        Ok(note)
    }

    /// Get a note by id.
    pub async fn get(&self, id: u64) -> Option<Note> {
        self.state.read().await.notes.get(&id).cloned()
    }

    /// All notes in id order.
    pub async fn list(&self) -> Vec<Note> {
        self.state.read().await.notes.values().cloned().collect()
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<NoteEvent> {
        self.events.subscribe()
    }
}

impl Default for NoteStore {
    fn default() -> Self {
        Self::new()
    }
}
