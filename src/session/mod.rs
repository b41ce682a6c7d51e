//! Session registry for the streamable HTTP transport.
//!
//! The map is guarded by one mutex that is only ever held for map mutation,
//! never across an await.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::mcp::protocol::JsonRpcNotification;
use crate::mcp::transport::SessionTransport;
use crate::metrics;
use crate::service::NoteEvent;

/// A live client session.
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub transport: Arc<SessionTransport>,
}

/// Summary used by the health endpoint and logs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub streaming: bool,
}

/// Maps session ids to their transports.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    event_buffer: usize,
    grace: Duration,
}

impl SessionManager {
    pub fn new(event_buffer: usize, grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            event_buffer,
            grace,
        })
    }

    /// Create and register a fresh session.
    ///
    /// The transport deregisters itself from this manager when it closes.
    pub fn create_session(self: &Arc<Self>) -> Session {
        let manager: Weak<Self> = Arc::downgrade(self);

        let (session, count) = {
            let mut sessions = self.sessions.lock();
            let mut id = Uuid::new_v4().to_string();
            while sessions.contains_key(&id) {
                id = Uuid::new_v4().to_string();
            }

            let transport = Arc::new(SessionTransport::new(
                id.clone(),
                self.event_buffer,
                self.grace,
            ));
            transport.set_on_close(Box::new(move |id| {
                if let Some(manager) = manager.upgrade() {
                    manager.deregister(id);
                }
            }));

            let session = Session {
                id: id.clone(),
                created_at: Utc::now(),
                transport,
            };
            sessions.insert(id, session.clone());
            (session, sessions.len())
        };

        metrics::record_session_created();
        metrics::set_active_sessions(count);
        info!("Session initialized with ID: {}", session.id);
        session
    }

    /// Find a live session.
    pub fn lookup(&self, id: &str) -> Option<Session> {
        self.sessions
            .lock()
            .get(id)
            .filter(|s| !s.transport.is_closed())
            .cloned()
    }

    fn deregister(&self, id: &str) -> Option<Session> {
        let (removed, count) = {
            let mut sessions = self.sessions.lock();
            (sessions.remove(id), sessions.len())
        };
        if removed.is_some() {
            metrics::set_active_sessions(count);
            info!("Transport closed for session {}, removed from sessions", id);
        }
        removed
    }

    /// Remove a session and close its transport.
    ///
    /// Returns `Ok(false)` when the id is unknown. The session is removed from
    /// the map even if closing the transport fails.
    pub async fn destroy(&self, id: &str) -> Result<bool> {
        let Some(session) = self.deregister(id) else {
            debug!("Destroy requested for unknown session {}", id);
            return Ok(false);
        };
        session.transport.close().await?;
        Ok(true)
    }

    /// Close every session; failures are logged and do not stop the rest.
    pub async fn destroy_all(&self) {
        let sessions: Vec<Session> = {
            let mut map = self.sessions.lock();
            map.drain().map(|(_, s)| s).collect()
        };
        metrics::set_active_sessions(0);

        for session in sessions {
            info!("Closing transport for session {}", session.id);
            if let Err(e) = session.transport.close().await {
                warn!("Error closing transport for session {}: {}", session.id, e);
            }
        }
    }

    /// Push a message to every live session, returning how many accepted it.
    pub fn broadcast<T: Serialize>(&self, message: &T) -> usize {
        let transports: Vec<Arc<SessionTransport>> = self
            .sessions
            .lock()
            .values()
            .map(|s| Arc::clone(&s.transport))
            .collect();

        transports
            .iter()
            .filter(|t| match t.push(message) {
                Ok(_) => true,
                Err(e) => {
                    debug!("Skipping session {}: {}", t.session_id(), e);
                    false
                }
            })
            .count()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .values()
            .map(|s| SessionInfo {
                id: s.id.clone(),
                created_at: s.created_at,
                streaming: s.transport.has_stream(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

/// Forward note-store changes to every session as
/// `notifications/resources/list_changed`.
pub fn spawn_resource_notifier(
    mut events: broadcast::Receiver<NoteEvent>,
    sessions: Arc<SessionManager>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(NoteEvent::Created { id }) => {
                    debug!("Note {} created, notifying sessions", id);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Resource notifier lagged by {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
            let notification =
                JsonRpcNotification::new("notifications/resources/list_changed", None);
            let reached = sessions.broadcast(&notification);
            debug!("Resource list change pushed to {} sessions", reached);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::NoteStore;
    use futures::StreamExt;
    use std::collections::HashSet;

    fn manager() -> Arc<SessionManager> {
        SessionManager::new(16, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let manager = manager();
        let session = manager.create_session();

        assert_eq!(manager.len(), 1);
        let found = manager.lookup(&session.id).unwrap();
        assert!(Arc::ptr_eq(&found.transport, &session.transport));
        assert!(manager.lookup("unknown").is_none());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let manager = manager();
        let ids: HashSet<String> = (0..100).map(|_| manager.create_session().id).collect();
        assert_eq!(ids.len(), 100);
        assert_eq!(manager.len(), 100);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let manager = manager();
        let session = manager.create_session();

        assert!(manager.destroy(&session.id).await.unwrap());
        assert!(!manager.destroy(&session.id).await.unwrap());
        assert!(manager.lookup(&session.id).is_none());
        assert!(session.transport.is_closed());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_transport_close_deregisters() {
        let manager = manager();
        let session = manager.create_session();

        session.transport.close().await.unwrap();
        assert!(manager.lookup(&session.id).is_none());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_all() {
        let manager = manager();
        let a = manager.create_session();
        let b = manager.create_session();

        manager.destroy_all().await;
        assert!(manager.is_empty());
        assert!(a.transport.is_closed());
        assert!(b.transport.is_closed());
    }

    #[tokio::test]
    async fn test_destroy_all_continues_past_failed_close() {
        let manager = manager();
        let stuck = manager.create_session();
        let others: Vec<Session> = (0..3).map(|_| manager.create_session()).collect();

        // An attached stream that is never polled makes this close time out.
        let _held = stuck.transport.open_stream(None).unwrap();
        manager.destroy_all().await;

        assert!(manager.is_empty());
        assert!(stuck.transport.is_closed());
        assert!(others.iter().all(|s| s.transport.is_closed()));
    }

    #[tokio::test]
    async fn test_destroy_reports_failed_close_but_deregisters() {
        let manager = manager();
        let session = manager.create_session();
        let _held = session.transport.open_stream(None).unwrap();

        assert!(manager.destroy(&session.id).await.is_err());
        assert!(manager.lookup(&session.id).is_none());
        assert!(!manager.destroy(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session() {
        let manager = manager();
        let a = manager.create_session();
        let b = manager.create_session();
        let mut stream = Box::pin(a.transport.open_stream(None).unwrap());

        let notification =
            JsonRpcNotification::new("notifications/resources/list_changed", None);
        assert_eq!(manager.broadcast(&notification), 2);

        let event = stream.next().await.unwrap();
        assert!(event.data.contains("notifications/resources/list_changed"));

        let mut stream_b = Box::pin(b.transport.open_stream(None).unwrap());
        assert_eq!(stream_b.next().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let manager = manager();
        let session = manager.create_session();
        let _stream = session.transport.open_stream(None).unwrap();

        let infos = manager.list();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, session.id);
        assert!(infos[0].streaming);
    }

    #[tokio::test]
    async fn test_note_creation_notifies_sessions() {
        let manager = manager();
        let session = manager.create_session();
        let notes = NoteStore::new();
        let _notifier = spawn_resource_notifier(notes.subscribe(), Arc::clone(&manager));

        let mut stream = Box::pin(session.transport.open_stream(None).unwrap());
        notes.create("Title", "Body").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert!(event.data.contains("notifications/resources/list_changed"));
    }
}
