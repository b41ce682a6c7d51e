//! Per-session transport: the server-push event log and its stream.
//!
//! Every message pushed to a session gets a monotonically increasing event
//! id and is kept in a bounded log. A GET stream reads the log from a cursor,
//! so a client that reconnects with `last-event-id` receives every retained
//! event after that marker (at-least-once). At most one stream is attached at
//! a time. When a stream goes away the session is closed unless a new stream
//! attaches within the grace period.

use futures::stream::{self, Stream};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How long `close` waits for an attached stream to let go.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Callback run exactly once when the transport closes.
pub type CloseHook = Box<dyn FnOnce(&str) + Send>;

/// One server-push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub id: u64,
    pub data: String,
}

#[derive(Debug)]
struct EventLog {
    events: VecDeque<StreamEvent>,
    next_id: u64,
}

/// Transport bound to one session.
pub struct SessionTransport {
    session_id: String,
    capacity: usize,
    grace: Duration,
    log: Mutex<EventLog>,
    /// Id of the newest event; 0 before the first push.
    latest: watch::Sender<u64>,
    /// Highest id handed to any stream.
    delivered: AtomicU64,
    closed: CancellationToken,
    attached: AtomicBool,
    generation: AtomicU64,
    detached: Notify,
    on_close: Mutex<Option<CloseHook>>,
}

impl SessionTransport {
    pub fn new(session_id: impl Into<String>, capacity: usize, grace: Duration) -> Self {
        let (latest, _) = watch::channel(0);
        Self {
            session_id: session_id.into(),
            capacity: capacity.max(1),
            grace,
            log: Mutex::new(EventLog {
                events: VecDeque::new(),
                next_id: 1,
            }),
            latest,
            delivered: AtomicU64::new(0),
            closed: CancellationToken::new(),
            attached: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            detached: Notify::new(),
            on_close: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Register the callback run when this transport closes.
    pub fn set_on_close(&self, hook: CloseHook) {
        *self.on_close.lock() = Some(hook);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn has_stream(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Append a message to the event log, returning its event id.
    pub fn push<T: Serialize>(&self, message: &T) -> Result<u64> {
        if self.is_closed() {
            return Err(Error::SessionClosed(self.session_id.clone()));
        }
        let data = serde_json::to_string(message)?;

        let id = {
            let mut log = self.log.lock();
            let id = log.next_id;
            log.next_id += 1;
            log.events.push_back(StreamEvent { id, data });
            while log.events.len() > self.capacity {
                log.events.pop_front();
            }
            id
        };

        self.latest.send_replace(id);
        debug!("Queued event {} for session {}", id, self.session_id);
        Ok(id)
    }

    /// First retained event with an id greater than `cursor`.
    fn next_after(&self, cursor: u64) -> Option<StreamEvent> {
        let log = self.log.lock();
        let event = log.events.iter().find(|e| e.id > cursor)?.clone();
        if event.id > cursor + 1 {
            warn!(
                "Session {}: events {}..{} were evicted before delivery",
                self.session_id,
                cursor + 1,
                event.id - 1
            );
        }
        Some(event)
    }

    /// Attach the event stream, resuming after `last_event_id` when given.
    ///
    /// Without a marker the stream continues after the last event delivered
    /// to any previous stream.
    pub fn open_stream(
        self: &Arc<Self>,
        last_event_id: Option<u64>,
    ) -> Result<impl Stream<Item = StreamEvent> + Send + 'static> {
        if self.is_closed() {
            return Err(Error::SessionClosed(self.session_id.clone()));
        }
        if self.attached.swap(true, Ordering::SeqCst) {
            return Err(Error::StreamConflict(self.session_id.clone()));
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let latest = *self.latest.borrow();
        let cursor = match last_event_id {
            Some(marker) => marker.min(latest),
            None => self.delivered.load(Ordering::SeqCst),
        };
        info!(
            "Stream attached to session {} (resuming after event {})",
            self.session_id, cursor
        );

        let state = StreamState {
            changes: self.latest.subscribe(),
            cursor,
            guard: StreamGuard {
                transport: Arc::clone(self),
                generation,
            },
        };

        Ok(stream::unfold(state, |mut state| async move {
            let transport = Arc::clone(&state.guard.transport);
            loop {
                if transport.is_closed() {
                    return None;
                }
                if let Some(event) = transport.next_after(state.cursor) {
                    state.cursor = event.id;
                    transport.delivered.fetch_max(event.id, Ordering::SeqCst);
                    return Some((event, state));
                }
                tokio::select! {
                    _ = transport.closed.cancelled() => return None,
                    changed = state.changes.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        }))
    }

    /// Close the transport.
    ///
    /// Runs the close hook once and waits briefly for an attached stream to
    /// end. Closing an already closed transport is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();

        let hook = self.on_close.lock().take();
        if let Some(hook) = hook {
            hook(&self.session_id);
        }

        let detached = self.detached.notified();
        if self.has_stream() {
            tokio::time::timeout(CLOSE_TIMEOUT, detached)
                .await
                .map_err(|_| Error::Timeout {
                    seconds: CLOSE_TIMEOUT.as_secs(),
                })?;
        }

        info!("Transport closed for session {}", self.session_id);
        Ok(())
    }

    fn schedule_grace_close(self: &Arc<Self>, generation: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let transport = Arc::clone(self);
        handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(transport.grace) => {}
                _ = transport.closed.cancelled() => return,
            }
            let resumed = transport.has_stream()
                || transport.generation.load(Ordering::SeqCst) != generation;
            if resumed {
                return;
            }
            info!(
                "Stream for session {} not resumed within {:?}, closing",
                transport.session_id, transport.grace
            );
            if let Err(e) = transport.close().await {
                warn!("Failed to close session {}: {}", transport.session_id, e);
            }
        });
    }
}

struct StreamState {
    changes: watch::Receiver<u64>,
    cursor: u64,
    guard: StreamGuard,
}

/// Releases the stream slot when the stream is dropped.
struct StreamGuard {
    transport: Arc<SessionTransport>,
    generation: u64,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let transport = &self.transport;
        transport.attached.store(false, Ordering::SeqCst);
        transport.detached.notify_waiters();
        debug!("Stream detached from session {}", transport.session_id);

        if !transport.is_closed() {
            transport.schedule_grace_close(self.generation);
        }
    }
}
