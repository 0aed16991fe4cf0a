//! Per-session event fan-out to subscriber connections

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::error::{BenchError, BenchResult};
use crate::events::{LogEvent, ServerMessage};

use super::SessionStore;

/// Identifier of a subscriber connection
pub type ConnectionId = u64;

#[derive(Debug)]
struct Subscriber {
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Pushes session events to at most one subscriber per session
///
/// Store mutations that produce an event are applied while the subscriber
/// map is locked, and `subscribe` takes its snapshot under the same lock.
/// A subscriber therefore sees every event exactly once after its snapshot.
#[derive(Debug)]
pub struct Broadcaster {
    store: Arc<SessionStore>,
    subscribers: Mutex<HashMap<String, Subscriber>>,
    next_connection_id: AtomicU64,
}

impl Broadcaster {
    /// Create a broadcaster over a store
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            store,
            subscribers: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Store the broadcaster publishes from
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Allocate an id for a new connection
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<String, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe a connection to a session
    ///
    /// Sends the snapshot first; an existing subscriber for the session is
    /// replaced.
    pub fn subscribe(
        &self,
        session_id: &str,
        connection_id: ConnectionId,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> BenchResult<()> {
        let mut subscribers = self.subscribers();
        let snapshot = self
            .store
            .snapshot(session_id)
            .ok_or_else(|| BenchError::SessionNotFound(session_id.to_string()))?;

        if tx.send(snapshot).is_err() {
            tracing::debug!(session_id, connection_id, "Subscriber closed before snapshot");
            return Ok(());
        }

        let previous = subscribers.insert(
            session_id.to_string(),
            Subscriber { connection_id, tx },
        );
        match previous {
            Some(old) if old.connection_id != connection_id => {
                tracing::debug!(
                    session_id,
                    old_connection = old.connection_id,
                    connection_id,
                    "Subscription superseded"
                );
            }
            _ => tracing::debug!(session_id, connection_id, "Subscribed"),
        }
        Ok(())
    }

    /// Remove a session's subscription if it belongs to `connection_id`
    pub fn unsubscribe(&self, session_id: &str, connection_id: ConnectionId) -> bool {
        let mut subscribers = self.subscribers();
        match subscribers.get(session_id) {
            Some(sub) if sub.connection_id == connection_id => {
                subscribers.remove(session_id);
                true
            }
            _ => false,
        }
    }

    /// Remove every subscription held by a closed connection
    pub fn drop_connection(&self, connection_id: ConnectionId) -> usize {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|_, sub| sub.connection_id != connection_id);
        before - subscribers.len()
    }

    /// Remove a session's subscription regardless of owner
    pub fn forget(&self, session_id: &str) {
        self.subscribers().remove(session_id);
    }

    /// Whether a session currently has a subscriber
    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.subscribers().contains_key(session_id)
    }

    /// Apply a store mutation and push `message` if it succeeded
    pub fn publish_with<T, F>(
        &self,
        session_id: &str,
        apply: F,
        message: ServerMessage,
    ) -> BenchResult<T>
    where
        F: FnOnce(&SessionStore) -> BenchResult<T>,
    {
        let mut subscribers = self.subscribers();
        let value = apply(&self.store)?;

        let Some(sub) = subscribers.get(session_id) else {
            return Ok(value);
        };
        if sub.tx.send(message).is_err() {
            tracing::debug!(
                session_id,
                connection_id = sub.connection_id,
                "Subscriber gone, dropping it"
            );
            subscribers.remove(session_id);
        }
        Ok(value)
    }

    /// Append a log entry and push it
    pub fn publish_log(&self, session_id: &str, event: LogEvent) -> BenchResult<()> {
        let message = ServerMessage::Log {
            session_id: session_id.to_string(),
            log: event.clone(),
        };
        self.publish_with(session_id, |store| store.append_log(session_id, event), message)
    }
}
