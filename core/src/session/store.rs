//! In-memory session storage with bounded logs and TTL eviction

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::config::{SessionStoreConfig, TrialConfig};
use crate::error::{BenchError, BenchResult};
use crate::events::{LogEvent, ServerMessage};
use crate::metrics::TrialResult;

use super::{Session, SessionStatus, SessionSummary};

/// Sessions keyed by id
#[derive(Debug, Default)]
pub struct SessionStore {
    config: SessionStoreConfig,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create an empty store
    pub fn new(config: SessionStoreConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Store configuration
    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session in `preparing` state and return its id
    pub fn create(&self, config: TrialConfig) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.write()
            .insert(id.clone(), Session::new(id.clone(), config, Utc::now()));
        tracing::debug!(session_id = %id, "Session created");
        id
    }

    /// Copy of a session
    pub fn get(&self, id: &str) -> Option<Session> {
        self.read().get(id).cloned()
    }

    /// Current status of a session
    pub fn status(&self, id: &str) -> Option<SessionStatus> {
        self.read().get(id).map(|s| s.status)
    }

    /// Summaries of every session, newest first
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.read().values().map(Session::summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store holds no sessions
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove a session
    pub fn remove(&self, id: &str) -> Option<Session> {
        self.write().remove(id)
    }

    /// Append a log entry, evicting the oldest beyond capacity
    pub fn append_log(&self, id: &str, event: LogEvent) -> BenchResult<()> {
        let mut sessions = self.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| BenchError::SessionNotFound(id.to_string()))?;

        session.logs.push_back(event);
        while session.logs.len() > self.config.log_capacity {
            session.logs.pop_front();
        }
        Ok(())
    }

    /// Move a startable session to `running`
    ///
    /// Restarting a finished session clears its logs, result and error.
    pub fn mark_running(&self, id: &str) -> BenchResult<()> {
        let mut sessions = self.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| BenchError::SessionNotFound(id.to_string()))?;

        if !session.status.is_startable() {
            return Err(BenchError::NotStartable {
                id: id.to_string(),
                status: session.status,
            });
        }

        session.status = SessionStatus::Running;
        session.started_at = Some(Utc::now());
        session.ended_at = None;
        session.logs.clear();
        session.result = None;
        session.error = None;
        Ok(())
    }

    /// Record the end of a run
    pub fn finish(
        &self,
        id: &str,
        status: SessionStatus,
        result: Option<TrialResult>,
        error: Option<String>,
    ) -> BenchResult<()> {
        let mut sessions = self.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| BenchError::SessionNotFound(id.to_string()))?;

        session.status = status;
        session.ended_at = Some(Utc::now());
        session.result = result;
        session.error = error;
        Ok(())
    }

    /// Full-state message for a new subscriber
    pub fn snapshot(&self, id: &str) -> Option<ServerMessage> {
        let sessions = self.read();
        let session = sessions.get(id)?;
        Some(ServerMessage::Snapshot {
            session_id: session.id.clone(),
            status: session.status,
            logs: session.logs.iter().cloned().collect(),
            result: session.result.clone(),
            error: session.error.clone(),
        })
    }

    /// Evict expired sessions and return how many were removed
    ///
    /// Any session older than the session TTL goes. Completed and failed
    /// sessions also go once they ended longer than the finished TTL ago.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let session_ttl = self.config.session_ttl();
        let finished_ttl = self.config.finished_ttl();
        let age = |since: DateTime<Utc>| (now - since).to_std().unwrap_or_default();

        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, session| {
            if age(session.created_at) > session_ttl {
                return false;
            }
            let finished = matches!(
                session.status,
                SessionStatus::Completed | SessionStatus::Error
            );
            let ended = session.ended_at.unwrap_or(session.created_at);
            !(finished && age(ended) > finished_ttl)
        });
        before - sessions.len()
    }

    /// Run [`sweep`](Self::sweep) periodically on the tokio runtime
    pub fn spawn_janitor(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.sweep(Utc::now());
                if removed > 0 {
                    tracing::info!(removed, remaining = store.len(), "Swept expired sessions");
                }
            }
        })
    }
}
