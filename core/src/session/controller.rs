//! Session operations exposed to the request-handling layer

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{SessionStoreConfig, SupervisorConfig, TrialConfig, ValidationReport};
use crate::error::{BenchError, BenchResult};
use crate::events::{LogEvent, ServerMessage};
use crate::metrics::TrialResult;
use crate::supervisor::{Availability, ProcessSupervisor, RunOutcome};
use crate::traits::LogSink;

use super::{Broadcaster, ConnectionId, Session, SessionStatus, SessionStore, SessionSummary};

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The last run had already ended
    AlreadyTerminal,
    /// A live process was signalled
    Stopped,
    /// Nothing was running
    NotRunning,
}

/// Routes a run's log events into the store and to the subscriber
#[derive(Debug, Clone)]
pub struct SessionLogSink {
    session_id: String,
    broadcaster: Arc<Broadcaster>,
}

impl SessionLogSink {
    /// Sink for one session
    pub fn new(session_id: impl Into<String>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            session_id: session_id.into(),
            broadcaster,
        }
    }
}

impl LogSink for SessionLogSink {
    fn emit(&self, event: LogEvent) {
        if let Err(e) = self.broadcaster.publish_log(&self.session_id, event) {
            tracing::debug!(session_id = %self.session_id, error = %e, "Dropped log event");
        }
    }
}

/// Composes the session store, broadcaster and process supervisor
#[derive(Debug, Clone)]
pub struct SessionController {
    store: Arc<SessionStore>,
    broadcaster: Arc<Broadcaster>,
    supervisor: ProcessSupervisor,
}

impl SessionController {
    /// Create a controller with fresh state
    pub fn new(supervisor: SupervisorConfig, sessions: SessionStoreConfig) -> Self {
        let store = Arc::new(SessionStore::new(sessions));
        Self {
            broadcaster: Arc::new(Broadcaster::new(Arc::clone(&store))),
            store,
            supervisor: ProcessSupervisor::new(supervisor),
        }
    }

    /// Session store
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Subscriber broadcaster
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Process supervisor
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Validate a configuration without creating anything
    pub fn validate(&self, config: &TrialConfig) -> ValidationReport {
        config.validate()
    }

    /// Create a session in `preparing` state
    pub fn create_session(&self, config: TrialConfig) -> BenchResult<String> {
        let report = config.validate();
        if !report.is_ok() {
            return Err(BenchError::ConfigValidation(report.errors));
        }
        let id = self.store.create(config);
        tracing::info!(session_id = %id, "Session created");
        Ok(id)
    }

    /// Start a session's trial in the background
    ///
    /// Fails only when the session is missing, already running or not in a
    /// startable state. Must be called within a tokio runtime.
    pub fn start_session(&self, id: &str) -> BenchResult<()> {
        let config = self
            .store
            .get(id)
            .map(|s| s.config)
            .ok_or_else(|| BenchError::SessionNotFound(id.to_string()))?;

        let ticket = self.supervisor.prepare(id)?;
        self.broadcaster.publish_with(
            id,
            |store| store.mark_running(id),
            ServerMessage::TestStart {
                session_id: id.to_string(),
            },
        )?;

        tracing::info!(session_id = %id, url = %config.url, "Starting trial");

        let controller = self.clone();
        let session_id = id.to_string();
        let sink: Arc<dyn LogSink> = Arc::new(SessionLogSink::new(
            session_id.clone(),
            Arc::clone(&self.broadcaster),
        ));
        tokio::spawn(async move {
            let outcome = controller
                .supervisor
                .execute(ticket, &config, sink)
                .await;
            controller.finish_run(&session_id, outcome);
        });
        Ok(())
    }

    fn finish_run(&self, id: &str, outcome: BenchResult<RunOutcome>) {
        let session_id = id.to_string();
        let published = match outcome {
            Ok(RunOutcome::Completed(result)) => {
                let stored = result.clone();
                self.broadcaster.publish_with(
                    id,
                    |store| store.finish(id, SessionStatus::Completed, Some(stored), None),
                    ServerMessage::TestComplete { session_id, result },
                )
            }
            Ok(RunOutcome::Cancelled) => self.broadcaster.publish_with(
                id,
                |store| store.finish(id, SessionStatus::Stopped, None, None),
                ServerMessage::TestStopped {
                    session_id,
                    result: TrialResult::default(),
                },
            ),
            Err(e) => {
                if e.is_pre_spawn() {
                    tracing::warn!(session_id = %id, error = %e, "Trial never reached ab");
                } else {
                    tracing::warn!(session_id = %id, error = %e, "Trial failed");
                }
                let error = e.to_string();
                let stored = error.clone();
                self.broadcaster.publish_with(
                    id,
                    |store| store.finish(id, SessionStatus::Error, None, Some(stored)),
                    ServerMessage::TestError { session_id, error },
                )
            }
        };

        if let Err(e) = published {
            tracing::debug!(session_id = %id, error = %e, "Session removed before run finished");
        }
    }

    /// Stop a session's running trial
    pub fn stop_session(&self, id: &str) -> BenchResult<StopOutcome> {
        let status = self
            .store
            .status(id)
            .ok_or_else(|| BenchError::SessionNotFound(id.to_string()))?;

        if status.is_terminal() {
            return Ok(StopOutcome::AlreadyTerminal);
        }
        if self.supervisor.stop(id) {
            Ok(StopOutcome::Stopped)
        } else {
            Ok(StopOutcome::NotRunning)
        }
    }

    /// Delete a session, stopping its process first
    pub fn delete_session(&self, id: &str) -> BenchResult<()> {
        if self.supervisor.stop(id) {
            tracing::info!(session_id = %id, "Stopped process of deleted session");
        }
        self.broadcaster.forget(id);
        self.store
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BenchError::SessionNotFound(id.to_string()))
    }

    /// Summaries of every session, newest first
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.store.list()
    }

    /// Full session state
    pub fn get_session(&self, id: &str) -> BenchResult<Session> {
        self.store
            .get(id)
            .ok_or_else(|| BenchError::SessionNotFound(id.to_string()))
    }

    /// Subscribe a connection to a session's events
    pub fn subscribe(
        &self,
        id: &str,
        connection_id: ConnectionId,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> BenchResult<()> {
        self.broadcaster.subscribe(id, connection_id, tx)
    }

    /// Drop a connection's subscription to a session
    pub fn unsubscribe(&self, id: &str, connection_id: ConnectionId) -> bool {
        self.broadcaster.unsubscribe(id, connection_id)
    }

    /// Drop every subscription of a closed connection
    pub fn drop_connection(&self, connection_id: ConnectionId) -> usize {
        self.broadcaster.drop_connection(connection_id)
    }

    /// Probe the `ab` executable
    pub async fn check_availability(&self) -> Availability {
        self.supervisor.check_availability().await
    }

    /// Start the periodic session sweep
    pub fn spawn_janitor(&self) -> JoinHandle<()> {
        self.store.spawn_janitor()
    }
}
