//! Session tracking and event fan-out
//!
//! A session wraps one [`TrialConfig`] and the state of its most recent run:
//! - [`SessionStore`] keeps sessions, bounded log buffers and results
//! - [`Broadcaster`] pushes events to at most one subscriber per session
//! - [`SessionController`] composes both with the process supervisor

mod broadcaster;
mod controller;
mod store;

pub use broadcaster::{Broadcaster, ConnectionId};
pub use controller::{SessionController, SessionLogSink, StopOutcome};
pub use store::SessionStore;

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{HttpMethod, TrialConfig};
use crate::events::LogEvent;
use crate::metrics::TrialResult;

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, never started
    Preparing,
    /// A process is (or is about to be) running
    Running,
    /// Last run produced a result
    Completed,
    /// Last run was stopped by the user
    Stopped,
    /// Last run failed
    Error,
}

impl SessionStatus {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Preparing => "preparing",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        }
    }

    /// Whether the session's last run has ended
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Stopped | SessionStatus::Error
        )
    }

    /// Whether a run may be started from this status
    pub fn is_startable(&self) -> bool {
        *self == SessionStatus::Preparing || self.is_terminal()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured trial and the state of its latest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// UUID v4 identifier
    pub id: String,

    /// Trial configuration
    pub config: TrialConfig,

    /// Lifecycle status
    pub status: SessionStatus,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Start of the latest run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// End of the latest run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Retained log entries, oldest first
    pub logs: VecDeque<LogEvent>,

    /// Result of the latest successful run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TrialResult>,

    /// Failure message of the latest run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Session {
    pub(crate) fn new(id: String, config: TrialConfig, now: DateTime<Utc>) -> Self {
        Self {
            id,
            config,
            status: SessionStatus::Preparing,
            created_at: now,
            started_at: None,
            ended_at: None,
            logs: VecDeque::new(),
            result: None,
            error: None,
        }
    }

    /// Listing view of the session
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            url: self.config.url.clone(),
            method: self.config.method,
            requests: self.config.requests,
            concurrency: self.config.concurrency,
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            requests_per_second: self.result.as_ref().map(|r| r.requests_per_second),
            log_count: self.logs.len(),
        }
    }
}

/// Compact view of a session for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session id
    pub id: String,
    /// Target URL
    pub url: String,
    /// HTTP method
    pub method: HttpMethod,
    /// Total requests
    pub requests: u64,
    /// Concurrent requests
    pub concurrency: u64,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Start of the latest run
    pub started_at: Option<DateTime<Utc>>,
    /// End of the latest run
    pub ended_at: Option<DateTime<Utc>>,
    /// Throughput of the latest result
    pub requests_per_second: Option<f64>,
    /// Retained log entries
    pub log_count: usize,
}

#[cfg(test)]
mod tests;
