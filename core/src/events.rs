//! Log events and subscriber wire messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::TrialResult;
use crate::session::SessionStatus;

/// Log event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Lifecycle and progress information
    Info,
    /// Failures surfaced to the user
    Error,
    /// Diagnostic noise
    Debug,
}

/// What produced a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// ab announced the start of benchmarking
    TestStart,
    /// Periodic response counter
    Progress,
    /// Periodic "still running" notice
    Heartbeat,
    /// A single observed response
    Response,
    /// Passthrough from stderr
    Stderr,
    /// Final throughput summary
    Summary,
    /// Run stopped by the user
    Stopped,
}

/// A single entry in a session's log stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,

    /// Severity
    pub level: LogLevel,

    /// Free-text message
    pub message: String,

    /// Optional tag describing the event source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<LogKind>,
}

impl LogEvent {
    /// Create an event stamped with the current time
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            kind: None,
        }
    }

    /// Info-level event
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    /// Error-level event
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// Debug-level event
    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, message)
    }

    /// Tag the event with its source
    pub fn with_kind(mut self, kind: LogKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Messages pushed from the server to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full state of a session, sent once on subscribe
    Snapshot {
        /// Session id
        session_id: String,
        /// Current lifecycle status
        status: SessionStatus,
        /// Every retained log entry
        logs: Vec<LogEvent>,
        /// Final result, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<TrialResult>,
        /// Failure message, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A log entry was appended
    Log {
        /// Session id
        session_id: String,
        /// The appended entry
        log: LogEvent,
    },
    /// The trial started running
    TestStart {
        /// Session id
        session_id: String,
    },
    /// The trial completed successfully
    TestComplete {
        /// Session id
        session_id: String,
        /// Parsed result
        result: TrialResult,
    },
    /// The trial was stopped by the user
    TestStopped {
        /// Session id
        session_id: String,
        /// Zeroed result
        result: TrialResult,
    },
    /// The trial failed
    TestError {
        /// Session id
        session_id: String,
        /// Failure message
        error: String,
    },
    /// A client frame could not be handled
    Error {
        /// Description of the problem
        message: String,
    },
}

impl ServerMessage {
    /// Session the message belongs to, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Snapshot { session_id, .. }
            | ServerMessage::Log { session_id, .. }
            | ServerMessage::TestStart { session_id }
            | ServerMessage::TestComplete { session_id, .. }
            | ServerMessage::TestStopped { session_id, .. }
            | ServerMessage::TestError { session_id, .. } => Some(session_id),
            ServerMessage::Error { .. } => None,
        }
    }
}

/// Messages sent by a subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving events for a session
    Subscribe {
        /// Session id
        session_id: String,
    },
    /// Stop receiving events for a session
    Disconnect {
        /// Session id
        session_id: String,
        /// Optional reason, logged only
        #[serde(default)]
        reason: Option<String>,
    },
}
