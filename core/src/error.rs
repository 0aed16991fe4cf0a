//! Error types for ab-bench-core

use thiserror::Error;

use crate::session::SessionStatus;

/// Core error type
#[derive(Error, Debug)]
pub enum BenchError {
    /// One or more trial configuration constraints were violated
    #[error("invalid trial configuration: {}", .0.join("; "))]
    ConfigValidation(Vec<String>),

    /// The benchmarking executable could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The benchmarking executable exited with a non-zero code
    #[error("ab exited with {}: {stderr}", describe_exit(.code))]
    AbnormalExit {
        /// Exit code, `None` when terminated by a signal
        code: Option<i32>,
        /// Captured stderr text
        stderr: String,
    },

    /// A process is already registered for the session
    #[error("session {0} already has a running process")]
    AlreadyRunning(String),

    /// No session exists with the given id
    #[error("session {0} not found")]
    SessionNotFound(String),

    /// Session exists but cannot be started from its current status
    #[error("session {id} cannot be started while {status}")]
    NotStartable {
        /// Session id
        id: String,
        /// Status at the time of the request
        status: SessionStatus,
    },

    /// Request payload file could not be written
    #[error("failed to write request payload: {0}")]
    Payload(#[source] std::io::Error),
}

impl BenchError {
    /// Validation errors listed one per entry, empty for every other variant
    pub fn validation_errors(&self) -> &[String] {
        match self {
            BenchError::ConfigValidation(errors) => errors,
            _ => &[],
        }
    }

    /// Whether the error was raised before any process was spawned
    pub fn is_pre_spawn(&self) -> bool {
        matches!(
            self,
            BenchError::ConfigValidation(_)
                | BenchError::AlreadyRunning(_)
                | BenchError::SessionNotFound(_)
                | BenchError::NotStartable { .. }
                | BenchError::Payload(_)
        )
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Result type alias
pub type BenchResult<T> = std::result::Result<T, BenchError>;
