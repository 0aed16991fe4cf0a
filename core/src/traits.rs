//! Seams between the process supervisor and its consumers

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::events::LogEvent;

/// Receiver of a run's log events
///
/// The supervisor calls `emit` from its stream tasks as lines arrive, so
/// implementations must be cheap and must not block on async work.
pub trait LogSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: LogEvent);
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn emit(&self, event: LogEvent) {
        (**self).emit(event);
    }
}

impl LogSink for mpsc::UnboundedSender<LogEvent> {
    fn emit(&self, event: LogEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.send(event);
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<LogEvent>>,
}

impl CollectingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything collected so far
    pub fn events(&self) -> Vec<LogEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages collected so far
    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }
}

impl LogSink for CollectingSink {
    fn emit(&self, event: LogEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
