//! Live process handles, one per session

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::error::{BenchError, BenchResult};

/// Registry entry for a session's current run
#[derive(Debug)]
struct ProcessHandle {
    run_id: u64,
    cancelled: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Concurrency-safe map of session id to live process handle
#[derive(Debug, Default)]
pub(crate) struct ProcessRegistry {
    handles: Mutex<HashMap<String, ProcessHandle>>,
    next_run_id: AtomicU64,
}

impl ProcessRegistry {
    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProcessHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new run, failing if the session already has one
    pub(crate) fn register(self: &Arc<Self>, session_id: &str) -> BenchResult<RunTicket> {
        let mut handles = self.handles();
        if handles.contains_key(session_id) {
            return Err(BenchError::AlreadyRunning(session_id.to_string()));
        }

        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        handles.insert(
            session_id.to_string(),
            ProcessHandle {
                run_id,
                cancelled: Arc::clone(&cancelled),
                shutdown_tx,
            },
        );

        Ok(RunTicket {
            session_id: session_id.to_string(),
            run_id,
            cancelled,
            shutdown_rx: Some(shutdown_rx),
            registry: Arc::clone(self),
        })
    }

    /// Flag the session's run as cancelled, signal it and drop the handle
    ///
    /// Returns false when no handle was registered.
    pub(crate) fn cancel(&self, session_id: &str) -> bool {
        let Some(handle) = self.handles().remove(session_id) else {
            return false;
        };

        // Flag first so stream tasks stop emitting before the kill lands
        handle.cancelled.store(true, Ordering::SeqCst);
        let _ = handle.shutdown_tx.send(());

        tracing::debug!(session_id, run_id = handle.run_id, "Cancellation signalled");
        true
    }

    /// Remove the handle if it still belongs to `run_id`
    pub(crate) fn release(&self, session_id: &str, run_id: u64) -> bool {
        let mut handles = self.handles();
        match handles.get(session_id) {
            Some(handle) if handle.run_id == run_id => {
                handles.remove(session_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn contains(&self, session_id: &str) -> bool {
        self.handles().contains_key(session_id)
    }

    pub(crate) fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Reservation of a session's process slot
///
/// Obtained from [`ProcessSupervisor::prepare`](super::ProcessSupervisor::prepare)
/// and consumed by `execute`. Dropping an unused ticket frees the slot.
#[derive(Debug)]
pub struct RunTicket {
    session_id: String,
    run_id: u64,
    cancelled: Arc<AtomicBool>,
    shutdown_rx: Option<broadcast::Receiver<()>>,
    registry: Arc<ProcessRegistry>,
}

impl RunTicket {
    /// Session this ticket was issued for
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether the run was stopped
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub(crate) fn take_shutdown(&mut self) -> Option<broadcast::Receiver<()>> {
        self.shutdown_rx.take()
    }

    /// Free the slot now; later releases are no-ops
    pub(crate) fn release(&self) {
        if self.registry.release(&self.session_id, self.run_id) {
            tracing::debug!(
                session_id = %self.session_id,
                run_id = self.run_id,
                "Process handle released"
            );
        }
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        self.release();
    }
}
