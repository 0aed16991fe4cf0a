//! Supervisor execution logic

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};

use crate::aggregator::aggregate;
use crate::classifier::OutputClassifier;
use crate::command::{build_command, PayloadFile};
use crate::config::{SupervisorConfig, TrialConfig};
use crate::error::{BenchError, BenchResult};
use crate::events::{LogEvent, LogKind};
use crate::metrics::TrialResult;
use crate::traits::LogSink;

use super::registry::{ProcessRegistry, RunTicket};

/// How long to wait for the stream tasks after the process exits
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Stderr text kept in failure messages
const STDERR_TAIL_CHARS: usize = 2000;

/// Successful outcome of a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// ab exited with code 0
    Completed(TrialResult),
    /// The run was stopped by the user
    Cancelled,
}

/// Result of probing the `ab` executable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Whether `ab -V` succeeded
    pub available: bool,

    /// Version reported by ab, e.g. `2.3`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Launches and supervises `ab` processes
///
/// At most one process runs per session id. Cloning is cheap and clones
/// share the same handle registry.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    registry: Arc<ProcessRegistry>,
}

impl ProcessSupervisor {
    /// Create a supervisor
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ProcessRegistry::default()),
        }
    }

    /// Supervisor configuration
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Reserve the session's process slot
    ///
    /// A `stop` issued between `prepare` and process spawn cancels the run
    /// before anything is started.
    pub fn prepare(&self, session_id: &str) -> BenchResult<RunTicket> {
        self.registry.register(session_id)
    }

    /// Run a trial to completion
    pub async fn run(
        &self,
        config: &TrialConfig,
        session_id: &str,
        sink: Arc<dyn LogSink>,
    ) -> BenchResult<RunOutcome> {
        let ticket = self.prepare(session_id)?;
        self.execute(ticket, config, sink).await
    }

    /// Run a trial on a previously reserved slot
    ///
    /// Every event for the run goes to `sink`; the stop, failure or summary
    /// event is always the last one.
    pub async fn execute(
        &self,
        mut ticket: RunTicket,
        config: &TrialConfig,
        sink: Arc<dyn LogSink>,
    ) -> BenchResult<RunOutcome> {
        let session_id = ticket.session_id().to_string();
        let built = build_command(config, &session_id, &self.config.scratch_dir)?;
        let payload = built.payload;

        if ticket.is_cancelled() {
            tracing::info!(session_id = %session_id, "Run cancelled before spawn");
            return Ok(finish_cancelled(&ticket, payload, sink.as_ref()));
        }

        tracing::info!(
            session_id = %session_id,
            ab = %self.config.ab_path.display(),
            args = ?built.args,
            "Spawning ab"
        );

        let spawned = Command::new(&self.config.ab_path)
            .args(&built.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                let program = self.config.ab_path.display().to_string();
                let message = if source.kind() == std::io::ErrorKind::NotFound {
                    format!("ab executable not found: {program}")
                } else {
                    format!("Failed to start {program}: {source}")
                };
                tracing::error!(
                    session_id = %session_id,
                    error = %source,
                    "Failed to spawn ab"
                );
                ticket.release();
                remove_payload(payload);
                sink.emit(LogEvent::error(message));
                return Err(BenchError::Spawn { program, source });
            }
        };

        let cancelled = ticket.cancel_flag();
        let verbosity = config.requested_verbosity();
        let stdout_task = child.stdout.take().map(|out| {
            spawn_reader(
                out,
                Arc::clone(&sink),
                Arc::clone(&cancelled),
                verbosity,
                |line, c| c.classify_stdout(line),
            )
        });
        let stderr_task = child.stderr.take().map(|err| {
            spawn_reader(
                err,
                Arc::clone(&sink),
                Arc::clone(&cancelled),
                verbosity,
                |line, c| c.classify_stderr(line),
            )
        });

        let started = Instant::now();
        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(started + period, period);
        let mut shutdown_rx = ticket.take_shutdown();

        let status: Option<ExitStatus> = loop {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => break Some(status),
                        Err(e) => {
                            tracing::warn!(
                                session_id = %session_id,
                                error = %e,
                                "Failed to wait on ab"
                            );
                            break None;
                        }
                    }
                }
                _ = recv_shutdown(&mut shutdown_rx) => {
                    tracing::info!(session_id = %session_id, "Killing ab");
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(
                            session_id = %session_id,
                            error = %e,
                            "Kill failed, process already gone"
                        );
                    }
                    break None;
                }
                _ = heartbeat.tick() => {
                    if !cancelled.load(Ordering::SeqCst) {
                        sink.emit(
                            LogEvent::info(format!(
                                "Test still running ({}s elapsed)",
                                started.elapsed().as_secs()
                            ))
                            .with_kind(LogKind::Heartbeat),
                        );
                    }
                }
            }
        };

        if ticket.is_cancelled() {
            abort_reader(stdout_task).await;
            abort_reader(stderr_task).await;
            let _ = child.wait().await;
            tracing::info!(session_id = %session_id, "Run stopped by user");
            return Ok(finish_cancelled(&ticket, payload, sink.as_ref()));
        }

        let stdout = join_reader(stdout_task, &session_id).await;
        let stderr = join_reader(stderr_task, &session_id).await;

        // A stop can land while the streams drain
        if ticket.is_cancelled() {
            return Ok(finish_cancelled(&ticket, payload, sink.as_ref()));
        }

        ticket.release();
        remove_payload(payload);

        let code = status.and_then(|s| s.code());
        if code != Some(0) {
            let stderr = tail(stderr.trim(), STDERR_TAIL_CHARS);
            let err = BenchError::AbnormalExit { code, stderr };
            tracing::warn!(session_id = %session_id, error = %err, "ab failed");
            sink.emit(LogEvent::error(err.to_string()));
            return Err(err);
        }

        let result = aggregate(&stdout);
        tracing::info!(
            session_id = %session_id,
            rps = result.requests_per_second,
            complete = result.complete_requests,
            failed = result.failed_requests,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run completed"
        );
        sink.emit(
            LogEvent::info(format!(
                "Test completed: {:.2} req/s",
                result.requests_per_second
            ))
            .with_kind(LogKind::Summary),
        );

        Ok(RunOutcome::Completed(result))
    }

    /// Stop the session's live process
    ///
    /// Returns whether a process was found and signalled. Calling it again
    /// for the same run returns false.
    pub fn stop(&self, session_id: &str) -> bool {
        let stopped = self.registry.cancel(session_id);
        if stopped {
            tracing::info!(session_id, "Stop requested");
        }
        stopped
    }

    /// Whether the session has a live process slot
    pub fn is_running(&self, session_id: &str) -> bool {
        self.registry.contains(session_id)
    }

    /// Sessions with a live process slot, sorted
    pub fn running_sessions(&self) -> Vec<String> {
        self.registry.sessions()
    }

    /// Probe the `ab` executable with `-V`
    pub async fn check_availability(&self) -> Availability {
        let output = Command::new(&self.config.ab_path)
            .arg("-V")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout);
                Availability {
                    available: true,
                    version: parse_version(&text),
                }
            }
            Ok(output) => {
                tracing::debug!(code = ?output.status.code(), "ab -V exited unsuccessfully");
                Availability::default()
            }
            Err(e) => {
                tracing::debug!(error = %e, "ab -V could not be started");
                Availability::default()
            }
        }
    }
}

fn finish_cancelled(
    ticket: &RunTicket,
    payload: Option<PayloadFile>,
    sink: &dyn LogSink,
) -> RunOutcome {
    ticket.release();
    remove_payload(payload);
    sink.emit(LogEvent::info("Test stopped by user").with_kind(LogKind::Stopped));
    RunOutcome::Cancelled
}

fn remove_payload(payload: Option<PayloadFile>) {
    if let Some(payload) = payload {
        payload.remove();
    }
}

async fn recv_shutdown(rx: &mut Option<tokio::sync::broadcast::Receiver<()>>) {
    match rx {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}

/// Read a stream line by line, classifying and emitting as lines arrive
///
/// Returns the raw text of the stream.
fn spawn_reader<R, F>(
    stream: R,
    sink: Arc<dyn LogSink>,
    cancelled: Arc<AtomicBool>,
    verbosity: u8,
    mut classify: F,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(&str, &mut OutputClassifier) -> Option<LogEvent> + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut classifier = OutputClassifier::new(verbosity);
        let mut raw = String::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Stream read failed");
                    break;
                }
            }

            let line = String::from_utf8_lossy(&buf);
            raw.push_str(&line);
            if !line.ends_with('\n') {
                raw.push('\n');
            }

            if cancelled.load(Ordering::SeqCst) {
                continue;
            }
            if let Some(event) = classify(&line, &mut classifier) {
                if !cancelled.load(Ordering::SeqCst) {
                    sink.emit(event);
                }
            }
        }

        raw
    })
}

/// Abort a stream task and wait until it can no longer emit
async fn abort_reader(task: Option<JoinHandle<String>>) {
    if let Some(task) = task {
        task.abort();
        let _ = task.await;
    }
}

async fn join_reader(task: Option<JoinHandle<String>>, session_id: &str) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match timeout(IO_CAPTURE_TIMEOUT, &mut task).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::warn!(session_id, error = %e, "Stream task failed");
            String::new()
        }
        Err(_) => {
            tracing::warn!(session_id, "Timed out draining ab output");
            task.abort();
            String::new()
        }
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

fn parse_version(text: &str) -> Option<String> {
    let line = text.lines().find(|l| l.contains("Version"))?;
    let rest = line.split("Version").nth(1)?.trim_start();
    let version: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect();
    (!version.is_empty()).then_some(version)
}
