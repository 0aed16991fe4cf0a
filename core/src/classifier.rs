//! Line classification for ab's stdout and stderr
//!
//! ab prints a mix of lifecycle markers, per-response diagnostics, response
//! bodies and TLS chatter. Each line is matched against an ordered rule
//! table; the first matching rule decides which event (if any) is surfaced.
//! Cross-line state lives in [`ParserState`], owned by one run.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::events::{LogEvent, LogKind};

/// Requested verbosity from which per-response events are surfaced
pub const RESPONSE_DETAIL_VERBOSITY: u8 = 3;

/// Every n-th successful response produces a progress event
pub const PROGRESS_EVERY: u64 = 10;

const PREVIEW_CHARS: usize = 100;

static SUCCESS_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"LOG: Response code = (2\d\d)").expect("valid regex"));

static NON_2XX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"WARNING: Response code not 2xx(?:\s*\((\d{3})\))?").expect("valid regex")
});

static STDERR_PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:Completed|Finished) (\d+) requests").expect("valid regex"));

const CONNECTION_FAILURES: &[&str] = &[
    "apr_socket_connect",
    "apr_pollset_poll",
    "apr_socket_recv",
    "apr_sockaddr_info_get",
    "Connection refused",
    "Connection reset",
    "connection timed out",
    "The timeout specified has expired",
    "SSL read failed",
    "Name or service not known",
];

const IGNORABLE_DIAGNOSTICS: &[&str] = &[
    "SSL/TLS Protocol",
    "SSL handshake",
    "TLS server name",
    "Server Temp Key",
    "Peer certificate",
    "Certificate chain",
    "depth=",
    "verify return",
    "verify error",
    "SSL_connect",
    "SSL connected",
    "Cipher",
    "Session-ID",
    "Master-Key",
    "---",
    "LOG: ",
    "warning: TLS",
];

/// Rules applied to stdout lines, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdoutRule {
    /// `Benchmarking <host> (be patient)`
    TestStart,
    /// A JSON object printed as a response body
    StructuredRecord,
    /// `WARNING: Response code not 2xx (NNN)`
    NonSuccessResponse,
    /// `LOG: Response code = 2xx`
    SuccessResponse,
}

/// Stdout rules in evaluation order
pub const STDOUT_RULES: [StdoutRule; 4] = [
    StdoutRule::TestStart,
    StdoutRule::StructuredRecord,
    StdoutRule::NonSuccessResponse,
    StdoutRule::SuccessResponse,
];

impl StdoutRule {
    /// Whether the rule applies to a trimmed line
    pub fn matches(&self, line: &str) -> bool {
        match self {
            StdoutRule::TestStart => line.contains("Benchmarking "),
            StdoutRule::StructuredRecord => line.starts_with('{') && line.ends_with('}'),
            StdoutRule::NonSuccessResponse => NON_2XX.is_match(line),
            StdoutRule::SuccessResponse => SUCCESS_CODE.is_match(line),
        }
    }

    /// First rule matching the line
    pub fn find(line: &str) -> Option<StdoutRule> {
        STDOUT_RULES.iter().copied().find(|rule| rule.matches(line))
    }
}

/// Rules applied to stderr lines, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrRule {
    /// `Completed N requests` / `Finished N requests`
    Progress,
    /// Socket or TLS failure reported by APR
    ConnectionFailure,
    /// Benign transport or TLS diagnostics
    Ignorable,
    /// Anything else
    Passthrough,
}

impl StderrRule {
    /// Classify a trimmed stderr line
    pub fn find(line: &str) -> StderrRule {
        if STDERR_PROGRESS.is_match(line) {
            StderrRule::Progress
        } else if CONNECTION_FAILURES.iter().any(|m| line.contains(m)) {
            StderrRule::ConnectionFailure
        } else if IGNORABLE_DIAGNOSTICS.iter().any(|m| line.contains(m)) {
            StderrRule::Ignorable
        } else {
            StderrRule::Passthrough
        }
    }
}

/// Response body fields ab printed before a non-2xx warning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredResponse {
    /// `status` field
    pub status: Option<String>,
    /// `code` field, falling back to a numeric `status`
    pub code: Option<u16>,
    /// `message` field
    pub message: Option<String>,
}

impl StructuredResponse {
    fn parse(line: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            status: Option<serde_json::Value>,
            #[serde(default)]
            code: Option<serde_json::Value>,
            #[serde(default)]
            message: Option<serde_json::Value>,
        }

        let raw: Raw = serde_json::from_str(line)?;
        let code = raw
            .code
            .as_ref()
            .and_then(status_number)
            .or_else(|| raw.status.as_ref().and_then(status_number));

        Ok(Self {
            status: raw.status.as_ref().map(value_text),
            code,
            message: raw.message.as_ref().map(value_text),
        })
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(code) = self.code {
            parts.push(format!("code {code}"));
        }
        if let Some(status) = &self.status {
            parts.push(format!("status {status}"));
        }
        if let Some(message) = &self.message {
            parts.push(message.clone());
        }
        if parts.is_empty() {
            "empty body".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn status_number(value: &serde_json::Value) -> Option<u16> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn preview(line: &str) -> String {
    let mut chars = line.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Cross-line state for one run
#[derive(Debug, Clone, Default)]
pub struct ParserState {
    /// Structured body waiting for its non-2xx warning
    pub pending: Option<StructuredResponse>,
    /// Responses observed so far (2xx and non-2xx)
    pub responses: u64,
}

/// Classifies ab output lines into log events
#[derive(Debug, Clone, Default)]
pub struct OutputClassifier {
    verbosity: u8,
    state: ParserState,
}

impl OutputClassifier {
    /// Create a classifier for the caller's requested verbosity
    pub fn new(verbosity: u8) -> Self {
        Self {
            verbosity,
            state: ParserState::default(),
        }
    }

    /// Current parser state
    pub fn state(&self) -> &ParserState {
        &self.state
    }

    fn detailed(&self) -> bool {
        self.verbosity >= RESPONSE_DETAIL_VERBOSITY
    }

    /// Classify one stdout line
    pub fn classify_stdout(&mut self, line: &str) -> Option<LogEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match StdoutRule::find(line)? {
            StdoutRule::TestStart => Some(LogEvent::info(line).with_kind(LogKind::TestStart)),
            StdoutRule::StructuredRecord => match StructuredResponse::parse(line) {
                Ok(record) => {
                    self.state.pending = Some(record);
                    None
                }
                Err(_) => Some(LogEvent::debug(format!(
                    "Failed to parse JSON response: {}",
                    preview(line)
                ))),
            },
            StdoutRule::NonSuccessResponse => {
                self.state.responses += 1;
                let n = self.state.responses;
                let observed = NON_2XX
                    .captures(line)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());

                match self.state.pending.take() {
                    Some(record) => {
                        let message = format!(
                            "Response #{n}: non-2xx status {} ({})",
                            observed.as_deref().unwrap_or("unknown"),
                            record.describe()
                        );
                        if record.code.is_some_and(|code| code >= 400) {
                            Some(LogEvent::error(message).with_kind(LogKind::Response))
                        } else if self.detailed() {
                            Some(LogEvent::debug(message).with_kind(LogKind::Response))
                        } else {
                            None
                        }
                    }
                    None => Some(
                        LogEvent::error(format!(
                            "Response #{n}: non-2xx status {}",
                            observed.as_deref().unwrap_or("unknown")
                        ))
                        .with_kind(LogKind::Response),
                    ),
                }
            }
            StdoutRule::SuccessResponse => {
                self.state.responses += 1;
                let n = self.state.responses;
                if n % PROGRESS_EVERY == 0 {
                    Some(
                        LogEvent::debug(format!("Processed {n} responses"))
                            .with_kind(LogKind::Progress),
                    )
                } else if self.detailed() {
                    let code = SUCCESS_CODE
                        .captures(line)
                        .and_then(|c| c.get(1))
                        .map_or("2xx", |m| m.as_str());
                    Some(
                        LogEvent::debug(format!("Response #{n}: HTTP {code}"))
                            .with_kind(LogKind::Response),
                    )
                } else {
                    None
                }
            }
        }
    }

    /// Classify one stderr line
    pub fn classify_stderr(&self, line: &str) -> Option<LogEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match StderrRule::find(line) {
            StderrRule::Progress => Some(LogEvent::info(line).with_kind(LogKind::Progress)),
            StderrRule::ConnectionFailure => Some(
                LogEvent::error(format!("Connection failure: {line}")).with_kind(LogKind::Stderr),
            ),
            StderrRule::Ignorable => None,
            StderrRule::Passthrough => {
                Some(LogEvent::debug(format!("[stderr] {line}")).with_kind(LogKind::Stderr))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogLevel;

    #[test]
    fn test_rule_priority() {
        assert_eq!(
            StdoutRule::find("Benchmarking localhost (be patient)"),
            Some(StdoutRule::TestStart)
        );
        assert_eq!(
            StdoutRule::find(r#"{"code": 404}"#),
            Some(StdoutRule::StructuredRecord)
        );
        assert_eq!(
            StdoutRule::find("WARNING: Response code not 2xx (500)"),
            Some(StdoutRule::NonSuccessResponse)
        );
        assert_eq!(
            StdoutRule::find("LOG: Response code = 200"),
            Some(StdoutRule::SuccessResponse)
        );
        assert_eq!(StdoutRule::find("Requests per second:    1.00"), None);
    }

    #[test]
    fn test_benchmark_start_is_info() {
        let mut classifier = OutputClassifier::new(0);
        let event = classifier
            .classify_stdout("Benchmarking example.com (be patient).....done")
            .unwrap();
        assert_eq!(event.level, LogLevel::Info);
        assert_eq!(event.kind, Some(LogKind::TestStart));
    }

    #[test]
    fn test_structured_record_combines_with_warning() {
        let mut classifier = OutputClassifier::new(0);
        assert!(classifier
            .classify_stdout(r#"{"status":"error","code":503,"message":"overloaded"}"#)
            .is_none());
        assert!(classifier.state().pending.is_some());

        let event = classifier
            .classify_stdout("WARNING: Response code not 2xx (503)")
            .unwrap();
        assert_eq!(event.level, LogLevel::Error);
        assert!(event.message.contains("503"));
        assert!(event.message.contains("overloaded"));
        assert!(classifier.state().pending.is_none());
        assert_eq!(classifier.state().responses, 1);
    }

    #[test]
    fn test_low_structured_code_respects_verbosity() {
        let mut quiet = OutputClassifier::new(1);
        quiet.classify_stdout(r#"{"code":302,"message":"moved"}"#);
        assert!(quiet
            .classify_stdout("WARNING: Response code not 2xx (302)")
            .is_none());
        assert!(quiet.state().pending.is_none());

        let mut verbose = OutputClassifier::new(3);
        verbose.classify_stdout(r#"{"code":"302","message":"moved"}"#);
        let event = verbose
            .classify_stdout("WARNING: Response code not 2xx (302)")
            .unwrap();
        assert_eq!(event.level, LogLevel::Debug);
    }

    #[test]
    fn test_warning_without_pending_record_is_error() {
        let mut classifier = OutputClassifier::new(0);
        let event = classifier
            .classify_stdout("WARNING: Response code not 2xx (404)")
            .unwrap();
        assert_eq!(event.level, LogLevel::Error);
        assert_eq!(event.message, "Response #1: non-2xx status 404");

        let event = classifier
            .classify_stdout("WARNING: Response code not 2xx")
            .unwrap();
        assert!(event.message.ends_with("unknown"));
    }

    #[test]
    fn test_malformed_json_is_debug_with_preview() {
        let mut classifier = OutputClassifier::new(0);
        let long = format!("{{\"broken\": {}}}", "x".repeat(300));
        let event = classifier.classify_stdout(&long).unwrap();
        assert_eq!(event.level, LogLevel::Debug);
        assert!(event.message.starts_with("Failed to parse JSON response"));
        assert!(event.message.ends_with("..."));
        assert!(event.message.len() < 150);
    }

    #[test]
    fn test_success_progress_every_tenth() {
        let mut classifier = OutputClassifier::new(0);
        let events: Vec<LogEvent> = (0..25)
            .filter_map(|_| classifier.classify_stdout("LOG: Response code = 200"))
            .collect();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "Processed 10 responses");
        assert_eq!(events[1].message, "Processed 20 responses");
        assert!(events.iter().all(|e| e.kind == Some(LogKind::Progress)));
    }

    #[test]
    fn test_success_detail_at_high_verbosity() {
        let mut classifier = OutputClassifier::new(4);
        let event = classifier
            .classify_stdout("LOG: Response code = 201")
            .unwrap();
        assert_eq!(event.message, "Response #1: HTTP 201");
    }

    #[test]
    fn test_counter_is_shared_between_outcomes() {
        let mut classifier = OutputClassifier::new(0);
        for _ in 0..9 {
            classifier.classify_stdout("LOG: Response code = 200");
        }
        classifier.classify_stdout("WARNING: Response code not 2xx (500)");
        assert_eq!(classifier.state().responses, 10);
    }

    #[test]
    fn test_unmatched_stdout_lines_are_silent() {
        let mut classifier = OutputClassifier::new(5);
        for line in ["", "   ", "Server Software:        nginx", "HTTP/1.1 200 OK"] {
            assert!(classifier.classify_stdout(line).is_none(), "{line}");
        }
    }

    #[test]
    fn test_stderr_rules() {
        let classifier = OutputClassifier::new(0);

        let progress = classifier.classify_stderr("Completed 100 requests").unwrap();
        assert_eq!(progress.level, LogLevel::Info);

        let finished = classifier.classify_stderr("Finished 1000 requests").unwrap();
        assert_eq!(finished.level, LogLevel::Info);

        let failure = classifier
            .classify_stderr("apr_socket_connect(): Connection refused (111)")
            .unwrap();
        assert_eq!(failure.level, LogLevel::Error);

        assert!(classifier
            .classify_stderr("SSL/TLS Protocol: TLSv1.2,ECDHE-RSA-AES256-GCM-SHA384")
            .is_none());
        assert!(classifier.classify_stderr("depth=0 CN = localhost").is_none());

        let other = classifier.classify_stderr("something odd").unwrap();
        assert_eq!(other.level, LogLevel::Debug);
        assert_eq!(other.message, "[stderr] something odd");
    }

    #[test]
    fn test_preview_is_char_safe() {
        let text = "é".repeat(150);
        let out = preview(&text);
        assert_eq!(out.chars().count(), PREVIEW_CHARS + 3);
    }
}
