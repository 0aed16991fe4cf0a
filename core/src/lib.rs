//! ab-bench-core: Execution and streaming engine for Apache Bench trials
//!
//! This crate drives the external `ab` executable and turns its output into
//! structured events and results, including:
//!
//! - Trial configuration, validation and command construction
//! - Line classification and final report aggregation
//! - Process supervision with forceful cancellation
//! - Session tracking and per-session event fan-out

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod classifier;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod session;
pub mod supervisor;
pub mod traits;

#[cfg(all(test, unix))]
pub(crate) mod testing;

pub use aggregator::aggregate;
pub use classifier::{OutputClassifier, ParserState};
pub use command::{build_command, BuiltCommand};
pub use config::*;
pub use error::*;
pub use events::*;
pub use metrics::*;
pub use session::{
    Broadcaster, ConnectionId, Session, SessionController, SessionStatus, SessionStore,
    SessionSummary, StopOutcome,
};
pub use supervisor::{Availability, ProcessSupervisor, RunOutcome, RunTicket};
pub use traits::*;

#[cfg(test)]
mod integration_tests {
    use super::*;

    // =========================================================================
    // Wire format tests
    // =========================================================================

    #[test]
    fn test_snapshot_wire_format() {
        let message = ServerMessage::Snapshot {
            session_id: "abc".into(),
            status: SessionStatus::Running,
            logs: vec![LogEvent::info("Benchmarking localhost (be patient)")
                .with_kind(LogKind::TestStart)],
            result: None,
            error: None,
        };
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["status"], "running");
        assert_eq!(json["logs"][0]["kind"], "test_start");
        assert_eq!(json["logs"][0]["level"], "info");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_stop_outcome_wire_format() {
        assert_eq!(
            serde_json::to_string(&StopOutcome::AlreadyTerminal).unwrap(),
            "\"already_terminal\""
        );
        assert_eq!(
            serde_json::to_string(&StopOutcome::NotRunning).unwrap(),
            "\"not_running\""
        );
    }

    // =========================================================================
    // Pipeline tests
    // =========================================================================

    #[test]
    fn test_transcript_through_classifier_and_aggregator() {
        let transcript = "\
Benchmarking example.com (be patient)
LOG: Response code = 200
{\"status\":\"error\",\"code\":503,\"message\":\"overloaded\"}
WARNING: Response code not 2xx (503)
HTTP/1.1 200 OK
HTTP/1.1 503 Service Unavailable
Requests per second:    12.50 [#/sec] (mean)
";
        let mut classifier = OutputClassifier::new(0);
        let events: Vec<LogEvent> = transcript
            .lines()
            .filter_map(|line| classifier.classify_stdout(line))
            .collect();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, Some(LogKind::TestStart));
        assert_eq!(events[1].level, LogLevel::Error);
        assert!(events[1].message.contains("503"));
        assert_eq!(classifier.state().responses, 2);
        assert!(classifier.state().pending.is_none());

        let result = aggregate(transcript);
        assert!((result.requests_per_second - 12.5).abs() < 1e-9);
        let breakdown = result.status_breakdown.unwrap();
        assert_eq!(breakdown.successful, 1);
        assert_eq!(breakdown.server_errors, 1);
        assert_eq!(breakdown.errors[0].reason, "Service Unavailable");
    }

    #[test]
    fn test_config_json_to_command() {
        let config: TrialConfig = serde_json::from_str(
            r#"{
                "url": "http://localhost:3000/items",
                "requests": 20,
                "concurrency": 4,
                "method": "GET",
                "keep_alive": true,
                "headers": {"Accept": "application/json"}
            }"#,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let built = build_command(&config, "s1", dir.path()).unwrap();

        assert_eq!(
            built.args,
            vec![
                "-n",
                "20",
                "-c",
                "4",
                "-k",
                "-v",
                "3",
                "-H",
                "Accept: application/json",
                "http://localhost:3000/items",
            ]
        );
    }
}
