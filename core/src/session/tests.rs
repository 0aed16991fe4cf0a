//! Tests for the session module

use super::*;
use crate::config::{SessionStoreConfig, SupervisorConfig, TrialConfig};
use crate::error::BenchError;
use crate::events::{LogEvent, ServerMessage};

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

fn trial() -> TrialConfig {
    TrialConfig::new("http://localhost:8080/", 3, 1)
}

fn store_with_capacity(capacity: usize) -> Arc<SessionStore> {
    Arc::new(SessionStore::new(
        SessionStoreConfig::default().with_log_capacity(capacity),
    ))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

// ============================================================================
// SessionStatus tests
// ============================================================================

#[test]
fn test_status_predicates() {
    assert!(SessionStatus::Preparing.is_startable());
    assert!(!SessionStatus::Running.is_startable());
    assert!(SessionStatus::Stopped.is_startable());
    assert!(SessionStatus::Error.is_terminal());
    assert!(!SessionStatus::Preparing.is_terminal());
    assert_eq!(SessionStatus::Completed.to_string(), "completed");
    assert_eq!(
        serde_json::to_string(&SessionStatus::Running).unwrap(),
        "\"running\""
    );
}

// ============================================================================
// SessionStore tests
// ============================================================================

#[test]
fn test_create_and_get() {
    let store = store_with_capacity(10);
    let id = store.create(trial());

    assert!(uuid::Uuid::parse_str(&id).is_ok());
    let session = store.get(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Preparing);
    assert_eq!(session.config, trial());
    assert!(session.started_at.is_none());
    assert!(store.get("missing").is_none());
}

#[test]
fn test_log_buffer_evicts_oldest_first() {
    let store = store_with_capacity(3);
    let id = store.create(trial());

    for i in 0..5 {
        store.append_log(&id, LogEvent::info(format!("line {i}"))).unwrap();
    }

    let messages: Vec<String> = store
        .get(&id)
        .unwrap()
        .logs
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
}

#[test]
fn test_append_to_missing_session() {
    let store = store_with_capacity(3);
    assert!(matches!(
        store.append_log("missing", LogEvent::info("x")),
        Err(BenchError::SessionNotFound(_))
    ));
}

#[test]
fn test_mark_running_rules() {
    let store = store_with_capacity(10);
    let id = store.create(trial());

    store.mark_running(&id).unwrap();
    assert_eq!(store.status(&id), Some(SessionStatus::Running));
    assert!(matches!(
        store.mark_running(&id),
        Err(BenchError::NotStartable { status: SessionStatus::Running, .. })
    ));

    store.append_log(&id, LogEvent::info("old run")).unwrap();
    store
        .finish(&id, SessionStatus::Error, None, Some("boom".into()))
        .unwrap();

    store.mark_running(&id).unwrap();
    let session = store.get(&id).unwrap();
    assert!(session.logs.is_empty());
    assert!(session.error.is_none());
    assert!(session.ended_at.is_none());
}

#[test]
fn test_sweep_ttls() {
    let store = store_with_capacity(10);
    let preparing = store.create(trial());
    let completed = store.create(trial());
    let stopped = store.create(trial());
    store
        .finish(&completed, SessionStatus::Completed, None, None)
        .unwrap();
    store
        .finish(&stopped, SessionStatus::Stopped, None, None)
        .unwrap();

    assert_eq!(store.sweep(Utc::now()), 0);

    // Past the finished TTL only completed/error sessions go
    assert_eq!(store.sweep(Utc::now() + ChronoDuration::hours(2)), 1);
    assert!(store.get(&completed).is_none());
    assert!(store.get(&preparing).is_some());
    assert!(store.get(&stopped).is_some());

    // Past the session TTL everything goes
    assert_eq!(store.sweep(Utc::now() + ChronoDuration::hours(25)), 2);
    assert!(store.is_empty());
}

#[test]
fn test_list_summaries() {
    let store = store_with_capacity(10);
    let id = store.create(trial());
    store.append_log(&id, LogEvent::info("a")).unwrap();

    let summaries = store.list();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, id);
    assert_eq!(summaries[0].url, "http://localhost:8080/");
    assert_eq!(summaries[0].log_count, 1);
    assert!(summaries[0].requests_per_second.is_none());
}

// ============================================================================
// Broadcaster tests
// ============================================================================

#[test]
fn test_subscribe_sends_snapshot_first() {
    let store = store_with_capacity(10);
    let id = store.create(trial());
    store.append_log(&id, LogEvent::info("before")).unwrap();
    let broadcaster = Broadcaster::new(Arc::clone(&store));

    let (tx, mut rx) = mpsc::unbounded_channel();
    broadcaster.subscribe(&id, 1, tx).unwrap();
    broadcaster.publish_log(&id, LogEvent::info("after")).unwrap();

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 2);
    match &messages[0] {
        ServerMessage::Snapshot { logs, status, .. } => {
            assert_eq!(*status, SessionStatus::Preparing);
            assert_eq!(logs.len(), 1);
            assert_eq!(logs[0].message, "before");
        }
        other => panic!("expected snapshot, got {other:?}"),
    }
    match &messages[1] {
        ServerMessage::Log { log, .. } => assert_eq!(log.message, "after"),
        other => panic!("expected log, got {other:?}"),
    }
}

#[test]
fn test_subscribe_to_missing_session() {
    let broadcaster = Broadcaster::new(store_with_capacity(10));
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(matches!(
        broadcaster.subscribe("missing", 1, tx),
        Err(BenchError::SessionNotFound(_))
    ));
    assert!(!broadcaster.is_subscribed("missing"));
}

#[test]
fn test_newer_subscription_supersedes() {
    let store = store_with_capacity(10);
    let id = store.create(trial());
    let broadcaster = Broadcaster::new(Arc::clone(&store));

    let (old_tx, mut old_rx) = mpsc::unbounded_channel();
    let (new_tx, mut new_rx) = mpsc::unbounded_channel();
    broadcaster.subscribe(&id, 1, old_tx).unwrap();
    broadcaster.subscribe(&id, 2, new_tx).unwrap();
    broadcaster.publish_log(&id, LogEvent::info("x")).unwrap();

    assert_eq!(drain(&mut old_rx).len(), 1);
    assert_eq!(drain(&mut new_rx).len(), 2);

    // The superseded connection cannot unsubscribe the new one
    assert!(!broadcaster.unsubscribe(&id, 1));
    assert!(broadcaster.unsubscribe(&id, 2));
    assert!(!broadcaster.is_subscribed(&id));
}

#[test]
fn test_drop_connection_removes_all_its_subscriptions() {
    let store = store_with_capacity(10);
    let a = store.create(trial());
    let b = store.create(trial());
    let broadcaster = Broadcaster::new(Arc::clone(&store));

    let (tx, _rx) = mpsc::unbounded_channel();
    broadcaster.subscribe(&a, 7, tx.clone()).unwrap();
    broadcaster.subscribe(&b, 7, tx).unwrap();

    assert_eq!(broadcaster.drop_connection(7), 2);
    assert!(!broadcaster.is_subscribed(&a));
}

#[test]
fn test_closed_subscriber_is_removed_on_publish() {
    let store = store_with_capacity(10);
    let id = store.create(trial());
    let broadcaster = Broadcaster::new(Arc::clone(&store));

    let (tx, rx) = mpsc::unbounded_channel();
    broadcaster.subscribe(&id, 1, tx).unwrap();
    drop(rx);

    broadcaster.publish_log(&id, LogEvent::info("x")).unwrap();
    assert!(!broadcaster.is_subscribed(&id));
    assert_eq!(store.get(&id).unwrap().logs.len(), 1);
}

#[test]
fn test_late_subscriber_sees_no_gaps() {
    let store = store_with_capacity(1000);
    let id = store.create(trial());
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&store)));

    let publisher = {
        let broadcaster = Arc::clone(&broadcaster);
        let id = id.clone();
        std::thread::spawn(move || {
            for i in 0..500 {
                broadcaster
                    .publish_log(&id, LogEvent::info(format!("{i}")))
                    .unwrap();
            }
        })
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    broadcaster.subscribe(&id, 1, tx).unwrap();
    publisher.join().unwrap();

    let mut seen: Vec<String> = Vec::new();
    for message in drain(&mut rx) {
        match message {
            ServerMessage::Snapshot { logs, .. } => {
                seen.extend(logs.into_iter().map(|l| l.message));
            }
            ServerMessage::Log { log, .. } => seen.push(log.message),
            other => panic!("unexpected message {other:?}"),
        }
    }
    let expected: Vec<String> = (0..500).map(|i| i.to_string()).collect();
    assert_eq!(seen, expected);
}

// ============================================================================
// SessionController tests
// ============================================================================

#[test]
fn test_create_rejects_invalid_config() {
    let controller =
        SessionController::new(SupervisorConfig::default(), SessionStoreConfig::default());
    let err = controller
        .create_session(TrialConfig::new("not a url", 0, 1))
        .unwrap_err();

    assert!(err.validation_errors().len() >= 2);
    assert!(controller.list_sessions().is_empty());
}

#[test]
fn test_stop_and_delete_missing_session() {
    let controller =
        SessionController::new(SupervisorConfig::default(), SessionStoreConfig::default());
    assert!(matches!(
        controller.stop_session("missing"),
        Err(BenchError::SessionNotFound(_))
    ));
    assert!(matches!(
        controller.delete_session("missing"),
        Err(BenchError::SessionNotFound(_))
    ));
    assert!(matches!(
        controller.get_session("missing"),
        Err(BenchError::SessionNotFound(_))
    ));
}

#[test]
fn test_stop_preparing_session_is_not_running() {
    let controller =
        SessionController::new(SupervisorConfig::default(), SessionStoreConfig::default());
    let id = controller.create_session(trial()).unwrap();

    assert_eq!(controller.stop_session(&id).unwrap(), StopOutcome::NotRunning);
    assert_eq!(
        controller.get_session(&id).unwrap().status,
        SessionStatus::Preparing
    );
}

#[cfg(unix)]
mod process {
    use super::*;
    use crate::metrics::TrialResult;
    use crate::testing::{failing_ab, sleeping_ab, succeeding_ab};
    use std::path::Path;
    use std::time::Duration;

    fn controller(ab: &Path, scratch: &Path) -> SessionController {
        SessionController::new(
            SupervisorConfig::default()
                .with_ab_path(ab)
                .with_scratch_dir(scratch),
            SessionStoreConfig::default(),
        )
    }

    async fn wait_for_status(controller: &SessionController, id: &str, status: SessionStatus) {
        for _ in 0..300 {
            if controller.get_session(id).map(|s| s.status).ok() == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "session never reached {status}: {:?}",
            controller.get_session(id).map(|s| s.status)
        );
    }

    #[tokio::test]
    async fn test_full_successful_flow() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(&succeeding_ab(dir.path()), dir.path());
        let id = controller.create_session(trial()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        controller.subscribe(&id, 1, tx).unwrap();
        controller.start_session(&id).unwrap();
        wait_for_status(&controller, &id, SessionStatus::Completed).await;

        let session = controller.get_session(&id).unwrap();
        let result = session.result.unwrap();
        assert!((result.requests_per_second - 482.33).abs() < 1e-9);
        assert!(session.ended_at.is_some());
        assert_eq!(
            session.logs.back().unwrap().message,
            "Test completed: 482.33 req/s"
        );

        let messages = drain(&mut rx);
        assert!(matches!(messages[0], ServerMessage::Snapshot { .. }));
        assert!(matches!(messages[1], ServerMessage::TestStart { .. }));
        assert!(matches!(
            messages.last().unwrap(),
            ServerMessage::TestComplete { .. }
        ));

        assert_eq!(
            controller.stop_session(&id).unwrap(),
            StopOutcome::AlreadyTerminal
        );
        assert_eq!(
            controller.list_sessions()[0].requests_per_second,
            Some(482.33)
        );
    }

    #[tokio::test]
    async fn test_failed_run_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(&failing_ab(dir.path()), dir.path());
        let id = controller.create_session(trial()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        controller.subscribe(&id, 1, tx).unwrap();
        controller.start_session(&id).unwrap();
        wait_for_status(&controller, &id, SessionStatus::Error).await;

        let session = controller.get_session(&id).unwrap();
        assert!(session.result.is_none());
        let stored = session.error.unwrap();
        assert!(stored.contains("ab: invalid URL"));

        let messages = drain(&mut rx);
        match messages.last().unwrap() {
            ServerMessage::TestError { session_id, error } => {
                assert_eq!(session_id, &id);
                assert_eq!(error, &stored);
            }
            other => panic!("expected test_error last, got {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_then_restart() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(&sleeping_ab(dir.path(), 30), dir.path());
        let id = controller.create_session(trial()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        controller.subscribe(&id, 1, tx).unwrap();
        controller.start_session(&id).unwrap();
        assert!(matches!(
            controller.start_session(&id),
            Err(BenchError::AlreadyRunning(_))
        ));

        assert_eq!(controller.stop_session(&id).unwrap(), StopOutcome::Stopped);
        assert_eq!(
            controller.stop_session(&id).unwrap(),
            StopOutcome::NotRunning
        );
        wait_for_status(&controller, &id, SessionStatus::Stopped).await;

        let stopped: Vec<_> = controller
            .get_session(&id)
            .unwrap()
            .logs
            .into_iter()
            .filter(|l| l.message == "Test stopped by user")
            .collect();
        assert_eq!(stopped.len(), 1);

        let messages = drain(&mut rx);
        match messages.last().unwrap() {
            ServerMessage::TestStopped { session_id, result } => {
                assert_eq!(session_id, &id);
                assert_eq!(result, &TrialResult::default());
            }
            other => panic!("expected test_stopped last, got {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        // Restarting clears the previous run
        controller.start_session(&id).unwrap();
        let session = controller.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert!(session.logs.iter().all(|l| l.message != "Test stopped by user"));

        controller.delete_session(&id).unwrap();
        assert!(controller.get_session(&id).is_err());
        for _ in 0..300 {
            if !controller.supervisor().is_running(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!controller.supervisor().is_running(&id));
    }

    #[tokio::test]
    async fn test_missing_executable_marks_error() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(&dir.path().join("missing-ab"), dir.path());
        let id = controller.create_session(trial()).unwrap();

        controller.start_session(&id).unwrap();
        wait_for_status(&controller, &id, SessionStatus::Error).await;
        assert!(controller
            .get_session(&id)
            .unwrap()
            .error
            .unwrap()
            .contains("failed to spawn"));
    }
}
