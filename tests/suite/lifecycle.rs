//! Start/stop transitions of a single root, including the races between
//! them.

use std::sync::Arc;
use std::time::Duration;

use std::sync::atomic::Ordering;

use steep_lsp::{
    Diagnostic, DiagnosticSeverity, STATUS_TIMEOUT, ServerVersion, SessionEvent, SessionState,
    StartFailure, StartOutcome, StopOutcome,
};
use tokio::sync::Notify;

use crate::common::{FAKE_VERSION, FakeLauncher, fixture, steep_root};

#[tokio::test]
async fn start_reports_version_and_registers_running_session() {
    let f = fixture(FakeLauncher::new());
    let (_dir, root) = steep_root();

    let outcome = f.manager.start_session(&root).await;

    assert_eq!(
        outcome,
        StartOutcome::Started {
            version: Some(FAKE_VERSION.to_string())
        }
    );
    let session = f.manager.session(&root).unwrap();
    assert_eq!(session.state(), SessionState::Running);
    let version = f.host.last_version().unwrap();
    assert_eq!((version.major(), version.minor()), (1, 9));
}

#[tokio::test]
async fn second_start_is_already_active() {
    let f = fixture(FakeLauncher::new());
    let (_dir, root) = steep_root();

    f.manager.start_session(&root).await;
    assert_eq!(
        f.manager.start_session(&root).await,
        StartOutcome::AlreadyActive
    );
    assert_eq!(f.launcher.launch_count(), 1);
}

#[tokio::test]
async fn concurrent_starts_spawn_once() {
    let gate = Arc::new(Notify::new());
    let f = fixture(FakeLauncher::new().with_handshake_gate(gate.clone()));
    let (_dir, root) = steep_root();

    let (first, second) = tokio::join!(f.manager.start_session(&root), async {
        // The first start is parked in its handshake with the slot reserved.
        let outcome = f.manager.start_session(&root).await;
        gate.notify_one();
        outcome
    });

    assert!(matches!(first, StartOutcome::Started { .. }));
    assert_eq!(second, StartOutcome::AlreadyActive);
    assert_eq!(f.launcher.launch_count(), 1);
    assert_eq!(f.manager.session_count(), 1);
}

#[tokio::test]
async fn stop_unknown_root_is_noop() {
    let f = fixture(FakeLauncher::new());
    let (_dir, root) = steep_root();

    assert_eq!(f.manager.stop_session(&root).await, StopOutcome::NotRunning);
    assert!(f.host.statuses.lock().unwrap().is_empty());
    assert!(f.host.versions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stop_removes_entry_before_disposal_finishes() {
    let gate = Arc::new(Notify::new());
    let f = fixture(FakeLauncher::new().with_dispose_gate(gate.clone()));
    let (_dir, root) = steep_root();
    f.manager.start_session(&root).await;
    let session = f.manager.session(&root).unwrap();

    let (outcome, ()) = tokio::join!(f.manager.stop_session(&root), async {
        assert!(!f.manager.is_supervised(&root));
        assert_eq!(session.state(), SessionState::Stopping);
        assert!(!f.launcher.connection(0).is_disposed());
        gate.notify_one();
    });

    assert_eq!(outcome, StopOutcome::Stopped);
    assert_eq!(session.state(), SessionState::Absent);
    assert!(f.launcher.connection(0).is_disposed());
    assert!(
        f.host
            .output(0)
            .disposed
            .load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn stop_clears_version_flags_when_nothing_runs() {
    let f = fixture(FakeLauncher::new());
    let (_dir, root) = steep_root();
    f.manager.start_session(&root).await;

    f.manager.stop_session(&root).await;

    assert_eq!(f.host.last_version(), Some(ServerVersion::default()));
}

#[tokio::test]
async fn stop_waits_for_pending_handshake() {
    let gate = Arc::new(Notify::new());
    let f = fixture(FakeLauncher::new().with_handshake_gate(gate.clone()));
    let manager = f.manager.with_stop_wait(100, Duration::from_millis(5));
    let (_dir, root) = steep_root();

    let (started, stopped, ()) = tokio::join!(
        manager.start_session(&root),
        manager.stop_session(&root),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.notify_one();
        }
    );

    assert!(matches!(started, StartOutcome::Started { .. }));
    assert_eq!(stopped, StopOutcome::Stopped);
    assert!(f.launcher.connection(0).is_disposed());
    assert!(!manager.is_supervised(&root));
}

#[tokio::test]
async fn stop_timeout_cancels_late_handshake() {
    let gate = Arc::new(Notify::new());
    let f = fixture(FakeLauncher::new().with_handshake_gate(gate.clone()));
    let manager = f.manager.with_stop_wait(2, Duration::from_millis(1));
    let (_dir, root) = steep_root();

    let (started, stopped) = tokio::join!(manager.start_session(&root), async {
        let outcome = manager.stop_session(&root).await;
        gate.notify_one();
        outcome
    });

    assert_eq!(stopped, StopOutcome::StoppedAfterTimeout);
    assert_eq!(started, StartOutcome::Failed(StartFailure::Cancelled));
    assert!(f.launcher.connection(0).is_disposed());
    assert!(!manager.is_supervised(&root));
}

#[tokio::test]
async fn stop_timeout_cancels_hung_handshake() {
    let f = fixture(FakeLauncher::new().hanging());
    let manager = f.manager.with_stop_wait(3, Duration::from_millis(1));
    let (_dir, root) = steep_root();

    let (started, stopped) = tokio::join!(manager.start_session(&root), manager.stop_session(&root));

    assert_eq!(stopped, StopOutcome::StoppedAfterTimeout);
    assert_eq!(started, StartOutcome::Failed(StartFailure::Cancelled));
    assert_eq!(f.launcher.cancellation_count(), 1);
    assert_eq!(f.launcher.launch_count(), 1);
    assert!(!manager.is_supervised(&root));
    assert!(f.host.output(0).disposed.load(Ordering::SeqCst));
    // Cancelling is not a failure the user needs to hear about.
    assert!(
        !f.host
            .status_messages()
            .iter()
            .any(|m| m.starts_with("Failed to start steep"))
    );
}

#[tokio::test]
async fn finishing_stop_leaves_successor_diagnostics_alone() {
    let gate = Arc::new(Notify::new());
    let f = fixture(FakeLauncher::new().with_dispose_gate(gate.clone()));
    let (_dir, root) = steep_root();
    f.manager.start_session(&root).await;

    let (stopped, ()) = tokio::join!(f.manager.stop_session(&root), async {
        // The old server is still being disposed.
        assert!(matches!(
            f.manager.start_session(&root).await,
            StartOutcome::Started { .. }
        ));
        let successor = f.launcher.connection(1);
        successor
            .emit(SessionEvent::Diagnostics {
                session: successor.session,
                root: root.clone(),
                path: root.join("app/user.rb"),
                items: vec![Diagnostic::new(
                    DiagnosticSeverity::Error,
                    "undefined method".to_string(),
                    0,
                    0,
                    "Ruby::NoMethod".to_string(),
                )],
            })
            .await;
        assert_eq!(f.manager.poll_events(16), 1);
        assert_eq!(f.manager.snapshot().files().len(), 1);
        gate.notify_one();
    });

    assert_eq!(stopped, StopOutcome::Stopped);
    assert!(f.launcher.connection(0).is_disposed());
    assert_eq!(
        f.manager.session(&root).unwrap().state(),
        SessionState::Running
    );
    assert_eq!(f.manager.snapshot().files().len(), 1);
    assert_eq!(
        f.host.last_version().unwrap().version(),
        Some(FAKE_VERSION)
    );
}

#[tokio::test]
async fn failed_start_frees_slot_and_tells_user() {
    let f = fixture(FakeLauncher::new().failing(StartFailure::Handshake(
        "server exited before answering `initialize`".to_string(),
    )));
    let (_dir, root) = steep_root();

    let outcome = f.manager.start_session(&root).await;

    assert!(matches!(
        outcome,
        StartOutcome::Failed(StartFailure::Handshake(_))
    ));
    assert!(!f.manager.is_supervised(&root));
    let statuses = f.host.statuses.lock().unwrap().clone();
    assert_eq!(
        statuses,
        vec![(
            format!("Failed to start steep. See OUTPUT for trouble shooting: {root}"),
            STATUS_TIMEOUT
        )]
    );
    let lines = f.host.output(0).lines.lock().unwrap().clone();
    assert_eq!(lines[0], "steep: command not found");
    assert!(lines[1].starts_with("Failed to start steep: initialize handshake failed"));
}

#[tokio::test]
async fn invalid_override_fails_without_launching() {
    let settings = steep_lsp::Settings {
        command_override: "bundle exec 'steep".to_string(),
        ..steep_lsp::Settings::default()
    };
    let f = crate::common::fixture_with_settings(FakeLauncher::new(), Arc::new(settings));
    let (_dir, root) = steep_root();

    let outcome = f.manager.start_session(&root).await;

    assert!(matches!(
        outcome,
        StartOutcome::Failed(StartFailure::InvalidCommand(_))
    ));
    assert_eq!(f.launcher.launch_count(), 0);
    assert!(!f.manager.is_supervised(&root));
    let output = f.host.output(0);
    assert!(output.lines.lock().unwrap()[0].starts_with("Failed to start steep: invalid command override"));
    assert!(output.disposed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn restart_creates_new_session() {
    let f = fixture(FakeLauncher::new());
    let (_dir, root) = steep_root();
    f.manager.start_session(&root).await;
    let before = f.manager.session(&root).unwrap().id();

    let report = f.manager.restart_all(std::slice::from_ref(&root)).await;

    assert_eq!(report.stopped, vec![(root.clone(), StopOutcome::Stopped)]);
    assert!(matches!(report.started[0].1, StartOutcome::Started { .. }));
    let after = f.manager.session(&root).unwrap().id();
    assert_ne!(before, after);
    assert_eq!(f.launcher.launch_count(), 2);
    assert!(f.launcher.connection(0).is_disposed());
}
