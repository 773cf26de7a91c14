//! Keeping the registry in line with the host's set of roots.

use steep_lsp::{StartOutcome, StopOutcome};

use crate::common::{FakeLauncher, fixture, steep_root};

#[tokio::test]
async fn reconcile_moves_from_ab_to_bc() {
    let f = fixture(FakeLauncher::new());
    let (_a, a) = steep_root();
    let (_b, b) = steep_root();
    let (_c, c) = steep_root();

    let first = f.manager.reconcile(&[a.clone(), b.clone()]).await;
    assert!(first.stopped.is_empty());
    assert_eq!(f.launcher.launch_count(), 2);
    let b_session = f.manager.session(&b).unwrap().id();

    let second = f.manager.reconcile(&[b.clone(), c.clone()]).await;

    assert_eq!(second.stopped, vec![(a.clone(), StopOutcome::Stopped)]);
    assert_eq!(second.started[0], (b.clone(), StartOutcome::AlreadyActive));
    assert!(matches!(second.started[1].1, StartOutcome::Started { .. }));
    assert_eq!(f.launcher.launch_count(), 3);

    let mut expected = vec![b.clone(), c.clone()];
    expected.sort();
    assert_eq!(f.manager.roots(), expected);
    assert_eq!(f.manager.session(&b).unwrap().id(), b_session);

    let a_connection = f.launcher.connection(0);
    assert_eq!(a_connection.root, a);
    assert!(a_connection.is_disposed());
}

#[tokio::test]
async fn roots_changed_starts_added_and_stops_removed() {
    let f = fixture(FakeLauncher::new());
    let (_a, a) = steep_root();
    let (_b, b) = steep_root();
    f.manager.start_session(&a).await;

    let report = f
        .manager
        .on_roots_changed(std::slice::from_ref(&b), std::slice::from_ref(&a))
        .await;

    assert!(matches!(report.started[0].1, StartOutcome::Started { .. }));
    assert_eq!(report.stopped, vec![(a.clone(), StopOutcome::Stopped)]);
    assert_eq!(f.manager.roots(), vec![b]);
}

#[tokio::test]
async fn removing_unknown_root_reports_not_running() {
    let f = fixture(FakeLauncher::new());
    let (_a, a) = steep_root();

    let report = f.manager.on_roots_changed(&[], &[a.clone()]).await;

    assert_eq!(report.stopped, vec![(a, StopOutcome::NotRunning)]);
    assert_eq!(f.launcher.launch_count(), 0);
}

#[tokio::test]
async fn initialize_drops_roots_it_was_not_given() {
    let f = fixture(FakeLauncher::new());
    let (_a, a) = steep_root();
    let (_b, b) = steep_root();
    f.manager.start_session(&a).await;
    f.manager.start_session(&b).await;

    let report = f.manager.initialize(std::slice::from_ref(&b)).await;

    assert_eq!(report.stopped, vec![(a.clone(), StopOutcome::Stopped)]);
    assert_eq!(report.started, vec![(b.clone(), StartOutcome::AlreadyActive)]);
    assert_eq!(f.manager.roots(), vec![b]);
    assert_eq!(f.launcher.launch_count(), 2);
    assert!(f.launcher.connection(0).is_disposed());
}

#[tokio::test]
async fn shutdown_stops_everything() {
    let f = fixture(FakeLauncher::new());
    let (_a, a) = steep_root();
    let (_b, b) = steep_root();
    f.manager.initialize(&[a, b]).await;
    assert_eq!(f.manager.session_count(), 2);

    f.manager.shutdown().await;

    assert_eq!(f.manager.session_count(), 0);
    assert!(f.launcher.connection(0).is_disposed());
    assert!(f.launcher.connection(1).is_disposed());
    assert!(!f.manager.has_running_sessions());
}
