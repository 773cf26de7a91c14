//! Events from server tasks: diagnostics and unexpected exits.

use steep_lsp::{
    Diagnostic, DiagnosticSeverity, ServerVersion, SessionEvent, SessionState, StartOutcome,
};

use crate::common::{FakeLauncher, fixture, steep_root};

fn diagnostic(severity: DiagnosticSeverity, message: &str) -> Diagnostic {
    Diagnostic::new(severity, message.to_string(), 3, 7, "Ruby::NoMethod".to_string())
}

#[tokio::test]
async fn diagnostics_land_in_snapshot() {
    let f = fixture(FakeLauncher::new());
    let (_dir, root) = steep_root();
    f.manager.start_session(&root).await;
    let connection = f.launcher.connection(0);

    connection
        .emit(SessionEvent::Diagnostics {
            session: connection.session,
            root: root.clone(),
            path: root.join("app/user.rb"),
            items: vec![
                diagnostic(DiagnosticSeverity::Error, "undefined method `nme`"),
                diagnostic(DiagnosticSeverity::Warning, "unused variable"),
            ],
        })
        .await;
    assert_eq!(f.manager.poll_events(16), 1);

    let snapshot = f.manager.snapshot();
    assert_eq!(snapshot.status_string(), "E:1 W:1");
    let (path, items) = &snapshot.files()[0];
    assert_eq!(items.len(), 2);
    assert_eq!(
        items[0].display_with_path(path),
        format!(
            "{}:4:8: error: [Ruby::NoMethod] undefined method `nme`",
            root.join("app/user.rb").display()
        )
    );

    // An empty list clears the file.
    connection
        .emit(SessionEvent::Diagnostics {
            session: connection.session,
            root: root.clone(),
            path: root.join("app/user.rb"),
            items: Vec::new(),
        })
        .await;
    f.manager.poll_events(16);
    assert!(f.manager.snapshot().is_empty());
}

#[tokio::test]
async fn stale_events_from_replaced_session_are_ignored() {
    let f = fixture(FakeLauncher::new());
    let (_dir, root) = steep_root();
    f.manager.start_session(&root).await;
    f.manager.restart_all(std::slice::from_ref(&root)).await;

    let old = f.launcher.connection(0);
    let current = f.launcher.connection(1);
    assert_ne!(old.session, current.session);

    old.emit(SessionEvent::Diagnostics {
        session: old.session,
        root: root.clone(),
        path: root.join("app/user.rb"),
        items: vec![diagnostic(DiagnosticSeverity::Error, "stale")],
    })
    .await;
    old.exit().await;
    assert_eq!(f.manager.poll_events(16), 2);

    let session = f.manager.session(&root).unwrap();
    assert_eq!(session.id(), current.session);
    assert_eq!(session.state(), SessionState::Running);
    assert!(f.manager.snapshot().is_empty());
}

#[tokio::test]
async fn unexpected_exit_frees_the_root() {
    let f = fixture(FakeLauncher::new());
    let (_dir, root) = steep_root();
    f.manager.start_session(&root).await;
    let connection = f.launcher.connection(0);
    connection
        .emit(SessionEvent::Diagnostics {
            session: connection.session,
            root: root.clone(),
            path: root.join("app/user.rb"),
            items: vec![diagnostic(DiagnosticSeverity::Error, "boom")],
        })
        .await;

    connection.exit().await;
    f.manager.poll_events(16);

    assert!(!f.manager.is_supervised(&root));
    assert!(f.manager.snapshot().is_empty());
    assert_eq!(f.host.last_version(), Some(ServerVersion::default()));
    assert!(
        f.host
            .status_messages()
            .contains(&format!("Steep stopped: {root}"))
    );

    // The root can be started again afterwards.
    assert!(matches!(
        f.manager.start_session(&root).await,
        StartOutcome::Started { .. }
    ));
}
