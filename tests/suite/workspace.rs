//! Whole-workspace scenario: real settings files and marker checks, fake
//! servers.

use std::path::PathBuf;
use std::sync::Arc;

use steep_config::FileSettingsSource;
use steep_lsp::{
    STATUS_TIMEOUT, SkipReason, StartOutcome, StopOutcome, WorkspaceRoot,
};

use crate::common::{FakeLauncher, fixture_with_settings, write_steepfile};

fn write_root_config(dir: &std::path::Path, content: &str) {
    let config_dir = dir.join(".steep");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), content).unwrap();
}

#[tokio::test]
async fn marker_files_and_root_changes() {
    let with_marker = tempfile::tempdir().unwrap();
    let without_marker = tempfile::tempdir().unwrap();
    let disabled = tempfile::tempdir().unwrap();
    write_steepfile(with_marker.path());
    write_steepfile(disabled.path());
    write_root_config(disabled.path(), "enabled = false\n");

    let settings = Arc::new(FileSettingsSource::with_global_path(None));
    let f = fixture_with_settings(FakeLauncher::new(), settings);
    let a = WorkspaceRoot::new(with_marker.path());
    let b = WorkspaceRoot::new(without_marker.path());
    let c = WorkspaceRoot::new(disabled.path());

    let report = f
        .manager
        .initialize(&[a.clone(), b.clone(), c.clone()])
        .await;

    assert!(matches!(report.started[0].1, StartOutcome::Started { .. }));
    assert_eq!(
        report.started[1].1,
        StartOutcome::Skipped(SkipReason::MarkerMissing)
    );
    assert_eq!(report.started[2].1, StartOutcome::Skipped(SkipReason::Disabled));
    assert_eq!(f.manager.roots(), vec![a.clone()]);
    assert_eq!(
        f.host.statuses.lock().unwrap().clone(),
        vec![(format!("Steep is disabled: {c}"), STATUS_TIMEOUT)]
    );

    // Without a binstub the server comes from bundler.
    let launch = f.launcher.launch(0);
    assert_eq!(launch.invocation.program, "bundle");
    assert_eq!(
        launch.invocation.args,
        vec![
            "exec",
            "steep",
            "langserver",
            "--log-level=warn",
            "--steepfile=Steepfile"
        ]
    );
    assert_eq!(launch.invocation.working_directory, a.path());
    assert!(launch.invocation.environment["RUBYOPT"].ends_with("-EUTF-8"));
    assert_eq!(launch.invocation.environment["RUBY_YJIT_ENABLE"], "true");

    // The user adds a Steepfile and a binstub to the second folder, then
    // the host swaps the first folder out for it.
    write_steepfile(without_marker.path());
    std::fs::create_dir_all(without_marker.path().join("bin")).unwrap();
    std::fs::write(without_marker.path().join("bin").join("steep"), "#!/bin/sh\n").unwrap();
    write_root_config(without_marker.path(), "jobs = 2\nloglevel = \"info\"\n");

    let changed = f
        .manager
        .on_roots_changed(std::slice::from_ref(&b), std::slice::from_ref(&a))
        .await;

    assert!(matches!(changed.started[0].1, StartOutcome::Started { .. }));
    assert_eq!(changed.stopped, vec![(a.clone(), StopOutcome::Stopped)]);
    assert_eq!(f.manager.roots(), vec![b.clone()]);

    let launch = f.launcher.launch(1);
    assert_eq!(
        PathBuf::from(&launch.invocation.program),
        b.join("bin").join("steep")
    );
    assert_eq!(
        launch.invocation.args,
        vec![
            "langserver",
            "--log-level=info",
            "--steepfile=Steepfile",
            "--jobs=2"
        ]
    );
}

#[tokio::test]
async fn settings_are_reread_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    write_steepfile(dir.path());
    let root = WorkspaceRoot::new(dir.path());
    let settings = Arc::new(FileSettingsSource::with_global_path(None));
    let f = fixture_with_settings(FakeLauncher::new(), settings);

    f.manager.start_session(&root).await;
    write_root_config(dir.path(), "command = \"rbenv exec steep\"\n");
    f.manager.restart_all(std::slice::from_ref(&root)).await;

    let launch = f.launcher.launch(1);
    assert_eq!(launch.invocation.program, "rbenv");
    assert_eq!(launch.invocation.args[..2], ["exec", "steep"]);
}
