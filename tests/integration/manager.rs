#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    sync::mpsc,
    thread,
    time::Duration,
};

use common::{recorder, rewrite, timings, wait_for, wait_for_events, wait_for_process_exit};
use reloadg::{
    config::Config,
    error::{ManagerError, ProcessError},
    manager::Manager,
    observer::Event,
};
use tempfile::tempdir;

#[test]
fn config_change_restarts_child_once() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("exporter.conf");
    fs::write(&path, "v1").unwrap();

    let config = Config::new("sleep", vec!["30".into()])
        .with_watch_path(&path)
        .with_timings(timings(Duration::from_millis(500), Duration::from_secs(5)));
    let (recorder, observer) = recorder();
    let mut manager = Manager::new(config, observer).unwrap();
    let handle = manager.handle();

    let (done_tx, done) = mpsc::channel();
    thread::spawn(move || {
        let _ = done_tx.send(manager.run());
    });

    assert!(wait_for(Duration::from_secs(5), || handle.child_pid().is_some()));
    let first_pid = handle.child_pid().unwrap();

    thread::sleep(Duration::from_millis(600));
    rewrite(&path, "v2");

    wait_for_events(&recorder, 1, Duration::from_secs(6), |event| {
        matches!(event, Event::Restarted { .. })
    });
    let second_pid = handle.child_pid().unwrap();
    assert_ne!(first_pid, second_pid);

    // Give any stray notification a chance to trigger a second restart.
    thread::sleep(Duration::from_secs(1));
    assert_eq!(
        recorder.count(|event| matches!(event, Event::Restarted { .. })),
        1
    );
    assert_eq!(
        recorder.count(|event| matches!(event, Event::RestartExitIgnored)),
        1
    );

    handle.cancel();
    let result = done.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(result.is_ok(), "run failed: {result:?}");

    wait_for_process_exit(first_pid);
    wait_for_process_exit(second_pid);
    assert!(handle.child_pid().is_none());
}

#[test]
fn cancel_without_watch_shuts_down_cleanly() {
    let temp = tempdir().unwrap();
    let config = Config::new("sleep", vec!["30".into()])
        .with_watch_path(temp.path().join("missing.conf"))
        .with_timings(timings(Duration::from_millis(100), Duration::from_millis(100)));
    let (recorder, observer) = recorder();
    let mut manager = Manager::new(config, observer).unwrap();
    let handle = manager.handle();

    let (done_tx, done) = mpsc::channel();
    thread::spawn(move || {
        let _ = done_tx.send(manager.run());
    });

    assert!(wait_for(Duration::from_secs(5), || handle.child_pid().is_some()));
    let pid = handle.child_pid().unwrap();

    handle.cancel();
    let result = done.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(result.is_ok(), "run failed: {result:?}");
    wait_for_process_exit(pid);

    assert_eq!(
        recorder.count(|event| matches!(event, Event::ShutdownComplete)),
        1
    );
    assert_eq!(
        recorder.count(|event| matches!(event, Event::Restarted { .. })),
        0
    );
}

#[test]
fn clean_child_exit_returns_ok() {
    let (recorder, observer) = recorder();
    let mut manager = Manager::new(Config::new("true", Vec::new()), observer).unwrap();

    assert!(manager.run().is_ok());
    assert_eq!(
        recorder.count(|event| matches!(event, Event::ChildTerminated { error: None })),
        1
    );
    assert!(manager.handle().is_cancelled());
}

#[test]
fn failing_child_is_reported() {
    let (_recorder, observer) = recorder();
    let mut manager = Manager::new(Config::new("false", Vec::new()), observer).unwrap();

    assert!(matches!(manager.run(), Err(ManagerError::ChildExited(_))));
}

#[test]
fn missing_executable_fails_to_start() {
    let (_recorder, observer) = recorder();
    let mut manager =
        Manager::new(Config::new("/nonexistent/reloadg-child", Vec::new()), observer).unwrap();

    assert!(matches!(
        manager.run(),
        Err(ManagerError::Start(ProcessError::Launch { .. }))
    ));
    assert!(manager.handle().is_cancelled());
}
