#[path = "common/mod.rs"]
mod common;

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use common::{recorder, timings, wait_for_process_exit};
use reloadg::{
    constants::KILL_REAP_TIMEOUT,
    error::{ExitError, ProcessError},
    observer::{Event, Recorder},
    process::{ExitReason, ProcessSupervisor},
    scope::Scope,
};

fn supervisor(command: &str, args: &[&str]) -> (ProcessSupervisor, Arc<Recorder>) {
    let (recorder, observer) = recorder();
    let supervisor = ProcessSupervisor::new(
        command,
        args.iter().map(|arg| arg.to_string()).collect(),
        timings(Duration::from_millis(500), Duration::from_secs(5)),
        observer,
    );
    (supervisor, recorder)
}

#[test]
fn launch_failure_records_no_pid() {
    let (supervisor, recorder) = supervisor("/nonexistent/reloadg-test-binary", &[]);

    let err = supervisor.start(&Scope::new()).unwrap_err();
    assert!(matches!(err, ProcessError::Launch { .. }));
    assert!(supervisor.pid().is_none());
    assert_eq!(
        recorder.count(|event| matches!(event, Event::ProcessLaunchFailed { .. })),
        1
    );
    assert!(supervisor.wait_timeout(Duration::from_millis(200)).is_none());
}

#[test]
fn graceful_stop_terminates_child() {
    let (supervisor, recorder) = supervisor("sleep", &["30"]);
    let pid = supervisor.start(&Scope::new()).unwrap();
    assert_eq!(supervisor.pid(), Some(pid));

    let started = Instant::now();
    supervisor.stop(Duration::from_secs(5)).unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(supervisor.pid().is_none());
    assert_eq!(
        recorder.count(|event| matches!(event, Event::ProcessStopped { pid: p } if *p == pid)),
        1
    );
    wait_for_process_exit(pid);
}

#[test]
fn stop_escalates_to_sigkill_when_term_is_ignored() {
    let (supervisor, recorder) = supervisor("sh", &["-c", "trap '' TERM; sleep 30"]);
    let pid = supervisor.start(&Scope::new()).unwrap();

    // Give the shell time to install its trap.
    thread::sleep(Duration::from_millis(200));

    let timeout = Duration::from_millis(500);
    let started = Instant::now();
    supervisor.stop(timeout).unwrap();
    assert!(started.elapsed() < timeout + KILL_REAP_TIMEOUT + Duration::from_secs(1));

    assert_eq!(
        recorder.count(|event| matches!(event, Event::ProcessKilling { .. })),
        1
    );
    wait_for_process_exit(pid);

    let info = supervisor.wait_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(info.pid, pid);
    assert_eq!(info.reason, ExitReason::Abnormal);
    assert!(matches!(info.error, Some(ExitError::Failed(_))));
}

#[test]
fn restart_replaces_child_and_marks_old_exit() {
    let (supervisor, recorder) = supervisor("sleep", &["30"]);
    let scope = Scope::new();
    let old_pid = supervisor.start(&scope).unwrap();

    let new_pid = supervisor.restart(&scope).unwrap();
    assert_ne!(old_pid, new_pid);
    assert_eq!(supervisor.pid(), Some(new_pid));

    let info = supervisor.wait_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(info.pid, old_pid);
    assert_eq!(info.reason, ExitReason::Restart);
    assert!(info.is_self_inflicted());

    assert_eq!(
        recorder.count(|event| matches!(
            event,
            Event::Restarted { old_pid: Some(old), new_pid: new }
                if *old == old_pid && *new == new_pid
        )),
        1
    );

    supervisor.stop(Duration::from_secs(5)).unwrap();
    wait_for_process_exit(old_pid);
    wait_for_process_exit(new_pid);
}

#[test]
fn clean_exit_is_abnormal_without_error() {
    let (supervisor, _recorder) = supervisor("true", &[]);
    let pid = supervisor.start(&Scope::new()).unwrap();

    let info = supervisor.wait_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(info.pid, pid);
    assert_eq!(info.reason, ExitReason::Abnormal);
    assert!(info.error.is_none());
    assert!(info.status.is_some_and(|status| status.success()));
    assert!(supervisor.pid().is_none());
}

#[test]
fn failing_exit_carries_error() {
    let (supervisor, _recorder) = supervisor("false", &[]);
    supervisor.start(&Scope::new()).unwrap();

    let info = supervisor.wait_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(info.reason, ExitReason::Abnormal);
    assert!(matches!(
        info.error,
        Some(ExitError::Failed(status)) if status.code() == Some(1)
    ));
}

#[test]
fn supervisor_can_start_again_after_exit() {
    let (supervisor, _recorder) = supervisor("true", &[]);
    let scope = Scope::new();

    let first = supervisor.start(&scope).unwrap();
    supervisor.wait_timeout(Duration::from_secs(5)).unwrap();

    let second = supervisor.start(&scope).unwrap();
    let info = supervisor.wait_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(info.pid, second);
    assert_ne!(first, second);
}

#[test]
fn child_outlives_the_thread_that_started_it() {
    let (supervisor, _recorder) = supervisor("sleep", &["30"]);
    let supervisor = Arc::new(supervisor);
    let scope = Scope::new();

    let starter = Arc::clone(&supervisor);
    let starter_scope = scope.clone();
    let pid = thread::spawn(move || starter.start(&starter_scope).unwrap())
        .join()
        .unwrap();

    assert!(supervisor.wait_timeout(Duration::from_secs(2)).is_none());
    assert_eq!(supervisor.pid(), Some(pid));
    assert!(common::is_process_running(pid));

    // Same for a restart issued from a short-lived thread.
    let restarter = Arc::clone(&supervisor);
    let new_pid = thread::spawn(move || restarter.restart(&scope).unwrap())
        .join()
        .unwrap();
    let info = supervisor.wait_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(info.reason, ExitReason::Restart);
    assert!(supervisor.wait_timeout(Duration::from_secs(2)).is_none());
    assert_eq!(supervisor.pid(), Some(new_pid));

    supervisor.stop(Duration::from_secs(5)).unwrap();
    wait_for_process_exit(new_pid);
}
