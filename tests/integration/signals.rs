#[path = "common/mod.rs"]
mod common;

use std::{sync::mpsc, thread, time::Duration};

use common::{recorder, timings, wait_for, wait_for_process_exit};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use reloadg::{config::Config, manager::Manager, observer::Event};

// Kept as the only test in this binary: the signal reaches the whole process.
#[test]
fn sigterm_triggers_graceful_shutdown() {
    let config = Config::new("sleep", vec!["30".into()])
        .with_timings(timings(Duration::from_millis(100), Duration::from_millis(100)));
    let (recorder, observer) = recorder();
    let mut manager = Manager::new(config, observer).unwrap();
    let handle = manager.handle();

    let (done_tx, done) = mpsc::channel();
    thread::spawn(move || {
        let _ = done_tx.send(manager.run());
    });

    // Handlers are registered before the child starts.
    assert!(wait_for(Duration::from_secs(5), || handle.child_pid().is_some()));
    let pid = handle.child_pid().unwrap();

    signal::kill(Pid::this(), Signal::SIGTERM).unwrap();

    let result = done.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(result.is_ok(), "run failed: {result:?}");
    wait_for_process_exit(pid);

    assert_eq!(
        recorder.count(|event| matches!(
            event,
            Event::SignalReceived { signal: Signal::SIGTERM }
        )),
        1
    );
}
