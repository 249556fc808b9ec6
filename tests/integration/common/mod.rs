#![allow(dead_code)]

use std::{
    fs,
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use reloadg::{
    config::Timings,
    observer::{Event, Observer, Recorder},
};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Polls `condition` every 20ms until it holds or `timeout` passes.
pub fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Waits until `recorder` has seen at least `expected` events matching `predicate`.
pub fn wait_for_events<F>(recorder: &Recorder, expected: usize, timeout: Duration, predicate: F)
where
    F: Fn(&Event) -> bool,
{
    let reached = wait_for(timeout, || recorder.count(&predicate) >= expected);
    assert!(
        reached,
        "timed out waiting for {expected} matching events; recorded: {:#?}",
        recorder.events()
    );
}

/// A process counts as running until it is gone or only a zombie remains.
pub fn is_process_running(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .process(Pid::from_u32(pid))
        .is_some_and(|process| {
            !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
        })
}

pub fn wait_for_process_exit(pid: u32) {
    assert!(
        wait_for(Duration::from_secs(10), || !is_process_running(pid)),
        "timed out waiting for PID {pid} to exit"
    );
}

/// Writes `contents` after a short pause so the new mtime is observably newer.
pub fn rewrite(path: &Path, contents: &str) {
    thread::sleep(Duration::from_millis(50));
    fs::write(path, contents).expect("failed to write watched file");
}

pub fn timings(debounce: Duration, poll_interval: Duration) -> Timings {
    Timings {
        debounce,
        poll_interval,
        stop_timeout: Duration::from_secs(5),
        settle_delay: Duration::from_millis(100),
    }
}

pub fn recorder() -> (Arc<Recorder>, Arc<dyn Observer>) {
    let recorder = Arc::new(Recorder::new());
    let observer: Arc<dyn Observer> = recorder.clone();
    (recorder, observer)
}
