//! Event reporting for the supervisor core.
//!
//! The process supervisor, change detector and orchestrator never log on their
//! own. They describe what happened as an [`Event`] and hand it to an injected
//! [`Observer`]. The binary wires in [`TracingObserver`]; tests use
//! [`Recorder`] to assert on what happened.
use std::{
    path::PathBuf,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use nix::sys::signal::Signal;
use tracing::{debug, error, info, warn};

use crate::{
    process::ExitReason,
    watcher::{ChangeSource, DetectorActivity, FileState},
};

/// Something the supervisor core did or noticed.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A child is about to be spawned.
    ProcessStarting { command: String, args: Vec<String> },
    /// A child was spawned.
    ProcessStarted { pid: u32 },
    /// Spawning the child failed.
    ProcessLaunchFailed { command: String, error: String },
    /// `stop` was called with no live child.
    ProcessStopSkipped,
    /// `SIGTERM` is being sent to the child's process group.
    ProcessStopping { pid: u32, timeout: Duration },
    /// The child was already gone when it was signalled.
    ProcessAlreadyFinished { pid: u32 },
    /// The child exited within the graceful timeout.
    ProcessStopped { pid: u32 },
    /// The graceful timeout expired; `SIGKILL` is being sent.
    ProcessKilling { pid: u32 },
    /// The wait thread observed the child terminate.
    ProcessExited {
        pid: u32,
        reason: ExitReason,
        error: Option<String>,
    },
    /// An exit record nobody read was replaced by a newer one.
    StaleExitDiscarded { pid: u32 },
    /// A restart was requested.
    RestartRequested { pid: Option<u32> },
    /// A restart completed.
    Restarted { old_pid: Option<u32>, new_pid: u32 },

    /// The watch path does not exist; change detection is off.
    WatchDisabled { path: PathBuf },
    /// The watch path exists. `resolved` is set when it is a symlink.
    WatchTarget {
        path: PathBuf,
        resolved: Option<PathBuf>,
    },
    /// A directory was added to the filesystem watcher.
    WatchingDirectory { dir: PathBuf },
    /// An optional directory could not be watched.
    WatchDirectoryFailed { dir: PathBuf, error: String },
    /// The listener and poller threads are running.
    DetectorStarted {
        path: PathBuf,
        poll_interval: Duration,
    },
    /// A raw filesystem event concerning the watch target arrived.
    FilesystemEvent { kind: String, paths: Vec<PathBuf> },
    /// A filesystem event arrived but the target's state is unchanged.
    ChangeUnconfirmed { path: PathBuf },
    /// The target's modification time or identity changed.
    ChangeConfirmed {
        path: PathBuf,
        source: ChangeSource,
        previous: FileState,
        current: FileState,
    },
    /// A change notification was queued for the consumer.
    ChangeNotified { source: ChangeSource },
    /// A change notification was absorbed by one already pending.
    ChangeCoalesced { source: ChangeSource },
    /// Re-reading the target's metadata failed.
    StatFailed { path: PathBuf, error: String },
    /// The filesystem event backend reported an error.
    WatchBackendError { error: String },
    /// A detector background thread returned.
    DetectorThreadStopped { activity: DetectorActivity },
    /// The filesystem watcher was released.
    DetectorClosed,

    /// The orchestrator entered its event loop.
    ManagerRunning {
        command: String,
        watch: Option<PathBuf>,
    },
    /// A termination signal arrived.
    SignalReceived { signal: Signal },
    /// The watch target changed; the child is being restarted.
    ConfigChanged,
    /// Restarting after a change failed.
    RestartFailed { error: String },
    /// The child's exit was caused by our own restart.
    RestartExitIgnored,
    /// The child exited on its own.
    ChildTerminated { error: Option<String> },
    /// The cancellation scope was closed by someone else.
    ScopeCancelled,
    /// Shutdown began.
    ShutdownStarted,
    /// Closing the detector during shutdown failed.
    DetectorCloseFailed { error: String },
    /// Stopping the child during shutdown failed.
    StopFailed { error: String },
    /// Shutdown finished.
    ShutdownComplete,
}

/// Receives [`Event`]s from the supervisor core.
pub trait Observer: Send + Sync {
    fn observe(&self, event: &Event);
}

/// Observer that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn observe(&self, _event: &Event) {}
}

/// Observer that keeps every event in memory.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events matching `predicate`.
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Event) -> bool,
    {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}

impl Observer for Recorder {
    fn observe(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Observer that writes every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, event: &Event) {
        match event {
            Event::ProcessStarting { command, args } => {
                info!("Starting child process: {command} {args:?}")
            }
            Event::ProcessStarted { pid } => {
                info!("Child process started with PID: {pid}")
            }
            Event::ProcessLaunchFailed { command, error } => {
                error!("Failed to start process '{command}': {error}")
            }
            Event::ProcessStopSkipped => debug!("No process to stop"),
            Event::ProcessStopping { pid, timeout } => {
                info!("Stopping child process (PID: {pid}) with timeout: {timeout:?}")
            }
            Event::ProcessAlreadyFinished { pid } => {
                debug!("Process {pid} already finished")
            }
            Event::ProcessStopped { pid } => {
                info!("Child process (PID: {pid}) stopped gracefully")
            }
            Event::ProcessKilling { pid } => warn!(
                "Timeout waiting for graceful shutdown, sending SIGKILL to process (PID: {pid})"
            ),
            Event::ProcessExited { pid, reason, error } => match (reason, error) {
                (ExitReason::Restart, _) => {
                    debug!("Process {pid} exited due to restart request")
                }
                (_, Some(error)) => info!("Child process {pid} exited abnormally: {error}"),
                (_, None) => info!("Child process {pid} exited normally"),
            },
            Event::StaleExitDiscarded { pid } => {
                debug!("Discarding unread exit record for PID {pid}")
            }
            Event::RestartRequested { pid } => match pid {
                Some(pid) => info!("Restarting child process (PID: {pid})..."),
                None => info!("Restarting child process..."),
            },
            Event::Restarted { old_pid, new_pid } => {
                info!("Child process restarted: {old_pid:?} -> {new_pid}")
            }
            Event::WatchDisabled { path } => {
                info!("Config file {path:?} does not exist, change detection disabled")
            }
            Event::WatchTarget { path, resolved } => match resolved {
                Some(real) => info!("Config file {path:?} is a symlink pointing to {real:?}"),
                None => info!("Config file {path:?} is a regular file"),
            },
            Event::WatchingDirectory { dir } => info!("Watching directory: {dir:?}"),
            Event::WatchDirectoryFailed { dir, error } => {
                error!("Failed to watch config directory {dir:?}: {error}")
            }
            Event::DetectorStarted {
                path,
                poll_interval,
            } => info!("Starting file watcher for {path:?} (polling every {poll_interval:?})"),
            Event::FilesystemEvent { kind, paths } => {
                debug!("Filesystem event: {kind} {paths:?}")
            }
            Event::ChangeUnconfirmed { path } => {
                debug!("State of {path:?} unchanged, ignoring event")
            }
            Event::ChangeConfirmed {
                path,
                source,
                previous,
                current,
            } => info!(
                "File change detected via {source} on {path:?}: old_mtime={:?}, new_mtime={:?}, old_inode={}, new_inode={}",
                previous.modified, current.modified, previous.inode, current.inode
            ),
            Event::ChangeNotified { source } => {
                debug!("Change notification sent via {source}")
            }
            Event::ChangeCoalesced { source } => {
                debug!("Change notification from {source} already pending")
            }
            Event::StatFailed { path, error } => {
                error!("Failed to stat file {path:?}: {error}")
            }
            Event::WatchBackendError { error } => error!("Filesystem watcher error: {error}"),
            Event::DetectorThreadStopped { activity } => {
                debug!("File watcher {activity} stopped")
            }
            Event::DetectorClosed => debug!("File watcher closed"),
            Event::ManagerRunning { command, watch } => match watch {
                Some(path) => {
                    info!("Supervising {command}, watching config file {path:?}")
                }
                None => info!("Supervising {command} without a config watch"),
            },
            Event::SignalReceived { signal } => {
                info!("Received signal: {signal}, shutting down gracefully...")
            }
            Event::ConfigChanged => {
                info!("Config file change detected, restarting child process...")
            }
            Event::RestartFailed { error } => error!("Failed to restart process: {error}"),
            Event::RestartExitIgnored => {
                debug!("Process exit was due to restart, continuing...")
            }
            Event::ChildTerminated { error } => match error {
                Some(error) => error!("Child process exited with error: {error}"),
                None => info!("Child process exited normally"),
            },
            Event::ScopeCancelled => debug!("Scope cancelled, shutting down..."),
            Event::ShutdownStarted => info!("Shutting down..."),
            Event::DetectorCloseFailed { error } => {
                error!("Error closing file watcher: {error}")
            }
            Event::StopFailed { error } => error!("Error stopping child process: {error}"),
            Event::ShutdownComplete => info!("Shutdown complete"),
        }
    }
}
