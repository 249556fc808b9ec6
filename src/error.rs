//! Error handling for reloadg.
use std::{io, path::PathBuf, process::ExitStatus};

use nix::{errno::Errno, sys::signal::Signal};
use thiserror::Error;

/// Errors raised while launching or stopping the supervised child.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable could not be found or exec failed.
    #[error("Failed to start process '{command}': {source}")]
    Launch {
        /// The command that failed to launch.
        command: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// A previous run is still live.
    #[error("Process is already running with PID {pid}")]
    AlreadyRunning {
        /// PID of the live child.
        pid: u32,
    },

    /// The scope the process was meant to run under has been cancelled.
    #[error("Refusing to start process: scope already cancelled")]
    Cancelled,

    /// Delivering the graceful termination signal failed.
    #[error("Failed to send {signal} to process group {pid}: {source}")]
    Signal {
        /// Process group leader.
        pid: u32,
        /// The signal that could not be delivered.
        signal: Signal,
        /// The errno reported by the kernel.
        #[source]
        source: Errno,
    },

    /// Forcefully killing the child failed.
    #[error("Failed to kill process group {pid}: {source}")]
    Kill {
        /// Process group leader.
        pid: u32,
        /// The errno reported by the kernel.
        #[source]
        source: Errno,
    },
}

/// Why a child run ended badly.
#[derive(Debug, Error)]
pub enum ExitError {
    /// The child exited with a non-zero code or was killed by a signal.
    #[error("process exited with {0}")]
    Failed(ExitStatus),

    /// Waiting on the child failed at the OS level.
    #[error("failed to wait on process: {0}")]
    Wait(#[source] io::Error),
}

/// Errors raised while setting up the change detector.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The watch path exists but could not be inspected.
    #[error("Failed to stat {path:?}: {source}")]
    Stat {
        /// The watch path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The watch path is a symlink whose target could not be resolved.
    #[error("Failed to resolve symlink {path:?}: {source}")]
    Resolve {
        /// The watch path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The filesystem event backend could not be created.
    #[error("Failed to create filesystem watcher: {0}")]
    Notify(#[from] notify::Error),

    /// The parent directory of the watch path could not be watched.
    #[error("Failed to watch directory {dir:?}: {source}")]
    WatchDirectory {
        /// Directory that was to be watched.
        dir: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: notify::Error,
    },

    /// Removing a directory watch during shutdown failed.
    #[error("Failed to unwatch directory {dir:?}: {source}")]
    Unwatch {
        /// Directory that was watched.
        dir: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: notify::Error,
    },
}

/// Errors raised while loading supervisor settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("Failed to read settings file {path:?}: {source}")]
    Read {
        /// Settings file path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The settings file is not valid YAML or has unknown keys.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A `${VAR}` reference names a variable that is not set.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A duration value could not be parsed.
    #[error("Invalid duration value: '{0}'")]
    InvalidDuration(String),

    /// A periodic interval was set to zero.
    #[error("Interval must be greater than zero: '{0}'")]
    ZeroInterval(String),
}

/// Errors returned by the orchestrator.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No command was configured.
    #[error("command cannot be empty")]
    EmptyCommand,

    /// The change detector could not be created.
    #[error("failed to create change detector: {0}")]
    Watch(#[from] WatchError),

    /// Signal handlers could not be installed.
    #[error("failed to register signal handlers: {0}")]
    Signals(#[source] io::Error),

    /// The child could not be started.
    #[error("failed to start child process: {0}")]
    Start(#[source] ProcessError),

    /// Restarting the child after a change failed.
    #[error("failed to restart child process: {0}")]
    Restart(#[source] ProcessError),

    /// The child exited on its own with an error.
    #[error("child process exited unexpectedly: {0}")]
    ChildExited(#[source] ExitError),

    /// Stopping the child during shutdown failed.
    #[error("failed to stop child process: {0}")]
    Stop(#[source] ProcessError),
}
