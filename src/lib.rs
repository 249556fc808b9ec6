//! reloadg is a single-child process supervisor meant to run as PID 1 in a
//! container. It launches one command, forwards SIGINT/SIGTERM to it as a
//! graceful stop, and restarts it whenever a watched configuration file
//! changes, including the atomic symlink swaps performed by mounted config
//! volumes.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Defaults and timers.
pub mod constants;

/// Error handling.
pub mod error;

/// Orchestrator event loop.
pub mod manager;

/// Event reporting.
pub mod observer;

/// Child process lifecycle.
pub mod process;

/// Cancellation and hand-off primitives.
pub mod scope;

/// Config file change detection.
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_utils;
