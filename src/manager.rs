//! Orchestrator tying the process supervisor and the change detector together.
//!
//! [`Manager::run`] starts the child, starts watching, then blocks on a single
//! channel fed by four sources: termination signals, change notifications,
//! child exits and cancellation of the shared [`Scope`].
use std::{
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError, Sender},
    },
    thread,
};

use nix::sys::signal::Signal;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};

use crate::{
    config::Config,
    constants::CANCEL_CHECK_INTERVAL,
    error::ManagerError,
    observer::{Event, Observer},
    process::{ExitInfo, ProcessSupervisor},
    scope::Scope,
    watcher::ChangeDetector,
};

/// Everything the event loop reacts to.
#[derive(Debug)]
enum ManagerEvent {
    Signal(Signal),
    ConfigChanged,
    ProcessExited(ExitInfo),
    Cancelled,
}

/// Clonable handle for stopping a running [`Manager`] from another thread.
#[derive(Clone)]
pub struct ManagerHandle {
    scope: Scope,
    process: Arc<ProcessSupervisor>,
}

impl ManagerHandle {
    /// Requests a graceful shutdown. Idempotent.
    pub fn cancel(&self) {
        self.scope.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// PID of the live child, if any.
    pub fn child_pid(&self) -> Option<u32> {
        self.process.pid()
    }
}

/// Supervises one child and restarts it whenever the watched file changes.
pub struct Manager {
    config: Config,
    process: Arc<ProcessSupervisor>,
    detector: ChangeDetector,
    scope: Scope,
    observer: Arc<dyn Observer>,
}

impl Manager {
    pub fn new(config: Config, observer: Arc<dyn Observer>) -> Result<Self, ManagerError> {
        if config.command.trim().is_empty() {
            return Err(ManagerError::EmptyCommand);
        }

        let process = Arc::new(ProcessSupervisor::new(
            config.command.clone(),
            config.args.clone(),
            config.timings,
            Arc::clone(&observer),
        ));

        let detector = match &config.watch_path {
            Some(path) => ChangeDetector::new(path, config.timings, Arc::clone(&observer))?,
            None => ChangeDetector::Disabled,
        };

        Ok(Self {
            config,
            process,
            detector,
            scope: Scope::new(),
            observer,
        })
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            scope: self.scope.clone(),
            process: Arc::clone(&self.process),
        }
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Runs until a signal, a caller cancellation or the child's own exit.
    ///
    /// Returns `Ok` for a graceful shutdown and for a child that exited
    /// successfully; a child that failed is reported as
    /// [`ManagerError::ChildExited`].
    pub fn run(&mut self) -> Result<(), ManagerError> {
        let (events_tx, events) = mpsc::channel();

        if let Err(err) = self.spawn_signal_listener(events_tx.clone()) {
            self.abort();
            return Err(err);
        }

        if let Err(err) = self.process.start(&self.scope) {
            self.abort();
            return Err(ManagerError::Start(err));
        }

        self.observer.observe(&Event::ManagerRunning {
            command: self.config.command.clone(),
            watch: self.detector.watch_path().map(|path| path.to_path_buf()),
        });

        self.detector.start(&self.scope);
        let acks = self.spawn_change_forwarder(events_tx.clone());
        self.spawn_exit_watch(events_tx.clone());

        let cancelled = events_tx;
        self.scope.on_cancel(move || {
            let _ = cancelled.send(ManagerEvent::Cancelled);
        });

        while let Ok(event) = events.recv() {
            match event {
                ManagerEvent::Signal(signal) => {
                    self.observer.observe(&Event::SignalReceived { signal });
                    return self.shutdown();
                }
                ManagerEvent::ConfigChanged => {
                    self.observer.observe(&Event::ConfigChanged);
                    let restarted = self.process.restart(&self.scope);
                    if let Some(acks) = &acks {
                        let _ = acks.send(());
                    }

                    if let Err(err) = restarted {
                        self.observer.observe(&Event::RestartFailed {
                            error: err.to_string(),
                        });
                        self.abort();
                        return Err(ManagerError::Restart(err));
                    }
                }
                ManagerEvent::ProcessExited(info) => {
                    if info.is_self_inflicted() {
                        self.observer.observe(&Event::RestartExitIgnored);
                        continue;
                    }

                    self.observer.observe(&Event::ChildTerminated {
                        error: info.error.as_ref().map(ToString::to_string),
                    });
                    let shutdown = self.shutdown();
                    return match info.error {
                        Some(err) => Err(ManagerError::ChildExited(err)),
                        None => shutdown,
                    };
                }
                ManagerEvent::Cancelled => {
                    self.observer.observe(&Event::ScopeCancelled);
                    return self.shutdown();
                }
            }
        }

        // Every sender is owned by a scope callback or a helper thread, so the
        // channel only closes if all of them are gone.
        self.shutdown()
    }

    /// Cancels the scope, closes the detector and stops the child.
    fn shutdown(&self) -> Result<(), ManagerError> {
        self.observer.observe(&Event::ShutdownStarted);
        self.abort();

        let stopped = self
            .process
            .stop(self.config.timings.stop_timeout)
            .map_err(ManagerError::Stop);
        if let Err(err) = &stopped {
            self.observer.observe(&Event::StopFailed {
                error: err.to_string(),
            });
        }

        self.observer.observe(&Event::ShutdownComplete);
        stopped
    }

    /// Cancels the scope and releases the watcher, leaving the child alone.
    fn abort(&self) {
        self.scope.cancel();
        if let Err(err) = self.detector.close() {
            self.observer.observe(&Event::DetectorCloseFailed {
                error: err.to_string(),
            });
        }
    }

    fn spawn_signal_listener(&self, events: Sender<ManagerEvent>) -> Result<(), ManagerError> {
        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(ManagerError::Signals)?;
        let handle = signals.handle();
        self.scope.on_cancel(move || handle.close());

        thread::spawn(move || {
            for raw in signals.forever() {
                let Ok(signal) = Signal::try_from(raw) else {
                    continue;
                };
                if events.send(ManagerEvent::Signal(signal)).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    /// Forwards one change notification at a time and holds the next one back
    /// until the restart it triggered is acknowledged. While it waits, the
    /// detector's single slot absorbs further changes.
    fn spawn_change_forwarder(&self, events: Sender<ManagerEvent>) -> Option<Sender<()>> {
        if !self.detector.is_active() {
            return None;
        }

        let changes = self.detector.changes();
        let scope = self.scope.clone();
        let (acks_tx, acks) = mpsc::channel::<()>();

        thread::spawn(move || {
            while !scope.is_cancelled() {
                match changes.recv_timeout(CANCEL_CHECK_INTERVAL) {
                    Ok(()) => {}
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                }

                if events.send(ManagerEvent::ConfigChanged).is_err() {
                    return;
                }

                loop {
                    match acks.recv_timeout(CANCEL_CHECK_INTERVAL) {
                        Ok(()) => break,
                        Err(RecvTimeoutError::Timeout) if !scope.is_cancelled() => {}
                        Err(_) => return,
                    }
                }
            }
        });

        Some(acks_tx)
    }

    /// Delivers every exit recorded by the supervisor until the scope closes.
    fn spawn_exit_watch(&self, events: Sender<ManagerEvent>) {
        let process = Arc::clone(&self.process);
        let scope = self.scope.clone();

        thread::spawn(move || {
            while let Some(info) = process.wait_until(&scope) {
                if events.send(ManagerEvent::ProcessExited(info)).is_err() {
                    return;
                }
            }
        });
    }
}
