//! Lifecycle management for the single supervised child process.
use std::{
    io,
    os::unix::process::CommandExt,
    process::{Command, ExitStatus, Stdio},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
    },
    thread,
    time::Duration,
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use strum_macros::{AsRefStr, Display};

use crate::{
    config::Timings,
    constants::KILL_REAP_TIMEOUT,
    error::{ExitError, ProcessError},
    observer::{Event, Observer},
    scope::{Latch, Scope, Slot},
};

/// Why a child run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ExitReason {
    #[default]
    Unknown,
    /// The child ended without the supervisor asking it to.
    Abnormal,
    /// The child was stopped by [`ProcessSupervisor::restart`].
    Restart,
}

/// Terminal state of one child run.
#[derive(Debug)]
pub struct ExitInfo {
    /// PID of the run that ended.
    pub pid: u32,
    pub reason: ExitReason,
    /// Exit status, if waiting on the child succeeded.
    pub status: Option<ExitStatus>,
    /// Set when the child exited unsuccessfully or could not be waited on.
    pub error: Option<ExitError>,
}

impl ExitInfo {
    fn from_wait(pid: u32, reason: ExitReason, result: io::Result<ExitStatus>) -> Self {
        let (status, error) = match result {
            Ok(status) if status.success() => (Some(status), None),
            Ok(status) => (Some(status), Some(ExitError::Failed(status))),
            Err(err) => (None, Some(ExitError::Wait(err))),
        };

        Self {
            pid,
            reason,
            status,
            error,
        }
    }

    /// Whether the exit was caused by the supervisor's own restart.
    pub fn is_self_inflicted(&self) -> bool {
        self.reason == ExitReason::Restart
    }
}

/// Handle on the live run: its PID and a latch released once it is reaped.
#[derive(Debug, Clone)]
struct RunHandle {
    pid: u32,
    exited: Latch,
}

/// Owns the lifecycle of exactly one external command.
///
/// All methods take `&self`, so the supervisor can be shared behind an `Arc`
/// between the orchestrator and the threads waiting on its exits.
pub struct ProcessSupervisor {
    command: String,
    args: Vec<String>,
    timings: Timings,
    /// The live run, cleared by the wait thread when the child is reaped.
    current: Arc<Mutex<Option<RunHandle>>>,
    /// Set for the duration of a restart's stop phase.
    restarting: Arc<AtomicBool>,
    exits: Slot<ExitInfo>,
    observer: Arc<dyn Observer>,
}

fn lock_run(current: &Mutex<Option<RunHandle>>) -> MutexGuard<'_, Option<RunHandle>> {
    current.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Signals the process group led by `pid`, falling back to the leader itself
/// when the group is gone.
fn signal_group(pid: u32, signal: Signal) -> Result<(), Errno> {
    let target = Pid::from_raw(pid as i32);
    match signal::killpg(target, signal) {
        Err(Errno::ESRCH) => signal::kill(target, signal),
        other => other,
    }
}

impl ProcessSupervisor {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        timings: Timings,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            timings,
            current: Arc::new(Mutex::new(None)),
            restarting: Arc::new(AtomicBool::new(false)),
            exits: Slot::new(),
            observer,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// PID of the live run, if any.
    pub fn pid(&self) -> Option<u32> {
        lock_run(&self.current).as_ref().map(|run| run.pid)
    }

    pub fn is_running(&self) -> bool {
        self.pid().is_some()
    }

    /// Launches the command in its own process group and returns its PID.
    ///
    /// The child is forked from a dedicated wait thread that lives exactly as
    /// long as the child. On Linux the child carries `PR_SET_PDEATHSIG`, which
    /// fires when the forking *thread* exits, so forking from the caller's
    /// thread would tie the child's life to whoever called `start`.
    ///
    /// The wait thread reaps the child, records an [`ExitInfo`] for
    /// [`ProcessSupervisor::wait`] and clears the run handle.
    pub fn start(&self, scope: &Scope) -> Result<u32, ProcessError> {
        if scope.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let mut current = lock_run(&self.current);
        if let Some(run) = current.as_ref() {
            return Err(ProcessError::AlreadyRunning { pid: run.pid });
        }

        self.observer.observe(&Event::ProcessStarting {
            command: self.command.clone(),
            args: self.args.clone(),
        });

        let (spawned_tx, spawned) = mpsc::channel();
        let (registered_tx, registered) = mpsc::channel::<()>();
        self.spawn_wait_thread(spawned_tx, registered);

        let launched = spawned.recv().unwrap_or_else(|_| {
            Err(io::Error::other("wait thread exited before spawning the child"))
        });
        let run = match launched {
            Ok(run) => run,
            Err(source) => {
                self.observer.observe(&Event::ProcessLaunchFailed {
                    command: self.command.clone(),
                    error: source.to_string(),
                });
                return Err(ProcessError::Launch {
                    command: self.command.clone(),
                    source,
                });
            }
        };

        *current = Some(run.clone());
        drop(current);
        // The wait thread only reaps once the handle is in place.
        drop(registered_tx);

        self.observer.observe(&Event::ProcessStarted { pid: run.pid });
        Ok(run.pid)
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        unsafe {
            cmd.pre_exec(|| {
                // Own process group, so a group signal never reaches the supervisor.
                if libc::setpgid(0, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }

                // Take the child down with the forking thread (Linux only).
                #[cfg(target_os = "linux")]
                {
                    use libc::{PR_SET_PDEATHSIG, SIGTERM, prctl};
                    if prctl(PR_SET_PDEATHSIG, SIGTERM, 0, 0, 0) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                }

                Ok(())
            });
        }

        cmd
    }

    /// Spawns the thread that forks, owns and reaps one child run.
    fn spawn_wait_thread(
        &self,
        spawned: Sender<io::Result<RunHandle>>,
        registered: Receiver<()>,
    ) {
        let mut cmd = self.build_command();
        let current = Arc::clone(&self.current);
        let restarting = Arc::clone(&self.restarting);
        let exits = self.exits.clone();
        let observer = Arc::clone(&self.observer);

        thread::spawn(move || {
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(err) => {
                    let _ = spawned.send(Err(err));
                    return;
                }
            };

            let run = RunHandle {
                pid: child.id(),
                exited: Latch::new(),
            };
            let _ = spawned.send(Ok(run.clone()));
            // Released when `start` drops its sender.
            let _ = registered.recv();

            let result = child.wait();

            // The flag is only meaningful at the instant the child terminates.
            let reason = if restarting.load(Ordering::SeqCst) {
                ExitReason::Restart
            } else {
                ExitReason::Abnormal
            };

            {
                let mut guard = lock_run(&current);
                if guard.as_ref().is_some_and(|live| live.pid == run.pid) {
                    *guard = None;
                }
            }

            let info = ExitInfo::from_wait(run.pid, reason, result);
            observer.observe(&Event::ProcessExited {
                pid: info.pid,
                reason,
                error: info.error.as_ref().map(ToString::to_string),
            });

            if let Some(stale) = exits.put(info) {
                observer.observe(&Event::StaleExitDiscarded { pid: stale.pid });
            }
            run.exited.release();
        });
    }

    /// Stops the live child: `SIGTERM` to its group, then `SIGKILL` once
    /// `timeout` passes. A no-op when nothing is running.
    pub fn stop(&self, timeout: Duration) -> Result<(), ProcessError> {
        let Some(run) = lock_run(&self.current).clone() else {
            self.observer.observe(&Event::ProcessStopSkipped);
            return Ok(());
        };

        self.observer.observe(&Event::ProcessStopping {
            pid: run.pid,
            timeout,
        });

        match signal_group(run.pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                self.observer
                    .observe(&Event::ProcessAlreadyFinished { pid: run.pid });
                run.exited.wait_timeout(KILL_REAP_TIMEOUT);
                return Ok(());
            }
            Err(source) => {
                return Err(ProcessError::Signal {
                    pid: run.pid,
                    signal: Signal::SIGTERM,
                    source,
                });
            }
        }

        if run.exited.wait_timeout(timeout) {
            self.observer.observe(&Event::ProcessStopped { pid: run.pid });
            return Ok(());
        }

        self.observer.observe(&Event::ProcessKilling { pid: run.pid });
        match signal_group(run.pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(source) => {
                return Err(ProcessError::Kill {
                    pid: run.pid,
                    source,
                });
            }
        }

        // SIGKILL cannot be caught; give the wait thread a moment to reap.
        run.exited.wait_timeout(KILL_REAP_TIMEOUT);
        Ok(())
    }

    /// Stops the child gracefully and starts it again. Returns the new PID.
    ///
    /// The exit caused by the stop is reported with [`ExitReason::Restart`].
    pub fn restart(&self, scope: &Scope) -> Result<u32, ProcessError> {
        let old_pid = self.pid();
        self.observer
            .observe(&Event::RestartRequested { pid: old_pid });

        self.restarting.store(true, Ordering::SeqCst);
        let stopped = self.stop(self.timings.stop_timeout);
        if stopped.is_ok() {
            thread::sleep(self.timings.settle_delay);
        }
        self.restarting.store(false, Ordering::SeqCst);
        stopped?;

        let new_pid = self.start(scope)?;
        self.observer
            .observe(&Event::Restarted { old_pid, new_pid });
        Ok(new_pid)
    }

    /// Blocks until the most recent run's [`ExitInfo`] is available.
    pub fn wait(&self) -> ExitInfo {
        self.exits.take()
    }

    /// Like [`ProcessSupervisor::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitInfo> {
        self.exits.take_timeout(timeout)
    }

    /// Like [`ProcessSupervisor::wait`], giving up once `scope` is cancelled.
    pub fn wait_until(&self, scope: &Scope) -> Option<ExitInfo> {
        self.exits.take_until(scope)
    }
}
