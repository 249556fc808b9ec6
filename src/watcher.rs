//! Change detection for the watched configuration file.
//!
//! Mounted config volumes never write the watched file in place. They write a
//! fresh directory, atomically repoint an intermediate `..data` link at it and
//! later delete the old directory. The watched path itself never changes, but
//! the file it resolves to does. The detector therefore:
//!
//! * watches the parent directory (and, for symlinks, the grandparent) instead
//!   of the file,
//! * treats events on the target or on the intermediate link as hints only,
//!   confirming each one by re-reading the target's modification time and
//!   inode,
//! * debounces confirmed changes,
//! * runs a stat poller alongside the event listener for filesystems that drop
//!   events.
//!
//! Both paths feed one single-slot channel, so bursts collapse into at most
//! one pending notification.
use std::{
    ffi::OsStr,
    fs, io,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        mpsc::{
            self, Receiver, RecvError, RecvTimeoutError, Sender, SyncSender, TryRecvError,
            TrySendError,
        },
    },
    thread,
    time::{Duration, Instant, SystemTime},
};

use notify::{
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::ModifyKind,
};
use strum_macros::{AsRefStr, Display};

use crate::{
    config::Timings,
    constants::{INTERMEDIATE_LINK_NAMES, INTERMEDIATE_LINK_TMP_SUFFIX},
    error::WatchError,
    observer::{Event, Observer},
    scope::Scope,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Which detection path confirmed a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ChangeSource {
    /// Filesystem events, after debouncing.
    Events,
    /// The periodic stat poller.
    Polling,
}

/// Background thread of an active detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum DetectorActivity {
    /// Consumes filesystem events and runs the debounce.
    #[strum(serialize = "event listener")]
    Listener,
    /// Periodic stat fallback.
    #[strum(serialize = "poller")]
    Poller,
}

/// Snapshot of the watched file's identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileState {
    /// Modification time of the resolved file.
    pub modified: Option<SystemTime>,
    /// Inode number of the resolved file, `0` when unknown.
    pub inode: u64,
}

impl FileState {
    /// Reads the state of `path`, following symlinks.
    pub fn read(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            modified: metadata.modified().ok(),
            inode: metadata.ino(),
        })
    }

    /// A file changed if its mtime moved forward or it is a different inode.
    ///
    /// The inode branch catches symlink swaps where the new file carries an
    /// older or identical timestamp.
    pub fn differs_from(&self, previous: &FileState) -> bool {
        self.modified > previous.modified
            || (self.inode != 0 && self.inode != previous.inode)
    }
}

/// Whether `name` is the intermediate link of a mounted config volume, or the
/// temporary link created just before it is swapped.
fn is_intermediate_link(name: &str) -> bool {
    let base = name
        .strip_suffix(INTERMEDIATE_LINK_TMP_SUFFIX)
        .unwrap_or(name);
    INTERMEDIATE_LINK_NAMES.contains(&base)
}

/// Event kinds that can change what the watched path resolves to.
fn is_change_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Any | ModifyKind::Data(_) | ModifyKind::Name(_))
    )
}

/// The watched path and the last state recorded for it.
#[derive(Debug)]
pub struct WatchTarget {
    path: PathBuf,
    resolved: Option<PathBuf>,
    last: Mutex<FileState>,
}

impl WatchTarget {
    fn new(path: PathBuf, resolved: Option<PathBuf>) -> Self {
        let initial = FileState::read(&path).unwrap_or_default();
        Self {
            path,
            resolved,
            last: Mutex::new(initial),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the symlink pointed at construction time.
    pub fn resolved(&self) -> Option<&Path> {
        self.resolved.as_deref()
    }

    pub fn is_symlink(&self) -> bool {
        self.resolved.is_some()
    }

    /// Last recorded state.
    pub fn last_state(&self) -> FileState {
        *lock(&self.last)
    }

    /// Whether a filesystem event naming `event_path` may concern the target.
    fn is_relevant(&self, event_path: &Path) -> bool {
        if event_path == self.path {
            return true;
        }

        self.is_symlink()
            && event_path
                .file_name()
                .and_then(OsStr::to_str)
                .is_some_and(is_intermediate_link)
    }

    /// Re-reads the target and records the new state if it changed.
    ///
    /// The stat, comparison and update happen under one lock, so the event
    /// listener and the poller never both report the same change.
    fn check(&self, source: ChangeSource, observer: &dyn Observer) -> bool {
        let mut last = lock(&self.last);
        let current = match FileState::read(&self.path) {
            Ok(state) => state,
            Err(err) => {
                drop(last);
                observer.observe(&Event::StatFailed {
                    path: self.path.clone(),
                    error: err.to_string(),
                });
                return false;
            }
        };

        if !current.differs_from(&last) {
            return false;
        }

        let previous = std::mem::replace(&mut *last, current);
        drop(last);

        observer.observe(&Event::ChangeConfirmed {
            path: self.path.clone(),
            source,
            previous,
            current,
        });
        true
    }
}

/// Read side of the detector's single-slot notification channel.
///
/// Each received `()` means "the target changed at least once since the last
/// notification"; re-read the file for details. A disabled detector hands out
/// a closed, permanently empty stream.
#[derive(Debug, Clone, Default)]
pub struct Changes {
    inner: Option<Arc<Mutex<Receiver<()>>>>,
}

impl Changes {
    fn closed() -> Self {
        Self::default()
    }

    fn new(receiver: Receiver<()>) -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(receiver))),
        }
    }

    /// Blocks for the next notification.
    pub fn recv(&self) -> Result<(), RecvError> {
        match &self.inner {
            Some(receiver) => lock(receiver).recv(),
            None => Err(RecvError),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<(), RecvTimeoutError> {
        match &self.inner {
            Some(receiver) => lock(receiver).recv_timeout(timeout),
            None => Err(RecvTimeoutError::Disconnected),
        }
    }

    pub fn try_recv(&self) -> Result<(), TryRecvError> {
        match &self.inner {
            Some(receiver) => lock(receiver).try_recv(),
            None => Err(TryRecvError::Disconnected),
        }
    }
}

/// Messages consumed by the event listener thread.
enum ListenerMessage {
    Filesystem(notify::Result<notify::Event>),
    Stop,
}

/// Detector for a watch path that existed at construction.
pub struct ActiveDetector {
    target: Arc<WatchTarget>,
    timings: Timings,
    watcher: Mutex<Option<RecommendedWatcher>>,
    watched_dirs: Vec<PathBuf>,
    inbox: Mutex<Option<Receiver<ListenerMessage>>>,
    control: Sender<ListenerMessage>,
    notifier: SyncSender<()>,
    changes: Changes,
    observer: Arc<dyn Observer>,
}

impl ActiveDetector {
    fn new(
        path: PathBuf,
        is_symlink: bool,
        timings: Timings,
        observer: Arc<dyn Observer>,
    ) -> Result<Self, WatchError> {
        let resolved = if is_symlink {
            let real = fs::canonicalize(&path).map_err(|source| WatchError::Resolve {
                path: path.clone(),
                source,
            })?;
            Some(real)
        } else {
            None
        };

        observer.observe(&Event::WatchTarget {
            path: path.clone(),
            resolved: resolved.clone(),
        });

        let (control, inbox) = mpsc::channel();
        let events = control.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let _ = events.send(ListenerMessage::Filesystem(res));
            })?;

        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::WatchDirectory {
                dir: dir.clone(),
                source,
            })?;
        observer.observe(&Event::WatchingDirectory { dir: dir.clone() });
        let mut watched_dirs = vec![dir.clone()];

        // The intermediate link of a mounted volume is swapped one level up.
        if let Some(real) = &resolved
            && let Some(grandparent) = dir.parent()
            && grandparent != dir
            && Some(grandparent) != real.parent()
        {
            match watcher.watch(grandparent, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    observer.observe(&Event::WatchingDirectory {
                        dir: grandparent.to_path_buf(),
                    });
                    watched_dirs.push(grandparent.to_path_buf());
                }
                Err(err) => observer.observe(&Event::WatchDirectoryFailed {
                    dir: grandparent.to_path_buf(),
                    error: err.to_string(),
                }),
            }
        }

        let (notifier, receiver) = mpsc::sync_channel(1);

        Ok(Self {
            target: Arc::new(WatchTarget::new(path, resolved)),
            timings,
            watcher: Mutex::new(Some(watcher)),
            watched_dirs,
            inbox: Mutex::new(Some(inbox)),
            control,
            notifier,
            changes: Changes::new(receiver),
            observer,
        })
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    /// Directories registered with the filesystem watcher.
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.watched_dirs
    }

    fn start(&self, scope: &Scope) {
        let Some(inbox) = lock(&self.inbox).take() else {
            return;
        };

        self.observer.observe(&Event::DetectorStarted {
            path: self.target.path.clone(),
            poll_interval: self.timings.poll_interval,
        });

        let control = self.control.clone();
        scope.on_cancel(move || {
            let _ = control.send(ListenerMessage::Stop);
        });

        let target = Arc::clone(&self.target);
        let notifier = self.notifier.clone();
        let observer = Arc::clone(&self.observer);
        let debounce = self.timings.debounce;
        thread::spawn(move || {
            listen(inbox, &target, &notifier, debounce, observer.as_ref());
            observer.observe(&Event::DetectorThreadStopped {
                activity: DetectorActivity::Listener,
            });
        });

        let target = Arc::clone(&self.target);
        let notifier = self.notifier.clone();
        let observer = Arc::clone(&self.observer);
        let interval = self.timings.poll_interval;
        let scope = scope.clone();
        thread::spawn(move || {
            poll(&scope, &target, &notifier, interval, observer.as_ref());
            observer.observe(&Event::DetectorThreadStopped {
                activity: DetectorActivity::Poller,
            });
        });
    }

    fn close(&self) -> Result<(), WatchError> {
        let Some(mut watcher) = lock(&self.watcher).take() else {
            return Ok(());
        };

        let mut first_error = None;
        for dir in &self.watched_dirs {
            match watcher.unwatch(dir) {
                Ok(()) => {}
                // Watches on deleted directories are dropped by the kernel.
                Err(err)
                    if matches!(
                        err.kind,
                        notify::ErrorKind::WatchNotFound | notify::ErrorKind::PathNotFound
                    ) => {}
                Err(source) => {
                    first_error.get_or_insert(WatchError::Unwatch {
                        dir: dir.clone(),
                        source,
                    });
                }
            }
        }
        drop(watcher);

        let _ = self.control.send(ListenerMessage::Stop);
        self.observer.observe(&Event::DetectorClosed);
        first_error.map_or(Ok(()), Err)
    }
}

/// Pushes a notification unless one is already pending.
fn notify_change(notifier: &SyncSender<()>, source: ChangeSource, observer: &dyn Observer) {
    match notifier.try_send(()) {
        Ok(()) => observer.observe(&Event::ChangeNotified { source }),
        Err(TrySendError::Full(())) => observer.observe(&Event::ChangeCoalesced { source }),
        Err(TrySendError::Disconnected(())) => {}
    }
}

/// Event listener loop. Tracks a single debounce deadline; every confirmed
/// change pushes it back, and it fires only after a quiet period.
fn listen(
    inbox: Receiver<ListenerMessage>,
    target: &WatchTarget,
    notifier: &SyncSender<()>,
    debounce: Duration,
    observer: &dyn Observer,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        if let Some(at) = deadline
            && Instant::now() >= at
        {
            deadline = None;
            notify_change(notifier, ChangeSource::Events, observer);
        }

        let message = match deadline {
            Some(at) => inbox.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => inbox.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(ListenerMessage::Filesystem(Ok(event))) => {
                if !event.paths.iter().any(|path| target.is_relevant(path)) {
                    continue;
                }

                observer.observe(&Event::FilesystemEvent {
                    kind: format!("{:?}", event.kind),
                    paths: event.paths.clone(),
                });

                if !is_change_kind(&event.kind) {
                    continue;
                }

                if target.check(ChangeSource::Events, observer) {
                    deadline = Some(Instant::now() + debounce);
                } else {
                    observer.observe(&Event::ChangeUnconfirmed {
                        path: target.path.clone(),
                    });
                }
            }
            Ok(ListenerMessage::Filesystem(Err(err))) => {
                observer.observe(&Event::WatchBackendError {
                    error: err.to_string(),
                });
            }
            Ok(ListenerMessage::Stop) | Err(RecvTimeoutError::Disconnected) => return,
            // Deadline reached; handled at the top of the loop.
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

/// Fallback poller. No debounce: the interval already rate-limits it.
fn poll(
    scope: &Scope,
    target: &WatchTarget,
    notifier: &SyncSender<()>,
    interval: Duration,
    observer: &dyn Observer,
) {
    while !scope.wait_timeout(interval) {
        if target.check(ChangeSource::Polling, observer) {
            notify_change(notifier, ChangeSource::Polling, observer);
        }
    }
}

/// Observes one filesystem path and reports when it changes.
///
/// A path that does not exist at construction yields [`ChangeDetector::Disabled`],
/// whose operations all succeed and never report anything. Watching stays off
/// even if the file appears later.
pub enum ChangeDetector {
    Active(ActiveDetector),
    Disabled,
}

impl ChangeDetector {
    pub fn new(
        path: impl AsRef<Path>,
        timings: Timings,
        observer: Arc<dyn Observer>,
    ) -> Result<Self, WatchError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Ok(Self::Disabled);
        }

        let path = std::path::absolute(path).map_err(|source| WatchError::Stat {
            path: path.to_path_buf(),
            source,
        })?;

        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                observer.observe(&Event::WatchDisabled { path });
                return Ok(Self::Disabled);
            }
            Err(source) => return Err(WatchError::Stat { path, source }),
        };

        let is_symlink = metadata.file_type().is_symlink();
        ActiveDetector::new(path, is_symlink, timings, observer).map(Self::Active)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    /// The watched path, if watching is enabled.
    pub fn watch_path(&self) -> Option<&Path> {
        match self {
            Self::Active(detector) => Some(detector.target.path()),
            Self::Disabled => None,
        }
    }

    /// Starts the event listener and the poller under `scope`. Calling it
    /// again is a no-op.
    pub fn start(&self, scope: &Scope) {
        if let Self::Active(detector) = self {
            detector.start(scope);
        }
    }

    /// Read side of the notification channel.
    pub fn changes(&self) -> Changes {
        match self {
            Self::Active(detector) => detector.changes.clone(),
            Self::Disabled => Changes::closed(),
        }
    }

    /// Releases the filesystem watcher and stops the listener. Idempotent.
    pub fn close(&self) -> Result<(), WatchError> {
        match self {
            Self::Active(detector) => detector.close(),
            Self::Disabled => Ok(()),
        }
    }
}
