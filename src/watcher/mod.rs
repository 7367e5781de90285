// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Filesystem watching with two interchangeable backends.
//!
//! Both backends feed one uniform event stream consumed via
//! [`FileWatcher::next_event`]:
//!
//! - [`FileWatcher::native`] - inotify tree watch with automatic
//!   registration of new subdirectories.
//! - [`FileWatcher::fswatch`] - an external `fswatch` subprocess, one event
//!   per stdout line.
//!
//! Events are forwarded raw; nothing is coalesced or debounced.
//! Deduplication is the scan queue's job. Every watcher delivers exactly one
//! [`WatchEvent::Terminated`] at the end of its life.

mod fswatch;
mod native;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Capacity of the event channel between a backend and the handle.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Events
// =============================================================================

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileWatchEventKind {
    Created,
    Modified,
    Deleted,
}

/// Whether an event refers to a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Dir,
}

/// A change observed on the filestore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWatchEvent {
    pub path: PathBuf,
    pub kind: FileWatchEventKind,
    pub path_kind: PathKind,
    pub timestamp: SystemTime,
}

impl FileWatchEvent {
    pub(crate) fn now(path: PathBuf, kind: FileWatchEventKind, path_kind: PathKind) -> Self {
        Self {
            path,
            kind,
            path_kind,
            timestamp: SystemTime::now(),
        }
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.path_kind == PathKind::File
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.path_kind == PathKind::Dir
    }
}

/// The uniform event stream emitted by both watcher backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A created/modified/deleted path.
    File(FileWatchEvent),
    /// The kernel (or subprocess) lost events due to backpressure.
    Overflow,
    /// A directory was registered for watching.
    Registered(PathBuf),
    /// An out-of-band backend error.
    Error {
        path: Option<PathBuf>,
        message: String,
    },
    /// The watcher stopped. Delivered exactly once per watcher.
    Terminated {
        path: PathBuf,
        error: Option<String>,
    },
}

// =============================================================================
// Handle
// =============================================================================

/// Handle onto a running watcher backend.
///
/// Construction starts the backend; a successful constructor happens-before
/// any event delivery. [`close`] is idempotent and triggers the final
/// [`WatchEvent::Terminated`], after which [`next_event`] drains buffered
/// events and then returns `None`. Constructors must be called from within a
/// Tokio runtime.
///
/// [`close`]: FileWatcher::close
/// [`next_event`]: FileWatcher::next_event
pub struct FileWatcher {
    main_dir: PathBuf,
    events: mpsc::Receiver<WatchEvent>,
    register_tx: Option<mpsc::UnboundedSender<PathBuf>>,
    registered: Arc<Mutex<BTreeSet<PathBuf>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl FileWatcher {
    /// Watch `main_dir` with the native inotify backend. With
    /// `register_all_sub_dirs` the existing tree is walked once and every
    /// subdirectory is registered; newly created subdirectories are
    /// registered as they appear.
    pub fn native(main_dir: &Path, register_all_sub_dirs: bool) -> Result<Self> {
        let (watcher, backend) = Self::prepare(main_dir, true)?;
        native::spawn(backend, main_dir.to_path_buf(), register_all_sub_dirs)?;
        Ok(watcher)
    }

    /// Watch `main_dir` by launching an external `fswatch` binary.
    ///
    /// `monitor` selects an fswatch monitor backend (`None` for the platform
    /// default). Additional directories cannot be registered after launch.
    pub fn fswatch(
        main_dir: &Path,
        register_all_sub_dirs: bool,
        monitor: Option<String>,
        fswatch_binary: &Path,
    ) -> Result<Self> {
        let (watcher, backend) = Self::prepare(main_dir, false)?;
        fswatch::spawn(
            backend,
            main_dir.to_path_buf(),
            register_all_sub_dirs,
            monitor,
            fswatch_binary.to_path_buf(),
        )?;
        Ok(watcher)
    }

    fn prepare(main_dir: &Path, registrable: bool) -> Result<(Self, Backend)> {
        if !main_dir.is_dir() {
            return Err(Error::Watcher(format!(
                "watch root {} is not an existing directory",
                main_dir.display()
            )));
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let registered = Arc::new(Mutex::new(BTreeSet::new()));
        let cancel = CancellationToken::new();

        let watcher = Self {
            main_dir: main_dir.to_path_buf(),
            events: events_rx,
            register_tx: registrable.then_some(register_tx),
            registered: Arc::clone(&registered),
            cancel: cancel.clone(),
            closed: AtomicBool::new(false),
        };
        let backend = Backend {
            sink: EventSink {
                events: events_tx,
                registered,
            },
            register_rx,
            cancel,
        };
        Ok((watcher, backend))
    }

    /// Receive the next event; `None` once the watcher has terminated and
    /// all buffered events are drained.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Register an additional directory tree. Only supported by the native
    /// backend; `fswatch` fixes its paths at launch.
    pub fn register(&self, dir: &Path) -> Result<()> {
        let Some(register_tx) = &self.register_tx else {
            return Err(Error::Watcher(
                "the fswatch backend registers paths at launch only".to_string(),
            ));
        };
        register_tx
            .send(dir.to_path_buf())
            .map_err(|_| Error::Watcher("watcher is no longer running".to_string()))
    }

    /// The directories currently registered for watching.
    #[must_use]
    pub fn registered_paths(&self) -> Vec<PathBuf> {
        self.registered
            .lock()
            .expect("registered-paths lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// The watched main directory.
    #[must_use]
    pub fn main_dir(&self) -> &Path {
        &self.main_dir
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop the backend. Idempotent; the final [`WatchEvent::Terminated`] is
    /// still delivered through [`FileWatcher::next_event`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Backend plumbing
// =============================================================================

/// Backend half of a watcher: the event sink plus control channels.
pub(crate) struct Backend {
    pub(crate) sink: EventSink,
    pub(crate) register_rx: mpsc::UnboundedReceiver<PathBuf>,
    pub(crate) cancel: CancellationToken,
}

/// Where a backend task publishes its events and registered-path updates.
#[derive(Clone)]
pub(crate) struct EventSink {
    events: mpsc::Sender<WatchEvent>,
    registered: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl EventSink {
    /// Record a directory as registered without announcing it; used for the
    /// initial tree walk that happens before the stream is consumed.
    pub(crate) fn register_silently(&self, dir: &Path) {
        self.registered
            .lock()
            .expect("registered-paths lock poisoned")
            .insert(dir.to_path_buf());
    }

    /// Record a directory as registered and announce it on the stream.
    pub(crate) async fn mark_registered(&self, dir: &Path) {
        self.register_silently(dir);
        self.send(WatchEvent::Registered(dir.to_path_buf())).await;
    }

    pub(crate) fn mark_deregistered(&self, dir: &Path) {
        self.registered
            .lock()
            .expect("registered-paths lock poisoned")
            .remove(dir);
    }

    pub(crate) async fn send(&self, event: WatchEvent) {
        // a dropped handle just means nobody is listening anymore
        let _ = self.events.send(event).await;
    }

    pub(crate) async fn send_file(
        &self,
        path: PathBuf,
        kind: FileWatchEventKind,
        path_kind: PathKind,
    ) {
        self.send(WatchEvent::File(FileWatchEvent::now(path, kind, path_kind)))
            .await;
    }

    /// Announce termination. Backends go through this exactly once, as the
    /// last event before their task ends.
    pub(crate) async fn terminate(&self, main_dir: PathBuf, error: Option<String>) {
        self.send(WatchEvent::Terminated {
            path: main_dir,
            error,
        })
        .await;
    }
}
