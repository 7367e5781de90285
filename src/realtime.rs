// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Real-time scanning pipeline: watcher -> dedup queue -> scan worker.
//!
//! One task pumps watcher events into the bounded queue; one worker drains
//! the queue in batches and submits each path to the daemon. A DELETED event
//! cancels a pending scan, so files created and removed in quick succession
//! are never submitted. The worker survives scan failures with a short
//! backoff instead of terminating.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::queue::{DEFAULT_SIZE, ScanQueue};
use crate::scan::ScanResult;
use crate::watcher::{FileWatchEvent, FileWatchEventKind, FileWatcher, WatchEvent};

/// Upper bound of paths scanned per worker round.
const BATCH_SIZE: usize = 300;

/// Backoff after a failed scan round, to avoid spinning on fatal errors.
const FAILURE_BACKOFF: Duration = Duration::from_secs(2);

/// Default idle sleep between empty-queue polls, in seconds.
pub const DEFAULT_SLEEP_ON_IDLE_SECS: u64 = 5;

/// Monotonic counter naming workers for diagnostics.
static WORKER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Predicate deciding whether a watch event leads to a scan.
pub type ScanApprover = Arc<dyn Fn(&FileWatchEvent) -> bool + Send + Sync>;

/// In-process callback receiving every scan outcome.
pub type ScanListener = Arc<dyn Fn(&RealtimeScanEvent) + Send + Sync>;

/// Outcome of one real-time scan.
#[derive(Debug, Clone)]
pub struct RealtimeScanEvent {
    pub path: PathBuf,
    pub result: ScanResult,
}

// =============================================================================
// Scanner
// =============================================================================

/// Couples a [`FileWatcher`] to a [`Client`] through a bounded dedup queue.
///
/// `start` and `stop` are idempotent. The pipeline runs on Tokio tasks, so
/// both must be called from within a runtime.
pub struct RealtimeScanner {
    client: Arc<Client>,
    main_dir: PathBuf,
    secondary_dirs: Vec<PathBuf>,
    scan_approver: Option<ScanApprover>,
    scan_listener: Option<ScanListener>,
    sleep_on_idle: u64,
    running: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl RealtimeScanner {
    /// Return a scanner builder around `client`.
    #[must_use]
    pub fn builder(client: Arc<Client>) -> RealtimeScannerBuilder {
        RealtimeScannerBuilder {
            client,
            main_dir: None,
            secondary_dirs: Vec::new(),
            scan_approver: None,
            scan_listener: None,
            sleep_on_idle: DEFAULT_SLEEP_ON_IDLE_SECS,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the pipeline. A second call while running is a no-op.
    pub fn start(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let queue = Arc::new(ScanQueue::new(DEFAULT_SIZE));

        let watcher = match self.build_watcher() {
            Ok(watcher) => watcher,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel lock poisoned") = Some(cancel.clone());

        tokio::spawn(pump_events(
            watcher,
            Arc::clone(&queue),
            self.scan_approver.clone(),
            cancel.clone(),
        ));
        tokio::spawn(scan_worker(
            Arc::clone(&self.client),
            queue,
            self.scan_listener.clone(),
            self.sleep_on_idle,
            cancel,
        ));

        info!("realtime scanner started on {}", self.main_dir.display());
        Ok(())
    }

    /// Stop the pipeline. The watcher is closed (delivering its Terminated
    /// event) and the worker exits at the next loop boundary. A second call
    /// while stopped is a no-op.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if let Some(cancel) = self.cancel.lock().expect("cancel lock poisoned").take() {
            cancel.cancel();
        }
        info!("realtime scanner stopped on {}", self.main_dir.display());
    }

    fn build_watcher(&self) -> Result<FileWatcher> {
        let watcher = FileWatcher::native(&self.main_dir, true)?;
        for dir in &self.secondary_dirs {
            watcher.register(dir)?;
        }
        Ok(watcher)
    }
}

impl Drop for RealtimeScanner {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`RealtimeScanner`].
pub struct RealtimeScannerBuilder {
    client: Arc<Client>,
    main_dir: Option<PathBuf>,
    secondary_dirs: Vec<PathBuf>,
    scan_approver: Option<ScanApprover>,
    scan_listener: Option<ScanListener>,
    sleep_on_idle: u64,
}

impl RealtimeScannerBuilder {
    /// The observed filestore root. Required; must be an existing directory.
    #[must_use]
    pub fn main_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.main_dir = Some(dir.into());
        self
    }

    /// Additional directory trees to observe.
    #[must_use]
    pub fn secondary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.secondary_dirs.push(dir.into());
        self
    }

    /// Predicate consulted for every created/modified path before it is
    /// queued. Absent means everything is scanned.
    #[must_use]
    pub fn scan_approver(mut self, approver: ScanApprover) -> Self {
        self.scan_approver = Some(approver);
        self
    }

    /// Callback receiving every scan outcome.
    #[must_use]
    pub fn scan_listener(mut self, listener: ScanListener) -> Self {
        self.scan_listener = Some(listener);
        self
    }

    /// Seconds the worker sleeps when the queue is empty, clamped to >= 1.
    #[must_use]
    pub fn sleep_time_on_idle(mut self, seconds: u64) -> Self {
        self.sleep_on_idle = seconds;
        self
    }

    /// Validate the configuration and build the scanner (not yet started).
    pub fn build(self) -> Result<RealtimeScanner> {
        let Some(main_dir) = self.main_dir else {
            return Err(Error::Config(
                "the realtime scanner requires a main directory".to_string(),
            ));
        };
        if !main_dir.is_dir() {
            return Err(Error::Config(format!(
                "the realtime scanner main directory {} is not an existing directory",
                main_dir.display()
            )));
        }
        for dir in &self.secondary_dirs {
            if !dir.is_dir() {
                return Err(Error::Config(format!(
                    "the realtime scanner secondary directory {} is not an existing directory",
                    dir.display()
                )));
            }
        }

        Ok(RealtimeScanner {
            client: self.client,
            main_dir,
            secondary_dirs: self.secondary_dirs,
            scan_approver: self.scan_approver,
            scan_listener: self.scan_listener,
            sleep_on_idle: self.sleep_on_idle.max(1),
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
        })
    }
}

// =============================================================================
// Pipeline tasks
// =============================================================================

/// Feed watcher events into the queue until the watcher terminates.
async fn pump_events(
    mut watcher: FileWatcher,
    queue: Arc<ScanQueue>,
    approver: Option<ScanApprover>,
    cancel: CancellationToken,
) {
    let mut closing = false;
    loop {
        tokio::select! {
            () = cancel.cancelled(), if !closing => {
                watcher.close();
                closing = true;
            }
            event = watcher.next_event() => match event {
                Some(WatchEvent::File(event)) => handle_file_event(&queue, &approver, event),
                Some(WatchEvent::Terminated { path, error }) => {
                    debug!(
                        "watcher for {} terminated{}",
                        path.display(),
                        error.map_or_else(String::new, |e| format!(": {e}"))
                    );
                }
                Some(_) => {}
                None => break,
            }
        }
    }
    debug!("event pump finished");
}

fn handle_file_event(queue: &ScanQueue, approver: &Option<ScanApprover>, event: FileWatchEvent) {
    match event.kind {
        FileWatchEventKind::Created | FileWatchEventKind::Modified => {
            if approves(approver, &event) {
                queue.push(event.path);
            }
        }
        // a file created, modified and deleted in quick succession must not
        // be scanned after it no longer exists
        FileWatchEventKind::Deleted => queue.remove(&event.path),
    }
}

/// Approver failures are swallowed; a panicking approver skips the push.
fn approves(approver: &Option<ScanApprover>, event: &FileWatchEvent) -> bool {
    match approver {
        None => true,
        Some(approver) => {
            catch_unwind(AssertUnwindSafe(|| approver(event))).unwrap_or_else(|_| {
                warn!("scan approver panicked, skipping {}", event.path.display());
                false
            })
        }
    }
}

/// Drain the queue and submit each path to the daemon, up to [`BATCH_SIZE`]
/// paths per round.
async fn scan_worker(
    client: Arc<Client>,
    queue: Arc<ScanQueue>,
    listener: Option<ScanListener>,
    sleep_on_idle: u64,
    cancel: CancellationToken,
) {
    let worker = WORKER_SEQ.fetch_add(1, Ordering::Relaxed);
    info!("scan worker {worker} started");

    'outer: while !cancel.is_cancelled() {
        // one path at a time: a failing scan only ever affects the file in
        // flight, everything else stays queued for the next round
        for _ in 0..BATCH_SIZE {
            if cancel.is_cancelled() {
                break 'outer;
            }
            let Some(path) = queue.pop() else { break };
            // paths deleted after queueing are silently skipped
            if !path.is_file() {
                continue;
            }
            match client.scan(&path) {
                Ok(result) => notify(&listener, &path, result),
                Err(e) => {
                    warn!("scan worker {worker}: scanning {} failed: {e}", path.display());
                    sleep_cancellable(&cancel, FAILURE_BACKOFF).await;
                    continue 'outer;
                }
            }
        }

        if queue.is_empty() {
            for _ in 0..sleep_on_idle {
                if cancel.is_cancelled() {
                    break 'outer;
                }
                sleep_cancellable(&cancel, Duration::from_secs(1)).await;
            }
        }
    }

    info!("scan worker {worker} stopped");
}

/// Listener failures are swallowed to keep the pipeline alive.
fn notify(listener: &Option<ScanListener>, path: &Path, result: ScanResult) {
    if result.has_virus() {
        warn!("infected: {}", result.to_string().trim_end());
    }
    if let Some(listener) = listener {
        let event = RealtimeScanEvent {
            path: path.to_path_buf(),
            result,
        };
        if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
            warn!("scan listener panicked for {}", path.display());
        }
    }
}

async fn sleep_cancellable(cancel: &CancellationToken, duration: Duration) {
    tokio::select! {
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(duration) => {}
    }
}
