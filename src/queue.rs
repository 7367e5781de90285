// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded deduplicating FIFO of paths pending a scan.
//!
//! The queue holds each path at most once and keeps the most recently pushed
//! paths: a re-push moves the path to the tail, and at capacity the oldest
//! entry is dropped (counted by the overflow counter). This is the only
//! shared mutable state between the watcher side (producers) and the scan
//! worker (consumer).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Lower bound for the queue capacity.
pub const MIN_SIZE: usize = 5;

/// Default queue capacity used by the real-time scanner.
pub const DEFAULT_SIZE: usize = 5_000;

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<PathBuf>,
    overflow: u64,
}

/// Bounded dedup queue. All operations are atomic; safe for concurrent
/// producers and one consumer.
#[derive(Debug)]
pub struct ScanQueue {
    max_size: usize,
    inner: Mutex<Inner>,
}

impl ScanQueue {
    /// Create a queue with the given capacity, clamped to [`MIN_SIZE`].
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(MIN_SIZE),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Push a path. An already-present path is moved to the tail; when the
    /// queue is full the oldest entries are dropped to make room, each drop
    /// incrementing the overflow counter.
    pub fn push(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut inner = self.lock();
        inner.queue.retain(|p| *p != path);
        while inner.queue.len() >= self.max_size {
            inner.queue.pop_front();
            inner.overflow += 1;
        }
        inner.queue.push_back(path);
    }

    /// Remove and return the oldest path, if any.
    pub fn pop(&self) -> Option<PathBuf> {
        self.lock().queue.pop_front()
    }

    /// Remove and return up to `n` paths from the head, oldest first.
    pub fn pop_batch(&self, n: usize) -> Vec<PathBuf> {
        let mut inner = self.lock();
        let count = n.min(inner.queue.len());
        inner.queue.drain(..count).collect()
    }

    /// Remove any occurrence of `path`; no-op when absent. Used when a
    /// DELETED event arrives for a path still pending.
    pub fn remove(&self, path: &Path) {
        self.lock().queue.retain(|p| p != path);
    }

    pub fn clear(&self) {
        self.lock().queue.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Number of entries dropped because of capacity pressure.
    #[must_use]
    pub fn overflow_count(&self) -> u64 {
        self.lock().overflow
    }

    pub fn reset_overflow_count(&self) {
        self.lock().overflow = 0;
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("scan queue lock poisoned")
    }
}

impl Default for ScanQueue {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE)
    }
}
