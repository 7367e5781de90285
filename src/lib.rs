// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Client library for the `ClamAV` scanning daemon (clamd).
//!
//! The crate wraps clamd's socket command protocol and layers a real-time
//! scanning pipeline on top of it:
//!
//! - [`Client`] - connection-per-command clamd client (PING, VERSION, STATS,
//!   SCAN family, streamed INSTREAM scans) with capability gating and
//!   quarantine handling for infected files.
//! - [`FileWatcher`] - filesystem observation with a native inotify backend
//!   and an external `fswatch` subprocess backend behind one event stream.
//! - [`RealtimeScanner`] - watcher events feeding a bounded dedup queue,
//!   drained by a worker that submits files to the daemon.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_errors_doc)]

mod client;
mod commands;
mod conn;
mod error;
mod quarantine;
pub mod queue;
mod realtime;
mod scan;
pub mod util;
pub mod watcher;

pub use client::{Client, ClientBuilder, LOCALHOST};
pub use commands::DEFAULT_CHUNK_SIZE;
pub use conn::{
    CommandRunDetails, DEFAULT_CONNECTION_TIMEOUT_MILLIS, DEFAULT_READ_TIMEOUT_MILLIS,
    DEFAULT_SERVER_PORT, FileSeparator,
};
pub use error::{Error, Result};
pub use quarantine::{
    QuarantineEvent, QuarantineEventListener, QuarantineFile, QuarantineFileAction,
};
pub use queue::ScanQueue;
pub use realtime::{
    RealtimeScanEvent, RealtimeScanner, RealtimeScannerBuilder, ScanApprover, ScanListener,
};
pub use scan::{ScanEntry, ScanResult, ScanStatus};
pub use watcher::{FileWatchEvent, FileWatchEventKind, FileWatcher, PathKind, WatchEvent};
