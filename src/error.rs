// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the clamd client and the real-time scanning pipeline.

use thiserror::Error;

/// Main error type for aviron operations.
///
/// Per-file scan failures reported by the daemon are *not* errors; they are
/// carried inside [`crate::ScanResult`] entries.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid build parameters, rejected eagerly at construction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Connect/read/write failure or timeout talking to the daemon.
    #[error("{context}: {source}")]
    Network {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The daemon reply did not match the expected grammar.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The command is not advertised by the daemon.
    #[error("command not supported by the daemon: {0}")]
    UnknownCommand(String),

    /// Watcher backend failure (kernel rejection, subprocess crash).
    #[error("watcher error: {0}")]
    Watcher(String),

    /// Quarantine action failure.
    #[error("quarantine: {context}: {source}")]
    Quarantine {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn network(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Network {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn quarantine(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Quarantine {
            context: context.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
