// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use log::info;

use crate::error::{Error, Result};

/// Default location of the `fswatch` binary: Homebrew's path on macOS.
///
/// There is no default on other platforms; callers must supply the path.
#[must_use]
pub fn default_fswatch_binary() -> Option<PathBuf> {
    cfg!(target_os = "macos").then(|| PathBuf::from("/opt/homebrew/bin/fswatch"))
}

/// Shutdown signal received.
#[derive(Debug, Clone, Copy)]
pub enum ShutdownSignal {
    Sigint,
    Sigterm,
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    let mut sigint =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .map_err(|e| Error::Config(format!("installing SIGINT handler: {e}")))?;
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .map_err(|e| Error::Config(format!("installing SIGTERM handler: {e}")))?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received");
            Ok(ShutdownSignal::Sigint)
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received");
            Ok(ShutdownSignal::Sigterm)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fswatch_default_exists_only_on_macos() {
        let default = default_fswatch_binary();
        if cfg!(target_os = "macos") {
            assert_eq!(default, Some(PathBuf::from("/opt/homebrew/bin/fswatch")));
        } else {
            assert_eq!(default, None);
        }
    }
}
