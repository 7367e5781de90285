// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Real-time scanning demo: watch a directory tree and submit every
//! created or modified file to a clamd daemon, quarantining infections.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use aviron::util::wait_for_shutdown;
use aviron::{
    Client, FileSeparator, QuarantineEvent, QuarantineFileAction, RealtimeScanEvent,
    RealtimeScanner,
};

/// Retry delay while waiting for the daemon to come up.
const DAEMON_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "aviron-rtscan")]
#[command(about = "Real-time ClamAV scanning for a directory tree")]
struct Cli {
    /// Directory tree to watch
    #[arg(short, long)]
    watch: PathBuf,

    /// Additional directory trees to watch
    #[arg(short, long, action = clap::ArgAction::Append)]
    secondary: Vec<PathBuf>,

    /// Clamd server hostname
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Clamd server port
    #[arg(long, default_value_t = 3310)]
    port: u16,

    /// Path separator flavor the daemon expects: local, unix, windows, native
    #[arg(long, default_value = "native")]
    separator: FileSeparator,

    /// Action on infected files: none, copy, move, remove
    #[arg(short, long, default_value = "none")]
    action: QuarantineFileAction,

    /// Quarantine directory (required unless action=none)
    #[arg(long)]
    quarantine_dir: Option<PathBuf>,

    /// Seconds the worker sleeps when there is nothing to scan
    #[arg(long, default_value_t = 5)]
    idle_sleep: u64,

    /// Enable debug logging
    #[arg(short, long, default_value = "false")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if cli.action != QuarantineFileAction::None && cli.quarantine_dir.is_none() {
        anyhow::bail!("--quarantine-dir is required when action={}", cli.action);
    }

    let mut builder = Client::builder()
        .server_hostname(&cli.host)
        .server_port(cli.port)
        .server_file_separator(cli.separator)
        .quarantine_file_action(cli.action)
        .quarantine_event_listener(Arc::new(|event: &QuarantineEvent| {
            match (&event.quarantine_file, &event.error) {
                (_, Some(error)) => warn!(
                    "quarantine of {} failed: {error}",
                    event.infected_file.display()
                ),
                (Some(target), None) => info!(
                    "quarantined {} -> {}",
                    event.infected_file.display(),
                    target.display()
                ),
                (None, None) => info!("handled infected {}", event.infected_file.display()),
            }
        }));
    if let Some(dir) = &cli.quarantine_dir {
        builder = builder.quarantine_dir(dir);
    }
    let client = Arc::new(builder.build().context("invalid client configuration")?);

    wait_for_daemon(&client).await;
    info!("daemon: {}", client.version().context("VERSION failed")?);

    let scanner = RealtimeScanner::builder(Arc::clone(&client))
        .main_dir(&cli.watch)
        .scan_listener(Arc::new(|event: &RealtimeScanEvent| {
            if event.result.has_virus() {
                for (path, viruses) in event.result.viruses() {
                    warn!("FOUND {path}: {}", viruses.join(", "));
                }
            } else {
                info!("clean: {}", event.path.display());
            }
        }))
        .sleep_time_on_idle(cli.idle_sleep);
    let scanner = cli
        .secondary
        .iter()
        .fold(scanner, |b, dir| b.secondary_dir(dir))
        .build()
        .context("invalid scanner configuration")?;

    scanner.start().context("starting realtime scanner")?;
    info!("watching {} (action={})", cli.watch.display(), cli.action);

    wait_for_shutdown().await.context("waiting for shutdown")?;

    scanner.stop();
    Ok(())
}

async fn wait_for_daemon(client: &Client) {
    loop {
        if client.is_reachable() && client.ping().unwrap_or(false) {
            return;
        }
        warn!(
            "clamd not reachable, retrying in {}s",
            DAEMON_RETRY_DELAY.as_secs()
        );
        tokio::time::sleep(DAEMON_RETRY_DELAY).await;
    }
}
