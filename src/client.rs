// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! The clamd client.
//!
//! ```no_run
//! use aviron::{Client, FileSeparator};
//!
//! # fn main() -> aviron::Result<()> {
//! let client = Client::builder()
//!     .server_hostname("localhost")
//!     .server_file_separator(FileSeparator::Unix)
//!     .build()?;
//!
//! println!("{}", client.version()?);
//!
//! let result = client.scan(std::path::Path::new("/data/summary.docx"))?;
//! if result.has_virus() {
//!     for (path, viruses) in result.viruses() {
//!         println!("{path}: {}", viruses.join(", "));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use once_cell::sync::OnceCell;

use crate::commands::{Command, DEFAULT_CHUNK_SIZE, parse_version_commands};
use crate::conn::{
    CommandRunDetails, DEFAULT_CONNECTION_TIMEOUT_MILLIS, DEFAULT_READ_TIMEOUT_MILLIS,
    DEFAULT_SERVER_PORT, FileSeparator, ServerIo,
};
use crate::error::{Error, Result};
use crate::quarantine::{Quarantine, QuarantineEventListener, QuarantineFile, QuarantineFileAction};
use crate::scan::ScanResult;

/// Default clamd server hostname.
pub const LOCALHOST: &str = "localhost";

// =============================================================================
// Client
// =============================================================================

/// Client for a remote clamd daemon.
///
/// Each command opens its own TCP connection, sends one framed command, reads
/// the full reply and closes. The advertised command set is probed once via
/// VERSIONCOMMANDS and memoized; commands the daemon does not advertise are
/// rejected before any socket is opened.
pub struct Client {
    server: ServerIo,
    quarantine: Quarantine,
    capabilities: OnceCell<Vec<String>>,
}

impl Client {
    /// Return a client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Send PING; `true` iff the daemon answers PONG.
    pub fn ping(&self) -> Result<bool> {
        Ok(self.send(&Command::Ping)? == "PONG")
    }

    /// The daemon's version string.
    pub fn version(&self) -> Result<String> {
        self.send(&Command::Version)
    }

    /// Statistics about the scan queue and memory usage, verbatim.
    pub fn stats(&self) -> Result<String> {
        self.send(&Command::Stats)
    }

    /// Reload the daemon's virus databases.
    pub fn reload_virus_databases(&self) -> Result<()> {
        self.send(&Command::Reload).map(|_| ())
    }

    /// Shut down the daemon cleanly.
    pub fn shutdown_server(&self) -> Result<()> {
        self.send(&Command::Shutdown).map(|_| ())
    }

    /// Scan a file or directory (recursively); the daemon stops after the
    /// first file with a virus. Quarantine actions are applied to the result.
    pub fn scan(&self, path: &Path) -> Result<ScanResult> {
        let server_path = self.server.to_server_path(path);
        let result = ScanResult::parse(&self.send(&Command::Scan(server_path))?)?;
        self.quarantine.handle_scan_result(&result)?;
        Ok(result)
    }

    /// Scan a file or directory (recursively); scanning continues past
    /// infected files, one reply line per file.
    pub fn cont_scan(&self, path: &Path) -> Result<ScanResult> {
        let server_path = self.server.to_server_path(path);
        let result = ScanResult::parse(&self.send(&Command::ContScan(server_path))?)?;
        self.quarantine.handle_scan_result(&result)?;
        Ok(result)
    }

    /// Scan a file or directory using the daemon's internal thread pool.
    /// Ordering across files is not guaranteed.
    pub fn multi_scan(&self, path: &Path) -> Result<ScanResult> {
        let server_path = self.server.to_server_path(path);
        let result = ScanResult::parse(&self.send(&Command::MultiScan(server_path))?)?;
        self.quarantine.handle_scan_result(&result)?;
        Ok(result)
    }

    /// Scan in-memory data via INSTREAM with the default chunk size.
    ///
    /// The caller owns the reader's lifecycle. There is no quarantine action
    /// for streamed data.
    pub fn scan_stream(&self, reader: &mut dyn Read) -> Result<ScanResult> {
        self.scan_stream_chunked(reader, DEFAULT_CHUNK_SIZE)
    }

    /// Scan in-memory data via INSTREAM with a caller-chosen chunk size.
    pub fn scan_stream_chunked(
        &self,
        reader: &mut dyn Read,
        chunk_size: usize,
    ) -> Result<ScanResult> {
        if chunk_size == 0 {
            return Err(Error::Config(
                "the INSTREAM chunk size must be greater than 0".to_string(),
            ));
        }
        self.gate(Command::InStream.name())?;
        ScanResult::parse(&self.server.round_trip_stream(reader, chunk_size)?)
    }

    /// Whether the daemon accepts TCP connections, probed with the
    /// configured connect timeout. Never errors.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.server.is_reachable(self.server.connect_timeout())
    }

    /// Whether the daemon accepts TCP connections within `timeout_millis`.
    #[must_use]
    pub fn is_reachable_timeout(&self, timeout_millis: u64) -> bool {
        self.server.is_reachable(Duration::from_millis(timeout_millis))
    }

    /// The commands the daemon advertised via VERSIONCOMMANDS.
    pub fn available_commands(&self) -> Result<&[String]> {
        self.capabilities().map(Vec::as_slice)
    }

    /// Request string and raw reply bytes of the last command, for debugging.
    #[must_use]
    pub fn last_command_run_details(&self) -> CommandRunDetails {
        self.server.last_command_run_details()
    }

    /// Whether a quarantine action other than `None` is configured.
    #[must_use]
    pub fn quarantine_active(&self) -> bool {
        self.quarantine.is_active()
    }

    /// The quarantined files currently in the store.
    pub fn list_quarantine_files(&self) -> Result<Vec<QuarantineFile>> {
        if self.quarantine.is_active() {
            self.quarantine.list()
        } else {
            Ok(Vec::new())
        }
    }

    /// Remove one quarantined file. Silently ignores a missing file.
    pub fn remove_quarantine_file(&self, file: &QuarantineFile) -> Result<()> {
        self.quarantine.remove(file)
    }

    /// Empty the quarantine store.
    pub fn remove_all_quarantine_files(&self) -> Result<()> {
        self.quarantine.remove_all()
    }

    fn capabilities(&self) -> Result<&Vec<String>> {
        self.capabilities.get_or_try_init(|| {
            // the probe itself bypasses the capability gate
            let reply = self.server.round_trip(&Command::VersionCommands)?;
            let commands = parse_version_commands(&reply)?;
            info!("daemon advertises {} commands", commands.len());
            Ok(commands)
        })
    }

    fn gate(&self, name: &str) -> Result<()> {
        if self.capabilities()?.iter().any(|c| c == name) {
            Ok(())
        } else {
            Err(Error::UnknownCommand(name.to_string()))
        }
    }

    fn send(&self, command: &Command) -> Result<String> {
        self.gate(command.name())?;
        debug!("sending {}", command.name());
        self.server.round_trip(command)
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "server_hostname: {}", self.server.hostname())?;
        writeln!(f, "server_port: {}", self.server.port())?;
        writeln!(f, "server_file_separator: {}", self.server.separator())?;
        writeln!(
            f,
            "connection_timeout_millis: {}",
            self.server.connect_timeout().as_millis()
        )?;
        writeln!(
            f,
            "read_timeout_millis: {}",
            self.server.read_timeout().as_millis()
        )?;
        writeln!(f, "quarantine_file_action: {}", self.quarantine.action())?;
        writeln!(
            f,
            "quarantine_dir: {}",
            self.quarantine
                .dir()
                .map_or_else(|| "-".to_string(), |d| d.display().to_string())
        )?;
        write!(
            f,
            "quarantine_listener: {}",
            if self.quarantine.has_listener() {
                "supplied"
            } else {
                "-"
            }
        )
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Client`]; all parameters validated eagerly at [`build`].
///
/// [`build`]: ClientBuilder::build
pub struct ClientBuilder {
    server_hostname: String,
    server_port: u16,
    server_file_separator: FileSeparator,
    connection_timeout_millis: u64,
    read_timeout_millis: u64,
    quarantine_file_action: QuarantineFileAction,
    quarantine_dir: Option<PathBuf>,
    quarantine_event_listener: Option<QuarantineEventListener>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            server_hostname: LOCALHOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            server_file_separator: FileSeparator::default(),
            connection_timeout_millis: DEFAULT_CONNECTION_TIMEOUT_MILLIS,
            read_timeout_millis: DEFAULT_READ_TIMEOUT_MILLIS,
            quarantine_file_action: QuarantineFileAction::None,
            quarantine_dir: None,
            quarantine_event_listener: None,
        }
    }
}

impl ClientBuilder {
    /// The clamd server hostname. Defaults to `localhost`.
    #[must_use]
    pub fn server_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.server_hostname = hostname.into();
        self
    }

    /// The clamd server port. Defaults to 3310.
    #[must_use]
    pub fn server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    /// The path separator flavor the daemon expects. Defaults to
    /// [`FileSeparator::Native`].
    #[must_use]
    pub fn server_file_separator(mut self, separator: FileSeparator) -> Self {
        self.server_file_separator = separator;
        self
    }

    /// Connect timeout in milliseconds, 0 means indefinite. Defaults to 3000.
    #[must_use]
    pub fn connection_timeout(mut self, timeout_millis: u64) -> Self {
        self.connection_timeout_millis = timeout_millis;
        self
    }

    /// Read timeout in milliseconds, 0 means indefinite. Defaults to 20000.
    #[must_use]
    pub fn read_timeout(mut self, timeout_millis: u64) -> Self {
        self.read_timeout_millis = timeout_millis;
        self
    }

    /// Action applied to infected files. Defaults to
    /// [`QuarantineFileAction::None`].
    #[must_use]
    pub fn quarantine_file_action(mut self, action: QuarantineFileAction) -> Self {
        self.quarantine_file_action = action;
        self
    }

    /// Directory infected files are copied/moved to. Required when the
    /// quarantine action is not `None`; must exist and be writable.
    #[must_use]
    pub fn quarantine_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.quarantine_dir = Some(dir.into());
        self
    }

    /// In-process listener receiving all quarantine action events.
    #[must_use]
    pub fn quarantine_event_listener(mut self, listener: QuarantineEventListener) -> Self {
        self.quarantine_event_listener = Some(listener);
        self
    }

    /// Validate the configuration and build the client.
    pub fn build(self) -> Result<Client> {
        if self.server_hostname.is_empty() {
            return Err(Error::Config(
                "the server hostname must not be empty".to_string(),
            ));
        }
        if self.server_port == 0 {
            return Err(Error::Config("the server port must not be 0".to_string()));
        }
        if let Some(dir) = &self.quarantine_dir {
            if !dir.is_dir() {
                return Err(Error::Config(format!(
                    "the quarantine directory {} does not exist",
                    dir.display()
                )));
            }
            if dir.metadata().is_ok_and(|m| m.permissions().readonly()) {
                return Err(Error::Config(format!(
                    "the quarantine directory {} has no write permission",
                    dir.display()
                )));
            }
        } else if self.quarantine_file_action != QuarantineFileAction::None {
            return Err(Error::Config(
                "a quarantine directory is required when the quarantine action is not none"
                    .to_string(),
            ));
        }

        Ok(Client {
            server: ServerIo::new(
                self.server_hostname,
                self.server_port,
                self.server_file_separator,
                Duration::from_millis(self.connection_timeout_millis),
                Duration::from_millis(self.read_timeout_millis),
            ),
            quarantine: Quarantine::new(
                self.quarantine_file_action,
                self.quarantine_dir,
                self.quarantine_event_listener,
            ),
            capabilities: OnceCell::new(),
        })
    }
}
