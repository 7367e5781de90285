// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-command socket I/O towards the clamd daemon.
//!
//! Every command opens a fresh TCP connection, writes the framed command,
//! reads the full NUL-terminated reply and closes. There is no connection
//! pool and no multiplexing; this matches clamd's per-connection command
//! model.

use std::fmt;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, trace};

use crate::commands::Command;
use crate::error::{Error, Result};

/// Default clamd server port.
pub const DEFAULT_SERVER_PORT: u16 = 3310;

/// Default connect timeout in milliseconds (0 = indefinite).
pub const DEFAULT_CONNECTION_TIMEOUT_MILLIS: u64 = 3_000;

/// Default read timeout in milliseconds (0 = indefinite).
pub const DEFAULT_READ_TIMEOUT_MILLIS: u64 = 20_000;

const REPLY_BUFFER_SIZE: usize = 4096;

// =============================================================================
// File separator flavor
// =============================================================================

/// Which path separator flavor the remote daemon expects.
///
/// The daemon resolves SCAN paths on *its* filesystem, so local paths are
/// rewritten to the separator the daemon's platform uses before they go over
/// the wire. The original path is never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileSeparator {
    /// Leave paths untouched.
    Local,
    /// Rewrite separators to `/`.
    Unix,
    /// Rewrite separators to `\`.
    Windows,
    /// Rewrite separators to this platform's separator (default).
    #[default]
    Native,
}

impl FileSeparator {
    const fn separator(self) -> Option<char> {
        match self {
            Self::Local => None,
            Self::Unix => Some('/'),
            Self::Windows => Some('\\'),
            Self::Native => Some(std::path::MAIN_SEPARATOR),
        }
    }

    /// Rewrite all separators in `path` to this flavor.
    #[must_use]
    pub fn translate(self, path: &str) -> String {
        match self.separator() {
            None => path.to_string(),
            Some(sep) => path
                .chars()
                .map(|c| if c == '/' || c == '\\' { sep } else { c })
                .collect(),
        }
    }
}

impl fmt::Display for FileSeparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Unix => write!(f, "unix"),
            Self::Windows => write!(f, "windows"),
            Self::Native => write!(f, "native"),
        }
    }
}

impl FromStr for FileSeparator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "unix" => Ok(Self::Unix),
            "windows" => Ok(Self::Windows),
            "native" => Ok(Self::Native),
            _ => Err(format!(
                "invalid file separator: {s}. Use: local, unix, windows, native"
            )),
        }
    }
}

// =============================================================================
// Command run details
// =============================================================================

/// The last request string and raw reply bytes, kept for debugging.
#[derive(Debug, Clone, Default)]
pub struct CommandRunDetails {
    pub request: String,
    pub reply: Vec<u8>,
}

impl fmt::Display for CommandRunDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "request: {}", self.request.trim_end_matches('\0'))?;
        write!(f, "reply:   {}", String::from_utf8_lossy(&self.reply))
    }
}

// =============================================================================
// Server I/O
// =============================================================================

/// Connection-per-command transport to a clamd endpoint. Immutable after
/// build, apart from the recorded last-command details.
pub(crate) struct ServerIo {
    hostname: String,
    port: u16,
    separator: FileSeparator,
    connect_timeout: Duration,
    read_timeout: Duration,
    last_run: Mutex<CommandRunDetails>,
}

impl ServerIo {
    pub(crate) fn new(
        hostname: String,
        port: u16,
        separator: FileSeparator,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            hostname,
            port,
            separator,
            connect_timeout,
            read_timeout,
            last_run: Mutex::new(CommandRunDetails::default()),
        }
    }

    pub(crate) fn hostname(&self) -> &str {
        &self.hostname
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn separator(&self) -> FileSeparator {
        self.separator
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Translate a local path into the separator flavor the daemon expects.
    pub(crate) fn to_server_path(&self, path: &Path) -> String {
        self.separator.translate(&path.to_string_lossy())
    }

    pub(crate) fn last_command_run_details(&self) -> CommandRunDetails {
        self.last_run.lock().expect("last-run lock poisoned").clone()
    }

    /// Full round trip: connect, send the framed command, read the reply.
    pub(crate) fn round_trip(&self, command: &Command) -> Result<String> {
        let wire = command.wire_bytes();
        let mut stream = self.connect(self.connect_timeout)?;

        stream
            .write_all(&wire)
            .map_err(|e| Error::network(format!("sending {}", command.name()), e))?;

        let reply = self.read_reply(&mut stream, command.name())?;
        self.record(&wire, &reply);
        Ok(trim_reply(&reply))
    }

    /// INSTREAM round trip: command marker, then `<be-u32 len><payload>`
    /// chunks pulled from `reader`, then a zero-length terminator.
    pub(crate) fn round_trip_stream(
        &self,
        reader: &mut dyn Read,
        chunk_size: usize,
    ) -> Result<String> {
        let wire = Command::InStream.wire_bytes();
        let mut stream = self.connect(self.connect_timeout)?;

        stream
            .write_all(&wire)
            .map_err(|e| Error::network("sending INSTREAM", e))?;

        let mut chunk = vec![0u8; chunk_size];
        let mut total: u64 = 0;
        loop {
            let n = reader
                .read(&mut chunk)
                .map_err(|e| Error::network("reading INSTREAM input", e))?;
            if n == 0 {
                break;
            }
            #[allow(clippy::cast_possible_truncation)]
            let header = (n as u32).to_be_bytes();
            stream
                .write_all(&header)
                .and_then(|()| stream.write_all(&chunk[..n]))
                .map_err(|e| Error::network("sending INSTREAM chunk", e))?;
            total += n as u64;
        }
        stream
            .write_all(&0u32.to_be_bytes())
            .map_err(|e| Error::network("terminating INSTREAM", e))?;
        trace!("INSTREAM sent {total} bytes in {chunk_size} byte chunks");

        let reply = self.read_reply(&mut stream, "INSTREAM")?;
        self.record(&wire, &reply);
        Ok(trim_reply(&reply))
    }

    /// Try to open a TCP connection within `timeout`. Never errors.
    pub(crate) fn is_reachable(&self, timeout: Duration) -> bool {
        self.connect(timeout).is_ok()
    }

    fn connect(&self, timeout: Duration) -> Result<TcpStream> {
        let addr = self.resolve()?;
        let stream = if timeout.is_zero() {
            TcpStream::connect(addr)
        } else {
            TcpStream::connect_timeout(&addr, timeout)
        }
        .map_err(|e| Error::network(format!("connecting to {addr}"), e))?;

        let read_timeout = (!self.read_timeout.is_zero()).then_some(self.read_timeout);
        stream
            .set_read_timeout(read_timeout)
            .map_err(|e| Error::network("setting read timeout", e))?;
        Ok(stream)
    }

    fn resolve(&self) -> Result<SocketAddr> {
        let mut addrs = (self.hostname.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::network(format!("resolving {}", self.hostname), e))?;
        addrs.next().ok_or_else(|| {
            Error::network(
                format!("resolving {}", self.hostname),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no address found"),
            )
        })
    }

    /// Read until the daemon's NUL terminator or until it closes the socket.
    fn read_reply(&self, stream: &mut TcpStream, command: &str) -> Result<Vec<u8>> {
        let mut reply = Vec::new();
        let mut buf = [0u8; REPLY_BUFFER_SIZE];
        loop {
            let n = stream
                .read(&mut buf)
                .map_err(|e| Error::network(format!("reading {command} reply"), e))?;
            if n == 0 {
                break;
            }
            reply.extend_from_slice(&buf[..n]);
            if buf[..n].contains(&0) {
                break;
            }
        }
        debug!("{command}: {} reply bytes", reply.len());
        Ok(reply)
    }

    fn record(&self, request: &[u8], reply: &[u8]) {
        let mut last = self.last_run.lock().expect("last-run lock poisoned");
        last.request = String::from_utf8_lossy(request).into_owned();
        last.reply = reply.to_vec();
    }
}

/// Strip everything from the NUL terminator on, plus trailing whitespace.
fn trim_reply(reply: &[u8]) -> String {
    let end = reply.iter().position(|&b| b == 0).unwrap_or(reply.len());
    String::from_utf8_lossy(&reply[..end]).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_to_unix() {
        assert_eq!(
            FileSeparator::Unix.translate("C:\\data\\scans\\a.pdf"),
            "C:/data/scans/a.pdf"
        );
    }

    #[test]
    fn translate_to_windows() {
        assert_eq!(
            FileSeparator::Windows.translate("/data/scans/a.pdf"),
            "\\data\\scans\\a.pdf"
        );
    }

    #[test]
    fn translate_local_is_identity() {
        assert_eq!(
            FileSeparator::Local.translate("/data\\mixed/path"),
            "/data\\mixed/path"
        );
    }

    #[test]
    fn translate_round_trips() {
        // translating to a flavor and back to the local flavor restores
        // the original for paths using a single separator style
        let local = "/data/scans/summary.docx";
        let windows = FileSeparator::Windows.translate(local);
        assert_eq!(FileSeparator::Unix.translate(&windows), local);
    }

    #[test]
    fn separator_from_str() {
        assert_eq!("unix".parse::<FileSeparator>().unwrap(), FileSeparator::Unix);
        assert_eq!(
            "WINDOWS".parse::<FileSeparator>().unwrap(),
            FileSeparator::Windows
        );
        assert!("jvm".parse::<FileSeparator>().is_err());
    }

    #[test]
    fn trim_reply_strips_nul_and_whitespace() {
        assert_eq!(trim_reply(b"PONG\0"), "PONG");
        assert_eq!(trim_reply(b"ClamAV 1.3.1\n\0garbage"), "ClamAV 1.3.1");
        assert_eq!(trim_reply(b"no terminator"), "no terminator");
    }
}
