// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! The clamd command set and its wire framing.
//!
//! Every command goes over the wire as `z<CMD>[ <ARG>]\0`; replies are
//! NUL-terminated ASCII. INSTREAM additionally streams length-prefixed
//! chunks after the command marker.

use crate::error::{Error, Result};

/// Default INSTREAM chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// A single clamd command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Ping,
    Version,
    Stats,
    Reload,
    Shutdown,
    VersionCommands,
    Scan(String),
    ContScan(String),
    MultiScan(String),
    /// Command marker only; the chunked payload is written by the connection.
    InStream,
}

impl Command {
    /// The command name as advertised by VERSIONCOMMANDS.
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Version => "VERSION",
            Self::Stats => "STATS",
            Self::Reload => "RELOAD",
            Self::Shutdown => "SHUTDOWN",
            Self::VersionCommands => "VERSIONCOMMANDS",
            Self::Scan(_) => "SCAN",
            Self::ContScan(_) => "CONTSCAN",
            Self::MultiScan(_) => "MULTISCAN",
            Self::InStream => "INSTREAM",
        }
    }

    fn arg(&self) -> Option<&str> {
        match self {
            Self::Scan(path) | Self::ContScan(path) | Self::MultiScan(path) => Some(path),
            _ => None,
        }
    }

    /// Encode as `z<CMD>[ <ARG>]\0`.
    pub(crate) fn wire_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.name().len() + 2);
        bytes.push(b'z');
        bytes.extend_from_slice(self.name().as_bytes());
        if let Some(arg) = self.arg() {
            bytes.push(b' ');
            bytes.extend_from_slice(arg.as_bytes());
        }
        bytes.push(0);
        bytes
    }
}

/// Parse the VERSIONCOMMANDS reply `<version>| COMMANDS: C1 C2 ...` into the
/// advertised command tokens.
pub(crate) fn parse_version_commands(reply: &str) -> Result<Vec<String>> {
    let Some((_, commands)) = reply.split_once("COMMANDS:") else {
        return Err(Error::Protocol(format!(
            "missing COMMANDS marker in VERSIONCOMMANDS reply: {reply}"
        )));
    };
    Ok(commands.split_whitespace().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bytes_simple_command() {
        assert_eq!(Command::Ping.wire_bytes(), b"zPING\0");
        assert_eq!(Command::Version.wire_bytes(), b"zVERSION\0");
        assert_eq!(Command::Reload.wire_bytes(), b"zRELOAD\0");
        assert_eq!(Command::InStream.wire_bytes(), b"zINSTREAM\0");
    }

    #[test]
    fn wire_bytes_with_path_argument() {
        assert_eq!(
            Command::Scan("/tmp/a.pdf".to_string()).wire_bytes(),
            b"zSCAN /tmp/a.pdf\0"
        );
        assert_eq!(
            Command::ContScan("/data".to_string()).wire_bytes(),
            b"zCONTSCAN /data\0"
        );
        assert_eq!(
            Command::MultiScan("/data".to_string()).wire_bytes(),
            b"zMULTISCAN /data\0"
        );
    }

    #[test]
    fn command_names_match_advertised_tokens() {
        assert_eq!(Command::VersionCommands.name(), "VERSIONCOMMANDS");
        assert_eq!(Command::MultiScan(String::new()).name(), "MULTISCAN");
        assert_eq!(Command::InStream.name(), "INSTREAM");
    }

    #[test]
    fn parse_version_commands_reply() {
        let reply = "ClamAV 1.3.1/27310/Mon Jun  2 10:00:00 2025| COMMANDS: SCAN QUIT RELOAD \
                     PING CONTSCAN VERSIONCOMMANDS VERSION END SHUTDOWN MULTISCAN FILDES STATS \
                     IDSESSION INSTREAM ALLMATCHSCAN";
        let commands = parse_version_commands(reply).unwrap();
        assert!(commands.iter().any(|c| c == "SCAN"));
        assert!(commands.iter().any(|c| c == "INSTREAM"));
        assert!(commands.iter().any(|c| c == "ALLMATCHSCAN"));
        assert_eq!(commands.len(), 15);
    }

    #[test]
    fn parse_version_commands_missing_marker() {
        assert!(matches!(
            parse_version_commands("ClamAV 1.3.1/27310"),
            Err(Error::Protocol(_))
        ));
    }
}
