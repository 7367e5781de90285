// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Structured results parsed from the daemon's scan reply lines.

use std::fmt;

use crate::error::{Error, Result};

/// Per-path outcome of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// File is clean.
    Clean,
    /// File is infected; carries the virus signature names in reply order.
    Infected(Vec<String>),
    /// Per-file failure reported by the daemon (permission denied, lstat
    /// failure, stream size limit, ...). Carried in the result, never raised.
    Error(String),
}

/// One reply line, keyed by the server-side path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub path: String,
    pub status: ScanStatus,
}

/// Result of a SCAN/CONTSCAN/MULTISCAN/INSTREAM command.
///
/// Entries keep the daemon's reply order. For MULTISCAN the daemon
/// parallelizes internally, so ordering across files is not guaranteed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    entries: Vec<ScanEntry>,
}

impl ScanResult {
    /// Parse a full (NUL-stripped) daemon reply, one line per scanned file.
    ///
    /// Line grammar: `<path>: OK`, `<path>: <virus> FOUND` or
    /// `<path>: <message> ERROR`. Anything else is a protocol error.
    pub(crate) fn parse(reply: &str) -> Result<Self> {
        let mut result = Self::default();

        for line in reply.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(path) = line.strip_suffix(": OK") {
                result.add(path, ScanStatus::Clean);
            } else if let Some(rest) = line.strip_suffix(" FOUND") {
                let Some((path, virus)) = rest.rsplit_once(": ") else {
                    return Err(Error::Protocol(format!("malformed FOUND reply: {line}")));
                };
                result.add_virus(path, virus);
            } else if let Some(rest) = line.strip_suffix(" ERROR") {
                let Some((path, message)) = rest.rsplit_once(": ") else {
                    return Err(Error::Protocol(format!("malformed ERROR reply: {line}")));
                };
                result.add(path, ScanStatus::Error(message.to_string()));
            } else {
                return Err(Error::Protocol(format!("unexpected scan reply: {line}")));
            }
        }

        Ok(result)
    }

    fn add(&mut self, path: &str, status: ScanStatus) {
        self.entries.push(ScanEntry {
            path: path.to_string(),
            status,
        });
    }

    /// Append a virus name, merging repeated FOUND lines for the same path.
    fn add_virus(&mut self, path: &str, virus: &str) {
        for entry in &mut self.entries {
            if entry.path == path {
                if let ScanStatus::Infected(viruses) = &mut entry.status {
                    viruses.push(virus.to_string());
                    return;
                }
            }
        }
        self.add(path, ScanStatus::Infected(vec![virus.to_string()]));
    }

    /// All entries in reply order.
    #[must_use]
    pub fn entries(&self) -> &[ScanEntry] {
        &self.entries
    }

    /// True when no infections and no per-file errors were reported.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.entries
            .iter()
            .all(|e| matches!(e.status, ScanStatus::Clean))
    }

    /// True when at least one file is infected.
    #[must_use]
    pub fn has_virus(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.status, ScanStatus::Infected(_)))
    }

    /// The infected entries: `(server path, virus names)` in reply order.
    pub fn viruses(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().filter_map(|e| match &e.status {
            ScanStatus::Infected(viruses) => Some((e.path.as_str(), viruses.as_slice())),
            _ => None,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            match &entry.status {
                ScanStatus::Clean => writeln!(f, "{}: OK", entry.path)?,
                ScanStatus::Infected(viruses) => {
                    writeln!(f, "{}: {} FOUND", entry.path, viruses.join(", "))?;
                }
                ScanStatus::Error(message) => {
                    writeln!(f, "{}: {} ERROR", entry.path, message)?;
                }
            }
        }
        Ok(())
    }
}
