// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures: a demo filestore on disk and a scripted clamd stand-in.

#![allow(dead_code)]

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use tempfile::TempDir;

// =============================================================================
// Demo filestore
// =============================================================================

/// A throwaway filestore tree with numbered subdirectories, mirroring the
/// layout the real-time scanner typically observes.
pub struct DemoFilestore {
    _root: TempDir,
    filestore: PathBuf,
}

impl DemoFilestore {
    pub fn new() -> Self {
        let root = TempDir::new().expect("failed to create demo filestore");
        let filestore = root.path().join("filestore");
        fs::create_dir(&filestore).expect("failed to create filestore dir");
        Self {
            _root: root,
            filestore,
        }
    }

    pub fn filestore_dir(&self) -> &Path {
        &self.filestore
    }

    pub fn create_sub_dir(&self, name: &str) -> PathBuf {
        let dir = self.filestore.join(name);
        fs::create_dir(&dir).expect("failed to create filestore subdir");
        dir
    }

    pub fn create_file(&self, sub_dir: &str, name: &str, content: &str) -> PathBuf {
        let path = self.filestore.join(sub_dir).join(name);
        fs::write(&path, content).expect("failed to create filestore file");
        path
    }

    pub fn append_to_file(&self, sub_dir: &str, name: &str, content: &str) {
        let path = self.filestore.join(sub_dir).join(name);
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("failed to open filestore file");
        file.write_all(content.as_bytes())
            .expect("failed to append to filestore file");
    }

    pub fn delete_file(&self, sub_dir: &str, name: &str) {
        let path = self.filestore.join(sub_dir).join(name);
        fs::remove_file(&path).expect("failed to delete filestore file");
    }
}

// =============================================================================
// Mock clamd
// =============================================================================

/// A minimal clamd stand-in on a local TCP port. Serves every connection:
/// VERSIONCOMMANDS advertises the full command set, PING answers PONG, and
/// SCAN replies FOUND for paths containing `infected_marker`, OK otherwise.
pub struct MockClamd {
    pub port: u16,
    commands: Arc<Mutex<Vec<String>>>,
}

impl MockClamd {
    pub fn spawn(infected_marker: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind mock clamd");
        let port = listener.local_addr().unwrap().port();
        let commands: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&commands);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let Some(command) = read_command(&mut stream) else {
                    continue;
                };
                log.lock().unwrap().push(command.clone());

                let reply = respond(&command, infected_marker);
                let _ = stream.write_all(reply.as_bytes());
                let _ = stream.write_all(b"\0");
            }
        });

        Self { port, commands }
    }

    /// Every command line received so far (without framing).
    pub fn received_commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// The SCAN'ed paths received so far.
    pub fn scanned_paths(&self) -> Vec<String> {
        self.received_commands()
            .iter()
            .filter_map(|c| c.strip_prefix("SCAN ").map(str::to_string))
            .collect()
    }
}

fn read_command(stream: &mut std::net::TcpStream) -> Option<String> {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => return None,
            Ok(_) if byte[0] == 0 => break,
            Ok(_) => raw.push(byte[0]),
            Err(_) => return None,
        }
    }
    let command = String::from_utf8_lossy(&raw);
    command.strip_prefix('z').map(str::to_string)
}

fn respond(command: &str, infected_marker: &str) -> String {
    if command == "VERSIONCOMMANDS" {
        return "ClamAV 1.3.1/27310/Mon Jun  2 10:00:00 2025| COMMANDS: SCAN QUIT RELOAD PING \
                CONTSCAN VERSIONCOMMANDS VERSION END SHUTDOWN MULTISCAN FILDES STATS IDSESSION \
                INSTREAM ALLMATCHSCAN"
            .to_string();
    }
    if command == "PING" {
        return "PONG".to_string();
    }
    if command == "VERSION" {
        return "ClamAV 1.3.1/27310/Mon Jun  2 10:00:00 2025".to_string();
    }
    if let Some(path) = command.strip_prefix("SCAN ") {
        if path.contains(infected_marker) {
            return format!("{path}: Eicar-Test-Signature FOUND");
        }
        return format!("{path}: OK");
    }
    format!("{command}: UNKNOWN COMMAND")
}
