// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Watcher backend driving an external `fswatch` subprocess.
//!
//! `fswatch` is launched with `-x` (one event per line, flags appended) and
//! its stdout is parsed into typed events. Stderr activity surfaces as
//! [`super::WatchEvent::Error`]. Closing the watcher terminates the child
//! with SIGTERM and escalates to SIGKILL after a short grace period.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::{Backend, EventSink, FileWatchEventKind, PathKind, WatchEvent};
use crate::error::{Error, Result};

/// How long a SIGTERM'd fswatch gets before the SIGKILL escalation.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Launch the fswatch subprocess and spawn its output pump.
pub(crate) fn spawn(
    backend: Backend,
    main_dir: PathBuf,
    recursive: bool,
    monitor: Option<String>,
    binary: PathBuf,
) -> Result<()> {
    let mut command = Command::new(&binary);
    if recursive {
        command.arg("-r");
    }
    command.arg("-x");
    if let Some(monitor) = &monitor {
        command.arg("--monitor").arg(monitor);
    }
    command
        .arg(&main_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        Error::Watcher(format!(
            "failed to launch fswatch at {}: {e}",
            binary.display()
        ))
    })?;
    debug!(
        "fswatch pid {:?} watching {}",
        child.id(),
        main_dir.display()
    );

    backend.sink.register_silently(&main_dir);
    tokio::spawn(pump(backend, child, main_dir));
    Ok(())
}

async fn pump(backend: Backend, mut child: Child, main_dir: PathBuf) {
    let Backend {
        sink,
        register_rx: _register_rx,
        cancel,
    } = backend;

    let mut stdout = BufReader::new(child.stdout.take().expect("stdout was piped")).lines();
    let mut stderr = BufReader::new(child.stderr.take().expect("stderr was piped")).lines();
    let mut stderr_open = true;

    let error = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                break terminate_child(&mut child).await;
            }

            line = stdout.next_line() => match line {
                Ok(Some(line)) => forward_line(&sink, &line).await,
                // stdout EOF: the process is gone (crash or normal exit)
                Ok(None) => break wait_exit(&mut child).await,
                Err(e) => break Some(format!("reading fswatch output: {e}")),
            },

            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    warn!("fswatch: {line}");
                    sink.send(WatchEvent::Error {
                        path: None,
                        message: line,
                    })
                    .await;
                }
                Ok(None) | Err(_) => stderr_open = false,
            },
        }
    };

    debug!("fswatch watcher for {} terminating", main_dir.display());
    sink.terminate(main_dir, error).await;
}

async fn forward_line(sink: &EventSink, line: &str) {
    let Some(parsed) = parse_event_line(line) else {
        debug!("unparsed fswatch line: {line}");
        return;
    };
    if parsed.overflow {
        sink.send(WatchEvent::Overflow).await;
    }
    for kind in parsed.kinds {
        sink.send_file(parsed.path.clone(), kind, parsed.path_kind)
            .await;
    }
}

/// SIGTERM, bounded grace, then SIGKILL.
async fn terminate_child(child: &mut Child) -> Option<String> {
    if let Some(pid) = child.id() {
        #[allow(clippy::cast_possible_wrap)]
        if let Some(pid) = rustix::process::Pid::from_raw(pid as i32) {
            let _ = rustix::process::kill_process(pid, rustix::process::Signal::Term);
        }
    }
    match tokio::time::timeout(KILL_GRACE_PERIOD, child.wait()).await {
        Ok(_) => None,
        Err(_) => {
            warn!("fswatch ignored SIGTERM, killing");
            let _ = child.kill().await;
            None
        }
    }
}

async fn wait_exit(child: &mut Child) -> Option<String> {
    match child.wait().await {
        Ok(status) if status.success() => None,
        Ok(status) => Some(format!("fswatch exited with {status}")),
        Err(e) => Some(format!("waiting for fswatch: {e}")),
    }
}

// =============================================================================
// Line parsing
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
struct ParsedLine {
    path: PathBuf,
    kinds: Vec<FileWatchEventKind>,
    path_kind: PathKind,
    overflow: bool,
}

/// Flags fswatch appends in `-x` mode. Paths may contain spaces, so the
/// flags are peeled off the end of the line.
fn is_flag(token: &str) -> bool {
    matches!(
        token,
        "Created"
            | "Updated"
            | "Removed"
            | "Renamed"
            | "OwnerModified"
            | "AttributeModified"
            | "MovedFrom"
            | "MovedTo"
            | "IsFile"
            | "IsDir"
            | "IsSymLink"
            | "Link"
            | "Overflow"
            | "PlatformSpecific"
            | "NoOp"
    )
}

/// Parse one `<path> <FLAG> [<FLAG>...]` line. Returns `None` for lines
/// without any recognized flag.
fn parse_event_line(line: &str) -> Option<ParsedLine> {
    let tokens: Vec<&str> = line.split(' ').collect();

    let mut path_end = tokens.len();
    while path_end > 1 && is_flag(tokens[path_end - 1]) {
        path_end -= 1;
    }
    if path_end == tokens.len() {
        return None;
    }

    let path = PathBuf::from(tokens[..path_end].join(" "));
    let flags = &tokens[path_end..];

    let path_kind = if flags.contains(&"IsDir") {
        PathKind::Dir
    } else {
        PathKind::File
    };

    let mut kinds = Vec::new();
    let mut overflow = false;
    for flag in flags {
        match *flag {
            "Created" | "MovedTo" => kinds.push(FileWatchEventKind::Created),
            "Updated" => kinds.push(FileWatchEventKind::Modified),
            "Removed" | "MovedFrom" => kinds.push(FileWatchEventKind::Deleted),
            "Overflow" => overflow = true,
            _ => {}
        }
    }

    Some(ParsedLine {
        path,
        kinds,
        path_kind,
        overflow,
    })
}
