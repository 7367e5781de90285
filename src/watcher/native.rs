// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Native tree watcher on top of the kernel's inotify API.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use inotify::{EventMask, EventStream, Inotify, WatchDescriptor, WatchMask, Watches};
use log::{debug, warn};

use super::{Backend, EventSink, FileWatchEventKind, PathKind};
use crate::error::{Error, Result};

/// Inotify read buffer size.
const BUFFER_SIZE: usize = 4096;

fn watch_mask() -> WatchMask {
    WatchMask::CREATE
        | WatchMask::MODIFY
        | WatchMask::DELETE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
}

/// Initialize inotify, register the existing tree and spawn the event pump.
///
/// The initial registration happens synchronously so that a successful
/// return means the tree is fully watched; only directories registered later
/// are announced as [`super::WatchEvent::Registered`].
pub(crate) fn spawn(backend: Backend, main_dir: PathBuf, recursive: bool) -> Result<()> {
    let inotify =
        Inotify::init().map_err(|e| Error::Watcher(format!("inotify init failed: {e}")))?;
    let stream = inotify
        .into_event_stream(vec![0u8; BUFFER_SIZE])
        .map_err(|e| Error::Watcher(format!("inotify stream init failed: {e}")))?;
    let mut watches = stream.watches();

    let mut directories = HashMap::new();
    register_tree(
        &mut watches,
        &mut directories,
        &backend.sink,
        &main_dir,
        recursive,
    )
    .map_err(|e| Error::Watcher(format!("registering {}: {e}", main_dir.display())))?;

    tokio::spawn(pump(backend, stream, watches, directories, main_dir, recursive));
    Ok(())
}

/// Walk `root` and register it (and, when `recursive`, every subdirectory).
/// Registration failures below the root are logged and skipped.
fn register_tree(
    watches: &mut Watches,
    directories: &mut HashMap<WatchDescriptor, PathBuf>,
    sink: &EventSink,
    root: &Path,
    recursive: bool,
) -> std::io::Result<()> {
    let wd = watches.add(root, watch_mask())?;
    directories.insert(wd, root.to_path_buf());
    sink.register_silently(root);
    debug!("watching {}", root.display());

    if !recursive {
        return Ok(());
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            match watches.add(&path, watch_mask()) {
                Ok(wd) => {
                    directories.insert(wd, path.clone());
                    sink.register_silently(&path);
                    debug!("watching {}", path.display());
                    stack.push(path);
                }
                Err(e) => warn!("failed to watch {}: {e}", path.display()),
            }
        }
    }
    Ok(())
}

async fn pump(
    backend: Backend,
    mut stream: EventStream<Vec<u8>>,
    mut watches: Watches,
    mut directories: HashMap<WatchDescriptor, PathBuf>,
    main_dir: PathBuf,
    recursive: bool,
) {
    let Backend {
        sink,
        mut register_rx,
        cancel,
    } = backend;

    let error = loop {
        tokio::select! {
            () = cancel.cancelled() => break None,

            dir = register_rx.recv() => {
                let Some(dir) = dir else { continue };
                match register_announced(&mut watches, &mut directories, &sink, &dir, recursive)
                    .await
                {
                    Ok(()) => {}
                    Err(e) => {
                        sink.send(super::WatchEvent::Error {
                            path: Some(dir.clone()),
                            message: format!("failed to register {}: {e}", dir.display()),
                        })
                        .await;
                    }
                }
            }

            event = stream.next() => match event {
                Some(Ok(event)) => {
                    handle_event(
                        &mut watches,
                        &mut directories,
                        &sink,
                        recursive,
                        &event.wd,
                        event.mask,
                        event.name.as_deref(),
                    )
                    .await;
                }
                Some(Err(e)) => {
                    warn!("inotify read error: {e}");
                    sink.send(super::WatchEvent::Error {
                        path: None,
                        message: format!("inotify read error: {e}"),
                    })
                    .await;
                }
                None => break Some("inotify event stream ended".to_string()),
            }
        }
    };

    debug!("native watcher for {} terminating", main_dir.display());
    sink.terminate(main_dir, error).await;
}

/// Register a directory tree after startup, announcing every directory.
async fn register_announced(
    watches: &mut Watches,
    directories: &mut HashMap<WatchDescriptor, PathBuf>,
    sink: &EventSink,
    root: &Path,
    recursive: bool,
) -> std::io::Result<()> {
    let wd = watches.add(root, watch_mask())?;
    directories.insert(wd, root.to_path_buf());
    sink.mark_registered(root).await;

    if !recursive {
        return Ok(());
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            match watches.add(&path, watch_mask()) {
                Ok(wd) => {
                    directories.insert(wd, path.clone());
                    sink.mark_registered(&path).await;
                    stack.push(path);
                }
                Err(e) => warn!("failed to watch {}: {e}", path.display()),
            }
        }
    }
    Ok(())
}

async fn handle_event(
    watches: &mut Watches,
    directories: &mut HashMap<WatchDescriptor, PathBuf>,
    sink: &EventSink,
    recursive: bool,
    wd: &WatchDescriptor,
    mask: EventMask,
    name: Option<&OsStr>,
) {
    // kernel signalled event loss; upstream re-scans on the next activity
    if mask.contains(EventMask::Q_OVERFLOW) {
        warn!("inotify queue overflow");
        sink.send(super::WatchEvent::Overflow).await;
        return;
    }

    // the kernel dropped the watch (directory deleted or unmounted)
    if mask.contains(EventMask::IGNORED) {
        if let Some(dir) = directories.remove(wd) {
            sink.mark_deregistered(&dir);
            debug!("deregistered {}", dir.display());
        }
        return;
    }

    let Some(dir) = directories.get(wd) else {
        return;
    };
    let Some(name) = name else { return };
    let path = dir.join(name);

    if mask.contains(EventMask::ISDIR) {
        // register new subdirectories before forwarding events from them
        if recursive && (mask.contains(EventMask::CREATE) || mask.contains(EventMask::MOVED_TO)) {
            if let Err(e) = register_announced(watches, directories, sink, &path, recursive).await {
                warn!("failed to watch new directory {}: {e}", path.display());
            }
        }
        if let Some(kind) = event_kind(mask) {
            sink.send_file(path, kind, PathKind::Dir).await;
        }
        return;
    }

    if let Some(kind) = event_kind(mask) {
        sink.send_file(path, kind, PathKind::File).await;
    }
}

fn event_kind(mask: EventMask) -> Option<FileWatchEventKind> {
    if mask.contains(EventMask::CREATE) || mask.contains(EventMask::MOVED_TO) {
        Some(FileWatchEventKind::Created)
    } else if mask.contains(EventMask::MODIFY) {
        Some(FileWatchEventKind::Modified)
    } else if mask.contains(EventMask::DELETE) || mask.contains(EventMask::MOVED_FROM) {
        Some(FileWatchEventKind::Deleted)
    } else {
        None
    }
}
