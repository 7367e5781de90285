// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Content-addressed quarantine store for infected files.
//!
//! Infected files are copied or moved into the quarantine directory under
//! `<hexhash>_<original-basename>`, where the hash is a salted digest of the
//! file content. A file whose content hash is already present in the store
//! is not duplicated. A JSON sidecar (`<name>.info`) carries the metadata
//! needed to list the store.

use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scan::ScanResult;

/// Salt mixed into the content hash so quarantine names are not plain
/// content digests.
const HASH_SALT: &[u8] = b"aviron-quarantine";

/// Sidecar extension carrying quarantine metadata.
const INFO_EXT: &str = "info";

const HASH_BUFFER_SIZE: usize = 8192;

// =============================================================================
// Types
// =============================================================================

/// Action applied to an infected file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantineFileAction {
    /// Record nothing.
    #[default]
    None,
    /// Copy the infected file into the quarantine directory.
    Copy,
    /// Copy into the quarantine directory, then delete the original.
    Move,
    /// Delete the original without preserving it.
    Remove,
}

impl fmt::Display for QuarantineFileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Copy => write!(f, "copy"),
            Self::Move => write!(f, "move"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

impl FromStr for QuarantineFileAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "copy" => Ok(Self::Copy),
            "move" => Ok(Self::Move),
            "remove" => Ok(Self::Remove),
            _ => Err(format!(
                "invalid quarantine action: {s}. Use: none, copy, move, remove"
            )),
        }
    }
}

/// A quarantined file as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineFile {
    /// File name inside the quarantine directory (`<hexhash>_<basename>`).
    pub quarantine_file_name: String,
    /// The originally infected path.
    pub infected_file: PathBuf,
    /// Virus signature names reported by the daemon.
    pub virus_list: Vec<String>,
    /// The action that produced this record.
    pub action: QuarantineFileAction,
    /// When the action was taken.
    pub quarantined_at: DateTime<Utc>,
}

impl fmt::Display for QuarantineFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.quarantine_file_name)?;
        writeln!(f, "    {}", self.infected_file.display())?;
        writeln!(f, "    {}", self.virus_list.join(", "))?;
        writeln!(f, "    {}", self.action)?;
        write!(f, "    {}", self.quarantined_at.to_rfc3339())
    }
}

/// Emitted to the configured listener for every quarantine action.
#[derive(Debug, Clone)]
pub struct QuarantineEvent {
    pub infected_file: PathBuf,
    pub virus_list: Vec<String>,
    pub action: QuarantineFileAction,
    /// Path of the file inside the quarantine directory, when one was
    /// created (absent for REMOVE and for content-hash dedup hits).
    pub quarantine_file: Option<PathBuf>,
    /// I/O failure description, when the action failed.
    pub error: Option<String>,
}

/// In-process callback receiving [`QuarantineEvent`]s.
pub type QuarantineEventListener = Arc<dyn Fn(&QuarantineEvent) + Send + Sync>;

// =============================================================================
// Store
// =============================================================================

pub(crate) struct Quarantine {
    action: QuarantineFileAction,
    dir: Option<PathBuf>,
    listener: Option<QuarantineEventListener>,
}

impl Quarantine {
    pub(crate) fn new(
        action: QuarantineFileAction,
        dir: Option<PathBuf>,
        listener: Option<QuarantineEventListener>,
    ) -> Self {
        Self {
            action,
            dir,
            listener,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.action != QuarantineFileAction::None && self.dir.is_some()
    }

    pub(crate) fn action(&self) -> QuarantineFileAction {
        self.action
    }

    pub(crate) fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub(crate) fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Apply the configured action to every infected entry of `result`.
    pub(crate) fn handle_scan_result(&self, result: &ScanResult) -> Result<()> {
        if !self.is_active() || !result.has_virus() {
            return Ok(());
        }

        for (path, viruses) in result.viruses() {
            self.handle_infected(Path::new(path), viruses)?;
        }
        Ok(())
    }

    fn handle_infected(&self, infected: &Path, viruses: &[String]) -> Result<()> {
        let outcome = match self.action {
            QuarantineFileAction::None => return Ok(()),
            QuarantineFileAction::Copy => self.preserve(infected, viruses, false),
            QuarantineFileAction::Move => self.preserve(infected, viruses, true),
            QuarantineFileAction::Remove => fs::remove_file(infected)
                .map(|()| None)
                .map_err(|e| Error::quarantine(format!("removing {}", infected.display()), e)),
        };

        let event = QuarantineEvent {
            infected_file: infected.to_path_buf(),
            virus_list: viruses.to_vec(),
            action: self.action,
            quarantine_file: outcome.as_ref().ok().cloned().flatten(),
            error: outcome.as_ref().err().map(ToString::to_string),
        };
        self.emit(&event);

        outcome.map(|_| ())
    }

    /// Copy `infected` into the store; delete the original afterwards when
    /// `move_original` is set. Returns the created quarantine path, or `None`
    /// when an identical content hash is already stored.
    fn preserve(
        &self,
        infected: &Path,
        viruses: &[String],
        move_original: bool,
    ) -> Result<Option<PathBuf>> {
        let dir = self.dir.as_deref().expect("quarantine dir checked by is_active");
        let hash = salted_file_hash(infected)?;

        let created = if self.contains_hash(dir, &hash)? {
            debug!(
                "quarantine: content hash {hash} already stored, skipping {}",
                infected.display()
            );
            None
        } else {
            let basename = infected
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unnamed".to_string());
            let name = format!("{hash}_{basename}");
            let target = dir.join(&name);

            fs::copy(infected, &target).map_err(|e| {
                Error::quarantine(
                    format!("copying {} to {}", infected.display(), target.display()),
                    e,
                )
            })?;
            self.write_sidecar(&target, &name, infected, viruses)?;
            warn!(
                "quarantined {} as {name} ({})",
                infected.display(),
                viruses.join(", ")
            );
            Some(target)
        };

        if move_original {
            fs::remove_file(infected)
                .map_err(|e| Error::quarantine(format!("removing {}", infected.display()), e))?;
        }
        Ok(created)
    }

    fn write_sidecar(
        &self,
        target: &Path,
        name: &str,
        infected: &Path,
        viruses: &[String],
    ) -> Result<()> {
        let record = QuarantineFile {
            quarantine_file_name: name.to_string(),
            infected_file: infected.to_path_buf(),
            virus_list: viruses.to_vec(),
            action: self.action,
            quarantined_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)
            .expect("quarantine record serialization cannot fail");
        let sidecar = sidecar_path(target);
        fs::write(&sidecar, json)
            .map_err(|e| Error::quarantine(format!("writing {}", sidecar.display()), e))
    }

    fn contains_hash(&self, dir: &Path, hash: &str) -> Result<bool> {
        let prefix = format!("{hash}_");
        let entries = fs::read_dir(dir)
            .map_err(|e| Error::quarantine(format!("reading {}", dir.display()), e))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| Error::quarantine(format!("reading {}", dir.display()), e))?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// All quarantined files, read from the metadata sidecars.
    pub(crate) fn list(&self) -> Result<Vec<QuarantineFile>> {
        let Some(dir) = self.dir.as_deref() else {
            return Ok(Vec::new());
        };

        let mut files = Vec::new();
        let entries = fs::read_dir(dir)
            .map_err(|e| Error::quarantine(format!("reading {}", dir.display()), e))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| Error::quarantine(format!("reading {}", dir.display()), e))?;
            let path = entry.path();
            if path.extension().is_none_or(|e| e != INFO_EXT) {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(serde_json::Error::io)
                .and_then(|json| serde_json::from_str::<QuarantineFile>(&json))
            {
                Ok(record) => files.push(record),
                Err(e) => warn!("skipping unreadable sidecar {}: {e}", path.display()),
            }
        }
        files.sort_by(|a, b| a.quarantine_file_name.cmp(&b.quarantine_file_name));
        Ok(files)
    }

    /// Remove a quarantined file and its sidecar. Silently ignores a file
    /// that is no longer present.
    pub(crate) fn remove(&self, file: &QuarantineFile) -> Result<()> {
        let Some(dir) = self.dir.as_deref() else {
            return Ok(());
        };
        let data = dir.join(&file.quarantine_file_name);
        let sidecar = sidecar_path(&data);
        for path in [data, sidecar] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::quarantine(format!("removing {}", path.display()), e));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn remove_all(&self) -> Result<()> {
        for file in self.list()? {
            self.remove(&file)?;
        }
        Ok(())
    }

    fn emit(&self, event: &QuarantineEvent) {
        if let Some(listener) = &self.listener {
            // listener failures must not break the scan pipeline
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("quarantine event listener panicked");
            }
        }
    }
}

fn sidecar_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".");
    name.push(INFO_EXT);
    PathBuf::from(name)
}

/// Salted content hash of a file, streamed in fixed-size chunks.
fn salted_file_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| Error::quarantine(format!("opening {}", path.display()), e))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(HASH_SALT);

    let mut buf = [0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::quarantine(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn infected_result(path: &str) -> ScanResult {
        ScanResult::parse(&format!("{path}: Eicar-Test-Signature FOUND")).unwrap()
    }

    fn store(action: QuarantineFileAction, dir: &Path) -> Quarantine {
        Quarantine::new(action, Some(dir.to_path_buf()), None)
    }

    #[test]
    fn salted_hashes_differ_per_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "TEST1").unwrap();
        fs::write(&b, "TEST2").unwrap();
        assert_ne!(
            salted_file_hash(&a).unwrap(),
            salted_file_hash(&b).unwrap()
        );
        assert_eq!(
            salted_file_hash(&a).unwrap(),
            salted_file_hash(&a).unwrap()
        );
    }

    #[test]
    fn copy_preserves_original_and_writes_sidecar() {
        let fsdir = tempfile::tempdir().unwrap();
        let qdir = tempfile::tempdir().unwrap();
        let infected = fsdir.path().join("eicar.txt");
        fs::write(&infected, "virus body").unwrap();

        let quarantine = store(QuarantineFileAction::Copy, qdir.path());
        quarantine
            .handle_scan_result(&infected_result(&infected.to_string_lossy()))
            .unwrap();

        assert!(infected.exists());
        let listed = quarantine.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].quarantine_file_name.ends_with("_eicar.txt"));
        assert_eq!(listed[0].infected_file, infected);
        assert_eq!(listed[0].virus_list, ["Eicar-Test-Signature"]);
        assert!(qdir.path().join(&listed[0].quarantine_file_name).exists());
    }

    #[test]
    fn move_removes_original() {
        let fsdir = tempfile::tempdir().unwrap();
        let qdir = tempfile::tempdir().unwrap();
        let infected = fsdir.path().join("eicar.txt");
        fs::write(&infected, "virus body").unwrap();

        let quarantine = store(QuarantineFileAction::Move, qdir.path());
        quarantine
            .handle_scan_result(&infected_result(&infected.to_string_lossy()))
            .unwrap();

        assert!(!infected.exists());
        assert_eq!(quarantine.list().unwrap().len(), 1);
    }

    #[test]
    fn remove_action_deletes_without_preserving() {
        let fsdir = tempfile::tempdir().unwrap();
        let qdir = tempfile::tempdir().unwrap();
        let infected = fsdir.path().join("eicar.txt");
        fs::write(&infected, "virus body").unwrap();

        let quarantine = store(QuarantineFileAction::Remove, qdir.path());
        quarantine
            .handle_scan_result(&infected_result(&infected.to_string_lossy()))
            .unwrap();

        assert!(!infected.exists());
        assert!(quarantine.list().unwrap().is_empty());
    }

    #[test]
    fn identical_content_is_not_duplicated() {
        let fsdir = tempfile::tempdir().unwrap();
        let qdir = tempfile::tempdir().unwrap();
        let first = fsdir.path().join("one.txt");
        let second = fsdir.path().join("two.txt");
        fs::write(&first, "same bytes").unwrap();
        fs::write(&second, "same bytes").unwrap();

        let quarantine = store(QuarantineFileAction::Copy, qdir.path());
        quarantine
            .handle_scan_result(&infected_result(&first.to_string_lossy()))
            .unwrap();
        quarantine
            .handle_scan_result(&infected_result(&second.to_string_lossy()))
            .unwrap();

        assert_eq!(quarantine.list().unwrap().len(), 1);
    }

    #[test]
    fn clean_result_records_nothing() {
        let qdir = tempfile::tempdir().unwrap();
        let quarantine = store(QuarantineFileAction::Move, qdir.path());
        let clean = ScanResult::parse("/tmp/a.pdf: OK").unwrap();
        quarantine.handle_scan_result(&clean).unwrap();
        assert!(quarantine.list().unwrap().is_empty());
    }

    #[test]
    fn listener_receives_event_per_action() {
        let fsdir = tempfile::tempdir().unwrap();
        let qdir = tempfile::tempdir().unwrap();
        let infected = fsdir.path().join("eicar.txt");
        fs::write(&infected, "virus body").unwrap();

        let events: Arc<Mutex<Vec<QuarantineEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let quarantine = Quarantine::new(
            QuarantineFileAction::Move,
            Some(qdir.path().to_path_buf()),
            Some(Arc::new(move |e: &QuarantineEvent| {
                sink.lock().unwrap().push(e.clone());
            })),
        );

        quarantine
            .handle_scan_result(&infected_result(&infected.to_string_lossy()))
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, QuarantineFileAction::Move);
        assert_eq!(events[0].virus_list, ["Eicar-Test-Signature"]);
        assert!(events[0].quarantine_file.is_some());
        assert!(events[0].error.is_none());
    }

    #[test]
    fn panicking_listener_is_swallowed() {
        let fsdir = tempfile::tempdir().unwrap();
        let qdir = tempfile::tempdir().unwrap();
        let infected = fsdir.path().join("eicar.txt");
        fs::write(&infected, "virus body").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let quarantine = Quarantine::new(
            QuarantineFileAction::Copy,
            Some(qdir.path().to_path_buf()),
            Some(Arc::new(move |_: &QuarantineEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("listener failure");
            })),
        );

        quarantine
            .handle_scan_result(&infected_result(&infected.to_string_lossy()))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_and_remove_all() {
        let fsdir = tempfile::tempdir().unwrap();
        let qdir = tempfile::tempdir().unwrap();
        for (name, body) in [("a.txt", "aaa"), ("b.txt", "bbb")] {
            let infected = fsdir.path().join(name);
            fs::write(&infected, body).unwrap();
            store(QuarantineFileAction::Copy, qdir.path())
                .handle_scan_result(&infected_result(&infected.to_string_lossy()))
                .unwrap();
        }

        let quarantine = store(QuarantineFileAction::Copy, qdir.path());
        let listed = quarantine.list().unwrap();
        assert_eq!(listed.len(), 2);

        quarantine.remove(&listed[0]).unwrap();
        assert_eq!(quarantine.list().unwrap().len(), 1);
        // removing an already-removed file is a no-op
        quarantine.remove(&listed[0]).unwrap();

        quarantine.remove_all().unwrap();
        assert!(quarantine.list().unwrap().is_empty());
        assert_eq!(fs::read_dir(qdir.path()).unwrap().count(), 0);
    }
}
