// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end pipeline tests: watcher -> queue -> worker -> mock daemon.

mod common;

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aviron::{
    Client, FileSeparator, FileWatchEvent, QuarantineFileAction, RealtimeScanEvent,
    RealtimeScanner,
};
use common::{DemoFilestore, MockClamd};

const SCAN_TIMEOUT: Duration = Duration::from_secs(15);

fn pipeline_client(daemon: &MockClamd) -> Arc<Client> {
    Arc::new(
        Client::builder()
            .server_hostname("127.0.0.1")
            .server_port(daemon.port)
            .server_file_separator(FileSeparator::Local)
            .read_timeout(2_000)
            .build()
            .unwrap(),
    )
}

/// Block (off the async workers) until the listener reports a scan of `path`.
fn await_scan_of(rx: &mpsc::Receiver<RealtimeScanEvent>, path: &PathBuf) -> RealtimeScanEvent {
    let deadline = std::time::Instant::now() + SCAN_TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(std::time::Instant::now())
            .expect("timed out waiting for scan event");
        let event = rx
            .recv_timeout(remaining)
            .expect("timed out waiting for scan event");
        if event.path == *path {
            return event;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleted_file_is_never_scanned_but_survivor_is() {
    let daemon = MockClamd::spawn("eicar");
    let client = pipeline_client(&daemon);

    let demo = DemoFilestore::new();
    demo.create_sub_dir("000");

    let (tx, rx) = mpsc::channel();
    let scanner = RealtimeScanner::builder(Arc::clone(&client))
        .main_dir(demo.filestore_dir())
        .scan_listener(Arc::new(move |event: &RealtimeScanEvent| {
            let _ = tx.send(event.clone());
        }))
        .sleep_time_on_idle(1)
        .build()
        .unwrap();

    scanner.start().unwrap();
    assert!(scanner.is_running());
    // starting again must not spawn a second pipeline
    scanner.start().unwrap();

    // let the watcher settle while the worker sits in its idle sleep
    tokio::time::sleep(Duration::from_millis(300)).await;

    // created, modified and deleted before the worker drains the queue
    let doomed = demo.create_file("000", "t.data", "transient");
    demo.append_to_file("000", "t.data", "more");
    tokio::time::sleep(Duration::from_millis(100)).await;
    demo.delete_file("000", "t.data");

    // created and modified, then left alone
    let survivor = demo.create_file("000", "u.data", "persistent");
    demo.append_to_file("000", "u.data", "more");

    let survivor_path = survivor.clone();
    let event = tokio::task::spawn_blocking(move || await_scan_of(&rx, &survivor_path))
        .await
        .unwrap();
    assert!(event.result.ok());

    // give the pipeline time to (incorrectly) scan anything else
    tokio::time::sleep(Duration::from_secs(2)).await;

    let scanned = daemon.scanned_paths();
    let doomed_str = doomed.to_string_lossy().into_owned();
    let survivor_str = survivor.to_string_lossy().into_owned();
    assert!(
        !scanned.contains(&doomed_str),
        "deleted file was scanned: {scanned:?}"
    );
    assert_eq!(
        scanned.iter().filter(|p| **p == survivor_str).count(),
        1,
        "survivor expected exactly one scan: {scanned:?}"
    );

    scanner.stop();
    scanner.stop(); // idempotent
    assert!(!scanner.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn infected_file_is_quarantined_end_to_end() {
    let daemon = MockClamd::spawn("eicar");
    let qdir = tempfile::tempdir().unwrap();

    let client = Arc::new(
        Client::builder()
            .server_hostname("127.0.0.1")
            .server_port(daemon.port)
            .server_file_separator(FileSeparator::Local)
            .read_timeout(2_000)
            .quarantine_file_action(QuarantineFileAction::Move)
            .quarantine_dir(qdir.path())
            .build()
            .unwrap(),
    );

    let demo = DemoFilestore::new();
    demo.create_sub_dir("000");

    let (tx, rx) = mpsc::channel();
    let scanner = RealtimeScanner::builder(Arc::clone(&client))
        .main_dir(demo.filestore_dir())
        .scan_listener(Arc::new(move |event: &RealtimeScanEvent| {
            let _ = tx.send(event.clone());
        }))
        .sleep_time_on_idle(1)
        .build()
        .unwrap();
    scanner.start().unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let infected = demo.create_file("000", "eicar.txt", "X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR");

    let infected_path = infected.clone();
    let event = tokio::task::spawn_blocking(move || await_scan_of(&rx, &infected_path))
        .await
        .unwrap();
    assert!(event.result.has_virus());

    // the worker's quarantine hook moved the file aside
    assert!(!infected.exists());
    let quarantined = client.list_quarantine_files().unwrap();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].virus_list, ["Eicar-Test-Signature"]);
    assert!(quarantined[0].quarantine_file_name.ends_with("_eicar.txt"));

    scanner.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scan_approver_filters_queued_paths() {
    let daemon = MockClamd::spawn("eicar");
    let client = pipeline_client(&daemon);

    let demo = DemoFilestore::new();
    demo.create_sub_dir("000");

    let approved: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&approved);
    let (tx, rx) = mpsc::channel();

    let scanner = RealtimeScanner::builder(Arc::clone(&client))
        .main_dir(demo.filestore_dir())
        .scan_approver(Arc::new(move |event: &FileWatchEvent| {
            log.lock().unwrap().push(event.path.clone());
            event.path.extension().is_some_and(|e| e == "data")
        }))
        .scan_listener(Arc::new(move |event: &RealtimeScanEvent| {
            let _ = tx.send(event.clone());
        }))
        .sleep_time_on_idle(1)
        .build()
        .unwrap();
    scanner.start().unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    demo.create_file("000", "skipped.tmp", "x");
    let wanted = demo.create_file("000", "wanted.data", "x");

    let wanted_path = wanted.clone();
    tokio::task::spawn_blocking(move || await_scan_of(&rx, &wanted_path))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let scanned = daemon.scanned_paths();
    assert!(scanned.iter().all(|p| !p.ends_with("skipped.tmp")));
    // the approver saw both paths
    assert!(approved.lock().unwrap().len() >= 2);

    scanner.stop();
}

#[test]
fn builder_validates_directories() {
    let daemon = MockClamd::spawn("eicar");
    let client = pipeline_client(&daemon);

    assert!(RealtimeScanner::builder(Arc::clone(&client)).build().is_err());
    assert!(
        RealtimeScanner::builder(client)
            .main_dir("/nonexistent/filestore")
            .build()
            .is_err()
    );
}
