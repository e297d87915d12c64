//! Integration tests for `Downloader` and `MboxStore` using a fake
//! remote folder.
//!
//! Each test builds a `FakeFolder` with test data, points a store at
//! a scratch directory, and runs one or more mirror passes against it.

mod fake_remote;

use fake_remote::{FakeFolder, FakeFolderBuilder};
use imap_mirror::{Downloader, MboxStore, SyncReport, folder_status, mboxrd};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

/// Build a minimal valid RFC 2822 email.
fn make_raw_email(from: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: archive@example.com\r\n\
         Subject: {subject}\r\n\
         Date: Mon, 01 Jan 2024 12:00:00 +0000\r\n\
         Message-ID: <test-{subject}@fake.test>\r\n\
         \r\n\
         {body}"
    )
    .into_bytes()
}

fn three_emails() -> FakeFolderBuilder {
    FakeFolderBuilder::new("INBOX")
        .email(1, &make_raw_email("alice@example.com", "One", "First."))
        .email(2, &make_raw_email("bob@example.com", "Two", "From the second.\r\n"))
        .email(3, &make_raw_email("carol@example.com", "Three", "Third."))
}

/// Open the store for `INBOX` the way a new process would.
fn open_store(dir: &Path, uid_validity: u32) -> MboxStore {
    let mut store = MboxStore::new(dir, "INBOX");
    store.apply_uid_validity(uid_validity).unwrap();
    store
}

async fn mirror(folder: &mut FakeFolder, store: &mut MboxStore, batch_size: usize) -> SyncReport {
    Downloader::new(folder, store)
        .batch_size(batch_size)
        .run()
        .await
        .unwrap()
}

fn archive_bodies(store: &MboxStore) -> Vec<Vec<u8>> {
    let file = File::open(store.mbox_path()).unwrap();
    mboxrd::decode(BufReader::new(file))
        .collect::<std::io::Result<_>>()
        .unwrap()
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_run_mirrors_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut folder = three_emails().build();
    let mut store = open_store(dir.path(), 100);

    let report = mirror(&mut folder, &mut store, 10).await;

    assert_eq!(report.missing, 3);
    assert_eq!(report.fetched, 3);
    assert_eq!(folder.requests, vec![vec![1, 2, 3]]);
    assert_eq!(store.uids().unwrap(), &[1, 2, 3]);
    assert_eq!(
        store.get(2).unwrap().unwrap(),
        make_raw_email("bob@example.com", "Two", "From the second.\r\n")
    );
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let mut folder = three_emails().build();
    {
        let mut store = open_store(dir.path(), 100);
        mirror(&mut folder, &mut store, 1).await;
    }
    let mut store = open_store(dir.path(), 100);
    let mbox_before = fs::read(store.mbox_path()).unwrap();
    let index_before = fs::read(store.index_path()).unwrap();
    folder.requests.clear();

    let report = mirror(&mut folder, &mut store, 1).await;

    assert_eq!(report, SyncReport::default());
    assert!(folder.requests.is_empty());
    assert_eq!(fs::read(store.mbox_path()).unwrap(), mbox_before);
    assert_eq!(fs::read(store.index_path()).unwrap(), index_before);
}

#[tokio::test]
async fn test_only_new_messages_are_fetched() {
    let dir = tempfile::tempdir().unwrap();
    let mut folder = three_emails().build();
    let mut store = open_store(dir.path(), 100);
    mirror(&mut folder, &mut store, 5).await;

    folder.deliver(4, &make_raw_email("dave@example.com", "Four", "Fourth."));
    folder.requests.clear();
    let report = mirror(&mut folder, &mut store, 5).await;

    assert_eq!(report.missing, 1);
    assert_eq!(folder.requests, vec![vec![4]]);
    assert_eq!(store.uids().unwrap(), &[1, 2, 3, 4]);
}

#[tokio::test]
async fn test_failed_message_is_retried_on_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut folder = three_emails().failing(2).build();
    {
        let mut store = open_store(dir.path(), 100);
        let report = mirror(&mut folder, &mut store, 3).await;

        assert_eq!(folder.requests, vec![vec![1, 2, 3], vec![1], vec![2], vec![3]]);
        assert_eq!(report.skipped, vec![2]);
        assert_eq!(store.uids().unwrap(), &[1, 3]);
    }

    folder.failing.clear();
    folder.requests.clear();
    let mut store = open_store(dir.path(), 100);
    let report = mirror(&mut folder, &mut store, 3).await;

    assert_eq!(folder.requests, vec![vec![2]]);
    assert!(report.skipped.is_empty());
    assert_eq!(store.uids().unwrap(), &[1, 3, 2]);
}

#[tokio::test]
async fn test_rejected_batches_still_converge() {
    let dir = tempfile::tempdir().unwrap();
    let mut folder = three_emails().reject_batches().build();
    let mut store = open_store(dir.path(), 100);

    let report = mirror(&mut folder, &mut store, 2).await;

    assert_eq!(folder.requests, vec![vec![1, 2], vec![1], vec![2], vec![3]]);
    assert_eq!(report.fetched, 3);
    assert_eq!(store.uids().unwrap(), &[1, 2, 3]);
}

#[tokio::test]
async fn test_index_order_matches_archive_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut folder = three_emails().failing(1).build();
    let mut store = open_store(dir.path(), 100);
    mirror(&mut folder, &mut store, 1).await;
    folder.failing.clear();
    mirror(&mut folder, &mut store, 1).await;

    let uids = store.uids().unwrap().to_vec();
    assert_eq!(uids, vec![2, 3, 1]);

    let bodies = archive_bodies(&store);
    assert_eq!(bodies.len(), uids.len());
    for (uid, body) in uids.iter().zip(&bodies) {
        assert_eq!(store.get(*uid).unwrap().as_ref(), Some(body));
    }

    let many: Vec<(u32, Vec<u8>)> = store
        .get_many(&uids)
        .unwrap()
        .collect::<imap_mirror::Result<_>>()
        .unwrap();
    let expected: Vec<(u32, Vec<u8>)> = uids.into_iter().zip(bodies).collect();
    assert_eq!(many, expected);
}

#[tokio::test]
async fn test_uid_validity_change_starts_a_new_archive() {
    let dir = tempfile::tempdir().unwrap();
    let mut folder = three_emails().build();
    {
        let mut store = open_store(dir.path(), 100);
        mirror(&mut folder, &mut store, 3).await;
    }

    let mut store = MboxStore::new(dir.path(), "INBOX");
    let moved_to = store.apply_uid_validity(200).unwrap();
    assert_eq!(moved_to.as_deref(), Some("INBOX-100"));

    folder.requests.clear();
    let report = mirror(&mut folder, &mut store, 3).await;

    assert_eq!(report.missing, 3);
    assert_eq!(store.uid_validity().unwrap(), Some(200));
    assert_eq!(store.uids().unwrap(), &[1, 2, 3]);

    let mut old = MboxStore::new(dir.path(), "INBOX-100");
    assert_eq!(old.uid_validity().unwrap(), Some(100));
    assert_eq!(old.uids().unwrap(), &[1, 2, 3]);
}

#[tokio::test]
async fn test_corrupt_index_refetches_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut folder = three_emails().build();
    {
        let mut store = open_store(dir.path(), 100);
        mirror(&mut folder, &mut store, 3).await;
        fs::write(store.index_path(), "garbage").unwrap();
    }

    let mut store = open_store(dir.path(), 100);
    assert!(store.uids().unwrap().is_empty());

    let report = mirror(&mut folder, &mut store, 3).await;

    assert_eq!(report.missing, 3);
    assert_eq!(archive_bodies(&store).len(), 3);
}

#[tokio::test]
async fn test_status_counts_missing_messages() {
    let dir = tempfile::tempdir().unwrap();
    let mut folder = three_emails().failing(3).build();

    let mut fresh = MboxStore::new(dir.path(), "INBOX");
    let status = folder_status(&folder, 100, &mut fresh).unwrap();
    assert_eq!((status.remote, status.local, status.missing), (3, 0, 3));
    assert!(!fresh.mbox_path().exists());

    let mut store = open_store(dir.path(), 100);
    mirror(&mut folder, &mut store, 1).await;

    let status = folder_status(&folder, 100, &mut MboxStore::new(dir.path(), "INBOX")).unwrap();
    assert_eq!(status.folder, "INBOX");
    assert_eq!((status.remote, status.local, status.missing), (3, 2, 1));

    let status = folder_status(&folder, 999, &mut MboxStore::new(dir.path(), "INBOX")).unwrap();
    assert_eq!(status.missing, 3);
}

#[tokio::test]
async fn test_status_leaves_a_corrupt_store_alone() {
    let dir = tempfile::tempdir().unwrap();
    let mut folder = three_emails().build();
    {
        let mut store = open_store(dir.path(), 100);
        mirror(&mut folder, &mut store, 3).await;
        fs::write(store.index_path(), "garbage").unwrap();
    }
    let mut store = MboxStore::new(dir.path(), "INBOX");
    let mbox_before = fs::read(store.mbox_path()).unwrap();

    let status = folder_status(&folder, 100, &mut store).unwrap();

    assert_eq!((status.remote, status.local, status.missing), (3, 0, 3));
    assert_eq!(fs::read(store.mbox_path()).unwrap(), mbox_before);
    assert_eq!(fs::read_to_string(store.index_path()).unwrap(), "garbage");
}
