use std::time::Duration;

use test_log::test;

use super::*;

fn open_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("store.redb"), StoreConfig::default()).unwrap();
    (dir, store)
}

/// S1: metainfo round-trips across a reopen.
#[test]
fn metainfo_round_trips_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.redb");
    let interruptor = Interruptor::never();
    {
        let store = Store::open(&path, StoreConfig::default()).unwrap();
        store.set_metainfo(vec![(Region::universe(), b"v1".to_vec())], &interruptor).unwrap();
        store.shutdown();
    }
    {
        let store = Store::open(&path, StoreConfig::default()).unwrap();
        let metainfo = store.get_metainfo(&interruptor).unwrap();
        let pairs: Vec<_> = metainfo.iter().collect();
        assert_eq!(pairs, vec![(Region::universe(), b"v1".as_slice())]);
        store.shutdown();
    }
}

/// S2: add / duplicate-add / drop / re-add lifecycle.
#[test]
fn sindex_lifecycle_add_drop_readd() {
    let (_dir, store) = open_store();
    let interruptor = Interruptor::never();

    assert!(store.add_sindex("x", b"def1".to_vec(), &interruptor).unwrap());
    assert!(!store.add_sindex("x", b"def2".to_vec(), &interruptor).unwrap());
    assert!(store.drop_sindex("x", &interruptor).unwrap());

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let txn = store.read(&interruptor).unwrap();
        let registry = txn.sindex_registry().unwrap();
        let entries = sindex::list(&registry).unwrap();
        if entries.is_empty() {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "drop never drained");
        std::thread::sleep(Duration::from_millis(20));
    }

    assert!(store.add_sindex("x", b"def3".to_vec(), &interruptor).unwrap());
    store.mark_index_up_to_date("x", &interruptor).unwrap();
    let (descriptor, _txn) = store.acquire_sindex_superblock_for_read("table", "x", &interruptor).unwrap().unwrap();
    assert_eq!(descriptor.opaque_definition, b"def3");
    store.shutdown();
}

/// S4: querying a not-yet-constructed sindex raises `SindexNotReady`,
/// which clears once `mark_index_up_to_date` runs.
#[test]
fn not_ready_until_marked_up_to_date() {
    let (_dir, store) = open_store();
    let interruptor = Interruptor::never();

    store.add_sindex("y", b"def".to_vec(), &interruptor).unwrap();
    let err = store.acquire_sindex_superblock_for_read("table", "y", &interruptor).unwrap_err();
    assert!(matches!(err, StoreError::SindexNotReady { reason: NotReadyReason::PostConstructing, .. }));

    store.mark_index_up_to_date("y", &interruptor).unwrap();
    let (descriptor, _txn) = store.acquire_sindex_superblock_for_read("table", "y", &interruptor).unwrap().unwrap();
    assert!(descriptor.is_ready());
    store.shutdown();
}

/// S6: a backfill callback that declines performs no further work and
/// returns false.
#[test]
fn send_backfill_short_circuits_when_declined() {
    let (_dir, store) = open_store();
    let interruptor = Interruptor::never();

    let ran = store.send_backfill(Region::universe(), |_masked| false, &interruptor).unwrap();
    assert!(!ran);
    store.shutdown();
}

/// Approximates S3: a mix of metainfo writes and reads never observes a
/// torn intermediate state, and every write lands in issuance order.
#[test]
fn interleaved_reads_and_writes_observe_a_consistent_history() {
    let (_dir, store) = open_store();
    let mut handles = Vec::new();
    for i in 0u8..20 {
        let store = store.clone();
        handles.push(std::thread::spawn(move || {
            let interruptor = Interruptor::never();
            store.set_metainfo(vec![(Region::universe(), vec![i])], &interruptor).unwrap();
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    let interruptor = Interruptor::never();
    let metainfo = store.get_metainfo(&interruptor).unwrap();
    let pairs: Vec<_> = metainfo.iter().collect();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0, Region::universe());
    store.shutdown();
}
