use std::sync::Arc;
use std::time::Duration;

use test_log::test;
use uuid::Uuid;

use super::*;
use crate::sindex::Descriptor;
use crate::tables::{sindex_data_key, SINDEX_DATA_TABLE, SINDEX_REGISTRY_TABLE};
use crate::token::TokenSequencer;

fn open_db() -> (tempfile::TempDir, Arc<redb::Database>) {
    let dir = tempfile::tempdir().unwrap();
    let db = redb::Database::create(dir.path().join("store.redb")).unwrap();
    let txn = db.begin_write().unwrap();
    {
        let _ = txn.open_table(crate::tables::PRIMARY_TABLE).unwrap();
        let _ = txn.open_table(SINDEX_REGISTRY_TABLE).unwrap();
        let _ = txn.open_table(SINDEX_DATA_TABLE).unwrap();
        let _ = txn.open_table(crate::tables::SINDEX_QUEUE_TABLE).unwrap();
        let mut metainfo = txn.open_table(crate::tables::METAINFO_TABLE).unwrap();
        let m = crate::region::Metainfo::new_universe(Vec::new());
        metainfo.insert(crate::tables::METAINFO_KEY, m.encode().as_slice()).unwrap();
    }
    txn.commit().unwrap();
    (dir, Arc::new(db))
}

#[test]
fn clearer_drains_all_keys_and_removes_the_registry_entry() {
    let (_dir, db) = open_db();
    let uuid = Uuid::new_v4();

    let txn = db.begin_write().unwrap();
    {
        let mut data = txn.open_table(SINDEX_DATA_TABLE).unwrap();
        for i in 0u32..250 {
            let key = sindex_data_key(&uuid, &i.to_be_bytes());
            data.insert(key.as_slice(), b"v".as_slice()).unwrap();
        }
        let mut registry = txn.open_table(SINDEX_REGISTRY_TABLE).unwrap();
        let mut descriptor = Descriptor::new(uuid, vec![]);
        descriptor.being_deleted = true;
        descriptor.post_construction_complete = true;
        let name = deleted_name(&uuid);
        registry.insert(name.as_str(), rmp_serde::to_vec(&descriptor).unwrap().as_slice()).unwrap();
    }
    txn.commit().unwrap();

    let acquirer = Arc::new(SuperblockAcquirer::new(db.clone()));
    let seq = Arc::new(TokenSequencer::new());
    let group = DrainGroup::new();
    spawn(&group, acquirer, seq, uuid, 32);

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while group.is_clearing(uuid) && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!group.is_clearing(uuid), "clearer did not finish in time");

    let read = db.begin_read().unwrap();
    let data = read.open_table(SINDEX_DATA_TABLE).unwrap();
    let (lo, hi) = crate::tables::uuid_range(&uuid);
    assert_eq!(data.range(lo.as_slice()..hi.as_slice()).unwrap().count(), 0);

    let registry = read.open_table(SINDEX_REGISTRY_TABLE).unwrap();
    assert!(registry.get(deleted_name(&uuid).as_str()).unwrap().is_none());
}

#[test]
fn cancelling_the_group_stops_the_thread() {
    let (_dir, db) = open_db();
    let uuid = Uuid::new_v4();

    let txn = db.begin_write().unwrap();
    {
        let mut data = txn.open_table(SINDEX_DATA_TABLE).unwrap();
        for i in 0u32..1000 {
            let key = sindex_data_key(&uuid, &i.to_be_bytes());
            data.insert(key.as_slice(), b"v".as_slice()).unwrap();
        }
        let mut registry = txn.open_table(SINDEX_REGISTRY_TABLE).unwrap();
        let mut descriptor = Descriptor::new(uuid, vec![]);
        descriptor.being_deleted = true;
        let name = deleted_name(&uuid);
        registry.insert(name.as_str(), rmp_serde::to_vec(&descriptor).unwrap().as_slice()).unwrap();
    }
    txn.commit().unwrap();

    let acquirer = Arc::new(SuperblockAcquirer::new(db));
    let seq = Arc::new(TokenSequencer::new());
    let group = DrainGroup::new();
    spawn(&group, acquirer, seq, uuid, 1);

    std::thread::sleep(Duration::from_millis(5));
    group.shutdown();
    assert!(!group.is_clearing(uuid));
}
