// End-to-end scenarios from the top of the crate, exercising only the
// public `Store` surface where possible. S5 seeds on-disk state directly
// (crash-resume is, by definition, about state nothing built the normal
// way would leave behind).

use std::time::Duration;

use test_log::test;
use uuid::Uuid;

use crate::{Interruptor, Store, StoreConfig};

/// S5: a sindex left `being_deleted` with residual keys from a prior run
/// is picked back up and fully drained on the next `Store::open`.
#[test]
fn reopening_resumes_an_interrupted_clear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.redb");
    let uuid = Uuid::new_v4();

    {
        let db = redb::Database::create(&path).unwrap();
        let txn = db.begin_write().unwrap();
        {
            let _ = txn.open_table(crate::tables::PRIMARY_TABLE).unwrap();
            let mut metainfo = txn.open_table(crate::tables::METAINFO_TABLE).unwrap();
            let m = crate::region::Metainfo::new_universe(Vec::new());
            metainfo.insert(crate::tables::METAINFO_KEY, m.encode().as_slice()).unwrap();
            let _ = txn.open_table(crate::tables::SINDEX_QUEUE_TABLE).unwrap();

            let mut data = txn.open_table(crate::tables::SINDEX_DATA_TABLE).unwrap();
            for i in 0u32..500 {
                let key = crate::tables::sindex_data_key(&uuid, &i.to_be_bytes());
                data.insert(key.as_slice(), b"v".as_slice()).unwrap();
            }

            let mut registry = txn.open_table(crate::tables::SINDEX_REGISTRY_TABLE).unwrap();
            let mut descriptor = crate::sindex::Descriptor::new(uuid, vec![]);
            descriptor.being_deleted = true;
            let name = crate::sindex::deleted_name(&uuid);
            registry.insert(name.as_str(), rmp_serde::to_vec(&descriptor).unwrap().as_slice()).unwrap();
        }
        txn.commit().unwrap();
    }

    let store = Store::open(&path, StoreConfig::default()).unwrap();
    let interruptor = Interruptor::never();

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let txn = store.read(&interruptor).unwrap();
        let registry = txn.sindex_registry().unwrap();
        if crate::sindex::list(&registry).unwrap().is_empty() {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "resumed clear never finished");
        std::thread::sleep(Duration::from_millis(20));
    }
    store.shutdown();
}
