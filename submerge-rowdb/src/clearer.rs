// The sindex clearer (C6): chunked background traversal-and-delete that
// empties and retires a sindex's keyspace without holding one long
// transaction. Each chunk is its own small write transaction, so a crash
// (or, here, a cancelled thread) mid-clear just leaves a smaller tree to
// re-clear on restart -- the algorithm is idempotent by construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::Durability;
use crate::error::Result;
use crate::interrupt::Interruptor;
use crate::sindex::{self, deleted_name};
use crate::tables::uuid_range;
use crate::txn::SuperblockAcquirer;

/// Keeps the clearer a first-class, owned background task rather than a
/// fire-and-forget thread: shutdown flips every flag and joins every
/// handle, so no clearer ever outlives the `Store` that spawned it.
#[derive(Default)]
pub struct DrainGroup {
    tasks: Mutex<Vec<Task>>,
}

struct Task {
    uuid: Uuid,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DrainGroup {
    pub fn new() -> Self {
        DrainGroup::default()
    }

    fn push(&self, uuid: Uuid, cancel: Arc<AtomicBool>, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|t| !t.handle.is_finished());
        tasks.push(Task { uuid, cancel, handle });
    }

    /// Cancel and await every in-flight clearer. Called from `Store`
    /// teardown; also safe to call more than once.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for t in &tasks {
            t.cancel.store(true, Ordering::SeqCst);
        }
        for t in tasks {
            let _ = t.handle.join();
        }
    }

    #[cfg(test)]
    fn is_clearing(&self, uuid: Uuid) -> bool {
        self.tasks.lock().unwrap().iter().any(|t| t.uuid == uuid && !t.handle.is_finished())
    }
}

/// Spawn the background clearer for `uuid`. The clearer looks the
/// descriptor back up under its `_DEL_<uuid>\0` name on every chunk,
/// since that is the only name it is safe to find a being-deleted
/// descriptor under.
pub fn spawn(
    group: &DrainGroup,
    acquirer: Arc<SuperblockAcquirer>,
    seq: Arc<crate::token::TokenSequencer>,
    uuid: Uuid,
    chunk_size: usize,
) {
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_for_thread = cancel.clone();
    let handle = std::thread::Builder::new()
        .name(format!("sindex-clear-{uuid}"))
        .spawn(move || run(acquirer, seq, uuid, chunk_size, cancel_for_thread))
        .expect("spawning the clearer thread should not fail");
    group.push(uuid, cancel, handle);
}

#[instrument(level = "info", skip(acquirer, seq, cancel), fields(%uuid))]
fn run(acquirer: Arc<SuperblockAcquirer>, seq: Arc<crate::token::TokenSequencer>, uuid: Uuid, chunk_size: usize, cancel: Arc<AtomicBool>) {
    let interruptor = Interruptor::new();
    loop {
        if cancel.load(Ordering::SeqCst) {
            debug!("clearer cancelled before reaching the end; will resume on next call");
            return;
        }
        match clear_one_chunk(&acquirer, &seq, uuid, chunk_size, &interruptor) {
            Ok(true) => break,
            Ok(false) => continue,
            Err(e) => {
                debug!(?e, "clearer chunk failed, stopping (idempotent, safe to retry)");
                return;
            }
        }
    }
    if let Err(e) = finish(&acquirer, &seq, uuid, &interruptor) {
        debug!(?e, "clearer final step failed, registry entry left in place for retry");
        return;
    }
    info!("sindex fully cleared and retired");
}

/// Clear up to `chunk_size` keys in one small transaction. Returns
/// `Ok(true)` when the keyspace is now empty (`reached_end`).
fn clear_one_chunk(
    acquirer: &SuperblockAcquirer,
    seq: &crate::token::TokenSequencer,
    uuid: Uuid,
    chunk_size: usize,
    interruptor: &Interruptor,
) -> Result<bool> {
    let txn = acquirer.acquire_internal_write(seq, interruptor)?;
    debug_assert_eq!(txn.durability, Durability::Soft);
    let (lo, hi) = uuid_range(&uuid);
    let keys: Vec<Vec<u8>> = {
        let table = txn.sindex_data()?;
        table
            .range(lo.as_slice()..hi.as_slice())?
            .take(chunk_size)
            .filter_map(|r| r.ok())
            .map(|(k, _)| k.value().to_vec())
            .collect()
    };
    let reached_end = keys.len() < chunk_size;
    {
        let mut table = txn.sindex_data()?;
        for k in &keys {
            table.remove(k.as_slice())?;
        }
    }
    txn.commit()?;
    Ok(reached_end)
}

/// Delete the sindex's registry entry and any residual queue rows once
/// its data keyspace is empty.
fn finish(acquirer: &SuperblockAcquirer, seq: &crate::token::TokenSequencer, uuid: Uuid, interruptor: &Interruptor) -> Result<()> {
    let txn = acquirer.acquire_internal_write(seq, interruptor)?;
    let name = deleted_name(&uuid);
    {
        let mut registry = txn.sindex_registry()?;
        sindex::delete(&mut registry, &name)?;
    }
    {
        let (lo, hi) = uuid_range(&uuid);
        let keys: Vec<Vec<u8>> = {
            let table = txn.sindex_queue()?;
            table.range(lo.as_slice()..hi.as_slice())?.filter_map(|r| r.ok()).map(|(k, _)| k.value().to_vec()).collect()
        };
        let mut table = txn.sindex_queue()?;
        for k in keys {
            table.remove(k.as_slice())?;
        }
    }
    txn.commit()
}

#[cfg(test)]
mod test;
