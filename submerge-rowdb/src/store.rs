// The store facade (C7): the public surface described in spec section 4.7,
// wiring the token sequencer, superblock acquirer, metainfo codec, sindex
// registry, sindex-queue fan-out, and clearer into the operations callers
// actually use.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clearer::{self, DrainGroup};
use crate::config::{Durability, StoreConfig};
use crate::error::{NotReadyReason, Result, StoreError};
use crate::interrupt::Interruptor;
use crate::region::{Metainfo, Region};
use crate::sindex::{self, Descriptor};
use crate::squeue::QueueFanout;
use crate::tables::METAINFO_KEY;
use crate::token::TokenSequencer;
use crate::txn::{ReadTxnGuard, SuperblockAcquirer, WriteTxnGuard};

/// Per-shard store singleton. Cheap to clone: everything behind it is
/// shared via `Arc`, matching the one-cache-connection-per-shard model the
/// spec assumes.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    acquirer: Arc<SuperblockAcquirer>,
    seq: Arc<TokenSequencer>,
    fanout: QueueFanout,
    config: StoreConfig,
    drain: DrainGroup,
}

/// What a sindex lookup by user-visible name can yield: present and
/// usable, absent, or present but not yet safe to query. Spelled out as a
/// tagged enum per the Design Notes, rather than raising `SindexNotReady`
/// as a control-flow escape from a success path.
pub enum SindexLookup {
    Ready(Descriptor),
    NotFound,
    NotReady(NotReadyReason),
}

impl Store {
    /// Open (creating if absent) the single-file store at `path`. Ensures
    /// every table exists and that metainfo starts out covering the
    /// universe region, matching a freshly constructed shard.
    #[instrument(level = "info", skip(config))]
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Store> {
        let db = redb::Database::create(path.as_ref())?;
        {
            let txn = db.begin_write()?;
            {
                let _ = txn.open_table(crate::tables::PRIMARY_TABLE)?;
                let _ = txn.open_table(crate::tables::SINDEX_REGISTRY_TABLE)?;
                let _ = txn.open_table(crate::tables::SINDEX_DATA_TABLE)?;
                let _ = txn.open_table(crate::tables::SINDEX_QUEUE_TABLE)?;
                let mut metainfo_table = txn.open_table(crate::tables::METAINFO_TABLE)?;
                if metainfo_table.get(METAINFO_KEY)?.is_none() {
                    let fresh = Metainfo::new_universe(Vec::new());
                    metainfo_table.insert(METAINFO_KEY, fresh.encode().as_slice())?;
                }
            }
            txn.commit()?;
        }
        let db = Arc::new(db);
        let acquirer = Arc::new(SuperblockAcquirer::new(db));
        let seq = Arc::new(TokenSequencer::new());
        let store = Store {
            inner: Arc::new(Inner { acquirer, seq, fanout: QueueFanout::new(), config, drain: DrainGroup::new() }),
        };
        store.resume_pending_clears()?;
        info!("store opened");
        Ok(store)
    }

    /// Re-spawn clearers for any sindex left `being_deleted` from a prior
    /// run -- the on-disk state after a crash mid-clear is exactly the
    /// state the clearer's loop is built to resume from.
    fn resume_pending_clears(&self) -> Result<()> {
        let interruptor = Interruptor::never();
        let read = self.read(&interruptor)?;
        let pending: Vec<Uuid> = {
            let registry = read.sindex_registry()?;
            sindex::list(&registry)?
                .into_iter()
                .filter(|(_, d)| d.being_deleted)
                .map(|(_, d)| d.uuid)
                .collect()
        };
        for uuid in pending {
            warn!(%uuid, "resuming sindex clear left pending from a prior run");
            self.spawn_clearer(uuid);
        }
        Ok(())
    }

    fn spawn_clearer(&self, uuid: Uuid) {
        clearer::spawn(&self.inner.drain, self.inner.acquirer.clone(), self.inner.seq.clone(), uuid, self.inner.config.chunk_size);
    }

    // ---- C7: read / write -------------------------------------------

    /// Acquire a read transaction in token order. `use_snapshot` selects
    /// between the snapshotted and non-snapshotted read flavors; under
    /// `redb` every read transaction is already a point-in-time snapshot,
    /// so both behave identically here.
    #[instrument(level = "debug", skip(self, interruptor))]
    pub fn read(&self, interruptor: &Interruptor) -> Result<ReadTxnGuard> {
        let token = self.inner.seq.enter_read();
        self.inner.acquirer.acquire_read(token, &self.inner.seq, false, interruptor)
    }

    /// Acquire a write transaction in token order, validate `new_metainfo`
    /// against the currently stored metainfo via `check_and_update`, then
    /// return the open transaction for the caller to mutate the primary
    /// tree under. `durability` defaults to the store's configured default
    /// when `None`.
    #[instrument(level = "debug", skip(self, new_metainfo, interruptor))]
    pub fn write<'s>(
        &'s self,
        new_metainfo: Option<Vec<(Region, Vec<u8>)>>,
        durability: Option<Durability>,
        timestamp: i64,
        interruptor: &Interruptor,
    ) -> Result<WriteTxnGuard<'s>> {
        let token = self.inner.seq.enter_write();
        let durability = durability.unwrap_or(self.inner.config.default_durability);
        let txn = self.inner.acquirer.acquire_write(token, &self.inner.seq, timestamp, 2, durability, interruptor)?;
        if let Some(pairs) = new_metainfo {
            self.check_and_update_metainfo(&txn, pairs)?;
        }
        Ok(txn)
    }

    fn check_and_update_metainfo(&self, txn: &WriteTxnGuard<'_>, pairs: Vec<(Region, Vec<u8>)>) -> Result<()> {
        let mut table = txn.metainfo()?;
        let mut current = match table.get(METAINFO_KEY)? {
            Some(bytes) => Metainfo::decode(bytes.value())?,
            None => return Err(crate::error::corrupt("metainfo missing on an opened store")),
        };
        let before = current.encode();
        current.update(pairs);
        current.check_domain_is_universe()?;
        let after = current.encode();
        // No-op when unchanged, per testable property 5.
        if before != after {
            table.insert(METAINFO_KEY, after.as_slice())?;
        }
        Ok(())
    }

    /// Push a captured write's change record to every registered (still
    /// catching-up) sindex queue, observing sindex-block acquisition
    /// order. Callers invoke this from within the same write transaction
    /// that mutated the primary tree, after reserving a fan-out ticket
    /// while the sindex registry was open for the access level they used.
    #[instrument(level = "debug", skip(self, txn, message, interruptor))]
    pub fn fan_out_to_sindex_queues(&self, txn: &WriteTxnGuard<'_>, message: &[u8], interruptor: &Interruptor) -> Result<()> {
        let ticket = self.inner.fanout.reserve();
        self.inner.fanout.enter(ticket, interruptor, || {
            let registered: Vec<(Uuid, u64)> = {
                let registry = txn.sindex_registry()?;
                sindex::list(&registry)?
                    .into_iter()
                    .filter(|(_, d)| d.queue_registered())
                    .map(|(_, d)| (d.uuid, d.next_queue_seq))
                    .collect()
            };
            if registered.is_empty() {
                return Ok(());
            }
            let mut registry = txn.sindex_registry()?;
            let mut queue = txn.sindex_queue()?;
            for (uuid, seq) in registered {
                let key = crate::tables::sindex_queue_key(&uuid, seq);
                queue.insert(key.as_slice(), message)?;
                // next_queue_seq lives on the descriptor, so advancing it
                // is part of the same transaction as the queue push.
                let name_entries = sindex::list(&registry)?;
                if let Some((name, mut descriptor)) = name_entries.into_iter().find(|(_, d)| d.uuid == uuid) {
                    descriptor.next_queue_seq = seq + 1;
                    sindex::set(&mut registry, &name, &descriptor)?;
                }
            }
            Ok(())
        })
    }

    // ---- C7: backfill -------------------------------------------------

    /// Acquire a backfill read, mask the stored metainfo down to the
    /// domain described by `start_point`, and ask `should_backfill`
    /// whether the traversal is worth running at all. Returns `false`
    /// (performing no further work) when it declines.
    #[instrument(level = "debug", skip(self, start_point, should_backfill, interruptor))]
    pub fn send_backfill(
        &self,
        start_point: Region,
        should_backfill: impl FnOnce(&[(Region, &[u8])]) -> bool,
        interruptor: &Interruptor,
    ) -> Result<bool> {
        let token = self.inner.seq.enter_read();
        let txn = self.inner.acquirer.acquire_backfill_read(token, &self.inner.seq, interruptor)?;
        let table = txn.metainfo()?;
        let metainfo = match table.get(METAINFO_KEY)? {
            Some(bytes) => Metainfo::decode(bytes.value())?,
            None => return Err(crate::error::corrupt("metainfo missing on an opened store")),
        };
        let masked = metainfo.get_overlapping(start_point);
        if !should_backfill(&masked) {
            return Ok(false);
        }
        Ok(true)
    }

    /// Acquire a write transaction at `HARD` durability (backfill intake
    /// always throttles against the cache) and hand it to the caller to
    /// apply the chunk's rows to the primary tree.
    #[instrument(level = "debug", skip(self, timestamp, interruptor))]
    pub fn receive_backfill(&self, timestamp: i64, interruptor: &Interruptor) -> Result<WriteTxnGuard<'_>> {
        let token = self.inner.seq.enter_write();
        self.inner.acquirer.acquire_write(token, &self.inner.seq, timestamp, 2, Durability::Hard, interruptor)
    }

    /// Wipe `subregion` and replace its metainfo with `new_metainfo`. The
    /// spec notes this may, for a small `subregion`, end up wiping the
    /// entire primary tree underneath it -- that is accepted behavior,
    /// not a bug to guard against here.
    #[instrument(level = "debug", skip(self, new_metainfo, interruptor))]
    pub fn reset_data(&self, subregion: Region, new_metainfo: Vec<u8>, durability: Durability, interruptor: &Interruptor) -> Result<()> {
        let token = self.inner.seq.enter_write();
        let txn = self.inner.acquirer.acquire_write(token, &self.inner.seq, -1, 1, durability, interruptor)?;
        {
            let mut primary = txn.primary()?;
            let (lo, hi) = region_to_key_bounds(&subregion);
            let keys: Vec<Vec<u8>> = primary
                .range(lo.as_slice()..hi.as_slice())?
                .filter_map(|r| r.ok())
                .map(|(k, _)| k.value().to_vec())
                .collect();
            for k in keys {
                primary.remove(k.as_slice())?;
            }
        }
        self.check_and_update_metainfo(&txn, vec![(subregion, new_metainfo)])?;
        txn.commit()
    }

    // ---- C7 / C3: metainfo mirror --------------------------------------

    #[instrument(level = "debug", skip(self, interruptor))]
    pub fn get_metainfo(&self, interruptor: &Interruptor) -> Result<Metainfo> {
        let txn = self.read(interruptor)?;
        let table = txn.metainfo()?;
        match table.get(METAINFO_KEY)? {
            Some(bytes) => Metainfo::decode(bytes.value()),
            None => Err(crate::error::corrupt("metainfo missing on an opened store")),
        }
    }

    #[instrument(level = "debug", skip(self, pairs, interruptor))]
    pub fn set_metainfo(&self, pairs: Vec<(Region, Vec<u8>)>, interruptor: &Interruptor) -> Result<()> {
        let txn = self.write(Some(pairs), None, -1, interruptor)?;
        txn.commit()
    }

    // ---- C4 / C7: sindex CRUD ------------------------------------------

    /// Create a fresh sindex. Returns `Ok(false)` (not an error) if `name`
    /// is already present, matching `add_sindex`'s boolean-return contract
    /// for an expected, non-exceptional outcome.
    #[instrument(level = "debug", skip(self, opaque_definition, interruptor))]
    pub fn add_sindex(&self, name: &str, opaque_definition: Vec<u8>, interruptor: &Interruptor) -> Result<bool> {
        let txn = self.write(None, None, -1, interruptor)?;
        let created = {
            let mut registry = txn.sindex_registry()?;
            if sindex::get(&registry, name)?.is_some() {
                false
            } else {
                let descriptor = Descriptor::new(Uuid::new_v4(), opaque_definition);
                sindex::set(&mut registry, name, &descriptor)?;
                true
            }
        };
        txn.commit()?;
        Ok(created)
    }

    /// Mark `name` deleted and spawn its clearer. Returns `false` if
    /// absent.
    #[instrument(level = "debug", skip(self, interruptor))]
    pub fn drop_sindex(&self, name: &str, interruptor: &Interruptor) -> Result<bool> {
        let txn = self.write(None, None, -1, interruptor)?;
        let uuid = {
            let mut registry = txn.sindex_registry()?;
            sindex::mark_deleted(&mut registry, name)?.map(|d| d.uuid)
        };
        txn.commit()?;
        match uuid {
            Some(uuid) => {
                self.spawn_clearer(uuid);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reconcile the registry to exactly `desired`: create what's missing,
    /// drop (and schedule clearing for) what's no longer wanted. Names
    /// present in both are left untouched, even if their stored definition
    /// differs from `desired`'s, per spec section 4.4.
    #[instrument(level = "debug", skip(self, desired, interruptor))]
    pub fn set_sindexes(&self, desired: Vec<(String, Vec<u8>)>, interruptor: &Interruptor) -> Result<()> {
        let txn = self.write(None, None, -1, interruptor)?;
        let mut to_clear = Vec::new();
        {
            let mut registry = txn.sindex_registry()?;
            let current: Vec<String> = sindex::list(&registry)?.into_iter().map(|(n, _)| n).collect();
            let desired_names: std::collections::HashSet<&str> = desired.iter().map(|(n, _)| n.as_str()).collect();
            for name in &current {
                if !desired_names.contains(name.as_str()) {
                    if let Some(d) = sindex::mark_deleted(&mut registry, name)? {
                        to_clear.push(d.uuid);
                    }
                }
            }
            let current_names: std::collections::HashSet<String> = current.into_iter().collect();
            for (name, opaque_definition) in desired {
                if !current_names.contains(&name) {
                    let descriptor = Descriptor::new(Uuid::new_v4(), opaque_definition);
                    sindex::set(&mut registry, &name, &descriptor)?;
                }
            }
        }
        txn.commit()?;
        for uuid in to_clear {
            self.spawn_clearer(uuid);
        }
        Ok(())
    }

    /// Flip `post_construction_complete` once catch-up has drained the
    /// queue. Returns `false` if `name` is absent.
    #[instrument(level = "debug", skip(self, interruptor))]
    pub fn mark_index_up_to_date(&self, name: &str, interruptor: &Interruptor) -> Result<bool> {
        let txn = self.write(None, None, -1, interruptor)?;
        let updated = {
            let mut registry = txn.sindex_registry()?;
            sindex::mark_up_to_date(&mut registry, name)?
        };
        txn.commit()?;
        Ok(updated)
    }

    /// Same as `mark_index_up_to_date`, but looked up by `uuid` rather
    /// than user-visible name -- catch-up completion is driven by the
    /// post-construction job, which only ever learns the sindex's uuid.
    /// Returns `false` if no entry carries that uuid.
    #[instrument(level = "debug", skip(self, interruptor))]
    pub fn mark_index_up_to_date_by_uuid(&self, uuid: Uuid, interruptor: &Interruptor) -> Result<bool> {
        let txn = self.write(None, None, -1, interruptor)?;
        let updated = {
            let mut registry = txn.sindex_registry()?;
            match sindex::list(&registry)?.into_iter().find(|(_, d)| d.uuid == uuid) {
                Some((name, _)) => sindex::mark_up_to_date(&mut registry, &name)?,
                None => false,
            }
        };
        txn.commit()?;
        Ok(updated)
    }

    fn lookup(&self, name: &str, interruptor: &Interruptor) -> Result<(SindexLookup, ReadTxnGuard)> {
        let txn = self.read(interruptor)?;
        let registry = txn.sindex_registry()?;
        let outcome = match sindex::get(&registry, name)? {
            None => SindexLookup::NotFound,
            Some(d) if d.being_deleted => SindexLookup::NotReady(NotReadyReason::BeingDeleted),
            Some(d) if !d.post_construction_complete => SindexLookup::NotReady(NotReadyReason::PostConstructing),
            Some(d) => SindexLookup::Ready(d),
        };
        drop(registry);
        Ok((outcome, txn))
    }

    /// Look up `name`'s ready descriptor for a read. Raises
    /// `SindexNotReady` (carrying `table_name`) if it exists but isn't
    /// ready yet; returns `Ok(None)` if absent.
    #[instrument(level = "debug", skip(self, interruptor))]
    pub fn acquire_sindex_superblock_for_read(
        &self,
        table_name: &str,
        name: &str,
        interruptor: &Interruptor,
    ) -> Result<Option<(Descriptor, ReadTxnGuard)>> {
        let (outcome, txn) = self.lookup(name, interruptor)?;
        match outcome {
            SindexLookup::Ready(d) => Ok(Some((d, txn))),
            SindexLookup::NotFound => Ok(None),
            SindexLookup::NotReady(reason) => {
                Err(StoreError::SindexNotReady { table: table_name.to_string(), sindex: name.to_string(), reason })
            }
        }
    }

    /// Same contract, but for a write transaction (reserves a write
    /// token).
    #[instrument(level = "debug", skip(self, interruptor))]
    pub fn acquire_sindex_superblock_for_write<'s>(
        &'s self,
        table_name: &str,
        name: &str,
        interruptor: &Interruptor,
    ) -> Result<Option<(Descriptor, WriteTxnGuard<'s>)>> {
        let txn = self.write(None, None, -1, interruptor)?;
        let outcome = {
            let registry = txn.sindex_registry()?;
            match sindex::get(&registry, name)? {
                None => SindexLookup::NotFound,
                Some(d) if d.being_deleted => SindexLookup::NotReady(NotReadyReason::BeingDeleted),
                Some(d) if !d.post_construction_complete => SindexLookup::NotReady(NotReadyReason::PostConstructing),
                Some(d) => SindexLookup::Ready(d),
            }
        };
        match outcome {
            SindexLookup::Ready(d) => Ok(Some((d, txn))),
            SindexLookup::NotFound => Ok(None),
            SindexLookup::NotReady(reason) => {
                Err(StoreError::SindexNotReady { table: table_name.to_string(), sindex: name.to_string(), reason })
            }
        }
    }

    /// Every descriptor in the registry, ready or not, for write -- used
    /// by callers (e.g. full-table scans or DDL) that need to see
    /// everything regardless of readiness.
    #[instrument(level = "debug", skip(self, interruptor))]
    pub fn acquire_all_sindex_superblocks_for_write<'s>(&'s self, interruptor: &Interruptor) -> Result<(Vec<Descriptor>, WriteTxnGuard<'s>)> {
        let txn = self.write(None, None, -1, interruptor)?;
        let descriptors = {
            let registry = txn.sindex_registry()?;
            sindex::list(&registry)?.into_iter().map(|(_, d)| d).collect()
        };
        Ok((descriptors, txn))
    }

    /// Only `ready` descriptors (post-constructed, not being deleted), for
    /// write -- the set a normal write's fan-out should target.
    #[instrument(level = "debug", skip(self, interruptor))]
    pub fn acquire_post_constructed_sindex_superblocks_for_write<'s>(
        &'s self,
        interruptor: &Interruptor,
    ) -> Result<(Vec<Descriptor>, WriteTxnGuard<'s>)> {
        let (all, txn) = self.acquire_all_sindex_superblocks_for_write(interruptor)?;
        Ok((all.into_iter().filter(|d| d.is_ready()).collect(), txn))
    }

    /// Cancel and await every background clearer. Called explicitly, and
    /// also from `Drop`, so a store is never dropped with an unowned
    /// clearing task still running.
    pub fn shutdown(&self) {
        self.inner.drain.shutdown();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.drain.shutdown();
    }
}

/// Map a primary-key region to the `(lo, hi)` byte-string bounds used by
/// `redb::Table::range`. Primary keys are stored as their raw bytes, so
/// the region's `u64` endpoints are encoded big-endian to preserve
/// lexicographic order.
fn region_to_key_bounds(region: &Region) -> (Vec<u8>, Vec<u8>) {
    let lo = region.start.to_be_bytes().to_vec();
    let hi = if region.end == u64::MAX { vec![0xffu8; 9] } else { region.end.to_be_bytes().to_vec() };
    (lo, hi)
}

#[cfg(test)]
mod test;
