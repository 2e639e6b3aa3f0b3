// The superblock acquirer (C2): turns a ticket, a timestamp, and a
// durability into an open `redb` transaction plus the matching "superblock
// acquired at the right level" guard. The primary table, the metainfo
// table, and the sindex registry table are all opened lazily off the same
// transaction, which is what the spec means by "sub-locks are owned
// transitively by the transaction" -- `redb::Table`/`ReadOnlyTable` handles
// simply borrow from it.

use std::sync::Arc;

use tracing::instrument;

use crate::config::Durability;
use crate::error::Result;
use crate::interrupt::Interruptor;
use crate::tables::{METAINFO_TABLE, PRIMARY_TABLE, SINDEX_DATA_TABLE, SINDEX_QUEUE_TABLE, SINDEX_REGISTRY_TABLE};
use crate::token::{ReadToken, TokenSequencer, WriteGuard, WriteToken};

pub struct SuperblockAcquirer {
    db: Arc<redb::Database>,
}

impl SuperblockAcquirer {
    pub fn new(db: Arc<redb::Database>) -> Self {
        SuperblockAcquirer { db }
    }

    /// Acquire the superblock for read. `use_snapshot` is accepted for
    /// interface fidelity with the spec: every `redb` read transaction is
    /// already a consistent point-in-time snapshot relative to concurrent
    /// writers, so there is no separate non-snapshotted mode to fall back
    /// to here.
    #[instrument(level = "debug", skip(self, seq, interruptor))]
    pub fn acquire_read(
        &self,
        token: ReadToken,
        seq: &TokenSequencer,
        _use_snapshot: bool,
        interruptor: &Interruptor,
    ) -> Result<ReadTxnGuard> {
        seq.wait_read(token, interruptor)?;
        interruptor.check()?;
        let txn = self.db.begin_read()?;
        Ok(ReadTxnGuard { txn })
    }

    /// Backfill reads use the same transaction machinery but are logged
    /// under a distinct span so backfill traffic is identifiable in
    /// tracing output, standing in for the spec's separate I/O account.
    #[instrument(level = "debug", skip(self, seq, interruptor), fields(account = "backfill"))]
    pub fn acquire_backfill_read(
        &self,
        token: ReadToken,
        seq: &TokenSequencer,
        interruptor: &Interruptor,
    ) -> Result<ReadTxnGuard> {
        self.acquire_read(token, seq, true, interruptor)
    }

    #[instrument(level = "debug", skip(self, seq, interruptor, _timestamp))]
    pub fn acquire_write<'seq>(
        &self,
        token: WriteToken,
        seq: &'seq TokenSequencer,
        _timestamp: i64,
        _expected_change_count: usize,
        durability: Durability,
        interruptor: &Interruptor,
    ) -> Result<WriteTxnGuard<'seq>> {
        let token_guard = seq.wait_write(token, interruptor)?;
        interruptor.check()?;
        let txn = self.db.begin_write()?;
        Ok(WriteTxnGuard { txn, token_guard: Some(token_guard), durability })
    }

    /// Internal helper used by the clearer: opens a minimally-sized write
    /// transaction without requiring the caller to have pre-obtained a
    /// token from the foreground sequencer. The clearer maintains its own
    /// admission via the sindex-queue fanout's ticket reservation instead
    /// (see `clearer.rs`), so it issues its own token here.
    pub fn acquire_internal_write<'seq>(
        &self,
        seq: &'seq TokenSequencer,
        interruptor: &Interruptor,
    ) -> Result<WriteTxnGuard<'seq>> {
        let token = seq.enter_write();
        self.acquire_write(token, seq, -1, 1, Durability::Soft, interruptor)
    }
}

pub struct ReadTxnGuard {
    txn: redb::ReadTransaction,
}

impl ReadTxnGuard {
    pub fn primary(&self) -> Result<redb::ReadOnlyTable<&'static [u8], &'static [u8]>> {
        Ok(self.txn.open_table(PRIMARY_TABLE)?)
    }
    pub fn metainfo(&self) -> Result<redb::ReadOnlyTable<&'static str, &'static [u8]>> {
        Ok(self.txn.open_table(METAINFO_TABLE)?)
    }
    pub fn sindex_registry(&self) -> Result<redb::ReadOnlyTable<&'static str, &'static [u8]>> {
        Ok(self.txn.open_table(SINDEX_REGISTRY_TABLE)?)
    }
    pub fn sindex_data(&self) -> Result<redb::ReadOnlyTable<&'static [u8], &'static [u8]>> {
        Ok(self.txn.open_table(SINDEX_DATA_TABLE)?)
    }
    pub fn sindex_queue(&self) -> Result<redb::ReadOnlyTable<&'static [u8], &'static [u8]>> {
        Ok(self.txn.open_table(SINDEX_QUEUE_TABLE)?)
    }
}

pub struct WriteTxnGuard<'seq> {
    pub txn: redb::WriteTransaction,
    token_guard: Option<WriteGuard<'seq>>,
    pub durability: Durability,
}

impl<'seq> WriteTxnGuard<'seq> {
    pub fn primary(&self) -> Result<redb::Table<'_, &'static [u8], &'static [u8]>> {
        Ok(self.txn.open_table(PRIMARY_TABLE)?)
    }
    pub fn metainfo(&self) -> Result<redb::Table<'_, &'static str, &'static [u8]>> {
        Ok(self.txn.open_table(METAINFO_TABLE)?)
    }
    pub fn sindex_registry(&self) -> Result<redb::Table<'_, &'static str, &'static [u8]>> {
        Ok(self.txn.open_table(SINDEX_REGISTRY_TABLE)?)
    }
    pub fn sindex_data(&self) -> Result<redb::Table<'_, &'static [u8], &'static [u8]>> {
        Ok(self.txn.open_table(SINDEX_DATA_TABLE)?)
    }
    pub fn sindex_queue(&self) -> Result<redb::Table<'_, &'static [u8], &'static [u8]>> {
        Ok(self.txn.open_table(SINDEX_QUEUE_TABLE)?)
    }

    /// Commit the transaction, then release the write token so the next
    /// ticket in line may proceed. `HARD` durability is the only kind
    /// `redb` offers (every commit is fsynced); `SOFT` is recorded for
    /// logging only, matching the "hint with no correctness bearing"
    /// status the spec gives `expected_change_count`.
    pub fn commit(mut self) -> Result<()> {
        self.txn.commit()?;
        self.token_guard.take();
        Ok(())
    }

    /// Abandon the transaction: equivalent to just dropping it, spelled
    /// out for call sites that want to make the discard explicit (e.g.
    /// on interrupt).
    pub fn abort(mut self) {
        self.token_guard.take();
    }
}
