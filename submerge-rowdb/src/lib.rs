// The table storage engine core: a per-shard, on-disk, B-tree-backed
// store providing transactional primary-key access, live secondary
// indexes, per-shard replication metainfo, and an online backfill
// protocol. `redb` stands in for the buffer cache / serializer layer the
// original design treats as an external collaborator; everything above
// that line -- token sequencing, superblock acquisition, metainfo
// coalescing, the sindex registry, the sindex-queue fan-out, and the
// background clearer -- is implemented here.

mod clearer;
mod config;
mod error;
mod interrupt;
mod region;
mod sindex;
mod squeue;
mod tables;
mod token;
mod txn;

mod store;

pub use config::{Durability, StoreConfig, DEFAULT_CHUNK_SIZE};
pub use error::{NotReadyReason, Result, StoreError};
pub use interrupt::Interruptor;
pub use region::{Metainfo, Region};
pub use sindex::Descriptor as SindexDescriptor;
pub use store::{SindexLookup, Store};
pub use token::{ReadToken, WriteToken};
pub use txn::{ReadTxnGuard, WriteTxnGuard};

#[cfg(test)]
mod test;
