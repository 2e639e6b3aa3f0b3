// The persisted layout: a single `redb::Database` file holding a handful
// of tables that stand in for the superblock, the sindex block, and the
// per-sindex B-trees and queues described by the spec. Node layout, page
// eviction, and the on-disk format itself are `redb`'s concern, not ours.

use redb::TableDefinition;

/// Primary key -> row bytes. The primary B-tree.
pub const PRIMARY_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("primary");

/// A single row keyed by a fixed sentinel, holding the coalesced,
/// versioned metainfo blob. Stands in for the metainfo pairs kept
/// directly on the superblock.
pub const METAINFO_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metainfo");
pub const METAINFO_KEY: &str = "metainfo";

/// Sindex name -> serialized [`crate::sindex::Descriptor`]. The sindex
/// block / sindex registry.
pub const SINDEX_REGISTRY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sindex_registry");

/// `(uuid bytes ++ index key) -> row bytes`, i.e. every sindex's B-tree
/// sharing one physical table, partitioned by uuid prefix. This is the
/// per-sindex superblock's keyspace.
pub const SINDEX_DATA_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sindex_data");

/// `(uuid bytes ++ big-endian sequence) -> message bytes`. The per-sindex
/// disk-backed write-ahead queue.
pub const SINDEX_QUEUE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sindex_queue");

/// Build a sindex-data or sindex-queue key prefix for `uuid`.
pub fn uuid_prefix(uuid: &uuid::Uuid) -> [u8; 16] {
    *uuid.as_bytes()
}

pub fn sindex_data_key(uuid: &uuid::Uuid, index_key: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(16 + index_key.len());
    k.extend_from_slice(uuid.as_bytes());
    k.extend_from_slice(index_key);
    k
}

pub fn sindex_queue_key(uuid: &uuid::Uuid, seq: u64) -> [u8; 24] {
    let mut k = [0u8; 24];
    k[..16].copy_from_slice(uuid.as_bytes());
    k[16..].copy_from_slice(&seq.to_be_bytes());
    k
}

/// The (inclusive start, exclusive end) byte-strings bounding every key
/// with the given uuid prefix. Returned as owned `Vec<u8>`s rather than a
/// `Range` so callers can pass `lo.as_slice()..hi.as_slice()` directly to
/// `redb`'s `range()`, which borrows its bounds.
pub fn uuid_range(uuid: &uuid::Uuid) -> (Vec<u8>, Vec<u8>) {
    let lo = uuid.as_bytes().to_vec();
    let mut hi = lo.clone();
    // 16-byte prefix; the next distinct prefix is lo+1 treated as a
    // 128-bit big-endian integer. uuid bytes are never all-0xff in
    // practice (v4 uuids), but guard it anyway.
    for i in (0..16).rev() {
        if hi[i] == 0xff {
            hi[i] = 0;
        } else {
            hi[i] += 1;
            return (lo, hi);
        }
    }
    // All-0xff uuid: there is no representable exclusive upper bound
    // shorter than extending the key length, so fall back to a range
    // that still only matches the 16-byte-prefixed keys in practice
    // because `redb` range bounds are compared lexicographically and no
    // valid key exceeds this length class by convention here.
    (lo, vec![0xffu8; 17])
}
