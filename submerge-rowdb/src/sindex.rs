// The sindex registry (C4): a persistent name -> descriptor map kept in
// the sindex registry table, plus the reserved-name trick that lets a
// dropped index's name be reused immediately.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{corrupt, Result};

/// `{ uuid, opaque_definition, post_construction_complete, being_deleted }`
/// from the spec. `superblock_block_id` is not a separate field here: the
/// uuid itself addresses the sindex's keyspace within the shared sindex
/// data and queue tables (see `tables::sindex_data_key`).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub opaque_definition: Vec<u8>,
    pub post_construction_complete: bool,
    pub being_deleted: bool,
    /// Next sequence number to assign in this sindex's queue. Not named
    /// in the spec's descriptor fields, but it has to live somewhere
    /// durable so queue sequence numbers survive a restart; the
    /// descriptor is the natural place since it is already rewritten
    /// transactionally alongside every queue push.
    pub next_queue_seq: u64,
}

impl Descriptor {
    pub fn new(uuid: Uuid, opaque_definition: Vec<u8>) -> Self {
        Descriptor {
            uuid,
            opaque_definition,
            post_construction_complete: false,
            being_deleted: false,
            next_queue_seq: 0,
        }
    }

    /// A descriptor is ready iff post-constructed and not being deleted.
    pub fn is_ready(&self) -> bool {
        self.post_construction_complete && !self.being_deleted
    }

    /// A queue is registered for this sindex iff it is still catching up:
    /// post-construction not yet complete, and not being deleted (a
    /// deleted index has no further writes to catch up on).
    pub fn queue_registered(&self) -> bool {
        !self.post_construction_complete && !self.being_deleted
    }

    fn encode(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("encoding a Descriptor cannot fail")
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| corrupt(format!("corrupt sindex descriptor: {e}")))
    }
}

/// Re-key a dropped sindex's registry entry to this reserved name so a
/// fresh `add_sindex` with the original name is immediately legal while
/// the old one drains in the background.
pub fn deleted_name(uuid: &Uuid) -> String {
    format!("_DEL_{uuid}\0")
}

/// Operations below all take the sindex registry table already opened at
/// the required access level, per the spec ("all taking the sindex block
/// already locked").

/// Works against either `redb::Table` or `redb::ReadOnlyTable` -- both
/// implement `ReadableTable`, and callers hold whichever access level
/// they already opened the sindex block at.
pub fn get(table: &impl redb::ReadableTable<&'static str, &'static [u8]>, name: &str) -> Result<Option<Descriptor>> {
    match table.get(name)? {
        Some(bytes) => Ok(Some(Descriptor::decode(bytes.value())?)),
        None => Ok(None),
    }
}

pub fn set(table: &mut redb::Table<'_, &'static str, &'static [u8]>, name: &str, descriptor: &Descriptor) -> Result<()> {
    table.insert(name, descriptor.encode().as_slice())?;
    Ok(())
}

pub fn delete(table: &mut redb::Table<'_, &'static str, &'static [u8]>, name: &str) -> Result<bool> {
    Ok(table.remove(name)?.is_some())
}

pub fn list(table: &impl redb::ReadableTable<&'static str, &'static [u8]>) -> Result<Vec<(String, Descriptor)>> {
    let mut out = Vec::new();
    for entry in table.iter()? {
        let (k, v) = entry?;
        out.push((k.value().to_string(), Descriptor::decode(v.value())?));
    }
    Ok(out)
}

/// Atomically re-key a live descriptor from `name` to its reserved
/// `_DEL_<uuid>\0` name and mark it `being_deleted`. Returns `false` if
/// `name` is absent.
pub fn mark_deleted(table: &mut redb::Table<'_, &'static str, &'static [u8]>, name: &str) -> Result<Option<Descriptor>> {
    let Some(mut descriptor) = get(table, name)? else {
        return Ok(None);
    };
    descriptor.being_deleted = true;
    table.remove(name)?;
    let new_name = deleted_name(&descriptor.uuid);
    table.insert(new_name.as_str(), descriptor.encode().as_slice())?;
    Ok(Some(descriptor))
}

pub fn mark_up_to_date(table: &mut redb::Table<'_, &'static str, &'static [u8]>, name: &str) -> Result<bool> {
    let Some(mut descriptor) = get(table, name)? else {
        return Ok(false);
    };
    descriptor.post_construction_complete = true;
    set(table, name, &descriptor)?;
    Ok(true)
}
