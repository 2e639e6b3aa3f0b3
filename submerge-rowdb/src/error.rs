// The store has exactly two "expected" error conditions that callers are
// meant to branch on (interruption and an index not being ready), plus a
// catch-all for everything else, which is always a bug or on-disk
// corruption and is logged loudly via `submerge_base::Error` before it
// reaches the caller.

use std::fmt;

use submerge_base::Error as BaseError;

#[derive(Debug)]
pub enum StoreError {
    /// The caller's interruptor fired while a blocking operation was
    /// suspended.
    Interrupted,
    /// The named sindex exists but is not ready for queries: either it is
    /// still being post-constructed, or it is being deleted.
    SindexNotReady { table: String, sindex: String, reason: NotReadyReason },
    /// Invariant violation, codec failure, or any other condition the spec
    /// treats as fatal corruption. Wraps the shared workspace `Error` so it
    /// carries a backtrace and has already been logged at `error!`.
    Corrupt(BaseError),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NotReadyReason {
    /// Post-construction has not finished catching up yet. Expected during
    /// normal operation; callers should retry.
    PostConstructing,
    /// The index is being cleared. A caller that reaches this has not
    /// filtered `being_deleted` sindexes out of its own index list, which
    /// is a caller bug.
    BeingDeleted,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Interrupted => write!(f, "interrupted"),
            StoreError::SindexNotReady { table, sindex, reason } => write!(
                f,
                "index `{sindex}` on table `{table}` is not ready ({reason:?})"
            ),
            StoreError::Corrupt(e) => write!(f, "corrupt: {e:?}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<BaseError> for StoreError {
    fn from(e: BaseError) -> Self {
        StoreError::Corrupt(e)
    }
}

impl From<redb::Error> for StoreError {
    fn from(e: redb::Error) -> Self {
        StoreError::Corrupt(BaseError::from(e))
    }
}
impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Corrupt(BaseError::from(e))
    }
}
impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Corrupt(BaseError::from(e))
    }
}
impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Corrupt(BaseError::from(e))
    }
}
impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Corrupt(BaseError::from(e))
    }
}
impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Corrupt(BaseError::from(e))
    }
}
impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Corrupt(BaseError::from(e))
    }
}
impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Corrupt(BaseError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Raise a fatal, corruption-class error: logs through `submerge_base::err`
/// (which itself routes through `tracing::error!`) and wraps it.
pub fn corrupt(msg: impl Into<std::borrow::Cow<'static, str>>) -> StoreError {
    StoreError::Corrupt(submerge_base::err(msg))
}
