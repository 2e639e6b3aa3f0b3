use serde::{Deserialize, Serialize};

/// Number of keys the sindex clearer collects and deletes per chunk
/// transaction. Chosen small enough that no single clearer transaction
/// holds up the write path for long.
pub const DEFAULT_CHUNK_SIZE: usize = 32;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Durability {
    /// User writes and backfill intake: throttles the caller against the
    /// underlying cache's commit rate.
    Hard,
    /// Internal maintenance work (the sindex clearer): not worth throttling
    /// foreground traffic for.
    Soft,
}

impl Default for Durability {
    fn default() -> Self {
        Durability::Hard
    }
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Keys collected and removed per clearer transaction. See
    /// [`DEFAULT_CHUNK_SIZE`].
    pub chunk_size: usize,
    /// Durability used by `write` and `receive_backfill` unless the caller
    /// overrides it explicitly.
    pub default_durability: Durability,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig { chunk_size: DEFAULT_CHUNK_SIZE, default_durability: Durability::Hard }
    }
}
