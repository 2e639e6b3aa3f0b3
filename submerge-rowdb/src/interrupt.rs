// Cancellation token threaded through every blocking call. Independent of
// any async runtime: the rest of the workspace doesn't carry one, and the
// store's own suspension points (token waits, mutex-line waits) are built
// directly on `std::sync::Condvar`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, StoreError};

#[derive(Clone, Debug, Default)]
pub struct Interruptor {
    fired: Arc<AtomicBool>,
}

impl Interruptor {
    pub fn new() -> Self {
        Interruptor { fired: Arc::new(AtomicBool::new(false)) }
    }

    /// A permanently-non-interrupting handle, for callers (tests, one-shot
    /// tools) that don't want to wire up cancellation.
    pub fn never() -> Self {
        Interruptor::new()
    }

    pub fn interrupt(&self) {
        self.fired.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Called at every suspension point named in the concurrency model:
    /// token eligibility waits, block-lock waits, and cache-commit waits.
    pub fn check(&self) -> Result<()> {
        if self.is_interrupted() {
            Err(StoreError::Interrupted)
        } else {
            Ok(())
        }
    }
}
