// The token sequencer (C1): a FIFO enforcer over entry into superblock
// acquisition. It does not itself guarantee mutual exclusion between
// writers — that's the superblock acquirer's job (C2), layered on top of
// `redb`'s single-writer transactions — it guarantees *fair, ordered
// admission* into that acquisition step, so a steady stream of reads can
// never starve a write waiting behind them and vice versa.
//
// Resolution of an implementation choice the design notes leave open: the
// spec's prose describes a token becoming "eligible" once every earlier
// token is "eligible or dropped," which taken literally lets a write
// become eligible, and the *next* read become eligible immediately after,
// before the write has actually finished using the superblock. That's fine
// for admission fairness but would not by itself guarantee "writes commit
// in token order" (§8, property 1), since nothing would stop two writes
// admitted back-to-back from racing for `redb`'s writer lock out of
// order. This implementation strengthens the rule: reads advance the
// queue the instant they're admitted (since they never need to wait on
// each other), but a write only advances the queue when its guard is
// dropped, i.e. once it has released the superblock. That is what makes
// property 1 hold without depending on incidental fairness elsewhere.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::interrupt::Interruptor;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ReadToken(u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct WriteToken(u64);

impl ReadToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}
impl WriteToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

struct Inner {
    next_id: u64,
    head: u64,
    withdrawn: HashSet<u64>,
}

pub struct TokenSequencer {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl Default for TokenSequencer {
    fn default() -> Self {
        TokenSequencer::new()
    }
}

impl TokenSequencer {
    pub fn new() -> Self {
        TokenSequencer {
            inner: Mutex::new(Inner { next_id: 0, head: 0, withdrawn: HashSet::new() }),
            cv: Condvar::new(),
        }
    }

    pub fn enter_read(&self) -> ReadToken {
        let mut g = self.inner.lock().unwrap();
        let id = g.next_id;
        g.next_id += 1;
        ReadToken(id)
    }

    pub fn enter_write(&self) -> WriteToken {
        let mut g = self.inner.lock().unwrap();
        let id = g.next_id;
        g.next_id += 1;
        WriteToken(id)
    }

    fn advance_past_withdrawn(g: &mut Inner) {
        while g.withdrawn.remove(&g.head) {
            g.head += 1;
        }
    }

    /// Block until `id` is at the head of the line, or withdraw it (on
    /// interrupt) so later tickets are not stranded.
    fn wait_turn(&self, id: u64, interruptor: &Interruptor) -> Result<std::sync::MutexGuard<'_, Inner>> {
        let mut g = self.inner.lock().unwrap();
        loop {
            Self::advance_past_withdrawn(&mut g);
            if g.head == id {
                return Ok(g);
            }
            if interruptor.is_interrupted() {
                g.withdrawn.insert(id);
                Self::advance_past_withdrawn(&mut g);
                self.cv.notify_all();
                return Err(StoreError::Interrupted);
            }
            let (g2, _) = self.cv.wait_timeout(g, POLL_INTERVAL).unwrap();
            g = g2;
        }
    }

    /// Wait for a read token to become eligible. Read tokens advance the
    /// line the instant they're admitted: they never block one another.
    pub fn wait_read(&self, token: ReadToken, interruptor: &Interruptor) -> Result<()> {
        let mut g = self.wait_turn(token.0, interruptor)?;
        g.head += 1;
        Self::advance_past_withdrawn(&mut g);
        drop(g);
        self.cv.notify_all();
        Ok(())
    }

    /// Wait for a write token to become eligible. Returns a guard that
    /// must be released (dropped) once the caller is done with the
    /// superblock, which is what allows the next ticket to proceed.
    pub fn wait_write<'a>(&'a self, token: WriteToken, interruptor: &Interruptor) -> Result<WriteGuard<'a>> {
        let g = self.wait_turn(token.0, interruptor)?;
        drop(g);
        Ok(WriteGuard { seq: self, id: token.0, released: false })
    }
}

pub struct WriteGuard<'a> {
    seq: &'a TokenSequencer,
    id: u64,
    released: bool,
}

impl<'a> WriteGuard<'a> {
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut g = self.seq.inner.lock().unwrap();
        debug_assert_eq!(g.head, self.id);
        g.head += 1;
        TokenSequencer::advance_past_withdrawn(&mut g);
        drop(g);
        self.seq.cv.notify_all();
    }
}

impl<'a> Drop for WriteGuard<'a> {
    fn drop(&mut self) {
        self.do_release();
    }
}

#[cfg(test)]
mod test;
