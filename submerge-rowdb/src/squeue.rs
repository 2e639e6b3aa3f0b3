// The sindex-queue fan-out (C5): a single FIFO ticket lock ordering entry
// into "push this write's change record to every registered queue."
//
// Under `redb`, only one write transaction is ever open at a time, so two
// primary writes can never race each other for the commit point. What
// this mutex genuinely protects against is a subtler race: a sindex's
// post-construction catch-up takes a read snapshot of existing primary
// data and, independently, needs to know the exact first queue sequence
// number its own writes weren't yet captured under. Reserving a ticket
// while the sindex registry is still open (i.e. before anyone releases
// it) and only entering the critical section afterward is what lets that
// handoff be race-free without holding the registry lock for the
// (potentially slow) duration of the push itself.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::interrupt::Interruptor;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Inner {
    next_ticket: u64,
    serving: u64,
    withdrawn: HashSet<u64>,
}

pub struct QueueFanout {
    inner: Mutex<Inner>,
    cv: Condvar,
}

pub struct FanoutTicket(u64);

impl Default for QueueFanout {
    fn default() -> Self {
        QueueFanout::new()
    }
}

impl QueueFanout {
    pub fn new() -> Self {
        QueueFanout { inner: Mutex::new(Inner { next_ticket: 0, serving: 0, withdrawn: HashSet::new() }), cv: Condvar::new() }
    }

    /// Reserve a place in line. Call this while the sindex registry is
    /// still acquired at the access level the caller needed it for, so
    /// ticket order matches sindex-block-acquisition order.
    pub fn reserve(&self) -> FanoutTicket {
        let mut g = self.inner.lock().unwrap();
        let id = g.next_ticket;
        g.next_ticket += 1;
        FanoutTicket(id)
    }

    fn advance_past_withdrawn(g: &mut Inner) {
        while g.withdrawn.remove(&g.serving) {
            g.serving += 1;
        }
    }

    /// Wait for `ticket`'s turn, run `f` with the line held, then release
    /// it for the next ticket. The sindex block must already have been
    /// released by the time this is called.
    pub fn enter<R>(
        &self,
        ticket: FanoutTicket,
        interruptor: &Interruptor,
        f: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        let mut g = self.inner.lock().unwrap();
        loop {
            Self::advance_past_withdrawn(&mut g);
            if g.serving == ticket.0 {
                break;
            }
            if interruptor.is_interrupted() {
                g.withdrawn.insert(ticket.0);
                Self::advance_past_withdrawn(&mut g);
                self.cv.notify_all();
                return Err(StoreError::Interrupted);
            }
            let (g2, _) = self.cv.wait_timeout(g, POLL_INTERVAL).unwrap();
            g = g2;
        }
        drop(g);
        let result = f();
        let mut g = self.inner.lock().unwrap();
        g.serving = ticket.0 + 1;
        Self::advance_past_withdrawn(&mut g);
        drop(g);
        self.cv.notify_all();
        result
    }

    /// Deregister without holding the sindex block: the emergency /
    /// shutdown path the spec calls out. Uses the same line, so it is
    /// still ordered relative to any in-flight pushes.
    pub fn enter_emergency<R>(&self, interruptor: &Interruptor, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let ticket = self.reserve();
        self.enter(ticket, interruptor, f)
    }
}

#[cfg(test)]
mod test;
