//! Single-threaded timer queue on a virtual millisecond clock.
//!
//! Timers never fire on their own: the owner drains due timers with
//! [`Scheduler::pop_due`] and then moves the clock with
//! [`Scheduler::settle`]. Ties on the due time are broken by the timer kind
//! (its `Ord`) and then by the order in which timers were armed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Handle for an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(u64);

type QueueKey<K> = (u64, K, u64);

#[derive(Debug, Clone, Copy)]
struct Armed {
    id: TimerId,
    period_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Scheduler<K> {
    now_ms: u64,
    next_seq: u64,
    queue: BTreeMap<QueueKey<K>, Armed>,
    index: HashMap<TimerId, QueueKey<K>>,
}

impl<K: Ord + Copy> Scheduler<K> {
    pub fn new() -> Self {
        Self {
            now_ms: 0,
            next_seq: 0,
            queue: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.index.contains_key(&id)
    }

    /// Virtual time at which the next timer fires.
    pub fn next_due(&self) -> Option<u64> {
        self.queue.keys().next().map(|(due, _, _)| *due)
    }

    /// Arm a one-shot timer `delay_ms` from now.
    pub fn set_timeout(&mut self, delay_ms: u64, kind: K) -> TimerId {
        let id = TimerId(self.bump_seq());
        self.arm(id, self.now_ms.saturating_add(delay_ms), kind, None);
        id
    }

    /// Arm a repeating timer. A zero period is treated as 1 ms.
    pub fn set_interval(&mut self, period_ms: u64, kind: K) -> TimerId {
        let period_ms = period_ms.max(1);
        let id = TimerId(self.bump_seq());
        self.arm(id, self.now_ms.saturating_add(period_ms), kind, Some(period_ms));
        id
    }

    /// Disarm a timer. Returns false if it was not armed.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.index.remove(&id) {
            Some(key) => {
                self.queue.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Disarm everything. Returns how many timers were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        self.index.clear();
        count
    }

    /// Take the earliest timer due at or before `until_ms`.
    ///
    /// The clock moves to the timer's due time. Intervals are re-armed one
    /// period later under the same id.
    pub fn pop_due(&mut self, until_ms: u64) -> Option<(TimerId, K)> {
        let key = *self.queue.keys().next()?;
        let (due, kind, _) = key;
        if due > until_ms {
            return None;
        }
        let armed = self.queue.remove(&key)?;
        self.index.remove(&armed.id);
        self.now_ms = self.now_ms.max(due);

        if let Some(period) = armed.period_ms {
            self.arm(armed.id, due.saturating_add(period), kind, Some(period));
        }
        Some((armed.id, kind))
    }

    /// Move the clock forward to `now_ms` once all due timers are drained.
    pub fn settle(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    fn arm(&mut self, id: TimerId, due_ms: u64, kind: K, period_ms: Option<u64>) {
        let key = (due_ms, kind, self.bump_seq());
        self.queue.insert(key, Armed { id, period_ms });
        self.index.insert(id, key);
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

impl<K: Ord + Copy> Default for Scheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}
