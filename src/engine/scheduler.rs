//! Due-time queue for per-agent health checks.
//!
//! One min-heap replaces a timer per agent. Cancelled or rescheduled
//! entries stay in the heap and are skipped when popped: an entry is
//! live only if its sequence number matches the agent's current one.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Default)]
pub struct DueQueue {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, u64, String)>>,
    /// agent id → sequence of its live entry
    live: HashMap<String, u64>,
    seq: u64,
}

impl DueQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or reschedule) `id` at `due`.
    pub fn schedule(&mut self, id: &str, due: DateTime<Utc>) {
        self.seq += 1;
        self.live.insert(id.to_string(), self.seq);
        self.heap.push(Reverse((due, self.seq, id.to_string())));
    }

    /// Returns false if `id` was not scheduled.
    pub fn cancel(&mut self, id: &str) -> bool {
        self.live.remove(id).is_some()
    }

    fn is_live(&self, seq: u64, id: &str) -> bool {
        self.live.get(id) == Some(&seq)
    }

    fn drop_stale(&mut self) {
        while let Some(Reverse((_, seq, id))) = self.heap.peek() {
            if self.is_live(*seq, id) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Earliest live due time.
    pub fn next_due(&mut self) -> Option<DateTime<Utc>> {
        self.drop_stale();
        self.heap.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Remove and return every agent due at or before `now`, earliest first.
    /// Popped agents are no longer scheduled.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut due = Vec::new();
        loop {
            self.drop_stale();
            match self.heap.peek() {
                Some(Reverse((at, _, _))) if *at <= now => {}
                _ => break,
            }
            if let Some(Reverse((_, _, id))) = self.heap.pop() {
                self.live.remove(&id);
                due.push(id);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
