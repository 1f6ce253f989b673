//! Deadline queue shared by claim and lockdown expiry.
//!
//! One live deadline per key. Re-scheduling a key invalidates its previous
//! entry; stale heap entries are discarded lazily when they surface.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

use greenwave_ir::types::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Entry<K> {
    at: Timestamp,
    key: K,
    token: u64,
}

/// A deadline that came due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueEntry<K> {
    pub key: K,
    pub at: Timestamp,
    pub token: u64,
}

#[derive(Debug)]
pub struct ExpiryQueue<K> {
    heap: BinaryHeap<Reverse<Entry<K>>>,
    live: HashMap<K, (u64, Timestamp)>,
    next_token: u64,
}

impl<K: Clone + Eq + Hash + Ord> ExpiryQueue<K> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_token: 1,
        }
    }

    /// Schedule `key` to come due at `at`, replacing any earlier schedule
    /// for the same key. Returns the token identifying this schedule.
    pub fn schedule(&mut self, key: K, at: Timestamp) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.live.insert(key.clone(), (token, at));
        self.heap.push(Reverse(Entry { at, key, token }));
        token
    }

    /// Drop the live schedule for `key`. Returns whether one existed.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.live.remove(key).is_some()
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.live.contains_key(key)
    }

    pub fn deadline_of(&self, key: &K) -> Option<Timestamp> {
        self.live.get(key).map(|&(_, at)| at)
    }

    /// Remove and return every live entry with `at <= now`, earliest first.
    pub fn pop_due(&mut self, now: Timestamp) -> Vec<DueEntry<K>> {
        let mut due = Vec::new();
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.at > now {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            if self.is_live(&entry) {
                self.live.remove(&entry.key);
                due.push(DueEntry {
                    key: entry.key,
                    at: entry.at,
                    token: entry.token,
                });
            }
        }
        due
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        while let Some(Reverse(head)) = self.heap.peek() {
            if self.is_live(head) {
                return Some(head.at);
            }
            self.heap.pop();
        }
        None
    }

    /// Number of live schedules.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn is_live(&self, entry: &Entry<K>) -> bool {
        self.live
            .get(&entry.key)
            .is_some_and(|&(token, _)| token == entry.token)
    }
}

impl<K: Clone + Eq + Hash + Ord> Default for ExpiryQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
