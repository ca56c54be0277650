//! Indexed binary min-heap of deferred requests.
//!
//! Ordered by `ready_at`. A side map tracks each request's slot so an
//! existing entry can be moved earlier in place; a request is never stored
//! twice.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::request::Request;

/// A request waiting for its ready time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Deferred {
    pub request: Request,
    pub ready_at: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct DeferHeap {
    entries: Vec<Deferred>,
    index: HashMap<Request, usize>,
}

impl DeferHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts `entry`, or moves an existing entry for the same request earlier.
    ///
    /// A later `ready_at` for an already scheduled request is ignored.
    pub fn schedule(&mut self, entry: Deferred) {
        if let Some(&i) = self.index.get(&entry.request) {
            if entry.ready_at < self.entries[i].ready_at {
                self.entries[i].ready_at = entry.ready_at;
                self.sift_up(i);
            }
            return;
        }

        let i = self.entries.len();
        self.index.insert(entry.request.clone(), i);
        self.entries.push(entry);
        self.sift_up(i);
    }

    /// Returns the soonest ready time.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.entries.first().map(|e| e.ready_at)
    }

    /// Removes and returns the soonest entry if it is ready at `now`.
    pub fn pop_ready(&mut self, now: Instant) -> Option<Deferred> {
        if self.next_ready_at()? > now {
            return None;
        }
        self.pop()
    }

    pub fn pop(&mut self) -> Option<Deferred> {
        let last = self.entries.len().checked_sub(1)?;
        self.swap(0, last);
        let entry = self.entries.pop()?;
        self.index.remove(&entry.request);
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Some(entry)
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.entries[i].ready_at >= self.entries[parent].ready_at {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut smallest = i;
            if left < len && self.entries[left].ready_at < self.entries[smallest].ready_at {
                smallest = left;
            }
            if right < len && self.entries[right].ready_at < self.entries[smallest].ready_at {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.entries.swap(a, b);
        for i in [a, b] {
            if let Some(slot) = self.index.get_mut(&self.entries[i].request) {
                *slot = i;
            }
        }
    }
}
