//! Indexed binary max-heap over request ids.
//!
//! A position map makes `update` and `remove` O(log n) instead of a linear
//! scan, which the queue needs for overrides, touches and cancellations.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lifeline_core::RequestId;

/// Ordering key of one queued request.
///
/// Greater means served first: higher score, then earlier submission, then
/// the lexicographically smaller id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapKey {
    pub score: u32,
    pub submitted_at: DateTime<Utc>,
    pub id: RequestId,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct IndexedHeap {
    entries: Vec<HeapKey>,
    positions: HashMap<RequestId, usize>,
}

impl IndexedHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn peek(&self) -> Option<&HeapKey> {
        self.entries.first()
    }

    pub fn get(&self, id: &str) -> Option<&HeapKey> {
        self.positions.get(id).map(|&i| &self.entries[i])
    }

    /// Insert `key`, or replace the key already stored under the same id.
    pub fn push(&mut self, key: HeapKey) {
        if let Some(&i) = self.positions.get(&key.id) {
            self.entries[i] = key;
            self.restore(i);
            return;
        }
        let i = self.entries.len();
        self.positions.insert(key.id.clone(), i);
        self.entries.push(key);
        self.sift_up(i);
    }

    pub fn pop(&mut self) -> Option<HeapKey> {
        if self.entries.is_empty() {
            return None;
        }
        self.remove_at(0)
    }

    pub fn remove(&mut self, id: &str) -> Option<HeapKey> {
        let i = *self.positions.get(id)?;
        self.remove_at(i)
    }

    /// Change the score of `id` (increase or decrease key). Returns false if
    /// the id is not queued.
    pub fn update_score(&mut self, id: &str, score: u32) -> bool {
        match self.positions.get(id) {
            Some(&i) => {
                self.entries[i].score = score;
                self.restore(i);
                true
            }
            None => false,
        }
    }

    /// Rescore every entry, then heapify in O(n).
    pub fn rebuild<F>(&mut self, mut rescore: F)
    where
        F: FnMut(&HeapKey) -> u32,
    {
        for entry in &mut self.entries {
            entry.score = rescore(entry);
        }
        for i in (0..self.entries.len() / 2).rev() {
            self.sift_down(i);
        }
    }

    /// Entries in storage (not priority) order.
    pub fn iter(&self) -> impl Iterator<Item = &HeapKey> {
        self.entries.iter()
    }

    fn remove_at(&mut self, i: usize) -> Option<HeapKey> {
        let last = self.entries.len().checked_sub(1)?;
        self.swap(i, last);
        let removed = self.entries.pop()?;
        self.positions.remove(&removed.id);
        if i < self.entries.len() {
            self.restore(i);
        }
        Some(removed)
    }

    fn restore(&mut self, i: usize) {
        if i > 0 && self.entries[i] > self.entries[(i - 1) / 2] {
            self.sift_up(i);
        } else {
            self.sift_down(i);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.entries[i] <= self.entries[parent] {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.entries.len();
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut largest = i;
            if left < n && self.entries[left] > self.entries[largest] {
                largest = left;
            }
            if right < n && self.entries[right] > self.entries[largest] {
                largest = right;
            }
            if largest == i {
                break;
            }
            self.swap(i, largest);
            i = largest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.entries.swap(a, b);
        self.positions.insert(self.entries[a].id.clone(), a);
        self.positions.insert(self.entries[b].id.clone(), b);
    }
}
