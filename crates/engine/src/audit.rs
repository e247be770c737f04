//! Capped in-memory log of emergency overrides.
//!
//! Oldest entries are evicted first once the cap is reached.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use lifeline_core::RequestId;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverrideAuditEntry {
    pub request_id: RequestId,
    pub authorized_by: String,
    pub reason: String,
    pub previous_score: u32,
    pub new_score: u32,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct OverrideAuditLog {
    entries: VecDeque<OverrideAuditEntry>,
    max_entries: usize,
}

impl Default for OverrideAuditLog {
    fn default() -> Self {
        Self::with_max_entries(500)
    }
}

impl OverrideAuditLog {
    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max.max(1),
        }
    }

    pub fn record(&mut self, entry: OverrideAuditEntry) {
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Newest first, at most `limit` entries.
    pub fn recent(&self, limit: usize) -> Vec<OverrideAuditEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn for_request(&self, request_id: &str) -> Vec<OverrideAuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
