use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lifeline_core::NoMatchReason;
use serde::Serialize;

/// Engine operational metrics exposed to the dashboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineMetrics {
    pub requests_submitted: u64,
    pub requests_rejected: u64,
    pub cycles_run: u64,
    pub requests_attempted: u64,
    pub matches_committed: u64,
    /// No-match outcomes keyed by reason code.
    pub no_match: BTreeMap<String, u64>,
    pub inventory_races: u64,
    /// Matches dropped because the request was cancelled while routing.
    pub cancelled_in_flight: u64,
    pub overrides_applied: u64,
    pub requests_fulfilled: u64,
    pub requests_cancelled: u64,
    pub event_delivery_failures: u64,
    pub avg_cycle_ms: f64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl EngineMetrics {
    /// Record a finished cycle.
    pub fn record_cycle(&mut self, duration: Duration, at: DateTime<Utc>) {
        self.cycles_run += 1;
        self.last_cycle_at = Some(at);

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let ms = duration.as_secs_f64() * 1000.0;
        self.avg_cycle_ms += (ms - self.avg_cycle_ms) / self.cycles_run as f64;
    }

    pub fn record_no_match(&mut self, reason: NoMatchReason) {
        *self.no_match.entry(reason.code().to_string()).or_default() += 1;
    }
}
