//! Priority scoring.
//!
//! ```text
//! score = urgency base        Critical 100, High 70, Normal 40
//!       + requester bonus     Hospital 30, Doctor 20, Individual 10
//!       + min(units * 2, 20)
//!       + min(wait minutes, 30)
//!       + 50 while an emergency override is active
//! capped at 200
//! ```

use chrono::{DateTime, Duration, Utc};
use lifeline_core::{Request, RequesterType, Urgency};
use serde::Serialize;

pub const MAX_SCORE: u32 = 200;
pub const OVERRIDE_BONUS: u32 = 50;
pub const WAIT_BONUS_CAP: u32 = 30;
pub const QUANTITY_BONUS_CAP: u32 = 20;

pub fn urgency_base(urgency: Urgency) -> u32 {
    match urgency {
        Urgency::Critical => 100,
        Urgency::High => 70,
        Urgency::Normal => 40,
    }
}

pub fn requester_bonus(requester: RequesterType) -> u32 {
    match requester {
        RequesterType::Hospital => 30,
        RequesterType::Doctor => 20,
        RequesterType::Individual => 10,
    }
}

pub fn quantity_bonus(units: u32) -> u32 {
    units.saturating_mul(2).min(QUANTITY_BONUS_CAP)
}

/// One point per whole minute waited.
pub fn wait_bonus(wait_minutes: i64) -> u32 {
    u32::try_from(wait_minutes.max(0))
        .unwrap_or(u32::MAX)
        .min(WAIT_BONUS_CAP)
}

/// Per-term view of a score, as shown next to a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub urgency: u32,
    pub requester: u32,
    pub quantity: u32,
    pub wait: u32,
    pub override_bonus: u32,
    pub total: u32,
}

pub fn breakdown(request: &Request, now: DateTime<Utc>) -> ScoreBreakdown {
    let urgency = urgency_base(request.urgency);
    let requester = requester_bonus(request.requester_type);
    let quantity = quantity_bonus(request.quantity_units);
    let wait = wait_bonus(request.wait_minutes(now));
    let override_bonus = if request.override_active { OVERRIDE_BONUS } else { 0 };
    ScoreBreakdown {
        urgency,
        requester,
        quantity,
        wait,
        override_bonus,
        total: (urgency + requester + quantity + wait + override_bonus).min(MAX_SCORE),
    }
}

pub fn score(request: &Request, now: DateTime<Utc>) -> u32 {
    breakdown(request, now).total
}

/// Instant at which the wait bonus of `request` next grows, if it still can.
pub fn next_rescore_at(request: &Request, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let waited = request.wait_minutes(now);
    if waited >= i64::from(WAIT_BONUS_CAP) {
        return None;
    }
    Some(request.submitted_at + Duration::minutes(waited + 1))
}
