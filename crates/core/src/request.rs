use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blood::BloodGroup;
use crate::entity::{NodeId, RequestId};
use crate::error::LifelineError;
use crate::matching::NoMatchReason;

pub const MIN_QUANTITY_UNITS: u32 = 1;
pub const MAX_QUANTITY_UNITS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Urgency {
    Critical,
    High,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequesterType {
    Hospital,
    Doctor,
    Individual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Processing,
    Fulfilled,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Fulfilled | RequestStatus::Cancelled)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Forward-only lifecycle; Cancel is allowed from any active state.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Fulfilled)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "Pending"),
            RequestStatus::Processing => write!(f, "Processing"),
            RequestStatus::Fulfilled => write!(f, "Fulfilled"),
            RequestStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::Critical => write!(f, "Critical"),
            Urgency::High => write!(f, "High"),
            Urgency::Normal => write!(f, "Normal"),
        }
    }
}

/// An active or archived blood request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub patient_name: String,
    pub blood_group: BloodGroup,
    pub quantity_units: u32,
    pub urgency: Urgency,
    pub requester_type: RequesterType,
    pub verified: bool,
    pub submitted_at: DateTime<Utc>,
    pub status: RequestStatus,
    /// Derived; rewritten by the queue manager whenever the request is scored.
    pub priority_score: u32,
    pub location_node_id: NodeId,
    /// Set by an audited emergency override.
    #[serde(default)]
    pub override_active: bool,
    /// Reason the most recent allocation attempt failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<NoMatchReason>,
}

impl Request {
    /// Check the fields the queue relies on for scoring and matching.
    pub fn validate(&self) -> Result<(), LifelineError> {
        if self.id.trim().is_empty() {
            return Err(LifelineError::InvalidRequest("id must not be empty".into()));
        }
        if !(MIN_QUANTITY_UNITS..=MAX_QUANTITY_UNITS).contains(&self.quantity_units) {
            return Err(LifelineError::InvalidRequest(format!(
                "quantity_units must be in {MIN_QUANTITY_UNITS}..={MAX_QUANTITY_UNITS}, got {}",
                self.quantity_units
            )));
        }
        if self.location_node_id.trim().is_empty() {
            return Err(LifelineError::InvalidRequest(
                "location_node_id must not be empty".into(),
            ));
        }
        if self.status.is_terminal() {
            return Err(LifelineError::InvalidRequest(format!(
                "request {} is already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Whole minutes elapsed since submission, never negative.
    pub fn wait_minutes(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.submitted_at)
            .num_minutes()
            .max(0)
    }
}

/// Raw submission as received from the boundary.
///
/// Every field the scoring formula needs is optional here so that a missing
/// value is reported as an `InvalidRequest` rather than a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestInput {
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default)]
    pub patient_name: String,
    #[serde(default)]
    pub blood_group: Option<String>,
    #[serde(default)]
    pub quantity_units: Option<u32>,
    #[serde(default)]
    pub urgency: Option<Urgency>,
    #[serde(default)]
    pub requester_type: Option<RequesterType>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location_node_id: NodeId,
}

impl RequestInput {
    /// Validate and convert into a pending request.
    pub fn into_request(self, now: DateTime<Utc>) -> Result<Request, LifelineError> {
        let patient_name = self.patient_name.trim().to_string();
        if patient_name.is_empty() {
            return Err(LifelineError::InvalidRequest("patient_name is required".into()));
        }

        let blood_group = self
            .blood_group
            .as_deref()
            .ok_or_else(|| LifelineError::InvalidRequest("blood_group is required".into()))?
            .parse::<BloodGroup>()?;

        let urgency = self
            .urgency
            .ok_or_else(|| LifelineError::InvalidRequest("urgency is required".into()))?;

        let quantity_units = self
            .quantity_units
            .ok_or_else(|| LifelineError::InvalidRequest("quantity_units is required".into()))?;

        let id = match self.id {
            Some(id) => id.trim().to_string(),
            None => format!("REQ-{}", Uuid::new_v4().simple()),
        };

        let request = Request {
            id,
            patient_name,
            blood_group,
            quantity_units,
            urgency,
            requester_type: self.requester_type.unwrap_or(RequesterType::Individual),
            verified: self.verified,
            submitted_at: self.submitted_at.unwrap_or(now),
            status: RequestStatus::Pending,
            priority_score: 0,
            location_node_id: self.location_node_id.trim().to_string(),
            override_active: false,
            last_failure: None,
        };
        request.validate()?;
        Ok(request)
    }
}

/// An audited emergency override submitted by an authorised operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideInput {
    pub authorized_by: String,
    pub reason: String,
}

impl OverrideInput {
    pub fn validate(&self) -> Result<(), LifelineError> {
        if self.authorized_by.trim().is_empty() {
            return Err(LifelineError::InvalidRequest(
                "override requires an authorising verification id".into(),
            ));
        }
        if self.reason.trim().is_empty() {
            return Err(LifelineError::InvalidRequest("override reason is required".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn input() -> RequestInput {
        RequestInput {
            id: Some("REQ-2026-001".into()),
            patient_name: "Sarah Johnson".into(),
            blood_group: Some("O-".into()),
            quantity_units: Some(4),
            urgency: Some(Urgency::Critical),
            requester_type: Some(RequesterType::Hospital),
            verified: true,
            submitted_at: None,
            location_node_id: "site-1".into(),
        }
    }

    #[test]
    fn valid_input_becomes_pending_request() {
        let now = Utc::now();
        let req = input().into_request(now).unwrap();
        assert_eq!(req.status, RequestStatus::Pending);
        assert_eq!(req.blood_group, BloodGroup::ONeg);
        assert_eq!(req.submitted_at, now);
        assert!(!req.override_active);
    }

    #[test]
    fn missing_blood_group_is_rejected() {
        let mut i = input();
        i.blood_group = None;
        let err = i.into_request(Utc::now()).unwrap_err();
        assert!(matches!(err, LifelineError::InvalidRequest(m) if m.contains("blood_group")));
    }

    #[test]
    fn missing_urgency_is_rejected() {
        let mut i = input();
        i.urgency = None;
        assert!(i.into_request(Utc::now()).is_err());
    }

    #[test]
    fn quantity_out_of_range_is_rejected() {
        for qty in [0, 11, 50] {
            let mut i = input();
            i.quantity_units = Some(qty);
            assert!(i.into_request(Utc::now()).is_err(), "qty {qty} accepted");
        }
        let mut i = input();
        i.quantity_units = Some(10);
        assert!(i.into_request(Utc::now()).is_ok());
    }

    #[test]
    fn generated_id_when_absent() {
        let mut i = input();
        i.id = None;
        let req = i.into_request(Utc::now()).unwrap();
        assert!(req.id.starts_with("REQ-"));
    }

    #[test]
    fn wait_minutes_floors_and_clamps() {
        let now = Utc::now();
        let mut req = input().into_request(now).unwrap();
        req.submitted_at = now - Duration::seconds(25 * 60 + 59);
        assert_eq!(req.wait_minutes(now), 25);
        req.submitted_at = now + Duration::minutes(3);
        assert_eq!(req.wait_minutes(now), 0);
    }

    #[test]
    fn lifecycle_transitions() {
        use RequestStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Fulfilled));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Fulfilled));
        assert!(!Fulfilled.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn override_requires_both_fields() {
        let ok = OverrideInput {
            authorized_by: "HVR-2026-789".into(),
            reason: "cardiac arrest".into(),
        };
        assert!(ok.validate().is_ok());
        let no_reason = OverrideInput {
            authorized_by: "HVR-2026-789".into(),
            reason: " ".into(),
        };
        assert!(no_reason.validate().is_err());
    }
}
