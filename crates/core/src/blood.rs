use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LifelineError;

/// The eight ABO/Rh blood groups.
///
/// Declaration order doubles as the deterministic tie-break order whenever
/// two groups are otherwise equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BloodGroup {
    #[serde(rename = "O-")]
    ONeg,
    #[serde(rename = "O+")]
    OPos,
    #[serde(rename = "A-")]
    ANeg,
    #[serde(rename = "A+")]
    APos,
    #[serde(rename = "B-")]
    BNeg,
    #[serde(rename = "B+")]
    BPos,
    #[serde(rename = "AB-")]
    AbNeg,
    #[serde(rename = "AB+")]
    AbPos,
}

/// How donor and recipient groups are paired during matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Standard red-cell compatibility (O- universal donor, AB+ universal recipient).
    #[default]
    Compatible,
    /// Strict equality between donor and recipient groups.
    Exact,
}

impl FromStr for MatchMode {
    type Err = LifelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compatible" => Ok(MatchMode::Compatible),
            "exact" => Ok(MatchMode::Exact),
            other => Err(LifelineError::InvalidRequest(format!(
                "unknown match mode '{other}'"
            ))),
        }
    }
}

impl BloodGroup {
    pub const ALL: [BloodGroup; 8] = [
        BloodGroup::ONeg,
        BloodGroup::OPos,
        BloodGroup::ANeg,
        BloodGroup::APos,
        BloodGroup::BNeg,
        BloodGroup::BPos,
        BloodGroup::AbNeg,
        BloodGroup::AbPos,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BloodGroup::ONeg => "O-",
            BloodGroup::OPos => "O+",
            BloodGroup::ANeg => "A-",
            BloodGroup::APos => "A+",
            BloodGroup::BNeg => "B-",
            BloodGroup::BPos => "B+",
            BloodGroup::AbNeg => "AB-",
            BloodGroup::AbPos => "AB+",
        }
    }

    /// Whether red cells of `self` may be transfused into a `recipient`.
    pub fn can_donate_to(self, recipient: BloodGroup) -> bool {
        DONOR_MATRIX[self.index()][recipient.index()]
    }

    /// Whether `donor` may supply a request for `self` under `mode`.
    pub fn accepts_from(self, donor: BloodGroup, mode: MatchMode) -> bool {
        match mode {
            MatchMode::Compatible => donor.can_donate_to(self),
            MatchMode::Exact => donor == self,
        }
    }

    /// All groups a recipient of `self` can receive under `mode`, in group order.
    pub fn donors_for(self, mode: MatchMode) -> Vec<BloodGroup> {
        BloodGroup::ALL
            .into_iter()
            .filter(|donor| self.accepts_from(*donor, mode))
            .collect()
    }
}

// Rows are donors, columns recipients, both in declaration order:
// O- O+ A- A+ B- B+ AB- AB+
const DONOR_MATRIX: [[bool; 8]; 8] = [
    [true, true, true, true, true, true, true, true],       // O-
    [false, true, false, true, false, true, false, true],   // O+
    [false, false, true, true, false, false, true, true],   // A-
    [false, false, false, true, false, false, false, true], // A+
    [false, false, false, false, true, true, true, true],   // B-
    [false, false, false, false, false, true, false, true], // B+
    [false, false, false, false, false, false, true, true], // AB-
    [false, false, false, false, false, false, false, true], // AB+
];

impl fmt::Display for BloodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BloodGroup {
    type Err = LifelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        BloodGroup::ALL
            .into_iter()
            .find(|g| g.as_str() == normalized)
            .ok_or_else(|| LifelineError::InvalidRequest(format!("unknown blood group '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universal_donor_and_recipient() {
        for group in BloodGroup::ALL {
            assert!(BloodGroup::ONeg.can_donate_to(group));
            assert!(group.can_donate_to(BloodGroup::AbPos));
        }
    }

    #[test]
    fn rh_positive_never_donates_to_negative() {
        let positives = [BloodGroup::OPos, BloodGroup::APos, BloodGroup::BPos, BloodGroup::AbPos];
        let negatives = [BloodGroup::ONeg, BloodGroup::ANeg, BloodGroup::BNeg, BloodGroup::AbNeg];
        for donor in positives {
            for recipient in negatives {
                assert!(!donor.can_donate_to(recipient), "{donor} -> {recipient}");
            }
        }
    }

    #[test]
    fn ab_negative_receives_only_negative_groups() {
        let donors = BloodGroup::AbNeg.donors_for(MatchMode::Compatible);
        assert_eq!(
            donors,
            vec![BloodGroup::ONeg, BloodGroup::ANeg, BloodGroup::BNeg, BloodGroup::AbNeg]
        );
    }

    #[test]
    fn a_and_b_are_mutually_incompatible() {
        assert!(!BloodGroup::APos.can_donate_to(BloodGroup::BPos));
        assert!(!BloodGroup::BNeg.can_donate_to(BloodGroup::ANeg));
    }

    #[test]
    fn exact_mode_is_equality() {
        assert_eq!(BloodGroup::OPos.donors_for(MatchMode::Exact), vec![BloodGroup::OPos]);
        assert!(!BloodGroup::OPos.accepts_from(BloodGroup::ONeg, MatchMode::Exact));
        assert!(BloodGroup::OPos.accepts_from(BloodGroup::ONeg, MatchMode::Compatible));
    }

    #[test]
    fn parse_and_display() {
        assert_eq!("ab-".parse::<BloodGroup>().unwrap(), BloodGroup::AbNeg);
        assert_eq!(" O+ ".parse::<BloodGroup>().unwrap(), BloodGroup::OPos);
        assert!("C+".parse::<BloodGroup>().is_err());
        assert_eq!(BloodGroup::BNeg.to_string(), "B-");
    }

    #[test]
    fn serde_uses_clinical_notation() {
        let json = serde_json::to_string(&BloodGroup::AbPos).unwrap();
        assert_eq!(json, "\"AB+\"");
        let parsed: BloodGroup = serde_json::from_str("\"O-\"").unwrap();
        assert_eq!(parsed, BloodGroup::ONeg);
    }
}
