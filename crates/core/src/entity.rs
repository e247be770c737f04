use serde::{Deserialize, Serialize};

pub type RequestId = String;
pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Donor,
    BloodBank,
    RequestSite,
}

impl NodeKind {
    /// Lower is preferred when two supply nodes are otherwise tied.
    pub fn supply_preference(self) -> u8 {
        match self {
            NodeKind::BloodBank => 0,
            NodeKind::Donor => 1,
            NodeKind::RequestSite => 2,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Donor => write!(f, "Donor"),
            NodeKind::BloodBank => write!(f, "BloodBank"),
            NodeKind::RequestSite => write!(f, "RequestSite"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Availability {
    Available,
    Limited,
    Unavailable,
}

impl Availability {
    pub fn can_supply(self) -> bool {
        !matches!(self, Availability::Unavailable)
    }

    /// Lower is preferred when two supply nodes are otherwise tied.
    pub fn preference(self) -> u8 {
        match self {
            Availability::Available => 0,
            Availability::Limited => 1,
            Availability::Unavailable => 2,
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::Available => write!(f, "Available"),
            Availability::Limited => write!(f, "Limited"),
            Availability::Unavailable => write!(f, "Unavailable"),
        }
    }
}
