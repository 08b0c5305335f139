//! Channel dispute status

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeStatus {
    /// startExit submitted, not yet confirmed
    #[serde(rename = "CD_PENDING")]
    Pending,
    /// startExit confirmed, challenge period running
    #[serde(rename = "CD_IN_DISPUTE_PERIOD")]
    InDisputePeriod,
    #[serde(rename = "CD_FINISHED")]
    Finished,
    #[serde(rename = "CD_FAILED")]
    Failed,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Pending => "CD_PENDING",
            DisputeStatus::InDisputePeriod => "CD_IN_DISPUTE_PERIOD",
            DisputeStatus::Finished => "CD_FINISHED",
            DisputeStatus::Failed => "CD_FAILED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, DisputeStatus::Pending | DisputeStatus::InDisputePeriod)
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DisputeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CD_PENDING" => Ok(DisputeStatus::Pending),
            "CD_IN_DISPUTE_PERIOD" => Ok(DisputeStatus::InDisputePeriod),
            "CD_FINISHED" => Ok(DisputeStatus::Finished),
            "CD_FAILED" => Ok(DisputeStatus::Failed),
            _ => Err(format!("Unknown dispute status: {}", s)),
        }
    }
}
