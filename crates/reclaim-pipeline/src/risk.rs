//! Risk tiers for cleanup actions.

use serde::{Deserialize, Serialize};

/// Risk tier assigned to a cleanup step or dangerous action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Only removes data nothing references; runs without asking.
    Safe,
    /// Removes data that might still be wanted; the operator must agree first.
    RequiresConfirmation,
    /// Irreversible. Needs an explicit unlock in addition to confirmation.
    Dangerous,
}

impl RiskTier {
    /// Whether the confirmer is consulted before running.
    pub fn requires_confirmation(self) -> bool {
        matches!(self, Self::RequiresConfirmation | Self::Dangerous)
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::RequiresConfirmation => write!(f, "requires-confirmation"),
            Self::Dangerous => write!(f, "dangerous"),
        }
    }
}
