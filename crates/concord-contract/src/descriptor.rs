//! Machine-readable contract description

use crate::invariants::GraphInvariant;
use crate::policy::{ConflictClass, ResolutionPolicy};
use crate::stability::StabilityWeights;
use serde::{Deserialize, Serialize};

/// Contract revision every participant must agree on
pub const CONTRACT_VERSION: &str = "1.0.0";

/// The rules an agent needs to reason about the graph without linking this crate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDescriptor {
    pub version: String,
    pub invariants: Vec<GraphInvariant>,
    pub conflict_classes: Vec<ConflictClass>,
    pub weights: StabilityWeights,
    pub policy: ResolutionPolicy,
}

impl ContractDescriptor {
    #[must_use]
    pub fn new(weights: StabilityWeights, policy: ResolutionPolicy) -> Self {
        Self {
            version: CONTRACT_VERSION.to_string(),
            invariants: GraphInvariant::ALL.to_vec(),
            conflict_classes: ConflictClass::ALL.to_vec(),
            weights,
            policy,
        }
    }

    /// Pretty JSON rendering
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for ContractDescriptor {
    fn default() -> Self {
        Self::new(StabilityWeights::default(), ResolutionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_lists_rules() {
        let json: serde_json::Value =
            serde_json::from_str(&ContractDescriptor::default().to_json().unwrap()).unwrap();
        assert_eq!(json["version"], CONTRACT_VERSION);
        assert_eq!(json["invariants"].as_array().unwrap().len(), 4);
        assert_eq!(
            json["conflict_classes"],
            serde_json::json!(["HARD_FAIL", "AUTO_RESOLVE", "ESCALATE"])
        );
        assert_eq!(json["weights"]["base"], 0.3);
        assert_eq!(json["policy"]["stability_tie_epsilon"], 0.01);
    }
}
