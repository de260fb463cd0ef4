//! Persisted record shape
//!
//! One row per intent: scalar columns plus JSON arrays for the nested
//! lists. Any structured backend must use this exact shape so that logs
//! replay to identical hashes across engines.

use crate::backend::{StoreError, StoreResult};
use chrono::{DateTime, SecondsFormat, Utc};
use concord_contract::Intent;
use serde::{Deserialize, Serialize};

/// Flat row form of an [`Intent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    pub id: String,
    pub agent_id: String,
    /// ISO-8601, full sub-second precision
    pub timestamp: String,
    pub intent: String,
    pub provides: String,
    pub requires: String,
    pub constraints: String,
    pub evidence: String,
    pub stability: f64,
    pub parent_id: Option<String>,
}

impl IntentRecord {
    /// Flatten an intent
    ///
    /// # Errors
    /// Returns error if a nested list fails to serialize.
    pub fn from_intent(intent: &Intent) -> StoreResult<Self> {
        Ok(Self {
            id: intent.id.clone(),
            agent_id: intent.agent_id.clone(),
            timestamp: format_timestamp(&intent.timestamp),
            intent: intent.intent.clone(),
            provides: serde_json::to_string(&intent.provides)?,
            requires: serde_json::to_string(&intent.requires)?,
            constraints: serde_json::to_string(&intent.constraints)?,
            evidence: serde_json::to_string(&intent.evidence)?,
            stability: intent.stability,
            parent_id: intent.parent_id.clone(),
        })
    }

    /// Rebuild the intent
    ///
    /// # Errors
    /// Returns error on a malformed timestamp or JSON column.
    pub fn into_intent(self) -> StoreResult<Intent> {
        Ok(Intent {
            timestamp: parse_timestamp(&self.timestamp)?,
            provides: serde_json::from_str(&self.provides)?,
            requires: serde_json::from_str(&self.requires)?,
            constraints: serde_json::from_str(&self.constraints)?,
            evidence: serde_json::from_str(&self.evidence)?,
            id: self.id,
            agent_id: self.agent_id,
            intent: self.intent,
            stability: self.stability,
            parent_id: self.parent_id,
        })
    }
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_contract::{content_hash_intent, Constraint, Evidence, InterfaceKind, InterfaceSpec};
    use pretty_assertions::assert_eq;

    #[test]
    fn record_preserves_content_hash() {
        let intent = Intent::new("agent-a", "orders")
            .providing(
                InterfaceSpec::new("Order", InterfaceKind::Model)
                    .with_signature("id: UUID")
                    .with_tags(["orders", "db"]),
            )
            .constrained_by(Constraint::required("order", "soft delete").affecting(["orders"]))
            .with_evidence(Evidence::code_committed("abc123"))
            .with_stability(0.5);

        let record = IntentRecord::from_intent(&intent).unwrap();
        assert!(record.provides.starts_with('['));
        assert!(record.timestamp.ends_with('Z'));

        let back = record.into_intent().unwrap();
        assert_eq!(back, intent);
        assert_eq!(content_hash_intent(&back), content_hash_intent(&intent));
    }

    #[test]
    fn malformed_timestamp_is_reported() {
        let mut record = IntentRecord::from_intent(
            &Intent::new("a", "x").providing(InterfaceSpec::new("X", InterfaceKind::Config)),
        )
        .unwrap();
        record.timestamp = "yesterday".into();
        assert!(matches!(
            record.into_intent(),
            Err(StoreError::InvalidTimestamp { .. })
        ));
    }
}
