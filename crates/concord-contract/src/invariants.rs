//! Graph invariants and publish validation
//!
//! [`validate_publish`] is the single gate every mutation passes before any
//! write happens. It returns the first violated invariant and never touches
//! the graph state it inspects.

use crate::model::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Checked properties of the intent graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphInvariant {
    /// Every intent id appears at most once
    UniqueIds,
    /// Published fields are never overwritten
    AppendOnly,
    /// Parents exist and precede their successors
    CausalOrdering,
    /// Intents identify their agent and declare something
    WellFormed,
}

impl GraphInvariant {
    pub const ALL: [Self; 4] = [
        Self::UniqueIds,
        Self::AppendOnly,
        Self::CausalOrdering,
        Self::WellFormed,
    ];
}

/// A broken [`GraphInvariant`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "invariant", rename_all = "snake_case")]
pub enum ContractViolation {
    #[error("intent id '{id}' already exists in the graph")]
    DuplicateId { id: String },

    #[error("intent '{id}' names itself as parent")]
    SelfParent { id: String },

    #[error("parent '{parent_id}' of intent '{id}' does not exist in the graph")]
    MissingParent { id: String, parent_id: String },

    #[error("intent '{id}' is older than its parent '{parent_id}'")]
    TimestampRegression { id: String, parent_id: String },

    #[error("intent '{id}' has an empty agent id")]
    MissingAgent { id: String },

    #[error("intent '{id}' declares no provides, requires or constraints")]
    EmptyIntent { id: String },
}

impl ContractViolation {
    /// The invariant this violation breaks
    #[must_use]
    pub const fn invariant(&self) -> GraphInvariant {
        match self {
            Self::DuplicateId { .. } => GraphInvariant::UniqueIds,
            Self::SelfParent { .. } => GraphInvariant::AppendOnly,
            Self::MissingParent { .. } | Self::TimestampRegression { .. } => {
                GraphInvariant::CausalOrdering
            }
            Self::MissingAgent { .. } | Self::EmptyIntent { .. } => GraphInvariant::WellFormed,
        }
    }

    /// Id of the intent that triggered the violation
    #[must_use]
    pub fn intent_id(&self) -> &str {
        match self {
            Self::DuplicateId { id }
            | Self::SelfParent { id }
            | Self::MissingParent { id, .. }
            | Self::TimestampRegression { id, .. }
            | Self::MissingAgent { id }
            | Self::EmptyIntent { id } => id,
        }
    }
}

/// Read-only view of a graph sufficient for invariant checks
pub trait GraphState {
    /// Whether an intent with this id has been published
    fn contains(&self, id: &str) -> bool;

    /// Timestamp of a published intent
    fn timestamp_of(&self, id: &str) -> Option<DateTime<Utc>>;
}

impl GraphState for BTreeMap<String, DateTime<Utc>> {
    fn contains(&self, id: &str) -> bool {
        self.contains_key(id)
    }

    fn timestamp_of(&self, id: &str) -> Option<DateTime<Utc>> {
        self.get(id).copied()
    }
}

impl GraphState for HashMap<String, DateTime<Utc>> {
    fn contains(&self, id: &str) -> bool {
        self.contains_key(id)
    }

    fn timestamp_of(&self, id: &str) -> Option<DateTime<Utc>> {
        self.get(id).copied()
    }
}

impl GraphState for BTreeMap<String, Intent> {
    fn contains(&self, id: &str) -> bool {
        self.contains_key(id)
    }

    fn timestamp_of(&self, id: &str) -> Option<DateTime<Utc>> {
        self.get(id).map(|intent| intent.timestamp)
    }
}

impl<T: GraphState + ?Sized> GraphState for &T {
    fn contains(&self, id: &str) -> bool {
        (**self).contains(id)
    }

    fn timestamp_of(&self, id: &str) -> Option<DateTime<Utc>> {
        (**self).timestamp_of(id)
    }
}

/// A base state with staged, not yet committed intents layered on top
#[derive(Debug)]
pub struct Overlay<'a, S: ?Sized> {
    base: &'a S,
    staged: BTreeMap<String, DateTime<Utc>>,
}

impl<'a, S: GraphState + ?Sized> Overlay<'a, S> {
    #[inline]
    #[must_use]
    pub fn new(base: &'a S) -> Self {
        Self {
            base,
            staged: BTreeMap::new(),
        }
    }

    /// Stage an intent; later checks see it as published
    pub fn stage(&mut self, intent: &Intent) {
        self.staged.insert(intent.id.clone(), intent.timestamp);
    }

    #[inline]
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }
}

impl<S: GraphState + ?Sized> GraphState for Overlay<'_, S> {
    fn contains(&self, id: &str) -> bool {
        self.staged.contains_key(id) || self.base.contains(id)
    }

    fn timestamp_of(&self, id: &str) -> Option<DateTime<Utc>> {
        self.staged
            .get(id)
            .copied()
            .or_else(|| self.base.timestamp_of(id))
    }
}

/// Check every graph invariant for publishing `candidate` into `state`
///
/// Checks run in a fixed order (well-formedness, unique id, append-only,
/// causal ordering) and the first failure is returned.
///
/// # Errors
/// Returns the first [`ContractViolation`] found.
pub fn validate_publish<S>(state: &S, candidate: &Intent) -> Result<(), ContractViolation>
where
    S: GraphState + ?Sized,
{
    let id = || candidate.id.clone();

    if candidate.agent_id.trim().is_empty() {
        return Err(ContractViolation::MissingAgent { id: id() });
    }
    if candidate.is_empty() {
        return Err(ContractViolation::EmptyIntent { id: id() });
    }
    if state.contains(&candidate.id) {
        return Err(ContractViolation::DuplicateId { id: id() });
    }
    if let Some(parent_id) = &candidate.parent_id {
        if *parent_id == candidate.id {
            return Err(ContractViolation::SelfParent { id: id() });
        }
        let Some(parent_ts) = state.timestamp_of(parent_id) else {
            return Err(ContractViolation::MissingParent {
                id: id(),
                parent_id: parent_id.clone(),
            });
        };
        if candidate.timestamp < parent_ts {
            return Err(ContractViolation::TimestampRegression {
                id: id(),
                parent_id: parent_id.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InterfaceKind, InterfaceSpec};
    use chrono::{Duration, TimeZone};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 9, minute, 0).unwrap()
    }

    fn intent(id: &str, minute: u32) -> Intent {
        Intent::new("agent-a", "work")
            .with_id(id)
            .with_timestamp(at(minute))
            .providing(InterfaceSpec::new("thing", InterfaceKind::Function))
    }

    fn state(entries: &[(&str, u32)]) -> BTreeMap<String, DateTime<Utc>> {
        entries
            .iter()
            .map(|(id, m)| ((*id).to_string(), at(*m)))
            .collect()
    }

    #[test]
    fn accepts_fresh_intent() {
        assert_eq!(validate_publish(&state(&[]), &intent("a", 0)), Ok(()));
    }

    #[test]
    fn rejects_duplicate_regardless_of_content() {
        let graph = state(&[("a", 0)]);
        let mut other = intent("a", 30);
        other.intent = "completely different".into();
        let err = validate_publish(&graph, &other).unwrap_err();
        assert_eq!(err, ContractViolation::DuplicateId { id: "a".into() });
        assert_eq!(err.invariant(), GraphInvariant::UniqueIds);
    }

    #[test]
    fn rejects_missing_parent() {
        let err = validate_publish(&state(&[]), &intent("b", 1).with_parent("a")).unwrap_err();
        assert_eq!(err.invariant(), GraphInvariant::CausalOrdering);
        assert_eq!(err.intent_id(), "b");
    }

    #[test]
    fn rejects_child_older_than_parent() {
        let graph = state(&[("a", 10)]);
        let err = validate_publish(&graph, &intent("b", 5).with_parent("a")).unwrap_err();
        assert!(matches!(err, ContractViolation::TimestampRegression { .. }));
    }

    #[test]
    fn equal_timestamps_are_causal() {
        let graph = state(&[("a", 10)]);
        assert!(validate_publish(&graph, &intent("b", 10).with_parent("a")).is_ok());
    }

    #[test]
    fn rejects_self_parent() {
        let err = validate_publish(&state(&[]), &intent("a", 0).with_parent("a")).unwrap_err();
        assert_eq!(err.invariant(), GraphInvariant::AppendOnly);
    }

    #[test]
    fn rejects_malformed_before_anything_else() {
        let graph = state(&[("a", 0)]);
        let mut empty = Intent::new("agent-a", "nothing").with_id("a");
        empty.timestamp = at(0);
        assert!(matches!(
            validate_publish(&graph, &empty),
            Err(ContractViolation::EmptyIntent { .. })
        ));

        let mut anonymous = intent("a", 0);
        anonymous.agent_id = "  ".into();
        assert!(matches!(
            validate_publish(&graph, &anonymous),
            Err(ContractViolation::MissingAgent { .. })
        ));
    }

    #[test]
    fn overlay_sees_staged_intents() {
        let graph = state(&[("a", 0)]);
        let mut overlay = Overlay::new(&graph);
        let b = intent("b", 1).with_parent("a");
        assert!(validate_publish(&overlay, &b).is_ok());
        overlay.stage(&b);

        let c = intent("c", 2).with_parent("b");
        assert!(validate_publish(&overlay, &c).is_ok());
        assert!(matches!(
            validate_publish(&overlay, &intent("b", 3)),
            Err(ContractViolation::DuplicateId { .. })
        ));
        assert_eq!(overlay.staged_len(), 1);
        assert_eq!(overlay.timestamp_of("b"), Some(at(0) + Duration::minutes(1)));
    }

    #[test]
    fn violation_serializes_with_invariant_tag() {
        let json = serde_json::to_value(ContractViolation::DuplicateId { id: "x".into() }).unwrap();
        assert_eq!(json["invariant"], "duplicate_id");
        assert_eq!(json["id"], "x");
    }
}
