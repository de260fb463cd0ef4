//! Conflict artifacts: overlaps, reports, adjustments and resolutions

use crate::model::{Constraint, Intent, InterfaceSpec};
use crate::policy::ConflictClass;
use serde::{Deserialize, Serialize};

/// How two intents touch each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverlapKind {
    /// Both intents provide the same capability
    DuplicateProvision,
    /// One intent requires what the other provides, with a mismatched signature
    Dependency {
        /// Whether the candidate is the requiring side
        candidate_requires: bool,
    },
    /// Both intents require the same capability
    SharedRequirement,
    /// Constraints on the same target disagree
    ConstraintClash { both_required: bool },
}

/// One structural overlap between a candidate and an existing intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlap {
    pub kind: OverlapKind,
    /// Spec name, or constraint target, on the candidate's side
    pub candidate_subject: String,
    /// Spec name, or constraint target, on the existing intent's side
    pub existing_subject: String,
    pub signatures_compatible: bool,
    /// A required constraint from either side that covers the overlap
    pub binding_constraint: Option<Constraint>,
}

/// Classified overlap set between two intents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub candidate_id: String,
    pub candidate_agent: String,
    pub existing_id: String,
    pub existing_agent: String,
    /// Most severe class over `overlaps`
    pub class: ConflictClass,
    pub overlaps: Vec<Overlap>,
    pub description: String,
}

impl ConflictReport {
    /// Whether the report names the given intent on either side
    #[inline]
    #[must_use]
    pub fn involves(&self, intent_id: &str) -> bool {
        self.candidate_id == intent_id || self.existing_id == intent_id
    }
}

/// Kind of change proposed to the losing intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    /// Drop the provision and require the winner's instead
    ConsumeInstead,
    /// Align a required signature with the winner's provision
    AdaptSignature,
    /// Drop a clashing constraint in favor of the winner's
    YieldConstraint,
}

/// Intent field an [`Adjustment`] targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentField {
    Provides,
    Requires,
    Constraints,
}

/// A field-level change resolving a conflict
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Adjustment {
    /// The intent being adjusted (the loser)
    pub intent_id: String,
    pub kind: AdjustmentKind,
    pub field: IntentField,
    /// Spec name or constraint target on the loser
    pub subject: String,
    /// Winning intent the loser defers to
    pub defer_to: String,
    /// Replacement name, signature or requirement taken from the winner
    pub replacement: String,
}

/// Outcome of an auto-resolved conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub winner_id: String,
    pub loser_id: String,
    pub class: ConflictClass,
    pub adjustments: Vec<Adjustment>,
}

impl ResolutionResult {
    /// Same winner and the same adjustment set, regardless of list order
    #[must_use]
    pub fn is_equivalent_to(&self, other: &Self) -> bool {
        if self.winner_id != other.winner_id || self.loser_id != other.loser_id {
            return false;
        }
        let mut mine = self.adjustments.clone();
        let mut theirs = other.adjustments.clone();
        mine.sort();
        theirs.sort();
        mine == theirs
    }
}

/// Build the adjusted successor of a losing intent
///
/// Returns a new intent superseding `loser` with every adjustment addressed
/// to it applied; adjustments for other intents are ignored. The loser
/// itself is left untouched.
#[must_use]
pub fn apply_adjustments(loser: &Intent, adjustments: &[Adjustment]) -> Intent {
    let mut next = loser.supersede();
    for adjustment in adjustments.iter().filter(|a| a.intent_id == loser.id) {
        match adjustment.kind {
            AdjustmentKind::ConsumeInstead => {
                if let Some(pos) = next
                    .provides
                    .iter()
                    .position(|s| s.name == adjustment.subject)
                {
                    let dropped = next.provides.remove(pos);
                    let consumed = InterfaceSpec {
                        name: adjustment.replacement.clone(),
                        ..dropped
                    };
                    if !next.requires.contains(&consumed) {
                        next.requires.push(consumed);
                    }
                }
            }
            AdjustmentKind::AdaptSignature => {
                let field = match adjustment.field {
                    IntentField::Provides => &mut next.provides,
                    _ => &mut next.requires,
                };
                for spec in field.iter_mut().filter(|s| s.name == adjustment.subject) {
                    spec.signature.clone_from(&adjustment.replacement);
                }
            }
            AdjustmentKind::YieldConstraint => {
                next.constraints.retain(|c| c.target != adjustment.subject);
            }
        }
    }
    next
}
