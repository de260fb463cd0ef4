//! Conflict classification and resolution policy
//!
//! Classification is one pure function over [`Overlap`] so that the whole
//! decision table can be audited and tested in isolation.

use crate::conflict::{Overlap, OverlapKind};
use crate::model::Intent;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Three-way classification applied to every detected overlap
///
/// Variants are ordered by severity, so `max` over a set yields the class
/// that governs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictClass {
    /// Reconcilable by [`ResolutionPolicy`] alone
    AutoResolve,
    /// Ambiguous, needs a governor or human decision
    Escalate,
    /// A required constraint is violated; the mutation is rejected
    HardFail,
}

impl ConflictClass {
    pub const ALL: [Self; 3] = [Self::HardFail, Self::AutoResolve, Self::Escalate];
}

/// Classify a single overlap
#[must_use]
pub fn classify(overlap: &Overlap) -> ConflictClass {
    let binding = overlap.binding_constraint.is_some();
    match overlap.kind {
        OverlapKind::DuplicateProvision => {
            if binding {
                ConflictClass::HardFail
            } else if overlap.signatures_compatible {
                ConflictClass::AutoResolve
            } else {
                ConflictClass::Escalate
            }
        }
        OverlapKind::Dependency { .. } => {
            if binding {
                ConflictClass::HardFail
            } else {
                ConflictClass::AutoResolve
            }
        }
        OverlapKind::SharedRequirement => {
            if binding && !overlap.signatures_compatible {
                ConflictClass::HardFail
            } else {
                ConflictClass::Escalate
            }
        }
        OverlapKind::ConstraintClash { both_required } => {
            if both_required {
                ConflictClass::Escalate
            } else {
                ConflictClass::AutoResolve
            }
        }
    }
}

/// Class governing a set of overlaps; `None` when the set is empty
#[must_use]
pub fn classify_all<'a, I>(overlaps: I) -> Option<ConflictClass>
where
    I: IntoIterator<Item = &'a Overlap>,
{
    overlaps.into_iter().map(classify).max()
}

/// Deterministic winner selection for auto-resolved conflicts
///
/// Order: higher stability, then earlier timestamp, then the
/// lexicographically smaller id. Stabilities closer than
/// `stability_tie_epsilon` count as equal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionPolicy {
    pub stability_tie_epsilon: f64,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            stability_tie_epsilon: 0.01,
        }
    }
}

impl ResolutionPolicy {
    #[inline]
    #[must_use]
    pub fn with_tie_epsilon(mut self, epsilon: f64) -> Self {
        self.stability_tie_epsilon = epsilon;
        self
    }

    /// `Less` when `a` wins over `b`
    #[must_use]
    pub fn rank(&self, a: &Intent, b: &Intent) -> Ordering {
        let gap = a.stability - b.stability;
        let by_stability = if gap.abs() <= self.stability_tie_epsilon {
            Ordering::Equal
        } else if gap > 0.0 {
            Ordering::Less
        } else {
            Ordering::Greater
        };
        by_stability
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// `(winner, loser)`
    #[must_use]
    pub fn winner<'a>(&self, a: &'a Intent, b: &'a Intent) -> (&'a Intent, &'a Intent) {
        if self.rank(a, b) == Ordering::Greater {
            (b, a)
        } else {
            (a, b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Constraint;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn overlap(kind: OverlapKind, compatible: bool, binding: bool) -> Overlap {
        Overlap {
            kind,
            candidate_subject: "a".into(),
            existing_subject: "b".into(),
            signatures_compatible: compatible,
            binding_constraint: binding.then(|| Constraint::required("a", "unique")),
        }
    }

    #[test]
    fn duplicate_provision_table() {
        let dup = OverlapKind::DuplicateProvision;
        assert_eq!(classify(&overlap(dup, true, true)), ConflictClass::HardFail);
        assert_eq!(classify(&overlap(dup, false, true)), ConflictClass::HardFail);
        assert_eq!(classify(&overlap(dup, true, false)), ConflictClass::AutoResolve);
        assert_eq!(classify(&overlap(dup, false, false)), ConflictClass::Escalate);
    }

    #[test]
    fn dependency_and_shared_requirement_table() {
        let dep = OverlapKind::Dependency { candidate_requires: true };
        assert_eq!(classify(&overlap(dep, false, true)), ConflictClass::HardFail);
        assert_eq!(classify(&overlap(dep, false, false)), ConflictClass::AutoResolve);

        let shared = OverlapKind::SharedRequirement;
        assert_eq!(classify(&overlap(shared, true, false)), ConflictClass::Escalate);
        assert_eq!(classify(&overlap(shared, true, true)), ConflictClass::Escalate);
        assert_eq!(classify(&overlap(shared, false, true)), ConflictClass::HardFail);
    }

    #[test]
    fn constraint_clash_table() {
        let both = OverlapKind::ConstraintClash { both_required: true };
        let soft = OverlapKind::ConstraintClash { both_required: false };
        assert_eq!(classify(&overlap(both, true, false)), ConflictClass::Escalate);
        assert_eq!(classify(&overlap(soft, true, false)), ConflictClass::AutoResolve);
    }

    #[test]
    fn classify_all_takes_most_severe() {
        let set = [
            overlap(OverlapKind::DuplicateProvision, true, false),
            overlap(OverlapKind::SharedRequirement, true, false),
        ];
        assert_eq!(classify_all(&set), Some(ConflictClass::Escalate));
        assert_eq!(classify_all(&Vec::<Overlap>::new()), None);
    }

    #[test]
    fn higher_stability_wins() {
        let policy = ResolutionPolicy::default();
        let a = Intent::new("a", "x").with_id("z").with_stability(0.8);
        let b = Intent::new("b", "x").with_id("a").with_stability(0.5);
        assert_eq!(policy.winner(&a, &b).0.id, "z");
        assert_eq!(policy.winner(&b, &a).0.id, "z");
    }

    #[test]
    fn near_equal_stability_falls_back_to_timestamp() {
        let policy = ResolutionPolicy::default();
        let early = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2030, 1, 2, 0, 0, 0).unwrap();
        let a = Intent::new("a", "x").with_id("b").with_timestamp(late).with_stability(0.505);
        let b = Intent::new("b", "x").with_id("c").with_timestamp(early).with_stability(0.5);
        assert_eq!(policy.winner(&a, &b).0.id, "c");
    }

    proptest! {
        #[test]
        fn tie_break_is_total_and_order_independent(
            id_a in "[a-z0-9]{1,12}",
            id_b in "[a-z0-9]{1,12}",
            stability in 0.0f64..=1.0,
            secs in 0i64..1_000_000,
        ) {
            prop_assume!(id_a != id_b);
            let ts = Utc.timestamp_opt(1_900_000_000 + secs, 0).unwrap();
            let a = Intent::new("x", "x").with_id(id_a.clone()).with_timestamp(ts).with_stability(stability);
            let b = Intent::new("y", "y").with_id(id_b.clone()).with_timestamp(ts).with_stability(stability);
            let policy = ResolutionPolicy::default();

            let expected = if id_a < id_b { &id_a } else { &id_b };
            prop_assert_eq!(&policy.winner(&a, &b).0.id, expected);
            prop_assert_eq!(&policy.winner(&b, &a).0.id, expected);
        }
    }
}
