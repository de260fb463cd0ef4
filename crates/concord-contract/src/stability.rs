//! Stability scoring
//!
//! Stability is a pure function of an intent's own evidence and timestamp,
//! so every backend and every replay run computes the same value.

use crate::model::{Evidence, EvidenceKind, Intent};
use serde::{Deserialize, Serialize};

/// Rejected [`StabilityWeights`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WeightError {
    #[error("weight '{name}' must be a non-negative number, got {value}")]
    Negative { name: &'static str, value: f64 },

    #[error("decay half-life must be positive, got {0}")]
    HalfLife(f64),
}

/// Linear weights over evidence counts, with optional age decay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityWeights {
    pub base: f64,
    pub test_pass: f64,
    pub test_pass_cap: f64,
    pub code_committed: f64,
    pub type_checked: f64,
    pub consumed_by_other: f64,
    pub consumed_cap: f64,
    pub conflict_penalty: f64,
    pub test_fail_penalty: f64,
    pub manual_approval: f64,
    /// Evidence half-life in seconds; `None` disables decay
    pub decay_half_life_secs: Option<f64>,
}

impl Default for StabilityWeights {
    fn default() -> Self {
        Self {
            base: 0.3,
            test_pass: 0.05,
            test_pass_cap: 0.3,
            code_committed: 0.2,
            type_checked: 0.1,
            consumed_by_other: 0.1,
            consumed_cap: 0.2,
            conflict_penalty: 0.15,
            test_fail_penalty: 0.15,
            manual_approval: 0.3,
            decay_half_life_secs: None,
        }
    }
}

impl StabilityWeights {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With exponential evidence decay
    #[inline]
    #[must_use]
    pub fn with_half_life_secs(mut self, secs: f64) -> Self {
        self.decay_half_life_secs = Some(secs);
        self
    }

    /// Stability of an intent in `[0, 1]`
    #[must_use]
    pub fn compute(&self, intent: &Intent) -> f64 {
        let weight = |e: &Evidence| self.age_factor(intent, e);
        let sum_of = |kind: EvidenceKind| -> f64 {
            intent
                .evidence
                .iter()
                .filter(|e| e.kind == kind)
                .map(weight)
                .sum()
        };
        // presence-style evidence counts once, at its freshest
        let best_of = |kind: EvidenceKind| -> f64 {
            intent
                .evidence
                .iter()
                .filter(|e| e.kind == kind)
                .map(weight)
                .fold(0.0, f64::max)
        };

        let mut score = self.base;
        score += (sum_of(EvidenceKind::TestPass) * self.test_pass).min(self.test_pass_cap);
        score += best_of(EvidenceKind::CodeCommitted) * self.code_committed;
        score += best_of(EvidenceKind::TypeChecked) * self.type_checked;
        score += (sum_of(EvidenceKind::ConsumedByOther) * self.consumed_by_other)
            .min(self.consumed_cap);
        score -= sum_of(EvidenceKind::Conflict) * self.conflict_penalty;
        score -= sum_of(EvidenceKind::TestFail) * self.test_fail_penalty;
        score += best_of(EvidenceKind::ManualApproval) * self.manual_approval;

        score.clamp(0.0, 1.0)
    }

    /// `0.5^(age / half_life)`, with age measured back from the intent's timestamp
    fn age_factor(&self, intent: &Intent, evidence: &Evidence) -> f64 {
        let Some(half_life) = self.decay_half_life_secs.filter(|h| *h > 0.0) else {
            return 1.0;
        };
        let age_ms = (intent.timestamp - evidence.timestamp).num_milliseconds().max(0);
        #[allow(clippy::cast_precision_loss)]
        let age_secs = age_ms as f64 / 1000.0;
        0.5_f64.powf(age_secs / half_life)
    }

    /// Check weights are usable
    ///
    /// # Errors
    /// Returns the first invalid weight.
    pub fn validate(&self) -> Result<(), WeightError> {
        let fields = [
            ("base", self.base),
            ("test_pass", self.test_pass),
            ("test_pass_cap", self.test_pass_cap),
            ("code_committed", self.code_committed),
            ("type_checked", self.type_checked),
            ("consumed_by_other", self.consumed_by_other),
            ("consumed_cap", self.consumed_cap),
            ("conflict_penalty", self.conflict_penalty),
            ("test_fail_penalty", self.test_fail_penalty),
            ("manual_approval", self.manual_approval),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(WeightError::Negative { name, value });
            }
        }
        if let Some(h) = self.decay_half_life_secs {
            if !h.is_finite() || h <= 0.0 {
                return Err(WeightError::HalfLife(h));
            }
        }
        Ok(())
    }
}
