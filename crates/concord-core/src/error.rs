//! Error types for Concord Core
//!
//! Provides error handling for:
//! - Publish rejections (contract violations and HARD_FAIL conflicts)
//! - Branch lifecycle misuse
//! - Governor proposal handling
//! - Replay log integrity and divergence
//! - Configuration loading

use crate::versioning::BranchState;
use concord_contract::{ConflictReport, ContractViolation, WeightError};
use concord_store::StoreError;

/// Why an intent was not published
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// A graph invariant would be broken
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),

    /// At least one overlap classified as HARD_FAIL
    #[error("intent '{intent_id}' rejected by {} hard conflict(s)", .reports.len())]
    Rejected {
        intent_id: String,
        reports: Vec<ConflictReport>,
    },

    /// The backend failed; nothing was written
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The replay entry could not be sealed; nothing was written
    #[error("replay log error: {0}")]
    Replay(#[from] ReplayError),

    /// Evaluation returned no candidate and no violation for the intent
    #[error("intent was not evaluated")]
    NotEvaluated,
}

impl PublishError {
    /// The agent has to change the intent before trying again
    #[inline]
    #[must_use]
    pub fn requires_revision(&self) -> bool {
        matches!(self, Self::Contract(_) | Self::Rejected { .. })
    }

    /// Transient failure; the same call may succeed later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}

/// Branch and merge failures
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("branch '{0}' already exists")]
    BranchExists(String),

    #[error("branch '{0}' not found")]
    BranchNotFound(String),

    #[error("agent '{agent}' does not own branch '{branch}'")]
    NotOwner { branch: String, agent: String },

    #[error("branch '{branch}' is {state} and accepts no mutations")]
    BranchFrozen { branch: String, state: BranchState },

    #[error("illegal branch transition {from} -> {to}")]
    IllegalTransition { from: BranchState, to: BranchState },

    #[error("contract violation on branch: {0}")]
    Contract(#[from] ContractViolation),

    /// Merge attempted while violations or HARD_FAIL conflicts remain
    #[error("merge of '{branch}' blocked: {violations} violation(s), {hard_failures} hard conflict(s)")]
    MergeBlocked {
        branch: String,
        violations: usize,
        hard_failures: usize,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("replay log error: {0}")]
    Replay(#[from] ReplayError),
}

/// Merge governor failures
///
/// Verdicts, including DEADLOCK, are results rather than errors; these
/// cover misuse and underlying failures only.
#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("branch '{0}' has an escalated proposal awaiting resolution")]
    EscalationPending(String),

    #[error("branch '{0}' has no escalated proposal")]
    NoPendingEscalation(String),

    #[error("illegal proposal transition {from} -> {to}")]
    IllegalTransition {
        from: crate::governor::ProposalState,
        to: crate::governor::ProposalState,
    },

    #[error("versioning error: {0}")]
    Version(#[from] VersionError),
}

/// Replay log failures
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Hash chain broken at the given entry
    #[error("replay log integrity violation at entry {seq}")]
    IntegrityViolation { seq: u64 },

    #[error("contract violation replaying entry {seq}: {violation}")]
    Contract {
        seq: u64,
        violation: ContractViolation,
    },

    #[error("entry {seq} references unknown intent '{intent_id}'")]
    UnknownIntent { seq: u64, intent_id: String },

    /// An APPROVE verdict not directly preceded by the merge of its branch
    #[error("entry {seq} approves branch '{branch}' without a matching merge")]
    UnmatchedVerdict { seq: u64, branch: String },

    /// Folded state does not match the hash recorded by a merge
    #[error("graph hash mismatch after entry {seq}: recorded {recorded}, replayed {replayed}")]
    HashMismatch {
        seq: u64,
        recorded: String,
        replayed: String,
    },

    #[error("malformed log line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("invalid stability weights: {0}")]
    Weights(#[from] WeightError),

    /// Only deterministic matchers may take part in publishing and replay
    #[error("matcher '{0}' is not deterministic")]
    NonDeterministicMatcher(String),

    #[error("backend unavailable: {0}")]
    Backend(#[from] StoreError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Dependency ordering failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    #[error("cannot order intents: {} dependency cycle(s): {}", .cycles.len(), render_cycles(.cycles))]
    CyclesDetected {
        cycles: Vec<crate::cycles::DependencyCycle>,
    },
}

fn render_cycles(cycles: &[crate::cycles::DependencyCycle]) -> String {
    cycles
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
