//! Merge governor
//!
//! Decides whether a proposed branch may be folded into main. Each proposal
//! is a short state machine (RECEIVED -> EVALUATING -> verdict); the
//! governor also remembers, per branch, how many attempts have failed
//! without reducing the number of open conflicts, and declares DEADLOCK
//! once that exceeds the retry bound.

use crate::config::GovernorConfig;
use crate::error::{GovernorError, VersionError};
use crate::replay::Operation;
use crate::resolver::Evaluation;
use crate::versioning::{BranchState, MergeResult, VersionedGraph};
use concord_contract::{ConflictReport, ContractViolation};
use concord_store::GraphBackend;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a single proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalState {
    Received,
    Evaluating,
    Approved,
    Rejected,
    /// Awaiting [`MergeGovernor::resolve_escalation`]
    Escalated,
    Deadlocked,
}

impl ProposalState {
    #[must_use]
    pub fn allowed_transitions(self) -> Vec<Self> {
        use ProposalState::*;
        match self {
            Received => vec![Evaluating],
            Evaluating => vec![Approved, Rejected, Escalated, Deadlocked],
            Escalated => vec![Approved, Rejected],
            Approved | Rejected | Deadlocked => vec![],
        }
    }

    /// # Errors
    /// [`GovernorError::IllegalTransition`] when `to` is not reachable from `from`.
    pub fn validate_transition(from: Self, to: Self) -> Result<(), GovernorError> {
        if from.allowed_transitions().contains(&to) {
            Ok(())
        } else {
            Err(GovernorError::IllegalTransition { from, to })
        }
    }
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "RECEIVED",
            Self::Evaluating => "EVALUATING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Escalated => "ESCALATED",
            Self::Deadlocked => "DEADLOCKED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    Approve,
    Reject,
    Escalate,
    Deadlock,
}

impl VerdictKind {
    /// Proposal state the verdict settles in
    #[must_use]
    pub const fn state(self) -> ProposalState {
        match self {
            Self::Approve => ProposalState::Approved,
            Self::Reject => ProposalState::Rejected,
            Self::Escalate => ProposalState::Escalated,
            Self::Deadlock => ProposalState::Deadlocked,
        }
    }
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approve => "APPROVE",
            Self::Reject => "REJECT",
            Self::Escalate => "ESCALATE",
            Self::Deadlock => "DEADLOCK",
        };
        f.write_str(s)
    }
}

/// Human decision on an escalated proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationDecision {
    /// Merge if nothing worse than ESCALATE remains
    Accept,
    /// Back to the owner for revision
    SendBack,
    /// Drop the branch
    Withdraw,
}

/// Logged form of a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub proposal_id: String,
    pub branch: String,
    pub attempt: u32,
    pub verdict: VerdictKind,
    /// Set when the verdict closes an escalation
    #[serde(default)]
    pub decision: Option<EscalationDecision>,
    pub open_conflicts: usize,
    pub violations: Vec<ContractViolation>,
    pub conflicts: Vec<ConflictReport>,
}

impl VerdictRecord {
    fn new(
        proposal_id: &str,
        branch: &str,
        attempt: u32,
        verdict: VerdictKind,
        evaluation: &Evaluation,
    ) -> Self {
        Self {
            proposal_id: proposal_id.to_string(),
            branch: branch.to_string(),
            attempt,
            verdict,
            decision: None,
            open_conflicts: evaluation.open_conflicts(),
            violations: evaluation.violations.clone(),
            conflicts: evaluation.reports.clone(),
        }
    }

    fn decided(mut self, decision: EscalationDecision) -> Self {
        self.decision = Some(decision);
        self
    }
}

/// Outcome of one proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalResult {
    pub proposal_id: String,
    pub branch: String,
    /// 1 for the first proposal of the branch
    pub attempt: u32,
    pub verdict: VerdictKind,
    pub state: ProposalState,
    /// Branch state after the verdict was applied
    pub branch_state: BranchState,
    pub violations: Vec<ContractViolation>,
    pub reports: Vec<ConflictReport>,
    pub merge: Option<MergeResult>,
    pub open_conflicts: usize,
}

impl ProposalResult {
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.verdict == VerdictKind::Approve
    }

    /// Whether any violation or conflict report names the intent
    #[must_use]
    pub fn names(&self, intent_id: &str) -> bool {
        self.reports.iter().any(|r| r.involves(intent_id))
            || self.violations.iter().any(|v| v.intent_id() == intent_id)
    }
}

#[derive(Debug, Clone)]
struct Pending {
    proposal_id: String,
    attempt: u32,
}

#[derive(Debug, Clone, Default)]
struct ProposalHistory {
    attempts: u32,
    /// Consecutive failed attempts without progress
    stall: u32,
    last_open_conflicts: Option<usize>,
    pending: Option<Pending>,
}

impl ProposalHistory {
    /// Stall count a failure with `open_conflicts` would leave behind
    fn stall_after(&self, open_conflicts: usize) -> u32 {
        match self.last_open_conflicts {
            Some(previous) if open_conflicts >= previous => self.stall + 1,
            _ => 1,
        }
    }

    fn record_failure(&mut self, attempt: u32, open_conflicts: usize, stall: u32) {
        self.attempts = attempt;
        self.stall = stall;
        self.last_open_conflicts = Some(open_conflicts);
    }
}

struct Proposal {
    id: String,
    state: ProposalState,
}

impl Proposal {
    fn new(state: ProposalState) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state,
        }
    }

    fn resume(id: String, state: ProposalState) -> Self {
        Self { id, state }
    }

    fn advance(&mut self, to: ProposalState) -> Result<(), GovernorError> {
        ProposalState::validate_transition(self.state, to)?;
        self.state = to;
        Ok(())
    }
}

/// Approves, rejects, escalates or deadlocks branch merges
pub struct MergeGovernor<B> {
    graph: Arc<VersionedGraph<B>>,
    config: GovernorConfig,
    history: DashMap<String, ProposalHistory>,
}

impl<B: GraphBackend> MergeGovernor<B> {
    #[must_use]
    pub fn new(graph: Arc<VersionedGraph<B>>) -> Self {
        Self::with_config(graph, GovernorConfig::default())
    }

    #[must_use]
    pub fn with_config(graph: Arc<VersionedGraph<B>>, config: GovernorConfig) -> Self {
        Self {
            graph,
            config,
            history: DashMap::new(),
        }
    }

    #[inline]
    pub fn graph(&self) -> &Arc<VersionedGraph<B>> {
        &self.graph
    }

    #[inline]
    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Proposals made for the branch so far
    #[must_use]
    pub fn attempts(&self, branch: &str) -> u32 {
        self.history.get(branch).map_or(0, |h| h.attempts)
    }

    /// Evaluate a branch and act on the verdict
    ///
    /// An OPEN branch is frozen first. APPROVE commits the merge; REJECT
    /// reopens the branch for revision; ESCALATE leaves it PROPOSED until
    /// [`Self::resolve_escalation`]; DEADLOCK abandons it. Every verdict is
    /// appended to main's replay log while main is locked; the attempt only
    /// counts once that entry is written.
    ///
    /// # Errors
    /// Returns error if the branch is unknown or terminal, has an escalation
    /// pending, or the backend fails. A branch frozen by this call is
    /// reopened on failure.
    pub fn propose(&self, branch: &str) -> Result<ProposalResult, GovernorError> {
        if self.history.get(branch).is_some_and(|h| h.pending.is_some()) {
            return Err(GovernorError::EscalationPending(branch.to_string()));
        }
        let mut proposal = Proposal::new(ProposalState::Received);
        let current = self
            .graph
            .branch(branch)
            .ok_or_else(|| VersionError::BranchNotFound(branch.to_string()))?;
        let froze = current.state == BranchState::Open;
        if froze {
            self.graph.freeze(branch)?;
        }
        proposal.advance(ProposalState::Evaluating)?;
        let attempt = self.attempts(branch) + 1;

        let session = match self.graph.begin_merge(branch) {
            Ok(session) => session,
            Err(e) => return Err(self.unfreeze(branch, froze, e)),
        };
        let evaluation = session.evaluation().clone();
        let escalations = evaluation.escalations().count();
        let verdict = if !evaluation.is_admissible() {
            VerdictKind::Reject
        } else if escalations > self.config.escalation_tolerance {
            VerdictKind::Escalate
        } else {
            VerdictKind::Approve
        };

        if verdict == VerdictKind::Approve {
            let record = VerdictRecord::new(&proposal.id, branch, attempt, verdict, &evaluation);
            let merge = match session.commit_with(vec![Operation::Verdict(record)]) {
                Ok(merge) => merge,
                Err(e) => return Err(self.unfreeze(branch, froze, e)),
            };
            proposal.advance(ProposalState::Approved)?;
            self.history.remove(branch);
            return Ok(self.finish(proposal, branch, attempt, verdict, &evaluation, Some(merge)));
        }

        let open = evaluation.open_conflicts();
        let stall = self
            .history
            .get(branch)
            .map_or(1, |h| h.stall_after(open));
        let verdict = if stall > self.config.retry_bound {
            VerdictKind::Deadlock
        } else {
            verdict
        };
        let record = VerdictRecord::new(&proposal.id, branch, attempt, verdict, &evaluation);
        if let Err(e) = session.record(Operation::Verdict(record)) {
            return Err(self.unfreeze(branch, froze, e));
        }
        {
            let mut history = self.history.entry(branch.to_string()).or_default();
            history.record_failure(attempt, open, stall);
            if verdict == VerdictKind::Escalate {
                history.pending = Some(Pending {
                    proposal_id: proposal.id.clone(),
                    attempt,
                });
            }
        }
        match verdict {
            VerdictKind::Deadlock => self.graph.abandon(branch)?,
            VerdictKind::Reject => self.graph.reopen(branch)?,
            _ => {}
        }
        proposal.advance(verdict.state())?;
        Ok(self.finish(proposal, branch, attempt, verdict, &evaluation, None))
    }

    /// Close an escalated proposal with a human decision
    ///
    /// The decision is logged as a verdict like any other. The escalation
    /// stays pending if the call fails.
    ///
    /// # Errors
    /// [`GovernorError::NoPendingEscalation`] if the branch is not awaiting
    /// one; otherwise versioning failures.
    pub fn resolve_escalation(
        &self,
        branch: &str,
        decision: EscalationDecision,
    ) -> Result<ProposalResult, GovernorError> {
        let pending = self
            .history
            .get(branch)
            .and_then(|h| h.pending.clone())
            .ok_or_else(|| GovernorError::NoPendingEscalation(branch.to_string()))?;
        let mut proposal = Proposal::resume(pending.proposal_id, ProposalState::Escalated);
        let attempt = pending.attempt;
        tracing::info!(branch = %branch, decision = ?decision, "escalation resolved");

        let session = self.graph.begin_merge(branch)?;
        let evaluation = session.evaluation().clone();
        let record = |verdict| {
            Operation::Verdict(
                VerdictRecord::new(&proposal.id, branch, attempt, verdict, &evaluation)
                    .decided(decision),
            )
        };

        if decision == EscalationDecision::Accept && evaluation.is_admissible() {
            let merge = session.commit_with(vec![record(VerdictKind::Approve)])?;
            proposal.advance(ProposalState::Approved)?;
            self.history.remove(branch);
            return Ok(self.finish(
                proposal,
                branch,
                attempt,
                VerdictKind::Approve,
                &evaluation,
                Some(merge),
            ));
        }

        session.record(record(VerdictKind::Reject))?;
        if let Some(mut h) = self.history.get_mut(branch) {
            h.pending = None;
        }
        if decision == EscalationDecision::Withdraw {
            self.graph.abandon(branch)?;
        } else {
            self.graph.reopen(branch)?;
        }
        proposal.advance(ProposalState::Rejected)?;
        Ok(self.finish(proposal, branch, attempt, VerdictKind::Reject, &evaluation, None))
    }

    /// Hand a branch this call froze back to its owner
    fn unfreeze(&self, branch: &str, froze: bool, cause: VersionError) -> GovernorError {
        if froze {
            if let Err(e) = self.graph.reopen(branch) {
                tracing::warn!(branch = %branch, error = %e, "could not reopen branch after failed proposal");
            }
        }
        cause.into()
    }

    fn finish(
        &self,
        proposal: Proposal,
        branch: &str,
        attempt: u32,
        verdict: VerdictKind,
        evaluation: &Evaluation,
        merge: Option<MergeResult>,
    ) -> ProposalResult {
        let branch_state = self
            .graph
            .branch(branch)
            .map_or(BranchState::Abandoned, |b| b.state);
        let open_conflicts = evaluation.open_conflicts();
        tracing::info!(
            branch = %branch,
            proposal_id = %proposal.id,
            attempt,
            verdict = %verdict,
            open_conflicts,
            "proposal decided"
        );
        ProposalResult {
            proposal_id: proposal.id,
            branch: branch.to_string(),
            attempt,
            verdict,
            state: proposal.state,
            branch_state,
            violations: evaluation.violations.clone(),
            reports: evaluation.reports.clone(),
            merge,
            open_conflicts,
        }
    }
}

impl<B> fmt::Debug for MergeGovernor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeGovernor")
            .field("config", &self.config)
            .field("branches", &self.history.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_transitions() {
        use ProposalState::*;
        assert!(ProposalState::validate_transition(Received, Evaluating).is_ok());
        assert!(ProposalState::validate_transition(Escalated, Approved).is_ok());
        assert!(matches!(
            ProposalState::validate_transition(Received, Approved),
            Err(GovernorError::IllegalTransition { from: Received, to: Approved })
        ));
        assert!(Deadlocked.allowed_transitions().is_empty());
    }

    #[test]
    fn verdicts_map_to_states() {
        assert_eq!(VerdictKind::Approve.state(), ProposalState::Approved);
        assert_eq!(VerdictKind::Deadlock.state(), ProposalState::Deadlocked);
        assert_eq!(VerdictKind::Escalate.to_string(), "ESCALATE");
    }

    fn fail(h: &mut ProposalHistory, open: usize) -> u32 {
        let stall = h.stall_after(open);
        h.record_failure(h.attempts + 1, open, stall);
        stall
    }

    #[test]
    fn stall_counts_only_attempts_without_progress() {
        let mut h = ProposalHistory::default();
        assert_eq!(fail(&mut h, 3), 1);
        assert_eq!(fail(&mut h, 3), 2);
        assert_eq!(fail(&mut h, 2), 1);
        assert_eq!(fail(&mut h, 4), 2);
        assert_eq!(h.attempts, 4);
    }

    #[test]
    fn stall_is_not_recorded_until_applied() {
        let h = ProposalHistory::default();
        assert_eq!(h.stall_after(5), 1);
        assert_eq!(h.stall_after(5), 1);
        assert_eq!(h.attempts, 0);
    }

    #[test]
    fn verdict_record_wire_shape() {
        let record = VerdictRecord {
            proposal_id: "p-1".into(),
            branch: "feature".into(),
            attempt: 2,
            verdict: VerdictKind::Reject,
            decision: Some(EscalationDecision::SendBack),
            open_conflicts: 0,
            violations: Vec::new(),
            conflicts: Vec::new(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["verdict"], "REJECT");
        assert_eq!(json["decision"], "send_back");
        let back: VerdictRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
