//! Versioned graph: agent branches over a shared main graph
//!
//! Branches never copy the graph. Each one is a list of indices into a
//! single append-only arena plus the snapshot of main it forked from, so a
//! merge is a diff of the branch's own records replayed through main's
//! resolver.

use crate::error::VersionError;
use crate::replay::Operation;
use crate::resolver::{Evaluation, IntentResolver, PublishTxn};
use chrono::{DateTime, Utc};
use concord_contract::{
    canonical_graph_hash, content_hash_intent, validate_publish, ConflictReport, ContentHash,
    ContractViolation, Intent, Overlay, ResolutionResult,
};
use concord_store::{GraphBackend, StoreResult};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an agent branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchState {
    /// Accepting mutations
    Open,
    /// Frozen, awaiting a governor verdict
    Proposed,
    /// Folded into main
    Merged,
    /// Discarded
    Abandoned,
}

impl BranchState {
    #[must_use]
    pub fn allowed_transitions(self) -> Vec<Self> {
        use BranchState::*;
        match self {
            Open => vec![Proposed],
            Proposed => vec![Merged, Open, Abandoned],
            Merged | Abandoned => vec![],
        }
    }

    #[inline]
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// # Errors
    /// [`VersionError::IllegalTransition`] when `to` is not reachable from `from`.
    pub fn validate_transition(from: Self, to: Self) -> Result<(), VersionError> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(VersionError::IllegalTransition { from, to })
        }
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Merged | Self::Abandoned)
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Proposed => "PROPOSED",
            Self::Merged => "MERGED",
            Self::Abandoned => "ABANDONED",
        };
        f.write_str(s)
    }
}

/// Point-in-time identity of main
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub id: String,
    /// Position in main's snapshot history, starting at 1
    pub version: u64,
    pub taken_at: DateTime<Utc>,
    /// Ids present, sorted
    pub intent_ids: Vec<String>,
    pub hash: ContentHash,
}

impl GraphSnapshot {
    fn of(intents: &[Intent], version: u64) -> Self {
        let mut intent_ids: Vec<String> = intents.iter().map(|i| i.id.clone()).collect();
        intent_ids.sort();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version,
            taken_at: Utc::now(),
            intent_ids,
            hash: canonical_graph_hash(intents),
        }
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.intent_ids.binary_search_by(|held| held.as_str().cmp(id)).is_ok()
    }
}

/// An agent-private line of mutations rooted at a snapshot of main
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBranch {
    pub name: String,
    /// Only the owner may publish to the branch
    pub owner: String,
    pub state: BranchState,
    pub ancestor: GraphSnapshot,
    pub created_at: DateTime<Utc>,
    /// Positions in the mutation arena, in publish order
    entries: Vec<usize>,
}

impl AgentBranch {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Audit record of a completed merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub branch: String,
    pub ancestor_snapshot_id: String,
    pub ancestor_hash: ContentHash,
    /// Branch intents newly written to main, with recomputed stability
    pub merged_intents: Vec<Intent>,
    /// Branch intents already present in main with identical content
    pub noop_ids: Vec<String>,
    pub resolutions: Vec<ResolutionResult>,
    /// ESCALATE conflicts accepted with the merge
    pub escalations: Vec<ConflictReport>,
    /// Canonical hash of main after the merge
    pub merged_hash: ContentHash,
    /// Snapshot of main taken at merge time
    pub snapshot_id: String,
}

/// Main graph plus the branches forked from it
pub struct VersionedGraph<B> {
    main: IntentResolver<B>,
    arena: RwLock<Vec<Intent>>,
    branches: DashMap<String, AgentBranch>,
    history: RwLock<Vec<GraphSnapshot>>,
}

impl<B: GraphBackend> VersionedGraph<B> {
    #[must_use]
    pub fn new(main: IntentResolver<B>) -> Self {
        Self {
            main,
            arena: RwLock::new(Vec::new()),
            branches: DashMap::new(),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Resolver for the shared graph; publishes here bypass branching
    #[inline]
    pub fn main(&self) -> &IntentResolver<B> {
        &self.main
    }

    /// Record a snapshot of main in the history
    ///
    /// # Errors
    /// Returns error on backend failure.
    pub fn snapshot(&self) -> StoreResult<GraphSnapshot> {
        let intents = self.main.intents()?;
        Ok(self.record_snapshot(&intents))
    }

    fn record_snapshot(&self, intents: &[Intent]) -> GraphSnapshot {
        let mut history = self.history.write();
        let snapshot = GraphSnapshot::of(intents, history.len() as u64 + 1);
        history.push(snapshot.clone());
        snapshot
    }

    /// Snapshots of main, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<GraphSnapshot> {
        self.history.read().clone()
    }

    /// Fork a new branch from main as it is now
    ///
    /// # Errors
    /// [`VersionError::BranchExists`] if the name is taken.
    pub fn create_branch(
        &self,
        name: impl Into<String>,
        owner: impl Into<String>,
    ) -> Result<AgentBranch, VersionError> {
        let name = name.into();
        if self.branches.contains_key(&name) {
            return Err(VersionError::BranchExists(name));
        }
        let ancestor = self.snapshot()?;
        let branch = AgentBranch {
            name: name.clone(),
            owner: owner.into(),
            state: BranchState::Open,
            ancestor,
            created_at: Utc::now(),
            entries: Vec::new(),
        };
        match self.branches.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(e) => {
                Err(VersionError::BranchExists(e.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                tracing::info!(branch = %branch.name, owner = %branch.owner, ancestor = %branch.ancestor.hash.short(), "branch created");
                Ok(e.insert(branch).clone())
            }
        }
    }

    /// Append an intent to an open branch
    ///
    /// Checked against main plus the branch's own records. Overlap with
    /// main is not evaluated until the branch is proposed.
    ///
    /// # Errors
    /// Returns error if the branch is missing, frozen or owned by another
    /// agent, or the intent breaks a graph invariant.
    pub fn publish_to_branch(&self, name: &str, mut intent: Intent) -> Result<f64, VersionError> {
        let mut branch = self
            .branches
            .get_mut(name)
            .ok_or_else(|| VersionError::BranchNotFound(name.to_string()))?;
        if intent.agent_id != branch.owner {
            return Err(VersionError::NotOwner {
                branch: name.to_string(),
                agent: intent.agent_id,
            });
        }
        if branch.state != BranchState::Open {
            return Err(VersionError::BranchFrozen {
                branch: name.to_string(),
                state: branch.state,
            });
        }

        let mut arena = self.arena.write();
        {
            let index = self.main.index();
            let mut view = Overlay::new(&*index);
            for &pos in &branch.entries {
                view.stage(&arena[pos]);
            }
            validate_publish(&view, &intent)?;
        }
        intent.stability = self.main.weights().compute(&intent);
        let stability = intent.stability;
        tracing::debug!(branch = %name, intent_id = %intent.id, stability, "branch publish");
        branch.entries.push(arena.len());
        arena.push(intent);
        Ok(stability)
    }

    #[must_use]
    pub fn branch(&self, name: &str) -> Option<AgentBranch> {
        self.branches.get(name).map(|b| b.clone())
    }

    /// All branches, sorted by name
    #[must_use]
    pub fn branches(&self) -> Vec<AgentBranch> {
        let mut all: Vec<AgentBranch> = self.branches.iter().map(|b| b.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// The branch's intents in publish order
    ///
    /// # Errors
    /// [`VersionError::BranchNotFound`] for an unknown branch.
    pub fn branch_intents(&self, name: &str) -> Result<Vec<Intent>, VersionError> {
        let branch = self
            .branches
            .get(name)
            .ok_or_else(|| VersionError::BranchNotFound(name.to_string()))?;
        let arena = self.arena.read();
        Ok(branch.entries.iter().map(|&pos| arena[pos].clone()).collect())
    }

    /// OPEN -> PROPOSED
    ///
    /// # Errors
    /// Returns error for an unknown branch or an illegal transition.
    pub fn freeze(&self, name: &str) -> Result<(), VersionError> {
        self.transition(name, BranchState::Proposed)
    }

    /// PROPOSED -> OPEN, so the owner can revise
    ///
    /// # Errors
    /// Returns error for an unknown branch or an illegal transition.
    pub fn reopen(&self, name: &str) -> Result<(), VersionError> {
        self.transition(name, BranchState::Open)
    }

    /// PROPOSED -> ABANDONED
    ///
    /// # Errors
    /// Returns error for an unknown branch or an illegal transition.
    pub fn abandon(&self, name: &str) -> Result<(), VersionError> {
        self.transition(name, BranchState::Abandoned)
    }

    fn transition(&self, name: &str, to: BranchState) -> Result<(), VersionError> {
        let mut branch = self
            .branches
            .get_mut(name)
            .ok_or_else(|| VersionError::BranchNotFound(name.to_string()))?;
        BranchState::validate_transition(branch.state, to)?;
        tracing::info!(branch = %name, from = %branch.state, to = %to, "branch transition");
        branch.state = to;
        Ok(())
    }

    /// Start merging a proposed branch into main
    ///
    /// Main is locked until the returned session is committed or dropped,
    /// so nothing can be published between evaluation and commit. Branch
    /// intents already in main with the same content are no-ops; an id in
    /// main with different content is a duplicate-id violation. Everything
    /// else is evaluated against main as it is now, not as it was at the
    /// fork.
    ///
    /// # Errors
    /// Returns error if the branch is unknown or not PROPOSED, or on
    /// backend failure.
    pub fn begin_merge(&self, name: &str) -> Result<MergeSession<'_, B>, VersionError> {
        let branch = self
            .branch(name)
            .ok_or_else(|| VersionError::BranchNotFound(name.to_string()))?;
        if branch.state != BranchState::Proposed {
            return Err(VersionError::IllegalTransition {
                from: branch.state,
                to: BranchState::Merged,
            });
        }
        let intents = self.branch_intents(name)?;

        let txn = self.main.begin();
        let mut noop_ids = Vec::new();
        let mut duplicates = Vec::new();
        let mut fresh = Vec::with_capacity(intents.len());
        for intent in intents {
            match txn.resolver().get(&intent.id)? {
                Some(existing) if content_hash_intent(&existing) == content_hash_intent(&intent) => {
                    noop_ids.push(intent.id);
                }
                Some(_) => duplicates.push(ContractViolation::DuplicateId { id: intent.id }),
                None => fresh.push(intent),
            }
        }
        let mut evaluation = txn.evaluate(fresh)?;
        duplicates.append(&mut evaluation.violations);
        evaluation.violations = duplicates;

        tracing::debug!(
            branch = %name,
            candidates = evaluation.candidates.len(),
            noops = noop_ids.len(),
            violations = evaluation.violations.len(),
            conflicts = evaluation.reports.len(),
            "merge evaluated"
        );
        Ok(MergeSession {
            graph: self,
            txn,
            branch,
            evaluation,
            noop_ids,
        })
    }

    /// Evaluate and, if admissible, commit a proposed branch
    ///
    /// # Errors
    /// [`VersionError::MergeBlocked`] when violations or HARD_FAIL
    /// conflicts remain; main is left unchanged.
    pub fn merge(&self, name: &str) -> Result<MergeResult, VersionError> {
        self.begin_merge(name)?.commit()
    }
}

impl<B> fmt::Debug for VersionedGraph<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedGraph")
            .field("main", &self.main)
            .field("branches", &self.branches.len())
            .field("arena", &self.arena.read().len())
            .field("snapshots", &self.history.read().len())
            .finish()
    }
}

/// An evaluated merge holding main's serialization point
///
/// Dropping the session aborts the merge without writing anything.
pub struct MergeSession<'a, B> {
    graph: &'a VersionedGraph<B>,
    txn: PublishTxn<'a, B>,
    branch: AgentBranch,
    evaluation: Evaluation,
    noop_ids: Vec<String>,
}

impl<B: GraphBackend> MergeSession<'_, B> {
    #[inline]
    pub fn branch(&self) -> &AgentBranch {
        &self.branch
    }

    /// What committing would write and what it conflicts with
    #[inline]
    pub fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    #[inline]
    pub fn noop_ids(&self) -> &[String] {
        &self.noop_ids
    }

    #[inline]
    #[must_use]
    pub fn is_admissible(&self) -> bool {
        self.evaluation.is_admissible()
    }

    /// Write the branch into main and mark it MERGED
    ///
    /// All branch intents land in one backend batch, with a single MERGE
    /// entry in main's replay log.
    ///
    /// # Errors
    /// [`VersionError::MergeBlocked`] if the evaluation is not admissible;
    /// backend and log failures leave main untouched.
    pub fn commit(self) -> Result<MergeResult, VersionError> {
        self.commit_with(Vec::new())
    }

    /// Append `operation` to main's log without merging
    ///
    /// Main stays locked until the entry is sealed; the session is consumed.
    pub(crate) fn record(self, operation: Operation) -> Result<(), VersionError> {
        self.txn.resolver().log().append(operation)?;
        Ok(())
    }

    /// [`Self::commit`], with `trailing` logged right after the MERGE entry
    pub(crate) fn commit_with(self, trailing: Vec<Operation>) -> Result<MergeResult, VersionError> {
        let name = self.branch.name.clone();
        if !self.is_admissible() {
            let hard_failures = self.evaluation.hard_failures().count();
            tracing::warn!(branch = %name, violations = self.evaluation.violations.len(), hard_failures, "merge blocked");
            return Err(VersionError::MergeBlocked {
                branch: name,
                violations: self.evaluation.violations.len(),
                hard_failures,
            });
        }

        let mut after = self.txn.resolver().intents()?;
        after.extend(self.evaluation.candidates.iter().cloned());
        let mut result = MergeResult {
            branch: name.clone(),
            ancestor_snapshot_id: self.branch.ancestor.id.clone(),
            ancestor_hash: self.branch.ancestor.hash,
            merged_intents: self.evaluation.candidates.clone(),
            noop_ids: self.noop_ids.clone(),
            resolutions: self.evaluation.resolutions.clone(),
            escalations: self.evaluation.escalations().cloned().collect(),
            merged_hash: canonical_graph_hash(&after),
            snapshot_id: String::new(),
        };
        // the snapshot id is recorded in the log entry, so allocate it first
        let snapshot = GraphSnapshot::of(&after, 0);
        result.snapshot_id = snapshot.id.clone();

        let mut operations = vec![Operation::Merge(result.clone())];
        operations.extend(trailing);
        self.txn.commit::<VersionError>(&self.evaluation, operations)?;
        self.graph.transition(&name, BranchState::Merged)?;
        {
            let mut history = self.graph.history.write();
            let version = history.len() as u64 + 1;
            history.push(GraphSnapshot {
                version,
                ..snapshot
            });
        }
        tracing::info!(
            branch = %name,
            merged = result.merged_intents.len(),
            noops = result.noop_ids.len(),
            resolutions = result.resolutions.len(),
            hash = %result.merged_hash.short(),
            "branch merged"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use concord_contract::{Constraint, InterfaceKind, InterfaceSpec};
    use concord_store::MemoryBackend;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2031, 6, 1, 10, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn providing(agent: &str, id: &str, name: &str, secs: i64) -> Intent {
        Intent::new(agent, "work")
            .with_id(id)
            .with_timestamp(t(secs))
            .providing(InterfaceSpec::new(name, InterfaceKind::Function))
    }

    fn graph() -> VersionedGraph<MemoryBackend> {
        VersionedGraph::new(IntentResolver::new(MemoryBackend::new()).unwrap())
    }

    #[test]
    fn branch_transitions_follow_lifecycle() {
        use BranchState::*;
        assert!(Open.can_transition_to(Proposed));
        assert!(!Open.can_transition_to(Merged));
        assert!(Proposed.can_transition_to(Open));
        assert!(Proposed.can_transition_to(Abandoned));
        assert!(Merged.allowed_transitions().is_empty());
        assert!(Abandoned.is_terminal());
        assert!(matches!(
            BranchState::validate_transition(Merged, Open),
            Err(VersionError::IllegalTransition { from: Merged, to: Open })
        ));
    }

    #[test]
    fn frozen_branch_refuses_mutation() {
        let g = graph();
        g.create_branch("feature", "x").unwrap();
        g.publish_to_branch("feature", providing("x", "x1", "Search", 0)).unwrap();
        g.freeze("feature").unwrap();
        let err = g
            .publish_to_branch("feature", providing("x", "x2", "Index", 1))
            .unwrap_err();
        assert!(matches!(err, VersionError::BranchFrozen { state: BranchState::Proposed, .. }));
        assert_eq!(g.branch_intents("feature").unwrap().len(), 1);
    }

    #[test]
    fn only_owner_publishes() {
        let g = graph();
        g.create_branch("feature", "x").unwrap();
        let err = g
            .publish_to_branch("feature", providing("y", "y1", "Search", 0))
            .unwrap_err();
        assert!(matches!(err, VersionError::NotOwner { ref agent, .. } if agent == "y"));
        assert!(matches!(
            g.create_branch("feature", "z"),
            Err(VersionError::BranchExists(_))
        ));
    }

    #[test]
    fn merge_writes_branch_into_main() {
        let g = graph();
        g.main().publish(providing("y", "y1", "Billing", 0)).unwrap();
        let fork = g.create_branch("feature", "x").unwrap();
        g.publish_to_branch("feature", providing("x", "x1", "Search", 1)).unwrap();
        assert!(g.main().get("x1").unwrap().is_none());

        g.freeze("feature").unwrap();
        let result = g.merge("feature").unwrap();
        assert_eq!(result.ancestor_hash, fork.ancestor.hash);
        assert_eq!(result.merged_intents.len(), 1);
        assert_eq!(result.merged_hash, g.main().content_hash().unwrap());
        assert_eq!(g.branch("feature").unwrap().state, BranchState::Merged);

        let history = g.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].id, result.snapshot_id);
        assert_eq!(history[1].version, 2);
        assert!(history[1].contains("x1") && !history[0].contains("x1"));
        assert_eq!(g.main().log().entries().last().unwrap().operation.kind(), "MERGE");
    }

    #[test]
    fn identical_record_in_main_is_noop() {
        let g = graph();
        g.create_branch("feature", "x").unwrap();
        let shared = providing("x", "x1", "Search", 0);
        g.publish_to_branch("feature", shared.clone()).unwrap();
        g.main().publish(shared).unwrap();

        g.freeze("feature").unwrap();
        let result = g.merge("feature").unwrap();
        assert!(result.merged_intents.is_empty());
        assert_eq!(result.noop_ids, ["x1"]);
    }

    #[test]
    fn hard_failure_blocks_merge_atomically() {
        let g = graph();
        g.create_branch("feature", "x").unwrap();
        g.publish_to_branch("feature", providing("x", "x1", "Notes", 0)).unwrap();
        g.publish_to_branch("feature", providing("x", "x2", "UserAuth", 1)).unwrap();
        g.main()
            .publish(
                providing("y", "y1", "UserAuthHandler", 2)
                    .constrained_by(Constraint::required("UserAuthHandler", "one auth handler")),
            )
            .unwrap();
        let before = g.main().content_hash().unwrap();

        g.freeze("feature").unwrap();
        let session = g.begin_merge("feature").unwrap();
        assert!(!session.is_admissible());
        assert_eq!(session.evaluation().hard_failures().count(), 1);
        assert!(matches!(
            session.commit(),
            Err(VersionError::MergeBlocked { hard_failures: 1, .. })
        ));
        assert_eq!(g.main().content_hash().unwrap(), before);
        assert!(g.main().get("x1").unwrap().is_none());
        assert_eq!(g.branch("feature").unwrap().state, BranchState::Proposed);
    }

    #[test]
    fn open_branch_cannot_merge() {
        let g = graph();
        g.create_branch("feature", "x").unwrap();
        assert!(matches!(
            g.begin_merge("feature"),
            Err(VersionError::IllegalTransition { from: BranchState::Open, .. })
        ));
    }
}
