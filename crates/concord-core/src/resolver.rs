//! Intent resolver
//!
//! The serialization point for one graph. Every publish runs
//! acquire-evaluate-commit under a single lock: invariant checks, overlap
//! detection and classification see a graph that cannot change underneath
//! them, and nothing is written until every check has passed.

use crate::config::{CoordinationConfig, ResolverConfig};
use crate::cycles::{DependencyCycle, DependencyGraph};
use crate::error::{ConfigError, PublishError};
use crate::replay::{Operation, ReplayLog};
use chrono::{DateTime, Utc};
use concord_contract::{
    canonical_graph_hash, classify_all, validate_publish, Adjustment, AdjustmentKind,
    ConflictClass, ConflictReport, Constraint, ContentHash, ContractDescriptor,
    ContractViolation, Intent, IntentField, InterfaceSpec, Overlap, OverlapKind,
    ResolutionPolicy, ResolutionResult, StabilityWeights, Overlay,
};
use concord_matching::{Matcher, StructuralMatcher};
use concord_store::{GraphBackend, StoreError, StoreResult};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

/// Stability at or above which an intent counts as settled
pub const HIGH_STABILITY: f64 = 0.7;

/// Everything a publish attempt would do, computed without writing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Candidates that passed every invariant, with recomputed stability
    pub candidates: Vec<Intent>,
    pub violations: Vec<ContractViolation>,
    /// One report per conflicting (candidate, existing) pair
    pub reports: Vec<ConflictReport>,
    /// Resolutions for the AUTO_RESOLVE reports
    pub resolutions: Vec<ResolutionResult>,
    /// Required constraints of other agents that now govern the candidates
    pub adopted_constraints: Vec<Constraint>,
}

impl Evaluation {
    pub fn hard_failures(&self) -> impl Iterator<Item = &ConflictReport> {
        self.reports_of(ConflictClass::HardFail)
    }

    pub fn escalations(&self) -> impl Iterator<Item = &ConflictReport> {
        self.reports_of(ConflictClass::Escalate)
    }

    fn reports_of(&self, class: ConflictClass) -> impl Iterator<Item = &ConflictReport> {
        self.reports.iter().filter(move |r| r.class == class)
    }

    /// No violation and no HARD_FAIL
    #[must_use]
    pub fn is_admissible(&self) -> bool {
        self.violations.is_empty() && self.hard_failures().next().is_none()
    }

    /// Violations, HARD_FAIL and ESCALATE reports still needing a decision
    #[must_use]
    pub fn open_conflicts(&self) -> usize {
        self.violations.len()
            + self
                .reports
                .iter()
                .filter(|r| r.class != ConflictClass::AutoResolve)
                .count()
    }
}

/// Result of a successful publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub intent_id: String,
    /// Stability as stored
    pub stability: f64,
    pub resolutions: Vec<ResolutionResult>,
    /// ESCALATE conflicts the intent was published with
    pub escalations: Vec<ConflictReport>,
    pub adopted_constraints: Vec<Constraint>,
}

impl PublishOutcome {
    /// Published provisionally, pending a decision on its escalations
    #[inline]
    #[must_use]
    pub fn is_flagged(&self) -> bool {
        !self.escalations.is_empty()
    }
}

/// Aggregate view of a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub total_intents: usize,
    pub live_intents: usize,
    pub agent_count: usize,
    pub agents: Vec<String>,
    pub average_stability: f64,
    pub high_stability_count: usize,
}

/// Detects overlap, classifies conflicts and publishes intents
pub struct IntentResolver<B> {
    backend: B,
    matcher: Arc<dyn Matcher>,
    weights: StabilityWeights,
    policy: ResolutionPolicy,
    config: ResolverConfig,
    commit: Mutex<()>,
    /// Stored ids and timestamps, for invariant checks
    index: RwLock<BTreeMap<String, DateTime<Utc>>>,
    log: ReplayLog,
}

impl<B: GraphBackend> IntentResolver<B> {
    /// Resolver over `backend` with default weights and policy
    ///
    /// # Errors
    /// Returns error if the backend's current contents cannot be read.
    pub fn new(backend: B) -> StoreResult<Self> {
        let index = backend
            .query_all(None)?
            .into_iter()
            .map(|i| (i.id, i.timestamp))
            .collect::<BTreeMap<_, _>>();
        tracing::debug!(backend = backend.name(), intents = index.len(), "resolver attached");
        Ok(Self {
            backend,
            matcher: Arc::new(StructuralMatcher::new()),
            weights: StabilityWeights::default(),
            policy: ResolutionPolicy::default(),
            config: ResolverConfig::default(),
            commit: Mutex::new(()),
            index: RwLock::new(index),
            log: ReplayLog::new(),
        })
    }

    /// Resolver configured from a validated [`CoordinationConfig`]
    ///
    /// # Errors
    /// Returns error on invalid configuration or an unreadable backend.
    pub fn from_config(backend: B, config: &CoordinationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(backend)?
            .with_weights(config.weights)
            .with_policy(config.policy)
            .with_min_stability(config.resolver.min_stability))
    }

    /// Swap the matcher used for overlap classification
    ///
    /// # Errors
    /// [`ConfigError::NonDeterministicMatcher`] for advisory matchers.
    pub fn with_matcher(mut self, matcher: Arc<dyn Matcher>) -> Result<Self, ConfigError> {
        if !matcher.is_deterministic() {
            return Err(ConfigError::NonDeterministicMatcher(matcher.name().to_string()));
        }
        self.matcher = matcher;
        Ok(self)
    }

    #[inline]
    #[must_use]
    pub fn with_weights(mut self, weights: StabilityWeights) -> Self {
        self.weights = weights;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_min_stability(mut self, min_stability: f64) -> Self {
        self.config.min_stability = min_stability;
        self
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn matcher(&self) -> &dyn Matcher {
        self.matcher.as_ref()
    }

    #[inline]
    pub fn weights(&self) -> &StabilityWeights {
        &self.weights
    }

    #[inline]
    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    #[inline]
    pub fn min_stability(&self) -> f64 {
        self.config.min_stability
    }

    /// Every accepted mutation, in order
    #[inline]
    pub fn log(&self) -> &ReplayLog {
        &self.log
    }

    /// The rules this resolver applies, in machine-readable form
    #[must_use]
    pub fn descriptor(&self) -> ContractDescriptor {
        ContractDescriptor::new(self.weights, self.policy)
    }

    /// Publish one intent
    ///
    /// Validates, detects and classifies overlaps, then stores the intent
    /// with recomputed stability. AUTO_RESOLVE conflicts come back as
    /// resolutions; ESCALATE conflicts flag the outcome without failing it.
    ///
    /// # Errors
    /// [`PublishError::Contract`] on an invariant violation,
    /// [`PublishError::Rejected`] on any HARD_FAIL conflict. Either way
    /// nothing is written.
    pub fn publish(&self, intent: Intent) -> Result<PublishOutcome, PublishError> {
        let txn = self.begin();
        let evaluation = txn.evaluate(vec![intent])?;
        if let Some(violation) = evaluation.violations.first().cloned() {
            tracing::warn!(intent_id = %violation.intent_id(), %violation, "publish violates contract");
            return Err(violation.into());
        }
        let stored = match evaluation.candidates.first() {
            Some(candidate) => candidate.clone(),
            None => return Err(PublishError::NotEvaluated),
        };
        let hard: Vec<ConflictReport> = evaluation.hard_failures().cloned().collect();
        if !hard.is_empty() {
            tracing::warn!(intent_id = %stored.id, agent_id = %stored.agent_id, conflicts = hard.len(), "publish rejected");
            return Err(PublishError::Rejected {
                intent_id: stored.id,
                reports: hard,
            });
        }

        let mut operations = vec![Operation::for_intent(stored.clone())];
        operations.extend(
            evaluation
                .resolutions
                .iter()
                .cloned()
                .map(Operation::ResolveConflict),
        );
        let stabilities = txn.commit::<PublishError>(&evaluation, operations)?;
        let stability = stabilities.first().copied().unwrap_or(stored.stability);

        let escalations: Vec<ConflictReport> = evaluation.escalations().cloned().collect();
        tracing::info!(
            intent_id = %stored.id,
            agent_id = %stored.agent_id,
            stability,
            resolutions = evaluation.resolutions.len(),
            escalations = escalations.len(),
            "intent published"
        );
        Ok(PublishOutcome {
            intent_id: stored.id,
            stability,
            resolutions: evaluation.resolutions,
            escalations,
            adopted_constraints: evaluation.adopted_constraints,
        })
    }

    /// What publishing `intent` would do, without publishing it
    ///
    /// # Errors
    /// Returns error if the backend cannot be queried.
    pub fn preview(&self, intent: &Intent) -> StoreResult<Evaluation> {
        self.begin().evaluate(vec![intent.clone()])
    }

    /// Store a batch if it is admissible, without logging it
    pub(crate) fn admit_batch(&self, batch: Vec<Intent>) -> Result<Evaluation, PublishError> {
        let txn = self.begin();
        let evaluation = txn.evaluate(batch)?;
        if let Some(violation) = evaluation.violations.first() {
            return Err(violation.clone().into());
        }
        let hard: Vec<ConflictReport> = evaluation.hard_failures().cloned().collect();
        if let Some(first) = hard.first() {
            return Err(PublishError::Rejected {
                intent_id: first.candidate_id.clone(),
                reports: hard,
            });
        }
        txn.commit::<PublishError>(&evaluation, Vec::new())?;
        Ok(evaluation)
    }

    /// Take the serialization point
    pub(crate) fn begin(&self) -> PublishTxn<'_, B> {
        PublishTxn {
            resolver: self,
            _guard: self.commit.lock(),
        }
    }

    /// Stored ids and timestamps
    pub(crate) fn index(&self) -> parking_lot::RwLockReadGuard<'_, BTreeMap<String, DateTime<Utc>>> {
        self.index.read()
    }

    /// # Errors
    /// Returns error on backend failure.
    pub fn get(&self, id: &str) -> StoreResult<Option<Intent>> {
        self.backend.get(id)
    }

    /// Every stored intent, superseded ones included
    ///
    /// # Errors
    /// Returns error on backend failure.
    pub fn intents(&self) -> StoreResult<Vec<Intent>> {
        self.backend.query_all(None)
    }

    /// Stored intents not superseded by a later one
    ///
    /// # Errors
    /// Returns error on backend failure.
    pub fn live_intents(&self) -> StoreResult<Vec<Intent>> {
        self.backend.query_live(None)
    }

    /// Canonical hash of the whole graph
    ///
    /// # Errors
    /// Returns error on backend failure.
    pub fn content_hash(&self) -> StoreResult<ContentHash> {
        Ok(canonical_graph_hash(&self.intents()?))
    }

    /// # Errors
    /// Returns error on backend failure.
    pub fn summary(&self) -> StoreResult<GraphSummary> {
        let all = self.intents()?;
        let live_intents = self.backend.query_live(None)?.len();
        let agents: BTreeSet<&str> = all.iter().map(|i| i.agent_id.as_str()).collect();
        #[allow(clippy::cast_precision_loss)]
        let average_stability = if all.is_empty() {
            0.0
        } else {
            all.iter().map(|i| i.stability).sum::<f64>() / all.len() as f64
        };
        Ok(GraphSummary {
            total_intents: all.len(),
            live_intents,
            agent_count: agents.len(),
            agents: agents.into_iter().map(str::to_string).collect(),
            average_stability,
            high_stability_count: all.iter().filter(|i| i.stability >= HIGH_STABILITY).count(),
        })
    }

    /// requires -> provides graph over live intents
    ///
    /// # Errors
    /// Returns error on backend failure.
    pub fn dependency_graph(&self) -> StoreResult<DependencyGraph> {
        Ok(DependencyGraph::build(&self.live_intents()?, self.matcher()))
    }

    /// # Errors
    /// Returns error on backend failure.
    pub fn find_cycles(&self) -> StoreResult<Vec<DependencyCycle>> {
        Ok(self.dependency_graph()?.find_cycles())
    }

    /// Live intents whose specs overlap `specs`, across all agents but one
    ///
    /// # Errors
    /// Returns error on backend failure.
    fn neighbours(
        &self,
        candidate: &Intent,
        staged: &[Intent],
        live: Option<&[Intent]>,
        retired: &HashSet<&str>,
    ) -> StoreResult<Vec<Intent>> {
        let min = self.config.min_stability;
        let specs: Vec<InterfaceSpec> = candidate.specs().cloned().collect();
        let mut found = if specs.is_empty() {
            Vec::new()
        } else {
            self.backend
                .find_overlapping(&specs, &candidate.agent_id, min)?
        };
        if let Some(live) = live.filter(|_| !candidate.constraints.is_empty()) {
            found.extend(
                live.iter()
                    .filter(|i| i.agent_id != candidate.agent_id && !i.constraints.is_empty())
                    .cloned(),
            );
        }
        found.extend(
            staged
                .iter()
                .filter(|s| s.agent_id != candidate.agent_id && s.stability >= min)
                .cloned(),
        );
        found.retain(|i| !retired.contains(i.id.as_str()));
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found.dedup_by(|a, b| a.id == b.id);
        Ok(found)
    }

    /// Every structural overlap between a candidate and an existing intent
    fn detect(&self, candidate: &Intent, existing: &Intent) -> Vec<Overlap> {
        let m = self.matcher.as_ref();
        let mut overlaps = Vec::new();
        let mut push = |kind, mine: &str, theirs: &str, compatible, binding: Option<&Constraint>| {
            overlaps.push(Overlap {
                kind,
                candidate_subject: mine.to_string(),
                existing_subject: theirs.to_string(),
                signatures_compatible: compatible,
                binding_constraint: binding.cloned(),
            });
        };

        for mine in &candidate.provides {
            for theirs in &existing.provides {
                if m.specs_overlap(mine, theirs) {
                    let compatible =
                        m.signatures_compatible(mine, theirs) || m.signatures_compatible(theirs, mine);
                    let binding = binding_constraint(m, candidate, mine, existing, theirs);
                    push(OverlapKind::DuplicateProvision, &mine.name, &theirs.name, compatible, binding);
                }
            }
            for theirs in &existing.requires {
                if m.specs_overlap(mine, theirs) && !m.signatures_compatible(theirs, mine) {
                    let binding = binding_constraint(m, candidate, mine, existing, theirs);
                    let kind = OverlapKind::Dependency { candidate_requires: false };
                    push(kind, &mine.name, &theirs.name, false, binding);
                }
            }
        }
        for mine in &candidate.requires {
            for theirs in &existing.provides {
                if m.specs_overlap(mine, theirs) && !m.signatures_compatible(mine, theirs) {
                    let binding = binding_constraint(m, candidate, mine, existing, theirs);
                    let kind = OverlapKind::Dependency { candidate_requires: true };
                    push(kind, &mine.name, &theirs.name, false, binding);
                }
            }
            for theirs in &existing.requires {
                if m.specs_overlap(mine, theirs) {
                    let compatible =
                        m.signatures_compatible(mine, theirs) || m.signatures_compatible(theirs, mine);
                    let binding = binding_constraint(m, candidate, mine, existing, theirs);
                    push(OverlapKind::SharedRequirement, &mine.name, &theirs.name, compatible, binding);
                }
            }
        }
        for mine in &candidate.constraints {
            for theirs in &existing.constraints {
                if m.constraints_clash(mine, theirs) {
                    let kind = OverlapKind::ConstraintClash {
                        both_required: mine.is_required() && theirs.is_required(),
                    };
                    push(kind, &mine.target, &theirs.target, true, None);
                }
            }
        }
        overlaps
    }

    /// Winner, loser and the loser's adjustments for an AUTO_RESOLVE pair
    fn resolve(&self, candidate: &Intent, existing: &Intent, overlaps: &[Overlap]) -> ResolutionResult {
        let (winner, loser) = self.policy.winner(candidate, existing);
        let loser_is_candidate = loser.id == candidate.id;
        let mut adjustments: Vec<Adjustment> = overlaps
            .iter()
            .filter_map(|o| adjustment(o, winner, loser, loser_is_candidate))
            .collect();
        adjustments.sort();
        adjustments.dedup();
        ResolutionResult {
            winner_id: winner.id.clone(),
            loser_id: loser.id.clone(),
            class: ConflictClass::AutoResolve,
            adjustments,
        }
    }

    /// Required constraints of `others` that cover the candidate and do not clash with it
    fn adopt(&self, candidate: &Intent, others: &[Intent], adopted: &mut Vec<Constraint>) {
        let m = self.matcher.as_ref();
        for constraint in others.iter().flat_map(|o| &o.constraints) {
            let applies = constraint.is_required()
                && candidate.specs().any(|s| m.constraint_covers(constraint, s))
                && !candidate
                    .constraints
                    .iter()
                    .any(|mine| mine == constraint || m.constraints_clash(mine, constraint));
            if applies && !adopted.contains(constraint) {
                adopted.push(constraint.clone());
            }
        }
    }
}

impl<B> fmt::Debug for IntentResolver<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntentResolver")
            .field("matcher", &self.matcher.name())
            .field("min_stability", &self.config.min_stability)
            .field("intents", &self.index.read().len())
            .field("log_entries", &self.log.len())
            .finish_non_exhaustive()
    }
}

/// A required constraint from either side covering the other side's spec
fn binding_constraint<'a>(
    m: &dyn Matcher,
    candidate: &'a Intent,
    candidate_spec: &InterfaceSpec,
    existing: &'a Intent,
    existing_spec: &InterfaceSpec,
) -> Option<&'a Constraint> {
    existing
        .constraints
        .iter()
        .find(|c| c.is_required() && m.constraint_covers(c, candidate_spec))
        .or_else(|| {
            candidate
                .constraints
                .iter()
                .find(|c| c.is_required() && m.constraint_covers(c, existing_spec))
        })
}

fn adjustment(
    overlap: &Overlap,
    winner: &Intent,
    loser: &Intent,
    loser_is_candidate: bool,
) -> Option<Adjustment> {
    let (loser_subject, winner_subject) = if loser_is_candidate {
        (&overlap.candidate_subject, &overlap.existing_subject)
    } else {
        (&overlap.existing_subject, &overlap.candidate_subject)
    };
    let signature_in = |specs: &[InterfaceSpec]| {
        specs
            .iter()
            .find(|s| s.name == *winner_subject)
            .map(|s| s.signature.clone())
    };
    let (kind, field, replacement) = match overlap.kind {
        OverlapKind::DuplicateProvision => (
            AdjustmentKind::ConsumeInstead,
            IntentField::Provides,
            winner_subject.clone(),
        ),
        OverlapKind::Dependency { candidate_requires } => {
            if candidate_requires == loser_is_candidate {
                let signature = signature_in(&winner.provides)?;
                (AdjustmentKind::AdaptSignature, IntentField::Requires, signature)
            } else {
                let signature = signature_in(&winner.requires)?;
                (AdjustmentKind::AdaptSignature, IntentField::Provides, signature)
            }
        }
        OverlapKind::ConstraintClash { .. } => {
            let theirs = winner.constraints.iter().find(|c| c.target == *winner_subject)?;
            (
                AdjustmentKind::YieldConstraint,
                IntentField::Constraints,
                theirs.requirement.clone(),
            )
        }
        OverlapKind::SharedRequirement => return None,
    };
    Some(Adjustment {
        intent_id: loser.id.clone(),
        kind,
        field,
        subject: loser_subject.clone(),
        defer_to: winner.id.clone(),
        replacement,
    })
}

fn describe(overlaps: &[Overlap]) -> String {
    overlaps
        .iter()
        .map(|o| {
            let (mine, theirs) = (&o.candidate_subject, &o.existing_subject);
            match o.kind {
                OverlapKind::DuplicateProvision => format!("both provide '{mine}' / '{theirs}'"),
                OverlapKind::Dependency { candidate_requires: true } => {
                    format!("requires '{mine}' but '{theirs}' has an incompatible signature")
                }
                OverlapKind::Dependency { candidate_requires: false } => {
                    format!("provides '{mine}' in a shape '{theirs}' cannot use")
                }
                OverlapKind::SharedRequirement => format!("both require '{mine}' / '{theirs}'"),
                OverlapKind::ConstraintClash { .. } => {
                    format!("constraints on '{mine}' and '{theirs}' disagree")
                }
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Exclusive hold on a resolver's serialization point
///
/// Evaluations and the commit that follows them see the same graph.
/// Dropping the transaction without committing writes nothing.
pub(crate) struct PublishTxn<'a, B> {
    resolver: &'a IntentResolver<B>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a, B: GraphBackend> PublishTxn<'a, B> {
    pub(crate) fn resolver(&self) -> &'a IntentResolver<B> {
        self.resolver
    }

    /// Validate, stabilize and classify a batch against the current graph
    ///
    /// Candidates are checked in order; each sees the valid ones before it
    /// as already published.
    pub(crate) fn evaluate(&self, batch: Vec<Intent>) -> StoreResult<Evaluation> {
        let r = self.resolver;
        let mut candidates = Vec::with_capacity(batch.len());
        let mut violations = Vec::new();
        {
            let index = r.index.read();
            let mut overlay = Overlay::new(&*index);
            for mut intent in batch {
                if let Err(violation) = validate_publish(&overlay, &intent) {
                    tracing::debug!(intent_id = %intent.id, invariant = ?violation.invariant(), "candidate violates contract");
                    violations.push(violation);
                    continue;
                }
                overlay.stage(&intent);
                intent.stability = r.weights.compute(&intent);
                candidates.push(intent);
            }
        }

        let retired: HashSet<&str> = candidates
            .iter()
            .filter_map(|c: &Intent| c.parent_id.as_deref())
            .collect();
        let live = if candidates.iter().any(|c| !c.constraints.is_empty()) {
            Some(r.backend.query_live(Some(r.config.min_stability))?)
        } else {
            None
        };

        let mut reports = Vec::new();
        let mut resolutions = Vec::new();
        let mut adopted_constraints = Vec::new();
        for (pos, candidate) in candidates.iter().enumerate() {
            if retired.contains(candidate.id.as_str()) {
                continue;
            }
            let others = r.neighbours(candidate, &candidates[..pos], live.as_deref(), &retired)?;
            r.adopt(candidate, &others, &mut adopted_constraints);
            for existing in &others {
                let overlaps = r.detect(candidate, existing);
                let Some(class) = classify_all(&overlaps) else {
                    continue;
                };
                tracing::debug!(
                    intent_id = %candidate.id,
                    existing_id = %existing.id,
                    class = ?class,
                    overlaps = overlaps.len(),
                    "conflict classified"
                );
                if class == ConflictClass::AutoResolve {
                    resolutions.push(r.resolve(candidate, existing, &overlaps));
                }
                reports.push(ConflictReport {
                    candidate_id: candidate.id.clone(),
                    candidate_agent: candidate.agent_id.clone(),
                    existing_id: existing.id.clone(),
                    existing_agent: existing.agent_id.clone(),
                    class,
                    description: describe(&overlaps),
                    overlaps,
                });
            }
        }

        Ok(Evaluation {
            candidates,
            violations,
            reports,
            resolutions,
            adopted_constraints,
        })
    }

    /// Write the admitted candidates and append `operations` to the log
    ///
    /// The backend write happens first; the log entries are sealed before
    /// it and appended only once it succeeds.
    pub(crate) fn commit<E>(
        &self,
        evaluation: &Evaluation,
        operations: Vec<Operation>,
    ) -> Result<Vec<f64>, E>
    where
        E: From<StoreError> + From<crate::error::ReplayError>,
    {
        let r = self.resolver;
        r.log.append_with(operations, || {
            let stabilities = if evaluation.candidates.is_empty() {
                Vec::new()
            } else {
                r.backend.publish_batch(&evaluation.candidates)?
            };
            let mut index = r.index.write();
            for c in &evaluation.candidates {
                index.insert(c.id.clone(), c.timestamp);
            }
            Ok::<_, E>(stabilities)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use concord_contract::{Evidence, InterfaceKind};
    use concord_store::MemoryBackend;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2031, 6, 1, 10, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn func(name: &str, signature: &str) -> InterfaceSpec {
        InterfaceSpec::new(name, InterfaceKind::Function).with_signature(signature)
    }

    fn resolver() -> IntentResolver<MemoryBackend> {
        IntentResolver::new(MemoryBackend::new()).unwrap()
    }

    #[test]
    fn publish_stores_recomputed_stability() {
        let r = resolver();
        let intent = Intent::new("a", "login")
            .with_id("i1")
            .with_timestamp(t(0))
            .providing(func("Login", "user: str"))
            .with_evidence(Evidence::code_committed("abc").at(t(0)))
            .with_stability(0.99);
        let outcome = r.publish(intent).unwrap();
        assert!((outcome.stability - 0.5).abs() < 1e-9);
        assert!((r.get("i1").unwrap().unwrap().stability - 0.5).abs() < 1e-9);
        assert_eq!(r.log().len(), 1);
    }

    #[test]
    fn rejected_publish_writes_nothing() {
        let r = resolver();
        r.publish(
            Intent::new("y", "auth")
                .with_id("y1")
                .with_timestamp(t(0))
                .providing(func("UserAuthHandler", ""))
                .constrained_by(Constraint::required("UserAuthHandler", "single auth handler")),
        )
        .unwrap();
        let before = r.content_hash().unwrap();

        let err = r
            .publish(
                Intent::new("x", "auth again")
                    .with_id("x1")
                    .with_timestamp(t(1))
                    .providing(func("UserAuth", "")),
            )
            .unwrap_err();
        let PublishError::Rejected { reports, .. } = err else {
            panic!("expected rejection, got {err:?}");
        };
        assert_eq!(reports.len(), 1);
        assert!(reports[0].involves("x1") && reports[0].involves("y1"));
        assert_eq!(r.content_hash().unwrap(), before);
        assert_eq!(r.log().len(), 1);
    }

    #[test]
    fn dependency_mismatch_adapts_loser_signature() {
        let r = resolver();
        r.publish(
            Intent::new("p", "profiles")
                .with_id("p1")
                .with_timestamp(t(0))
                .providing(func("Profile", "id: UUID"))
                .with_evidence(Evidence::code_committed("c").at(t(0))),
        )
        .unwrap();
        let outcome = r
            .publish(
                Intent::new("c", "client")
                    .with_id("c1")
                    .with_timestamp(t(5))
                    .requiring(func("ProfileService", "id: int")),
            )
            .unwrap();
        assert_eq!(outcome.resolutions.len(), 1);
        let resolution = &outcome.resolutions[0];
        assert_eq!(resolution.winner_id, "p1");
        assert_eq!(resolution.adjustments.len(), 1);
        let adjustment = &resolution.adjustments[0];
        assert_eq!(adjustment.kind, AdjustmentKind::AdaptSignature);
        assert_eq!(adjustment.field, IntentField::Requires);
        assert_eq!(adjustment.subject, "ProfileService");
        assert_eq!(adjustment.replacement, "id: UUID");
    }

    #[test]
    fn compatible_dependency_is_not_a_conflict() {
        let r = resolver();
        r.publish(
            Intent::new("p", "profiles")
                .with_id("p1")
                .with_timestamp(t(0))
                .providing(func("Profile", "id: UUID, name: str")),
        )
        .unwrap();
        let outcome = r
            .publish(
                Intent::new("c", "client")
                    .with_id("c1")
                    .with_timestamp(t(1))
                    .requiring(func("Profile", "id: UUID")),
            )
            .unwrap();
        assert!(outcome.resolutions.is_empty());
        assert!(!outcome.is_flagged());
    }

    #[test]
    fn required_constraints_of_others_are_adopted() {
        let r = resolver();
        r.publish(
            Intent::new("db", "schema")
                .with_id("d1")
                .with_timestamp(t(0))
                .requiring(func("Order", ""))
                .constrained_by(Constraint::required("order", "soft delete only")),
        )
        .unwrap();
        let outcome = r
            .publish(
                Intent::new("api", "orders")
                    .with_id("o1")
                    .with_timestamp(t(1))
                    .requiring(func("OrderModel", "")),
            )
            .unwrap();
        assert_eq!(outcome.adopted_constraints.len(), 1);
        assert_eq!(outcome.adopted_constraints[0].requirement, "soft delete only");
    }

    #[test]
    fn superseded_intents_no_longer_conflict() {
        let r = resolver();
        let old = Intent::new("y", "search")
            .with_id("s1")
            .with_timestamp(t(0))
            .providing(func("Search", ""));
        r.publish(old.clone()).unwrap();
        let mut next = old.supersede();
        next.id = "s2".into();
        next.timestamp = t(1);
        next.provides = vec![func("Indexer", "")];
        assert_eq!(r.publish(next).unwrap().intent_id, "s2");

        let outcome = r
            .publish(
                Intent::new("x", "search ui")
                    .with_id("u1")
                    .with_timestamp(t(2))
                    .providing(func("Search", "")),
            )
            .unwrap();
        assert!(outcome.resolutions.is_empty());
        assert_eq!(r.log().entries()[1].operation.kind(), "SUPERSEDE");
    }

    #[test]
    fn non_deterministic_matcher_is_refused() {
        #[derive(Debug)]
        struct Fuzzy;
        impl Matcher for Fuzzy {
            fn name(&self) -> &'static str {
                "fuzzy"
            }
            fn specs_overlap(&self, _: &InterfaceSpec, _: &InterfaceSpec) -> bool {
                true
            }
            fn signatures_compatible(&self, _: &InterfaceSpec, _: &InterfaceSpec) -> bool {
                true
            }
            fn constraint_covers(&self, _: &Constraint, _: &InterfaceSpec) -> bool {
                false
            }
            fn constraints_clash(&self, _: &Constraint, _: &Constraint) -> bool {
                false
            }
            fn is_deterministic(&self) -> bool {
                false
            }
        }
        assert!(matches!(
            resolver().with_matcher(Arc::new(Fuzzy)),
            Err(ConfigError::NonDeterministicMatcher(name)) if name == "fuzzy"
        ));
    }

    #[test]
    fn summary_counts_agents_and_stability() {
        let r = resolver();
        for (id, agent, secs) in [("a1", "a", 0), ("b1", "b", 1), ("a2", "a", 2)] {
            r.publish(
                Intent::new(agent, "work")
                    .with_id(id)
                    .with_timestamp(t(secs))
                    .providing(func(&format!("Thing{id}"), ""))
                    .with_evidence(Evidence::manual_approval("ok").at(t(secs))),
            )
            .unwrap();
        }
        let summary = r.summary().unwrap();
        assert_eq!(summary.total_intents, 3);
        assert_eq!(summary.agents, ["a", "b"]);
        assert_eq!(summary.high_stability_count, 0);
        assert!((summary.average_stability - 0.6).abs() < 1e-9);
    }
}
