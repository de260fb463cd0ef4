//! Replay log
//!
//! Append-only, hash-chained sequence of graph operations. Folding a log
//! onto an empty graph is pure, so the log alone is enough to rebuild a
//! graph after a crash or to check that two engines agree.
//!
//! Each entry's hash covers its sequence number, timestamp, operation and
//! the previous entry's hash (SHA-256), so any edit to a recorded entry
//! breaks [`ReplayLog::verify_integrity`].

use crate::config::CoordinationConfig;
use crate::error::ReplayError;
use crate::governor::{VerdictKind, VerdictRecord};
use crate::resolver::IntentResolver;
use crate::versioning::MergeResult;
use chrono::{DateTime, SecondsFormat, Utc};
use concord_contract::{
    canonical_graph_hash, validate_publish, ContentHash, Intent, ResolutionResult,
};
use concord_store::{GraphBackend, MemoryBackend};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};

/// Stabilities closer than this count as reproduced
const STABILITY_TOLERANCE: f64 = 1e-9;

/// One typed graph mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "operation_type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum Operation {
    Publish(Intent),
    Supersede(Intent),
    ResolveConflict(ResolutionResult),
    Merge(MergeResult),
    /// Governor decision on a proposal; never changes graph state
    Verdict(VerdictRecord),
}

impl Operation {
    /// Wire name of the operation type
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Publish(_) => "PUBLISH",
            Self::Supersede(_) => "SUPERSEDE",
            Self::ResolveConflict(_) => "RESOLVE_CONFLICT",
            Self::Merge(_) => "MERGE",
            Self::Verdict(_) => "VERDICT",
        }
    }

    /// Operation recording a newly stored intent
    #[must_use]
    pub fn for_intent(intent: Intent) -> Self {
        if intent.parent_id.is_some() {
            Self::Supersede(intent)
        } else {
            Self::Publish(intent)
        }
    }
}

/// A sealed log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub operation: Operation,
    pub prev_hash: ContentHash,
    pub hash: ContentHash,
}

impl ReplayEntry {
    fn seal(
        seq: u64,
        timestamp: DateTime<Utc>,
        operation: Operation,
        prev_hash: ContentHash,
    ) -> Result<Self, ReplayError> {
        let mut entry = Self {
            seq,
            timestamp,
            operation,
            prev_hash,
            hash: ContentHash::default(),
        };
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }

    fn compute_hash(&self) -> Result<ContentHash, ReplayError> {
        let mut hasher = Sha256::new();
        hasher.update(self.seq.to_le_bytes());
        hasher.update(
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::AutoSi, true)
                .as_bytes(),
        );
        hasher.update([0]);
        hasher.update(serde_json::to_vec(&self.operation)?);
        hasher.update([0]);
        hasher.update(self.prev_hash.as_bytes());
        Ok(ContentHash::new(hasher.finalize().into()))
    }
}

/// Check sequence numbers and the hash chain of a list of entries
///
/// # Errors
/// [`ReplayError::IntegrityViolation`] naming the first broken entry.
pub fn verify_chain(entries: &[ReplayEntry]) -> Result<(), ReplayError> {
    let mut prev = ContentHash::default();
    for (pos, entry) in entries.iter().enumerate() {
        let broken = entry.seq != pos as u64
            || entry.prev_hash != prev
            || entry.compute_hash()? != entry.hash;
        if broken {
            return Err(ReplayError::IntegrityViolation { seq: entry.seq });
        }
        prev = entry.hash;
    }
    Ok(())
}

/// Append-only operation log
#[derive(Debug, Default)]
pub struct ReplayLog {
    inner: Mutex<Vec<ReplayEntry>>,
}

impl ReplayLog {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt previously recorded entries
    ///
    /// # Errors
    /// Returns error if the chain does not verify.
    pub fn from_entries(entries: Vec<ReplayEntry>) -> Result<Self, ReplayError> {
        verify_chain(&entries)?;
        Ok(Self {
            inner: Mutex::new(entries),
        })
    }

    /// Parse a JSON-lines export and verify it
    ///
    /// # Errors
    /// Returns error on a malformed line or a broken chain.
    pub fn from_json_lines(text: &str) -> Result<Self, ReplayError> {
        let entries = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|source| ReplayError::Malformed {
                    line: n + 1,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_entries(entries)
    }

    /// One JSON object per line, in sequence order
    ///
    /// # Errors
    /// Returns error if an entry fails to serialize.
    pub fn to_json_lines(&self) -> Result<String, ReplayError> {
        let guard = self.inner.lock();
        let mut out = String::new();
        for entry in guard.iter() {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Seal and append one operation
    ///
    /// # Errors
    /// Returns error if the operation cannot be serialized for hashing.
    pub fn append(&self, operation: Operation) -> Result<ReplayEntry, ReplayError> {
        let mut guard = self.inner.lock();
        let mut sealed = seal_after(&guard, vec![operation])?;
        let entry = sealed.remove(0);
        guard.push(entry.clone());
        Ok(entry)
    }

    /// Seal `operations`, run `write`, and append only if it succeeds
    ///
    /// The log stays locked across `write` so nothing can be appended
    /// between sealing and committing.
    pub(crate) fn append_with<T, E>(
        &self,
        operations: Vec<Operation>,
        write: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ReplayError>,
    {
        let mut guard = self.inner.lock();
        let sealed = seal_after(&guard, operations)?;
        let out = write()?;
        guard.extend(sealed);
        Ok(out)
    }

    #[must_use]
    pub fn entries(&self) -> Vec<ReplayEntry> {
        self.inner.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Hash of the last entry; zero for an empty log
    #[must_use]
    pub fn head(&self) -> ContentHash {
        self.inner
            .lock()
            .last()
            .map(|e| e.hash)
            .unwrap_or_default()
    }

    /// Recompute the whole chain
    ///
    /// # Errors
    /// [`ReplayError::IntegrityViolation`] naming the first broken entry.
    pub fn verify_integrity(&self) -> Result<(), ReplayError> {
        verify_chain(&self.inner.lock())
    }
}

fn seal_after(
    existing: &[ReplayEntry],
    operations: Vec<Operation>,
) -> Result<Vec<ReplayEntry>, ReplayError> {
    let mut prev = existing.last().map(|e| e.hash).unwrap_or_default();
    let mut seq = existing.len() as u64;
    let now = Utc::now();
    let mut sealed = Vec::with_capacity(operations.len());
    for operation in operations {
        let entry = ReplayEntry::seal(seq, now, operation, prev)?;
        prev = entry.hash;
        seq += 1;
        sealed.push(entry);
    }
    Ok(sealed)
}

fn admit(
    graph: &mut BTreeMap<String, Intent>,
    seq: u64,
    intent: &Intent,
) -> Result<(), ReplayError> {
    validate_publish(&*graph, intent)
        .map_err(|violation| ReplayError::Contract { seq, violation })?;
    graph.insert(intent.id.clone(), intent.clone());
    Ok(())
}

/// APPROVE must directly follow the MERGE of the same branch
fn check_verdict(
    previous: Option<&Operation>,
    seq: u64,
    record: &VerdictRecord,
) -> Result<(), ReplayError> {
    if record.verdict != VerdictKind::Approve {
        return Ok(());
    }
    match previous {
        Some(Operation::Merge(merge)) if merge.branch == record.branch => Ok(()),
        _ => Err(ReplayError::UnmatchedVerdict {
            seq,
            branch: record.branch.clone(),
        }),
    }
}

/// Fold a log onto an empty graph
///
/// Pure: the same entries always produce the same graph. Merge entries
/// are checked against the graph hash they recorded; verdicts leave the
/// graph alone.
///
/// # Errors
/// Returns error if an entry breaks a graph invariant, names an unknown
/// intent, a merge hash does not reproduce, or an approval has no merge.
pub fn replay(entries: &[ReplayEntry]) -> Result<BTreeMap<String, Intent>, ReplayError> {
    let mut graph = BTreeMap::new();
    let mut previous: Option<&Operation> = None;
    for entry in entries {
        match &entry.operation {
            Operation::Publish(intent) | Operation::Supersede(intent) => {
                admit(&mut graph, entry.seq, intent)?;
            }
            Operation::ResolveConflict(resolution) => {
                for id in [&resolution.winner_id, &resolution.loser_id] {
                    if !graph.contains_key(id) {
                        return Err(ReplayError::UnknownIntent {
                            seq: entry.seq,
                            intent_id: id.clone(),
                        });
                    }
                }
            }
            Operation::Merge(merge) => {
                for intent in &merge.merged_intents {
                    admit(&mut graph, entry.seq, intent)?;
                }
                let replayed = canonical_graph_hash(graph.values());
                if replayed != merge.merged_hash {
                    return Err(ReplayError::HashMismatch {
                        seq: entry.seq,
                        recorded: merge.merged_hash.to_string(),
                        replayed: replayed.to_string(),
                    });
                }
            }
            Operation::Verdict(record) => check_verdict(previous, entry.seq, record)?,
        }
        previous = Some(&entry.operation);
    }
    Ok(graph)
}

/// Canonical hash of the graph a log folds to
///
/// # Errors
/// Same as [`replay`].
pub fn replay_hash(entries: &[ReplayEntry]) -> Result<ContentHash, ReplayError> {
    Ok(canonical_graph_hash(replay(entries)?.values()))
}

/// Rebuild a backend from a log
///
/// The whole log is verified and folded first, then every intent goes to
/// the backend in one batch, so a bad log or a failed write leaves the
/// backend untouched. Returns the number of intents written.
///
/// # Errors
/// Returns error on an invalid log or a backend failure.
pub fn restore_into<G>(entries: &[ReplayEntry], backend: &G) -> Result<usize, ReplayError>
where
    G: GraphBackend + ?Sized,
{
    verify_chain(entries)?;
    replay(entries)?;
    let mut intents = Vec::new();
    for entry in entries {
        match &entry.operation {
            Operation::Publish(intent) | Operation::Supersede(intent) => {
                intents.push(intent.clone());
            }
            Operation::Merge(merge) => intents.extend(merge.merged_intents.iter().cloned()),
            Operation::ResolveConflict(_) | Operation::Verdict(_) => {}
        }
    }
    if !intents.is_empty() {
        backend.publish_batch(&intents)?;
    }
    tracing::info!(entries = entries.len(), restored = intents.len(), backend = backend.name(), "restored graph from log");
    Ok(intents.len())
}

/// A point where a re-run disagreed with the recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayMismatch {
    pub seq: u64,
    pub detail: String,
}

/// Outcome of [`replay_with_resolver`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub entries: usize,
    /// Hash of the pure fold
    pub expected_hash: ContentHash,
    /// Hash of the graph the fresh resolver built
    pub final_hash: ContentHash,
    pub mismatches: Vec<ReplayMismatch>,
}

impl ReplayReport {
    #[inline]
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.mismatches.is_empty() && self.expected_hash == self.final_hash
    }
}

/// Re-run a log through a fresh in-memory resolver
///
/// Every publish is evaluated again from scratch; recomputed stabilities
/// and resolutions are compared with the recorded ones. Resolutions match
/// when [`ResolutionResult::is_equivalent_to`] holds.
///
/// # Errors
/// Returns error if the log itself is invalid; divergences are reported
/// in the [`ReplayReport`] instead.
pub fn replay_with_resolver(
    entries: &[ReplayEntry],
    config: &CoordinationConfig,
) -> Result<ReplayReport, ReplayError> {
    verify_chain(entries)?;
    let expected_hash = replay_hash(entries)?;
    let resolver = IntentResolver::new(MemoryBackend::new())?
        .with_weights(config.weights)
        .with_policy(config.policy)
        .with_min_stability(config.resolver.min_stability);

    let mut mismatches = Vec::new();
    let mut pending: VecDeque<ResolutionResult> = VecDeque::new();
    let mut last_seq = 0;

    for entry in entries {
        let seq = entry.seq;
        last_seq = seq;
        match &entry.operation {
            Operation::Publish(intent) | Operation::Supersede(intent) => {
                flush_unrecorded(&mut pending, seq, &mut mismatches);
                match resolver.publish(intent.clone()) {
                    Ok(outcome) => {
                        if (outcome.stability - intent.stability).abs() > STABILITY_TOLERANCE {
                            mismatches.push(ReplayMismatch {
                                seq,
                                detail: format!(
                                    "stability of '{}' recorded {} replayed {}",
                                    intent.id, intent.stability, outcome.stability
                                ),
                            });
                        }
                        pending.extend(outcome.resolutions);
                    }
                    Err(e) => mismatches.push(ReplayMismatch {
                        seq,
                        detail: format!("publish of '{}' failed on replay: {e}", intent.id),
                    }),
                }
            }
            Operation::ResolveConflict(recorded) => match pending.pop_front() {
                Some(replayed) if replayed.is_equivalent_to(recorded) => {}
                Some(replayed) => mismatches.push(ReplayMismatch {
                    seq,
                    detail: format!(
                        "resolution recorded {} over {}, replayed {} over {}",
                        recorded.winner_id,
                        recorded.loser_id,
                        replayed.winner_id,
                        replayed.loser_id
                    ),
                }),
                None => mismatches.push(ReplayMismatch {
                    seq,
                    detail: format!(
                        "resolution {} over {} was not reproduced",
                        recorded.winner_id, recorded.loser_id
                    ),
                }),
            },
            Operation::Merge(merge) => {
                flush_unrecorded(&mut pending, seq, &mut mismatches);
                match resolver.admit_batch(merge.merged_intents.clone()) {
                    Ok(evaluation) => {
                        let reproduced = evaluation.resolutions.len() == merge.resolutions.len()
                            && merge.resolutions.iter().all(|recorded| {
                                evaluation
                                    .resolutions
                                    .iter()
                                    .any(|r| r.is_equivalent_to(recorded))
                            });
                        if !reproduced {
                            mismatches.push(ReplayMismatch {
                                seq,
                                detail: format!(
                                    "merge of '{}' produced different resolutions",
                                    merge.branch
                                ),
                            });
                        }
                    }
                    Err(e) => mismatches.push(ReplayMismatch {
                        seq,
                        detail: format!("merge of '{}' failed on replay: {e}", merge.branch),
                    }),
                }
            }
            Operation::Verdict(_) => {}
        }
    }
    flush_unrecorded(&mut pending, last_seq, &mut mismatches);

    let final_hash = resolver.content_hash()?;
    let report = ReplayReport {
        entries: entries.len(),
        expected_hash,
        final_hash,
        mismatches,
    };
    if report.is_deterministic() {
        tracing::debug!(entries = report.entries, hash = %final_hash.short(), "replay reproduced graph");
    } else {
        tracing::warn!(
            entries = report.entries,
            mismatches = report.mismatches.len(),
            "replay diverged from recording"
        );
    }
    Ok(report)
}

fn flush_unrecorded(
    pending: &mut VecDeque<ResolutionResult>,
    seq: u64,
    mismatches: &mut Vec<ReplayMismatch>,
) {
    for extra in pending.drain(..) {
        mismatches.push(ReplayMismatch {
            seq,
            detail: format!(
                "replay produced unrecorded resolution {} over {}",
                extra.winner_id, extra.loser_id
            ),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use concord_contract::{ConflictClass, InterfaceKind, InterfaceSpec};
    use pretty_assertions::assert_eq;

    fn intent(id: &str, agent: &str, name: &str, secs: i64) -> Intent {
        let t0 = Utc.with_ymd_and_hms(2031, 5, 1, 12, 0, 0).unwrap();
        Intent::new(agent, "work")
            .with_id(id)
            .with_timestamp(t0 + Duration::seconds(secs))
            .providing(InterfaceSpec::new(name, InterfaceKind::Function))
            .with_stability(0.3)
    }

    fn sample_log() -> ReplayLog {
        let log = ReplayLog::new();
        log.append(Operation::Publish(intent("a", "x", "Login", 0))).unwrap();
        log.append(Operation::Publish(intent("b", "y", "Search", 1))).unwrap();
        log.append(Operation::ResolveConflict(ResolutionResult {
            winner_id: "a".into(),
            loser_id: "b".into(),
            class: ConflictClass::AutoResolve,
            adjustments: Vec::new(),
        }))
        .unwrap();
        log
    }

    #[test]
    fn chain_links_every_entry() {
        let log = sample_log();
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].prev_hash.is_zero());
        assert_eq!(entries[1].prev_hash, entries[0].hash);
        assert_eq!(entries[2].prev_hash, entries[1].hash);
        assert_eq!(log.head(), entries[2].hash);
        log.verify_integrity().unwrap();
    }

    #[test]
    fn tampering_is_detected() {
        let mut entries = sample_log().entries();
        if let Operation::Publish(i) = &mut entries[1].operation {
            i.intent = "something else".into();
        }
        assert!(matches!(
            verify_chain(&entries),
            Err(ReplayError::IntegrityViolation { seq: 1 })
        ));
        assert!(ReplayLog::from_entries(entries).is_err());
    }

    #[test]
    fn json_lines_use_wire_shape_and_round_trip() {
        let log = sample_log();
        let text = log.to_json_lines().unwrap();
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["operation_type"], "PUBLISH");
        assert_eq!(first["payload"]["id"], "a");
        assert!(first["timestamp"].is_string());
        assert_eq!(text.lines().nth(2).map(|l| l.contains("RESOLVE_CONFLICT")), Some(true));

        let back = ReplayLog::from_json_lines(&text).unwrap();
        assert_eq!(back.entries(), log.entries());
        assert!(matches!(
            ReplayLog::from_json_lines("{not json}\n"),
            Err(ReplayError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn fold_is_pure_and_checks_invariants() {
        let entries = sample_log().entries();
        let first = replay(&entries).unwrap();
        let second = replay(&entries).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.keys().collect::<Vec<_>>(), ["a", "b"]);

        let dup = ReplayLog::new();
        dup.append(Operation::Publish(intent("a", "x", "Login", 0))).unwrap();
        dup.append(Operation::Publish(intent("a", "y", "Other", 1))).unwrap();
        assert!(matches!(
            replay(&dup.entries()),
            Err(ReplayError::Contract { seq: 1, .. })
        ));

        let dangling = ReplayLog::new();
        dangling
            .append(Operation::ResolveConflict(ResolutionResult {
                winner_id: "ghost".into(),
                loser_id: "a".into(),
                class: ConflictClass::AutoResolve,
                adjustments: Vec::new(),
            }))
            .unwrap();
        assert!(matches!(
            replay(&dangling.entries()),
            Err(ReplayError::UnknownIntent { .. })
        ));
    }

    #[test]
    fn restore_writes_every_intent() {
        let entries = sample_log().entries();
        let backend = MemoryBackend::new();
        assert_eq!(restore_into(&entries, &backend).unwrap(), 2);
        assert_eq!(
            canonical_graph_hash(&backend.query_all(None).unwrap()),
            replay_hash(&entries).unwrap()
        );
    }

    #[test]
    fn append_with_discards_entries_when_write_fails() {
        let log = sample_log();
        let before = log.head();
        let result: Result<(), ReplayError> = log.append_with(
            vec![Operation::Publish(intent("c", "z", "Upload", 2))],
            || Err(ReplayError::IntegrityViolation { seq: 99 }),
        );
        assert!(result.is_err());
        assert_eq!(log.len(), 3);
        assert_eq!(log.head(), before);
    }

    #[test]
    fn operation_kinds_match_wire_names() {
        let op = Operation::for_intent(intent("a", "x", "Login", 0));
        assert_eq!(op.kind(), "PUBLISH");
        let child = intent("a", "x", "Login", 0).supersede();
        assert_eq!(Operation::for_intent(child).kind(), "SUPERSEDE");
    }
}
