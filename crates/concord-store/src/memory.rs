//! In-memory backend

use crate::backend::{overlaps_any, GraphBackend, StoreError, StoreResult};
use concord_contract::{Intent, InterfaceSpec};
use concord_matching::{Matcher, StructuralMatcher};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
struct MemoryState {
    intents: IndexMap<String, Intent>,
    superseded: HashSet<String>,
    closed: bool,
}

impl MemoryState {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn insert(&mut self, intent: &Intent) -> f64 {
        if let Some(parent) = &intent.parent_id {
            self.superseded.insert(parent.clone());
        }
        self.intents.insert(intent.id.clone(), intent.clone());
        intent.stability
    }

    fn filtered<'a>(
        &'a self,
        min_stability: Option<f64>,
        live_only: bool,
    ) -> impl Iterator<Item = &'a Intent> + 'a {
        let min = min_stability.unwrap_or(0.0);
        self.intents.values().filter(move |i| {
            i.stability >= min && !(live_only && self.superseded.contains(&i.id))
        })
    }
}

/// Insertion-ordered in-memory graph store
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    matcher: Arc<dyn Matcher>,
}

impl MemoryBackend {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            matcher: Arc::new(StructuralMatcher::new()),
        }
    }

    /// Use a different matcher for [`GraphBackend::find_overlapping`]
    #[inline]
    #[must_use]
    pub fn with_matcher(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.matcher = matcher;
        self
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryBackend")
            .field("intents", &state.intents.len())
            .field("matcher", &self.matcher.name())
            .field("closed", &state.closed)
            .finish()
    }
}

impl GraphBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn publish(&self, intent: &Intent) -> StoreResult<f64> {
        let mut state = self.state.write();
        state.ensure_open()?;
        if state.intents.contains_key(&intent.id) {
            return Err(StoreError::DuplicateId(intent.id.clone()));
        }
        let stability = state.insert(intent);
        tracing::debug!(intent_id = %intent.id, agent_id = %intent.agent_id, stability, "stored intent");
        Ok(stability)
    }

    fn publish_batch(&self, intents: &[Intent]) -> StoreResult<Vec<f64>> {
        let mut state = self.state.write();
        state.ensure_open()?;
        let mut seen = HashSet::with_capacity(intents.len());
        for intent in intents {
            if state.intents.contains_key(&intent.id) || !seen.insert(intent.id.as_str()) {
                return Err(StoreError::DuplicateId(intent.id.clone()));
            }
        }
        let stabilities = intents.iter().map(|i| state.insert(i)).collect();
        tracing::debug!(count = intents.len(), "stored intent batch");
        Ok(stabilities)
    }

    fn get(&self, id: &str) -> StoreResult<Option<Intent>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state.intents.get(id).cloned())
    }

    fn query_all(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state.filtered(min_stability, false).cloned().collect())
    }

    fn query_live(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state.filtered(min_stability, true).cloned().collect())
    }

    fn query_by_agent(&self, agent_id: &str) -> StoreResult<Vec<Intent>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state
            .intents
            .values()
            .filter(|i| i.agent_id == agent_id)
            .cloned()
            .collect())
    }

    fn find_overlapping(
        &self,
        specs: &[InterfaceSpec],
        exclude_agent: &str,
        min_stability: f64,
    ) -> StoreResult<Vec<Intent>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state
            .filtered(Some(min_stability), true)
            .filter(|i| i.agent_id != exclude_agent)
            .filter(|i| overlaps_any(self.matcher.as_ref(), specs, i))
            .cloned()
            .collect())
    }

    fn count(&self) -> StoreResult<usize> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state.intents.len())
    }

    fn close(&self) -> StoreResult<()> {
        self.state.write().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_contract::InterfaceKind;

    fn intent(id: &str, agent: &str, name: &str, stability: f64) -> Intent {
        Intent::new(agent, "work")
            .with_id(id)
            .providing(InterfaceSpec::new(name, InterfaceKind::Function))
            .with_stability(stability)
    }

    #[test]
    fn publish_returns_stored_stability_and_rejects_duplicates() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.publish(&intent("a", "x", "Login", 0.4)).unwrap(), 0.4);
        assert!(matches!(
            backend.publish(&intent("a", "y", "Other", 0.9)),
            Err(StoreError::DuplicateId(id)) if id == "a"
        ));
        assert_eq!(backend.count().unwrap(), 1);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let backend = MemoryBackend::new();
        backend.publish(&intent("a", "x", "Login", 0.3)).unwrap();
        let batch = [intent("b", "x", "Logout", 0.3), intent("a", "x", "Again", 0.3)];
        assert!(backend.publish_batch(&batch).is_err());
        assert_eq!(backend.count().unwrap(), 1);

        let repeated = [intent("c", "x", "C", 0.3), intent("c", "x", "C", 0.3)];
        assert!(backend.publish_batch(&repeated).is_err());
        assert_eq!(backend.count().unwrap(), 1);
    }

    #[test]
    fn queries_filter_and_keep_publish_order() {
        let backend = MemoryBackend::new();
        for (id, agent, s) in [("c", "x", 0.9), ("a", "y", 0.2), ("b", "x", 0.5)] {
            backend.publish(&intent(id, agent, id, s)).unwrap();
        }
        let ids = |v: Vec<Intent>| v.into_iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(ids(backend.query_all(None).unwrap()), ["c", "a", "b"]);
        assert_eq!(ids(backend.query_all(Some(0.5)).unwrap()), ["c", "b"]);
        assert_eq!(ids(backend.query_by_agent("x").unwrap()), ["c", "b"]);
    }

    #[test]
    fn find_overlapping_skips_own_agent_and_superseded() {
        let backend = MemoryBackend::new();
        let old = intent("old", "y", "UserAuth", 0.5);
        backend.publish(&old).unwrap();
        backend.publish(&intent("mine", "x", "UserAuthHandler", 0.5)).unwrap();
        backend.publish(&intent("weak", "z", "UserAuth", 0.1)).unwrap();

        let wanted = [InterfaceSpec::new("UserAuth", InterfaceKind::Function)];
        let found = backend.find_overlapping(&wanted, "x", 0.3).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "old");

        let mut next = old.supersede();
        next.id = "new".into();
        backend.publish(&next).unwrap();
        let found = backend.find_overlapping(&wanted, "x", 0.3).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "new");
        assert_eq!(backend.query_live(None).unwrap().len(), 3);
    }

    #[test]
    fn closed_backend_refuses_calls() {
        let backend = MemoryBackend::new();
        backend.close().unwrap();
        assert!(matches!(backend.count(), Err(StoreError::Closed)));
        assert!(matches!(
            backend.publish(&intent("a", "x", "A", 0.3)),
            Err(StoreError::Closed)
        ));
    }
}
