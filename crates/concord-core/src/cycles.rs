//! Dependency cycles between intents
//!
//! An edge `a -> b` means `a` requires something `b` provides. Cycles mean
//! no agent can finish first; an acyclic graph has a deterministic build
//! order.

use crate::error::CycleError;
use concord_contract::Intent;
use concord_matching::Matcher;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Intents that wait on each other, in edge order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCycle {
    pub intent_ids: Vec<String>,
    /// Agent of each intent, aligned with `intent_ids`
    pub agent_ids: Vec<String>,
}

impl DependencyCycle {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.intent_ids.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intent_ids.is_empty()
    }
}

impl fmt::Display for DependencyCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, agent) in self.intent_ids.iter().zip(&self.agent_ids) {
            write!(f, "{id}({agent}) -> ")?;
        }
        match self.intent_ids.first() {
            Some(first) => f.write_str(first),
            None => Ok(()),
        }
    }
}

/// requires -> provides graph over a set of intents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
    agents: BTreeMap<String, String>,
}

impl DependencyGraph {
    #[must_use]
    pub fn build(intents: &[Intent], matcher: &dyn Matcher) -> Self {
        let mut graph = Self::default();
        for intent in intents {
            graph.agents.insert(intent.id.clone(), intent.agent_id.clone());
            graph.edges.entry(intent.id.clone()).or_default();
        }
        for a in intents {
            for b in intents.iter().filter(|b| b.id != a.id) {
                let depends = a.requires.iter().any(|need| {
                    b.provides.iter().any(|offer| matcher.specs_overlap(need, offer))
                });
                if depends {
                    graph
                        .edges
                        .entry(a.id.clone())
                        .or_default()
                        .insert(b.id.clone());
                }
            }
        }
        graph
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Intents `id` directly depends on, sorted
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.edges
            .get(id)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Every elementary cycle reachable by DFS, each reported once
    ///
    /// Nodes and edges are visited in sorted order, so the result is stable.
    #[must_use]
    pub fn find_cycles(&self) -> Vec<DependencyCycle> {
        let mut visited = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut cycles = Vec::new();
        for start in self.edges.keys() {
            if !visited.contains(start.as_str()) {
                let mut path = Vec::new();
                self.dfs(start, &mut visited, &mut path, &mut seen, &mut cycles);
            }
        }
        cycles
    }

    fn dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut BTreeSet<&'a str>,
        path: &mut Vec<&'a str>,
        seen: &mut BTreeSet<Vec<&'a str>>,
        cycles: &mut Vec<DependencyCycle>,
    ) {
        visited.insert(node);
        path.push(node);
        for next in self.edges.get(node).into_iter().flatten() {
            let next = next.as_str();
            if let Some(pos) = path.iter().position(|n| *n == next) {
                let members = &path[pos..];
                // rotate to the smallest id so each cycle has one form
                let min = members
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, id)| **id)
                    .map_or(0, |(i, _)| i);
                let mut canonical = members[min..].to_vec();
                canonical.extend_from_slice(&members[..min]);
                if seen.insert(canonical.clone()) {
                    cycles.push(self.cycle(&canonical));
                }
            } else if !visited.contains(next) {
                self.dfs(next, visited, path, seen, cycles);
            }
        }
        path.pop();
    }

    fn cycle(&self, ids: &[&str]) -> DependencyCycle {
        DependencyCycle {
            intent_ids: ids.iter().map(|id| (*id).to_string()).collect(),
            agent_ids: ids
                .iter()
                .map(|id| self.agents.get(*id).cloned().unwrap_or_default())
                .collect(),
        }
    }

    /// Dependencies before dependents; ties broken by id
    ///
    /// # Errors
    /// [`CycleError::CyclesDetected`] when no order exists.
    pub fn execution_order(&self) -> Result<Vec<String>, CycleError> {
        let mut remaining: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (id, deps) in &self.edges {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.edges.len());
        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(n) = remaining.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() == self.edges.len() {
            Ok(order)
        } else {
            Err(CycleError::CyclesDetected {
                cycles: self.find_cycles(),
            })
        }
    }
}
