//! Matcher strategy seam

use crate::normalize::{
    names_overlap, normalize_constraint_target, normalize_name, signatures_compatible,
};
use concord_contract::{Constraint, InterfaceSpec};
use std::fmt::Debug;

/// Structural compatibility verdicts between specs and constraints
///
/// Implementations must be pure. Only deterministic matchers may take part
/// in publishing, hashing or replay; see [`Matcher::is_deterministic`].
pub trait Matcher: Send + Sync + Debug {
    /// Short identifier for logs and config
    fn name(&self) -> &'static str;

    /// Whether two specs describe the same capability
    fn specs_overlap(&self, a: &InterfaceSpec, b: &InterfaceSpec) -> bool;

    /// Whether a provision satisfies a requirement's signature
    fn signatures_compatible(&self, required: &InterfaceSpec, provided: &InterfaceSpec) -> bool;

    /// Whether a constraint governs a spec
    fn constraint_covers(&self, constraint: &Constraint, spec: &InterfaceSpec) -> bool;

    /// Whether two constraints target the same thing with different requirements
    fn constraints_clash(&self, a: &Constraint, b: &Constraint) -> bool;

    /// Same inputs always give the same verdicts
    fn is_deterministic(&self) -> bool {
        true
    }
}

/// Deterministic matcher over normalized names, tags and signatures
#[derive(Debug, Clone, Copy)]
pub struct StructuralMatcher {
    /// Shared tags needed for two specs to overlap by tags alone
    pub min_shared_tags: usize,
}

impl StructuralMatcher {
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { min_shared_tags: 2 }
    }

    #[inline]
    #[must_use]
    pub const fn with_min_shared_tags(mut self, n: usize) -> Self {
        self.min_shared_tags = n;
        self
    }
}

impl Default for StructuralMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for StructuralMatcher {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn specs_overlap(&self, a: &InterfaceSpec, b: &InterfaceSpec) -> bool {
        if names_overlap(&a.name, &b.name) {
            return true;
        }
        self.min_shared_tags > 0 && a.tags.intersection(&b.tags).count() >= self.min_shared_tags
    }

    fn signatures_compatible(&self, required: &InterfaceSpec, provided: &InterfaceSpec) -> bool {
        signatures_compatible(&required.signature, &provided.signature)
    }

    fn constraint_covers(&self, constraint: &Constraint, spec: &InterfaceSpec) -> bool {
        if constraint.affects_tags.intersection(&spec.tags).next().is_some() {
            return true;
        }
        let target = normalize_constraint_target(&constraint.target);
        if target.is_empty() {
            return false;
        }
        // targets are free text ("user model", "UserAuthHandler"); compare in name space
        let spec_name = normalize_name(&spec.name);
        names_overlap(&constraint.target, &spec.name) || target == spec_name
    }

    fn constraints_clash(&self, a: &Constraint, b: &Constraint) -> bool {
        let target = normalize_constraint_target(&a.target);
        !target.is_empty()
            && target == normalize_constraint_target(&b.target)
            && a.requirement.trim() != b.requirement.trim()
    }
}
