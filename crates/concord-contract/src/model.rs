//! Intent graph data model
//!
//! These types are also the persisted record shape: every backend stores
//! and reloads them through the same serde representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

/// Kind of capability an [`InterfaceSpec`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Function,
    Class,
    Model,
    Endpoint,
    Migration,
    Config,
}

impl InterfaceKind {
    /// Wire name, identical to the serde representation
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Model => "model",
            Self::Endpoint => "endpoint",
            Self::Migration => "migration",
            Self::Config => "config",
        }
    }
}

impl Display for InterfaceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of provided or required capability
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub name: String,
    pub kind: InterfaceKind,
    /// Raw `field: type, ...` text
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub module_path: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl InterfaceSpec {
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, kind: InterfaceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            signature: String::new(),
            module_path: String::new(),
            tags: BTreeSet::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_module_path(mut self, module_path: impl Into<String>) -> Self {
        self.module_path = module_path.into();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Severity of a [`Constraint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintSeverity {
    /// Overlapping work with incompatible shape must be rejected
    #[serde(alias = "critical")]
    Required,
    /// Yields to the resolution policy
    #[serde(alias = "preferred")]
    Advisory,
}

impl ConstraintSeverity {
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Advisory => "advisory",
        }
    }
}

/// Cross-cutting rule an intent imposes on overlapping work
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    pub target: String,
    pub requirement: String,
    pub severity: ConstraintSeverity,
    #[serde(default)]
    pub affects_tags: BTreeSet<String>,
}

impl Constraint {
    #[inline]
    #[must_use]
    pub fn required(target: impl Into<String>, requirement: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            requirement: requirement.into(),
            severity: ConstraintSeverity::Required,
            affects_tags: BTreeSet::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn advisory(target: impl Into<String>, requirement: impl Into<String>) -> Self {
        Self {
            severity: ConstraintSeverity::Advisory,
            ..Self::required(target, requirement)
        }
    }

    #[must_use]
    pub fn affecting<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affects_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[inline]
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.severity == ConstraintSeverity::Required
    }
}

/// Kind of proof attached to an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    TestPass,
    TestFail,
    CodeCommitted,
    TypeChecked,
    #[serde(rename = "consumed_by")]
    ConsumedByOther,
    Conflict,
    ManualApproval,
}

impl EvidenceKind {
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TestPass => "test_pass",
            Self::TestFail => "test_fail",
            Self::CodeCommitted => "code_committed",
            Self::TypeChecked => "type_checked",
            Self::ConsumedByOther => "consumed_by",
            Self::Conflict => "conflict",
            Self::ManualApproval => "manual_approval",
        }
    }
}

/// Append-only proof backing an intent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl Evidence {
    /// Evidence stamped with the current time
    #[inline]
    #[must_use]
    pub fn new(kind: EvidenceKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            timestamp: Utc::now(),
        }
    }

    /// Override the timestamp
    #[inline]
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn test_pass(description: impl Into<String>) -> Self {
        Self::new(EvidenceKind::TestPass, description)
    }

    #[must_use]
    pub fn test_fail(description: impl Into<String>) -> Self {
        Self::new(EvidenceKind::TestFail, description)
    }

    #[must_use]
    pub fn code_committed(description: impl Into<String>) -> Self {
        Self::new(EvidenceKind::CodeCommitted, description)
    }

    #[must_use]
    pub fn type_checked(description: impl Into<String>) -> Self {
        Self::new(EvidenceKind::TypeChecked, description)
    }

    #[must_use]
    pub fn consumed_by(agent_id: &str) -> Self {
        Self::new(
            EvidenceKind::ConsumedByOther,
            format!("consumed by agent {agent_id}"),
        )
    }

    #[must_use]
    pub fn conflict(description: impl Into<String>) -> Self {
        Self::new(EvidenceKind::Conflict, description)
    }

    #[must_use]
    pub fn manual_approval(description: impl Into<String>) -> Self {
        Self::new(EvidenceKind::ManualApproval, description)
    }
}

/// A single agent's declaration at a point in time
///
/// Every field except `stability` is immutable once published. Revisions are
/// expressed as new intents whose `parent_id` points at the revised one
/// (see [`Intent::supersede`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub intent: String,
    #[serde(default)]
    pub provides: Vec<InterfaceSpec>,
    #[serde(default)]
    pub requires: Vec<InterfaceSpec>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    /// Derived projection, recomputed by the resolver
    #[serde(default)]
    pub stability: f64,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl Intent {
    /// New intent with a fresh v4 id and the current time
    #[must_use]
    pub fn new(agent_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
            intent: intent.into(),
            provides: Vec::new(),
            requires: Vec::new(),
            constraints: Vec::new(),
            evidence: Vec::new(),
            stability: 0.0,
            parent_id: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[inline]
    #[must_use]
    pub fn providing(mut self, spec: InterfaceSpec) -> Self {
        self.provides.push(spec);
        self
    }

    #[inline]
    #[must_use]
    pub fn requiring(mut self, spec: InterfaceSpec) -> Self {
        self.requires.push(spec);
        self
    }

    #[inline]
    #[must_use]
    pub fn constrained_by(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_stability(mut self, stability: f64) -> Self {
        self.stability = stability;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Successor record for this intent
    ///
    /// Carries every field forward (evidence included) under a new id, with
    /// `parent_id` pointing here and a timestamp no earlier than this one.
    #[must_use]
    pub fn supersede(&self) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now.max(self.timestamp),
            parent_id: Some(self.id.clone()),
            ..self.clone()
        }
    }

    /// Provided then required specs
    pub fn specs(&self) -> impl Iterator<Item = &InterfaceSpec> {
        self.provides.iter().chain(self.requires.iter())
    }

    /// Whether the intent declares anything at all
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.provides.is_empty() && self.requires.is_empty() && self.constraints.is_empty()
    }
}
