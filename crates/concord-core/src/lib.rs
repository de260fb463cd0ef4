//! Concord Core
//!
//! Coordination engine for agents sharing one intent graph: publish with
//! conflict detection, private branches with governed merges, and a
//! hash-chained log that replays to the same graph.
//!
//! # Core Concepts
//!
//! - [`IntentResolver`]: acquire-evaluate-commit publishing against one graph
//! - [`Evaluation`]: everything a publish or merge would do, before it does it
//! - [`VersionedGraph`]: agent branches as arena indices over a shared main
//! - [`MergeGovernor`]: APPROVE / REJECT / ESCALATE / DEADLOCK verdicts on branches
//! - [`ReplayLog`]: append-only, hash-chained record of mutations and verdicts
//! - [`replay`]: pure fold of a log back into graph state
//! - [`DependencyGraph`]: requires -> provides edges, cycles and build order
//! - [`CoordinationConfig`]: every policy constant, loadable from TOML
//!
//! # Example
//!
//! ```rust,ignore
//! use concord_core::prelude::*;
//! use concord_store::MemoryBackend;
//! use std::sync::Arc;
//!
//! let graph = Arc::new(VersionedGraph::new(IntentResolver::new(MemoryBackend::new())?));
//! graph.create_branch("auth", "agent-x")?;
//! graph.publish_to_branch("auth", intent)?;
//!
//! let governor = MergeGovernor::new(Arc::clone(&graph));
//! let result = governor.propose("auth")?;
//! assert_eq!(result.verdict, VerdictKind::Approve);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod config;
mod cycles;
mod error;
mod governor;
mod replay;
mod resolver;
mod versioning;

pub use config::{CoordinationConfig, GovernorConfig, ResolverConfig};
pub use cycles::{DependencyCycle, DependencyGraph};
pub use error::{ConfigError, CycleError, GovernorError, PublishError, ReplayError, VersionError};
pub use governor::{
    EscalationDecision, MergeGovernor, ProposalResult, ProposalState, VerdictKind, VerdictRecord,
};
pub use replay::{
    replay, replay_hash, replay_with_resolver, restore_into, verify_chain, Operation, ReplayEntry,
    ReplayLog, ReplayMismatch, ReplayReport,
};
pub use resolver::{Evaluation, GraphSummary, IntentResolver, PublishOutcome, HIGH_STABILITY};
pub use versioning::{
    AgentBranch, BranchState, GraphSnapshot, MergeResult, MergeSession, VersionedGraph,
};

/// Commonly used items
pub mod prelude {
    pub use crate::{
        BranchState, CoordinationConfig, EscalationDecision, IntentResolver, MergeGovernor,
        Operation, ProposalResult, PublishError, PublishOutcome, ReplayLog, VerdictKind,
        VersionedGraph,
    };
    pub use concord_contract::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
