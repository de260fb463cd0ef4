//! Concord Intent Graph Contract
//!
//! The rule set every participant in the shared intent graph agrees on.
//! Pure and stateless: nothing here performs I/O or holds graph state.
//!
//! # Core Concepts
//!
//! - [`Intent`]: an agent's declaration of what it provides, requires and constrains
//! - [`validate_publish`]: the invariant gate (unique ids, append-only, causal order)
//! - [`content_hash_intent`] / [`canonical_graph_hash`]: BLAKE3 digests excluding `stability`
//! - [`StabilityWeights`]: evidence-driven confidence score in `[0, 1]`
//! - [`classify`]: the single decision function mapping an [`Overlap`] to a [`ConflictClass`]
//! - [`ResolutionPolicy`]: total, deterministic winner selection
//!
//! # Example
//!
//! ```rust,ignore
//! use concord_contract::prelude::*;
//!
//! let intent = Intent::new("agent-a", "user auth")
//!     .providing(InterfaceSpec::new("UserAuth", InterfaceKind::Function));
//!
//! validate_publish(&graph_state, &intent)?;
//! let stability = StabilityWeights::default().compute(&intent);
//! println!("hash: {}", content_hash_intent(&intent));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod conflict;
mod descriptor;
mod hash;
mod invariants;
mod model;
mod policy;
mod stability;

pub use conflict::{
    apply_adjustments, Adjustment, AdjustmentKind, ConflictReport, IntentField, Overlap,
    OverlapKind, ResolutionResult,
};
pub use descriptor::{ContractDescriptor, CONTRACT_VERSION};
pub use hash::{
    canonical_graph_hash, canonical_json, content_hash_intent, content_hash_intents,
    Blake3Hasher, ContentHash, HashError,
};
pub use invariants::{validate_publish, ContractViolation, GraphInvariant, GraphState, Overlay};
pub use model::{
    Constraint, ConstraintSeverity, Evidence, EvidenceKind, Intent, InterfaceKind, InterfaceSpec,
};
pub use policy::{classify, classify_all, ConflictClass, ResolutionPolicy};
pub use stability::{StabilityWeights, WeightError};

/// Commonly used items
pub mod prelude {
    pub use crate::{
        canonical_graph_hash, classify, content_hash_intent, validate_publish, ConflictClass,
        ConflictReport, Constraint, ContentHash, ContractViolation, Evidence, GraphState, Intent,
        InterfaceKind, InterfaceSpec, ResolutionPolicy, ResolutionResult, StabilityWeights,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
