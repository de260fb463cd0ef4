//! Concord Structural Matching
//!
//! Deterministic compatibility verdicts between interface specs and
//! constraints. No state, no I/O, no heuristics beyond string normalization.
//!
//! # Core Concepts
//!
//! - [`Matcher`]: the strategy seam the resolver and backends consult
//! - [`StructuralMatcher`]: the default, deterministic implementation
//! - [`normalize_name`] / [`normalize_type`]: canonical forms used for comparison
//! - [`signatures_compatible`]: field-superset check over normalized types
//!
//! # Example
//!
//! ```rust,ignore
//! use concord_matching::{Matcher, StructuralMatcher};
//!
//! let matcher = StructuralMatcher::new();
//! assert!(matcher.specs_overlap(&user_auth, &user_auth_handler));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod matcher;
mod normalize;

pub use matcher::{Matcher, StructuralMatcher};
pub use normalize::{
    names_overlap, normalize_constraint_target, normalize_name, normalize_type, parse_signature,
    signatures_compatible,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
