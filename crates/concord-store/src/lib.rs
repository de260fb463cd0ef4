//! Concord Graph Backends
//!
//! Storage strategies for intent records behind one interface. Backends
//! store and query; they never validate or classify. That is the
//! resolver's job.
//!
//! # Core Concepts
//!
//! - [`GraphBackend`]: append/query surface every store implements identically
//! - [`MemoryBackend`]: insertion-ordered in-process store
//! - [`SqliteBackend`]: persistent store using the [`IntentRecord`] row shape
//! - [`AsyncBackend`]: the same backend, awaitable, run on tokio's blocking pool
//! - [`StoreConfig`]: configuration-driven backend selection
//!
//! # Example
//!
//! ```rust,ignore
//! use concord_store::{GraphBackend, StoreConfig};
//!
//! let backend = StoreConfig::sqlite("graph.db").open()?;
//! backend.publish(&intent)?;
//! let peers = backend.find_overlapping(&intent.provides, &intent.agent_id, 0.3)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod asynchronous;
mod backend;
mod config;
mod memory;
mod record;
mod sqlite;

pub use asynchronous::{AsyncBackend, AsyncGraphBackend};
pub use backend::{GraphBackend, StoreError, StoreResult};
pub use config::StoreConfig;
pub use memory::MemoryBackend;
pub use record::IntentRecord;
pub use sqlite::SqliteBackend;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
