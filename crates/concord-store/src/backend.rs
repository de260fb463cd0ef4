//! The uniform graph backend interface

use concord_contract::{Intent, InterfaceSpec};
use concord_matching::Matcher;
use std::sync::Arc;

/// Result alias for backend calls
pub type StoreResult<T> = Result<T, StoreError>;

/// Backend failures
///
/// These are storage-level errors. Graph invariants are enforced by the
/// caller before any backend write; the duplicate-id check here is the
/// backend's own last line of single-writer-per-id.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("intent '{0}' is already stored")]
    DuplicateId(String),

    #[error("backend is closed")]
    Closed,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("background worker failed: {0}")]
    Worker(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Transient failures worth retrying unchanged
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Worker(_) | Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Append/query store for intent records
///
/// Every implementation must give identical answers for identical call
/// sequences. Results come back in publish order.
pub trait GraphBackend: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &'static str;

    /// Append one intent, returning its stored stability
    ///
    /// # Errors
    /// [`StoreError::DuplicateId`] when the id is already stored.
    fn publish(&self, intent: &Intent) -> StoreResult<f64>;

    /// Append several intents atomically: all are stored or none are
    ///
    /// # Errors
    /// [`StoreError::DuplicateId`] when any id is already stored or repeated.
    fn publish_batch(&self, intents: &[Intent]) -> StoreResult<Vec<f64>>;

    /// Fetch one intent by id
    ///
    /// # Errors
    /// Returns error on storage failure.
    fn get(&self, id: &str) -> StoreResult<Option<Intent>>;

    /// Every stored intent at or above `min_stability`
    ///
    /// # Errors
    /// Returns error on storage failure.
    fn query_all(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>>;

    /// Like [`query_all`](Self::query_all), minus intents superseded by a later one
    ///
    /// # Errors
    /// Returns error on storage failure.
    fn query_live(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>>;

    /// Every intent published by one agent
    ///
    /// # Errors
    /// Returns error on storage failure.
    fn query_by_agent(&self, agent_id: &str) -> StoreResult<Vec<Intent>>;

    /// Live intents of other agents whose specs overlap any of `specs`
    ///
    /// # Errors
    /// Returns error on storage failure.
    fn find_overlapping(
        &self,
        specs: &[InterfaceSpec],
        exclude_agent: &str,
        min_stability: f64,
    ) -> StoreResult<Vec<Intent>>;

    /// Number of stored intents
    ///
    /// # Errors
    /// Returns error on storage failure.
    fn count(&self) -> StoreResult<usize>;

    /// Release resources; later calls fail with [`StoreError::Closed`]
    ///
    /// # Errors
    /// Returns error if releasing fails.
    fn close(&self) -> StoreResult<()>;
}

/// Whether any of `intent`'s specs overlaps any of `specs`
pub(crate) fn overlaps_any(matcher: &dyn Matcher, specs: &[InterfaceSpec], intent: &Intent) -> bool {
    intent
        .specs()
        .any(|theirs| specs.iter().any(|mine| matcher.specs_overlap(mine, theirs)))
}

macro_rules! forward_backend {
    ($ty:ty) => {
        impl<T: GraphBackend + ?Sized> GraphBackend for $ty {
            fn name(&self) -> &'static str {
                (**self).name()
            }
            fn publish(&self, intent: &Intent) -> StoreResult<f64> {
                (**self).publish(intent)
            }
            fn publish_batch(&self, intents: &[Intent]) -> StoreResult<Vec<f64>> {
                (**self).publish_batch(intents)
            }
            fn get(&self, id: &str) -> StoreResult<Option<Intent>> {
                (**self).get(id)
            }
            fn query_all(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>> {
                (**self).query_all(min_stability)
            }
            fn query_live(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>> {
                (**self).query_live(min_stability)
            }
            fn query_by_agent(&self, agent_id: &str) -> StoreResult<Vec<Intent>> {
                (**self).query_by_agent(agent_id)
            }
            fn find_overlapping(
                &self,
                specs: &[InterfaceSpec],
                exclude_agent: &str,
                min_stability: f64,
            ) -> StoreResult<Vec<Intent>> {
                (**self).find_overlapping(specs, exclude_agent, min_stability)
            }
            fn count(&self) -> StoreResult<usize> {
                (**self).count()
            }
            fn close(&self) -> StoreResult<()> {
                (**self).close()
            }
        }
    };
}

forward_backend!(Box<T>);
forward_backend!(Arc<T>);
