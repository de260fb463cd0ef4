//! Async facade over any blocking backend
//!
//! Each call runs on tokio's blocking pool against the wrapped backend, so
//! the async and sync views always share one source of truth.

use crate::backend::{GraphBackend, StoreError, StoreResult};
use async_trait::async_trait;
use concord_contract::{Intent, InterfaceSpec};
use std::sync::Arc;

/// Awaitable version of [`GraphBackend`]
#[async_trait]
pub trait AsyncGraphBackend: Send + Sync {
    async fn publish(&self, intent: Intent) -> StoreResult<f64>;
    async fn publish_batch(&self, intents: Vec<Intent>) -> StoreResult<Vec<f64>>;
    async fn get(&self, id: String) -> StoreResult<Option<Intent>>;
    async fn query_all(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>>;
    async fn query_live(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>>;
    async fn query_by_agent(&self, agent_id: String) -> StoreResult<Vec<Intent>>;
    async fn find_overlapping(
        &self,
        specs: Vec<InterfaceSpec>,
        exclude_agent: String,
        min_stability: f64,
    ) -> StoreResult<Vec<Intent>>;
    async fn count(&self) -> StoreResult<usize>;
    async fn close(&self) -> StoreResult<()>;
}

/// Runs a blocking backend on the tokio blocking pool
#[derive(Debug)]
pub struct AsyncBackend<B> {
    inner: Arc<B>,
}

impl<B> Clone for AsyncBackend<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: GraphBackend + 'static> AsyncBackend<B> {
    #[inline]
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            inner: Arc::new(backend),
        }
    }

    /// Wrap an already shared backend
    #[inline]
    #[must_use]
    pub fn from_shared(backend: Arc<B>) -> Self {
        Self { inner: backend }
    }

    /// The wrapped backend, for synchronous callers
    #[inline]
    #[must_use]
    pub fn shared(&self) -> Arc<B> {
        Arc::clone(&self.inner)
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&B) -> StoreResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(inner.as_ref()))
            .await
            .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl<B: GraphBackend + 'static> AsyncGraphBackend for AsyncBackend<B> {
    async fn publish(&self, intent: Intent) -> StoreResult<f64> {
        self.run(move |b| b.publish(&intent)).await
    }

    async fn publish_batch(&self, intents: Vec<Intent>) -> StoreResult<Vec<f64>> {
        self.run(move |b| b.publish_batch(&intents)).await
    }

    async fn get(&self, id: String) -> StoreResult<Option<Intent>> {
        self.run(move |b| b.get(&id)).await
    }

    async fn query_all(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>> {
        self.run(move |b| b.query_all(min_stability)).await
    }

    async fn query_live(&self, min_stability: Option<f64>) -> StoreResult<Vec<Intent>> {
        self.run(move |b| b.query_live(min_stability)).await
    }

    async fn query_by_agent(&self, agent_id: String) -> StoreResult<Vec<Intent>> {
        self.run(move |b| b.query_by_agent(&agent_id)).await
    }

    async fn find_overlapping(
        &self,
        specs: Vec<InterfaceSpec>,
        exclude_agent: String,
        min_stability: f64,
    ) -> StoreResult<Vec<Intent>> {
        self.run(move |b| b.find_overlapping(&specs, &exclude_agent, min_stability))
            .await
    }

    async fn count(&self) -> StoreResult<usize> {
        self.run(|b| b.count()).await
    }

    async fn close(&self) -> StoreResult<()> {
        self.run(|b| b.close()).await
    }
}
