//! Resilient data access
//!
//! Every read goes through `with_retry(|| with_timeout(read))`. Writes and
//! remote procedures are forwarded as-is and never repeated.

use portal_core::{
    with_call_timeout, with_retry, AccessConfig, DataBackend, Filter, PortalError, PortalResult,
    Query, RetryConfig, DEFAULT_CALL_TIMEOUT_MS,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Data client applying the read policy of the portal
#[derive(Clone)]
pub struct ResilientClient {
    backend: Arc<dyn DataBackend>,
    retry: RetryConfig,
    timeout_ms: u64,
}

impl ResilientClient {
    /// Wrap a backend with the default policy: 8 s per call, one retry after 300 ms
    pub fn new(backend: Arc<dyn DataBackend>) -> Self {
        Self {
            backend,
            retry: RetryConfig::default(),
            timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }

    pub fn from_config(backend: Arc<dyn DataBackend>, config: &AccessConfig) -> Self {
        Self {
            backend,
            retry: config.retry_config(),
            timeout_ms: config.query_timeout_ms,
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Bulk read
    pub async fn fetch(&self, query: &Query) -> PortalResult<Vec<Value>> {
        let label = query.describe();
        with_retry(
            || with_call_timeout(self.backend.select(query), self.timeout_ms, &label),
            &self.retry,
            &label,
        )
        .await
    }

    /// Single-row read. Zero or several matches fail with `PGRST116`, which is never retried.
    pub async fn fetch_one(&self, query: &Query) -> PortalResult<Value> {
        let label = format!("{} (single)", query.describe());
        with_retry(
            || with_call_timeout(self.backend.select_single(query), self.timeout_ms, &label),
            &self.retry,
            &label,
        )
        .await
    }

    /// At most one row
    pub async fn fetch_optional(&self, query: &Query) -> PortalResult<Option<Value>> {
        let mut rows = self.fetch(&query.clone().limit(2)).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(portal_core::backend_error!(
                format!("Expected at most one row from {}, got {}", query.collection, n),
                portal_core::CODE_NO_SINGLE_ROW,
                "resilient_client"
            )),
        }
    }

    /// Bulk read deserialized into `T`
    pub async fn fetch_as<T: DeserializeOwned>(&self, query: &Query) -> PortalResult<Vec<T>> {
        self.fetch(query)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(PortalError::from))
            .collect()
    }

    /// [`fetch_optional`](Self::fetch_optional) deserialized into `T`
    pub async fn fetch_optional_as<T: DeserializeOwned>(
        &self,
        query: &Query,
    ) -> PortalResult<Option<T>> {
        match self.fetch_optional(query).await? {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    pub async fn insert(&self, collection: &str, rows: Vec<Value>) -> PortalResult<Vec<Value>> {
        debug!(collection = collection, rows = rows.len(), "Insert");
        self.backend.insert(collection, rows).await
    }

    pub async fn update(
        &self,
        collection: &str,
        filters: &[Filter],
        patch: Value,
    ) -> PortalResult<Vec<Value>> {
        debug!(collection = collection, "Update");
        self.backend.update(collection, filters, patch).await
    }

    pub async fn delete(&self, collection: &str, filters: &[Filter]) -> PortalResult<()> {
        debug!(collection = collection, "Delete");
        self.backend.delete(collection, filters).await
    }

    pub async fn rpc(&self, function: &str, args: Value) -> PortalResult<Value> {
        debug!(function = function, "Remote procedure");
        self.backend.rpc(function, args).await
    }
}
