//! Contracts of the hosted backend and of persisted local state

use crate::error::{PortalError, PortalResult, CODE_NO_SINGLE_ROW};
use crate::types::*;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// Authentication surface of the hosted backend
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange credentials for a session
    async fn sign_in_with_password(&self, email: &str, password: &str) -> PortalResult<Session>;

    /// Invalidate the current session on the backend
    async fn sign_out(&self) -> PortalResult<()>;

    /// Current session, if any
    async fn get_session(&self) -> PortalResult<Option<Session>>;

    /// Renew the current session with its refresh token
    async fn refresh_session(&self) -> PortalResult<Option<Session>>;

    /// Receive every auth-state change emitted after this call
    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthStateChange>;
}

/// Relational data surface of the hosted backend
#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Read every row matching the query
    async fn select(&self, query: &Query) -> PortalResult<Vec<Value>>;

    /// Read exactly one row. Zero or several matches is a `PGRST116` error.
    async fn select_single(&self, query: &Query) -> PortalResult<Value> {
        let mut rows = self.select(query).await?;
        if rows.len() != 1 {
            return Err(PortalError::backend(
                Some(CODE_NO_SINGLE_ROW),
                format!(
                    "JSON object requested, multiple (or no) rows returned ({} rows from {})",
                    rows.len(),
                    query.collection
                ),
                "data_backend",
            ));
        }
        Ok(rows.remove(0))
    }

    /// Insert rows and return them as stored
    async fn insert(&self, collection: &str, rows: Vec<Value>) -> PortalResult<Vec<Value>>;

    /// Patch every row matching the filters and return the updated rows
    async fn update(
        &self,
        collection: &str,
        filters: &[Filter],
        patch: Value,
    ) -> PortalResult<Vec<Value>>;

    /// Delete every row matching the filters
    async fn delete(&self, collection: &str, filters: &[Filter]) -> PortalResult<()>;

    /// Invoke a remote procedure
    async fn rpc(&self, function: &str, args: Value) -> PortalResult<Value>;
}

/// Full hosted-backend client
pub trait Backend: AuthBackend + DataBackend {}

impl<T: AuthBackend + DataBackend> Backend for T {}

/// Small persisted key/value store surviving restarts
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> PortalResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> PortalResult<()>;

    fn remove(&self, key: &str) -> PortalResult<()>;
}
