//! Per-entity services
//!
//! Reads are scoped to the caller: clients see their own rows, admins see all.
//! Writes check the role first and go to the backend without retry.

pub mod payments;
pub mod projects;
pub mod pv;
pub mod quotes;

pub use payments::PaymentService;
pub use projects::ProjectService;
pub use pv::PvService;
pub use quotes::QuoteService;

use super::resilient::ResilientClient;
use super::types::ClientOverview;
use crate::auth::{ensure_permission, AccessScope, SessionStore};
use crate::{ApplicationError, ApplicationResult};
use portal_core::{Filter, Query, Role};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

/// Shared plumbing of one owned collection
#[derive(Clone)]
pub(crate) struct EntityTable {
    data: ResilientClient,
    session: SessionStore,
    collection: &'static str,
    /// Column holding the owning client's id
    owner_column: &'static str,
}

impl EntityTable {
    pub(crate) fn new(data: ResilientClient, session: SessionStore, collection: &'static str) -> Self {
        Self {
            data,
            session,
            collection,
            owner_column: "client_id",
        }
    }

    fn scope(&self) -> ApplicationResult<AccessScope> {
        AccessScope::from_snapshot(&self.session.snapshot())
    }

    fn scoped(&self, query: Query, scope: &AccessScope) -> Query {
        match scope.client_id() {
            Some(client_id) => query.eq(self.owner_column, client_id),
            None => query,
        }
    }

    fn scoped_filters(&self, id: &str, scope: &AccessScope) -> Vec<Filter> {
        let mut filters = vec![Filter::eq("id", id)];
        if let Some(client_id) = scope.client_id() {
            filters.push(Filter::eq(self.owner_column, client_id));
        }
        filters
    }

    /// Rows visible to the caller, newest first
    pub(crate) async fn list<T: DeserializeOwned>(
        &self,
        refine: impl FnOnce(Query) -> Query,
    ) -> ApplicationResult<Vec<T>> {
        let scope = self.scope()?;
        let query = refine(self.scoped(Query::from(self.collection), &scope))
            .order("created_at", false);
        debug!(collection = self.collection, scope = ?scope, "Listing");
        Ok(self.data.fetch_as(&query).await?)
    }

    /// One row visible to the caller
    pub(crate) async fn get<T: DeserializeOwned>(&self, id: &str) -> ApplicationResult<T> {
        let scope = self.scope()?;
        let query = self.scoped(Query::from(self.collection).eq("id", id), &scope);
        self.data
            .fetch_optional_as(&query)
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("{} {}", self.collection, id)))
    }

    /// Insert one row. Admin only.
    pub(crate) async fn create<N: Serialize, T: DeserializeOwned>(
        &self,
        new: &N,
        operation: &str,
    ) -> ApplicationResult<T> {
        ensure_permission(&self.session.snapshot(), Role::Admin, operation)?;

        let row = serde_json::to_value(new)?;
        let stored = self
            .data
            .insert(self.collection, vec![row])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApplicationError::internal(format!("{} returned no row", operation)))?;

        info!(collection = self.collection, operation = operation, "Created row");
        Ok(serde_json::from_value(stored)?)
    }

    /// Patch one row the caller can see, once it holds `required`
    pub(crate) async fn update<T: DeserializeOwned>(
        &self,
        id: &str,
        patch: Value,
        required: Role,
        operation: &str,
    ) -> ApplicationResult<T> {
        let snapshot = self.session.snapshot();
        ensure_permission(&snapshot, required, operation)?;
        let scope = AccessScope::from_snapshot(&snapshot)?;

        let updated = self
            .data
            .update(self.collection, &self.scoped_filters(id, &scope), patch)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApplicationError::not_found(format!("{} {}", self.collection, id)))?;

        info!(collection = self.collection, id = id, operation = operation, "Updated row");
        Ok(serde_json::from_value(updated)?)
    }

    /// Delete one row. Admin only.
    pub(crate) async fn delete(&self, id: &str, operation: &str) -> ApplicationResult<()> {
        ensure_permission(&self.session.snapshot(), Role::Admin, operation)?;
        self.data
            .delete(self.collection, &[Filter::eq("id", id)])
            .await?;
        info!(collection = self.collection, id = id, "Deleted row");
        Ok(())
    }
}

/// All entity services over one data client and auth context
#[derive(Clone)]
pub struct PortalServices {
    pub projects: ProjectService,
    pub payments: PaymentService,
    pub quotes: QuoteService,
    pub documents: PvService,
}

impl PortalServices {
    pub fn new(data: ResilientClient, session: SessionStore) -> Self {
        Self {
            projects: ProjectService::new(data.clone(), session.clone()),
            payments: PaymentService::new(data.clone(), session.clone()),
            quotes: QuoteService::new(data.clone(), session.clone()),
            documents: PvService::new(data, session),
        }
    }

    /// Load every collection visible to the caller concurrently
    pub async fn overview(&self) -> ApplicationResult<ClientOverview> {
        let (projects, payments, quotes, documents) = futures::try_join!(
            self.projects.list(),
            self.payments.list(),
            self.quotes.list(),
            self.documents.list(),
        )?;

        Ok(ClientOverview {
            projects,
            payments,
            quotes,
            documents,
        })
    }
}
