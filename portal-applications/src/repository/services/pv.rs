use super::EntityTable;
use crate::auth::SessionStore;
use crate::repository::resilient::ResilientClient;
use crate::repository::types::{NewPvDocument, PvDocument, PvStatus};
use crate::{ApplicationError, ApplicationResult};
use chrono::Utc;
use portal_core::Role;
use serde_json::json;

/// Acceptance reports awaiting signature
#[derive(Clone)]
pub struct PvService {
    table: EntityTable,
}

impl PvService {
    pub const COLLECTION: &'static str = "pv_documents";

    pub fn new(data: ResilientClient, session: SessionStore) -> Self {
        Self {
            table: EntityTable::new(data, session, Self::COLLECTION),
        }
    }

    pub async fn list(&self) -> ApplicationResult<Vec<PvDocument>> {
        self.table.list(|query| query).await
    }

    pub async fn list_for_project(&self, project_id: &str) -> ApplicationResult<Vec<PvDocument>> {
        self.table
            .list(|query| query.eq("project_id", project_id))
            .await
    }

    pub async fn get(&self, id: &str) -> ApplicationResult<PvDocument> {
        self.table.get(id).await
    }

    pub async fn create(&self, document: NewPvDocument) -> ApplicationResult<PvDocument> {
        if document.title.trim().is_empty() {
            return Err(ApplicationError::validation("Document title must not be empty"));
        }
        self.table.create(&document, "create document").await
    }

    /// Sign a pending document the caller owns
    pub async fn sign(&self, id: &str, signer_name: &str) -> ApplicationResult<PvDocument> {
        if signer_name.trim().is_empty() {
            return Err(ApplicationError::validation("Signer name must not be empty"));
        }

        let document = self.get(id).await?;
        if document.status != PvStatus::Pending {
            return Err(ApplicationError::validation(format!(
                "Document {} is not awaiting signature",
                id
            )));
        }

        self.table
            .update(
                id,
                json!({
                    "status": PvStatus::Signed,
                    "signed_by": signer_name.trim(),
                    "signed_at": Utc::now(),
                }),
                Role::Client,
                "sign document",
            )
            .await
    }
}
