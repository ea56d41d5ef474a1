use super::EntityTable;
use crate::auth::SessionStore;
use crate::repository::resilient::ResilientClient;
use crate::repository::types::{NewProject, Project, ProjectStatus};
use crate::{ApplicationError, ApplicationResult};
use portal_core::Role;
use serde_json::json;

/// Client projects
#[derive(Clone)]
pub struct ProjectService {
    table: EntityTable,
}

impl ProjectService {
    pub const COLLECTION: &'static str = "projects";

    pub fn new(data: ResilientClient, session: SessionStore) -> Self {
        Self {
            table: EntityTable::new(data, session, Self::COLLECTION),
        }
    }

    pub async fn list(&self) -> ApplicationResult<Vec<Project>> {
        self.table.list(|query| query).await
    }

    pub async fn list_by_status(&self, status: ProjectStatus) -> ApplicationResult<Vec<Project>> {
        let status = serde_json::to_value(status)?;
        let status = status.as_str().unwrap_or_default().to_string();
        self.table.list(|query| query.eq("status", status)).await
    }

    pub async fn get(&self, id: &str) -> ApplicationResult<Project> {
        self.table.get(id).await
    }

    pub async fn create(&self, project: NewProject) -> ApplicationResult<Project> {
        if project.name.trim().is_empty() {
            return Err(ApplicationError::validation("Project name must not be empty"));
        }
        self.table.create(&project, "create project").await
    }

    pub async fn update_status(&self, id: &str, status: ProjectStatus) -> ApplicationResult<Project> {
        self.table
            .update(id, json!({ "status": status }), Role::Admin, "update project status")
            .await
    }

    pub async fn delete(&self, id: &str) -> ApplicationResult<()> {
        self.table.delete(id, "delete project").await
    }
}
