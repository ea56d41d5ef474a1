use super::EntityTable;
use crate::auth::SessionStore;
use crate::repository::resilient::ResilientClient;
use crate::repository::types::{NewPayment, Payment, PaymentStatus};
use crate::{ApplicationError, ApplicationResult};
use chrono::Utc;
use portal_core::Role;
use serde_json::json;

/// Payments due from clients
#[derive(Clone)]
pub struct PaymentService {
    table: EntityTable,
}

impl PaymentService {
    pub const COLLECTION: &'static str = "payments";

    pub fn new(data: ResilientClient, session: SessionStore) -> Self {
        Self {
            table: EntityTable::new(data, session, Self::COLLECTION),
        }
    }

    pub async fn list(&self) -> ApplicationResult<Vec<Payment>> {
        self.table.list(|query| query).await
    }

    pub async fn list_for_project(&self, project_id: &str) -> ApplicationResult<Vec<Payment>> {
        self.table
            .list(|query| query.eq("project_id", project_id))
            .await
    }

    pub async fn get(&self, id: &str) -> ApplicationResult<Payment> {
        self.table.get(id).await
    }

    /// Pending and overdue amount owed by the caller (or by everyone, for admins)
    pub async fn outstanding_total(&self) -> ApplicationResult<f64> {
        let payments: Vec<Payment> = self
            .table
            .list(|query| query.in_list("status", ["pending", "overdue"]))
            .await?;
        Ok(payments.iter().map(|p| p.amount).sum())
    }

    pub async fn create(&self, payment: NewPayment) -> ApplicationResult<Payment> {
        if !payment.amount.is_finite() || payment.amount <= 0.0 {
            return Err(ApplicationError::validation("Payment amount must be positive"));
        }
        self.table.create(&payment, "create payment").await
    }

    pub async fn mark_paid(&self, id: &str) -> ApplicationResult<Payment> {
        self.table
            .update(
                id,
                json!({ "status": PaymentStatus::Paid, "paid_at": Utc::now() }),
                Role::Admin,
                "mark payment paid",
            )
            .await
    }

    pub async fn update_status(&self, id: &str, status: PaymentStatus) -> ApplicationResult<Payment> {
        self.table
            .update(id, json!({ "status": status }), Role::Admin, "update payment status")
            .await
    }
}
