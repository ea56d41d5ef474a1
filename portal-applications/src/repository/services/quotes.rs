use super::EntityTable;
use crate::auth::SessionStore;
use crate::repository::resilient::ResilientClient;
use crate::repository::types::{NewQuote, Quote, QuoteStatus};
use crate::{ApplicationError, ApplicationResult};
use chrono::Utc;
use portal_core::Role;
use serde_json::json;

/// Quotes offered to clients
#[derive(Clone)]
pub struct QuoteService {
    table: EntityTable,
}

impl QuoteService {
    pub const COLLECTION: &'static str = "quotes";

    pub fn new(data: ResilientClient, session: SessionStore) -> Self {
        Self {
            table: EntityTable::new(data, session, Self::COLLECTION),
        }
    }

    pub async fn list(&self) -> ApplicationResult<Vec<Quote>> {
        self.table.list(|query| query).await
    }

    pub async fn get(&self, id: &str) -> ApplicationResult<Quote> {
        self.table.get(id).await
    }

    pub async fn create(&self, quote: NewQuote) -> ApplicationResult<Quote> {
        if !quote.amount.is_finite() || quote.amount < 0.0 {
            return Err(ApplicationError::validation("Quote amount must not be negative"));
        }
        self.table.create(&quote, "create quote").await
    }

    pub async fn send(&self, id: &str) -> ApplicationResult<Quote> {
        self.table
            .update(id, json!({ "status": QuoteStatus::Sent }), Role::Admin, "send quote")
            .await
    }

    /// Accept or reject a quote the caller owns. Only sent, unexpired quotes can be answered.
    pub async fn respond(&self, id: &str, accept: bool) -> ApplicationResult<Quote> {
        let quote = self.get(id).await?;
        if !quote.is_open_on(Utc::now().date_naive()) {
            return Err(ApplicationError::validation(format!(
                "Quote {} cannot be answered in its current state",
                id
            )));
        }

        let status = if accept {
            QuoteStatus::Accepted
        } else {
            QuoteStatus::Rejected
        };
        self.table
            .update(id, json!({ "status": status }), Role::Client, "answer quote")
            .await
    }
}
