//! Portal entities as stored in the hosted backend

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Project lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Planned,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ProjectStatus::Planned | ProjectStatus::InProgress)
    }
}

/// A client project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub client_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Fields of a project about to be created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub client_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub address: Option<String>,
    pub start_date: Option<NaiveDate>,
}

/// Payment status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl PaymentStatus {
    /// Whether the amount is still owed
    pub fn is_outstanding(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Overdue)
    }
}

/// A payment due from or made by a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub status: PaymentStatus,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub client_id: String,
    pub project_id: Option<String>,
    pub amount: f64,
    pub status: PaymentStatus,
    pub due_date: Option<NaiveDate>,
}

/// Quote status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    #[default]
    Draft,
    Sent,
    Accepted,
    Rejected,
    Expired,
}

/// A priced offer sent to a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub status: QuoteStatus,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Quote {
    /// Whether the client can still accept or reject it on `today`
    pub fn is_open_on(&self, today: NaiveDate) -> bool {
        self.status == QuoteStatus::Sent && self.valid_until.map_or(true, |until| today <= until)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuote {
    pub client_id: String,
    pub project_id: Option<String>,
    pub reference: Option<String>,
    pub amount: f64,
    pub status: QuoteStatus,
    pub valid_until: Option<NaiveDate>,
}

/// Signature status of a PV document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PvStatus {
    #[default]
    Pending,
    Signed,
    Rejected,
}

/// Acceptance report (PV) awaiting the client's signature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PvDocument {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub status: PvStatus,
    #[serde(default)]
    pub signed_by: Option<String>,
    #[serde(default)]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPvDocument {
    pub client_id: String,
    pub project_id: Option<String>,
    pub title: String,
}

/// Everything a client sees on their dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientOverview {
    pub projects: Vec<Project>,
    pub payments: Vec<Payment>,
    pub quotes: Vec<Quote>,
    pub documents: Vec<PvDocument>,
}

impl ClientOverview {
    /// Sum of pending and overdue payments
    pub fn outstanding_amount(&self) -> f64 {
        self.payments
            .iter()
            .filter(|p| p.status.is_outstanding())
            .map(|p| p.amount)
            .sum()
    }

    pub fn active_projects(&self) -> usize {
        self.projects.iter().filter(|p| p.status.is_active()).count()
    }

    pub fn pending_signatures(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| d.status == PvStatus::Pending)
            .count()
    }
}
