//! Portal Applications - session lifecycle and data access for the client portal
//!
//! This crate builds the application layer on top of the backend contracts
//! defined in portal-core:
//!
//! - Session bootstrap, sign-in/sign-out and role derivation
//! - Permission checks against the derived role
//! - Timeout and retry wrapped reads, plus typed per-entity services
//!
//! ## Architecture
//!
//! - **Contracts** (portal-core): backend traits, errors, retry primitives
//! - **Adapters** (portal-backend): HTTP and in-memory backends
//! - **Applications** (this crate): what the portal does with them
//! - **Presentation** (portal-cli): user interface

pub mod auth;
pub mod repository;
pub mod session;

pub use auth::{
    has_permission, resolve_role, AccessScope, AuthSnapshot, AuthState, RoleResolution,
    RoleSource, SessionStore, UserIdentity,
};
pub use repository::{
    ClientOverview, Payment, PaymentService, PaymentStatus, PortalServices, Project,
    ProjectService, ProjectStatus, PvDocument, PvService, PvStatus, Quote, QuoteService,
    QuoteStatus, ResilientClient,
};
pub use session::{
    BootstrapOutcome, CachedRole, FileLocalStore, LoginOutcome, LogoutOutcome, MemoryLocalStore,
    RoleCache, SessionManager, SessionManagerConfig,
};

use portal_core::PortalError;

/// Application-level error type
#[derive(Debug, thiserror::Error)]
pub enum ApplicationError {
    #[error("Core error: {0}")]
    Core(#[from] PortalError),

    #[error("Not signed in: {message}")]
    Unauthenticated { message: String },

    #[error("Permission error: {message}")]
    Permission { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;

impl ApplicationError {
    /// Create an unauthenticated error
    pub fn unauthenticated<S: Into<String>>(message: S) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    /// Create a permission error
    pub fn permission<S: Into<String>>(message: S) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with source
    pub fn internal_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Message suitable for display next to a retry action
    pub fn user_message(&self) -> String {
        match self {
            ApplicationError::Core(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}
