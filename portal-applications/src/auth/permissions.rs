//! Permission System
//!
//! Two coarse roles: admin is a superset of client. A missing role grants nothing.

use super::context::AuthSnapshot;
use crate::{ApplicationError, ApplicationResult};
use portal_core::Role;
use tracing::debug;

/// Whether `role` satisfies a requirement for `required`
pub fn has_permission(role: Option<Role>, required: Role) -> bool {
    role.is_some_and(|role| role.satisfies(required))
}

/// Fail with a permission error unless the snapshot satisfies `required`
pub fn ensure_permission(
    snapshot: &AuthSnapshot,
    required: Role,
    operation: &str,
) -> ApplicationResult<()> {
    if !snapshot.is_authenticated() {
        return Err(ApplicationError::unauthenticated(format!(
            "Sign in to {}",
            operation
        )));
    }

    if snapshot.has_permission(required) {
        return Ok(());
    }

    debug!(
        user_id = ?snapshot.user_id(),
        role = ?snapshot.role,
        required = %required,
        operation = operation,
        "Permission denied"
    );
    Err(ApplicationError::permission(format!(
        "{} requires the {} role",
        operation, required
    )))
}

/// Rows a caller may read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    /// Only rows owned by this client
    Client(String),
    /// Every row
    All,
}

impl AccessScope {
    /// Scope of the signed-in user: admins see everything, clients their own rows
    pub fn from_snapshot(snapshot: &AuthSnapshot) -> ApplicationResult<Self> {
        let Some(user) = &snapshot.user else {
            return Err(ApplicationError::unauthenticated("No active session"));
        };

        if snapshot.has_permission(Role::Admin) {
            Ok(AccessScope::All)
        } else {
            Ok(AccessScope::Client(user.user_id.clone()))
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        match self {
            AccessScope::Client(id) => Some(id),
            AccessScope::All => None,
        }
    }
}
