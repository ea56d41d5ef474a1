//! Role derivation
//!
//! Looks the role attribute up by user id and never fails: lookup faults fall
//! back to the role cached for that same user, then to `client`. Writing the cache is left to the
//! caller, which knows whether the result was adopted.

use crate::repository::ResilientClient;
use crate::session::storage::RoleCache;
use portal_core::{Query, Role, SessionConfig, CODE_NO_SINGLE_ROW};
use serde_json::Value;
use tracing::{debug, warn};

/// Where a resolved role came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleSource {
    /// Read from the user record
    Backend,
    /// Record missing or role attribute empty: a new or incomplete account
    Default,
    /// Lookup failed; last known role from local storage
    Cache,
    /// Lookup failed and nothing usable was cached
    Fallback,
}

/// Outcome of a role lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleResolution {
    pub role: Role,
    pub source: RoleSource,
}

impl RoleResolution {
    /// Whether the backend answered, so the role is worth caching
    pub fn is_authoritative(&self) -> bool {
        matches!(self.source, RoleSource::Backend | RoleSource::Default)
    }
}

/// Location of the role attribute
#[derive(Debug, Clone)]
pub struct RoleLookup {
    pub table: String,
    pub id_column: String,
    pub role_column: String,
}

impl Default for RoleLookup {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl RoleLookup {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            table: config.role_table.clone(),
            id_column: "id".to_string(),
            role_column: config.role_column.clone(),
        }
    }
}

/// Resolve the role of `user_id`
pub async fn resolve_role(
    data: &ResilientClient,
    cache: &RoleCache,
    lookup: &RoleLookup,
    user_id: &str,
) -> RoleResolution {
    let query = Query::from(&lookup.table)
        .select(&lookup.role_column)
        .eq(&lookup.id_column, user_id);

    match data.fetch_one(&query).await {
        Ok(row) => {
            let parsed = row
                .get(&lookup.role_column)
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse::<Role>().ok());
            match parsed {
                Some(role) => RoleResolution {
                    role,
                    source: RoleSource::Backend,
                },
                None => {
                    debug!(user_id = user_id, "Role attribute empty or unknown, using client");
                    RoleResolution {
                        role: Role::Client,
                        source: RoleSource::Default,
                    }
                }
            }
        }
        Err(e) if e.error_code() == Some(CODE_NO_SINGLE_ROW) => {
            debug!(user_id = user_id, "No user record, using client");
            RoleResolution {
                role: Role::Client,
                source: RoleSource::Default,
            }
        }
        Err(e) => {
            warn!(user_id = user_id, error = %e, "Role lookup failed, falling back");
            match cache.load_role(user_id) {
                Some(role) => RoleResolution {
                    role,
                    source: RoleSource::Cache,
                },
                None => RoleResolution {
                    role: Role::Client,
                    source: RoleSource::Fallback,
                },
            }
        }
    }
}
