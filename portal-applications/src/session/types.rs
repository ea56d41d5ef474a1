//! Session lifecycle types

use portal_core::{PortalConfig, Session};
use std::time::Duration;

use crate::auth::RoleLookup;

/// Settings of the session manager
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Upper bound on the loading state at startup
    pub bootstrap_timeout: Duration,
    /// Where users are sent after signing out
    pub sign_in_path: String,
    pub role_lookup: RoleLookup,
    /// Local storage key of the persisted auth session
    pub auth_storage_key: String,
    /// Local storage key of the cached role
    pub user_data_key: String,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self::from_portal_config(&PortalConfig::default())
    }
}

impl SessionManagerConfig {
    pub fn from_portal_config(config: &PortalConfig) -> Self {
        Self {
            bootstrap_timeout: Duration::from_millis(config.session.bootstrap_timeout_ms),
            sign_in_path: config.session.sign_in_path.clone(),
            role_lookup: RoleLookup::from_config(&config.session),
            auth_storage_key: config.storage.auth_storage_key.clone(),
            user_data_key: config.storage.user_data_key.clone(),
        }
    }
}

/// How the startup session check ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A live session was found
    Authenticated { user_id: String },
    /// No session
    Unauthenticated,
    /// The backend failed; the message is also surfaced on the snapshot
    Failed { message: String },
    /// The check outlived the bootstrap timeout and keeps running in the background
    TimedOut,
}

/// Result of a sign-in attempt
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Success { session: Session },
    Failure { message: String },
}

impl LoginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoginOutcome::Success { .. })
    }
}

/// Result of a sign-out. Local state is cleared in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutOutcome {
    /// Sign-in entry point to navigate to
    pub redirect_to: String,
    /// Backend failure, if the remote sign-out did not go through
    pub error: Option<String>,
}
