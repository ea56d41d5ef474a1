//! User Identity
//!
//! Read-only projection of the signed-in subject handed to the rest of the portal.

use chrono::{DateTime, Utc};
use portal_core::Session;
use serde::{Deserialize, Serialize};

/// Identity of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Opaque user identifier issued by the auth service
    pub user_id: String,
    pub email: Option<String>,
    /// Expiry of the grant this identity was read from
    pub session_expires_at: DateTime<Utc>,
}

impl UserIdentity {
    /// Project the identity out of a session
    pub fn from_session(session: &Session) -> Self {
        Self {
            user_id: session.user.id.clone(),
            email: session.user.email.clone(),
            session_expires_at: session.expires_at,
        }
    }

    /// Whether both identities name the same subject
    pub fn same_subject(&self, other: &UserIdentity) -> bool {
        self.user_id == other.user_id
    }

    /// Get user display string
    pub fn display_string(&self) -> String {
        match &self.email {
            Some(email) => format!("{} ({})", email, self.user_id),
            None => self.user_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::SessionUser;

    #[test]
    fn test_identity_from_session() {
        let now = Utc::now();
        let session = Session {
            access_token: "a".to_string(),
            refresh_token: None,
            issued_at: now,
            expires_at: now + chrono::Duration::hours(1),
            user: SessionUser {
                id: "u-1".to_string(),
                email: Some("client@example.com".to_string()),
            },
        };

        let identity = UserIdentity::from_session(&session);
        assert_eq!(identity.user_id, "u-1");
        assert_eq!(identity.session_expires_at, session.expires_at);
        assert_eq!(identity.display_string(), "client@example.com (u-1)");
    }
}
