//! Auth Context
//!
//! Observable auth state. The session manager is the only writer; everything
//! else reads a [`AuthSnapshot`] or watches for changes.

use super::identity::UserIdentity;
use super::permissions;
use portal_core::Role;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle state of the auth context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    Bootstrapping,
    Authenticated,
    BootstrapFailed,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::Unauthenticated => write!(f, "unauthenticated"),
            AuthState::Bootstrapping => write!(f, "bootstrapping"),
            AuthState::Authenticated => write!(f, "authenticated"),
            AuthState::BootstrapFailed => write!(f, "bootstrap_failed"),
        }
    }
}

/// Point-in-time view of the auth context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub user: Option<UserIdentity>,
    /// Set whenever `user` is set
    pub role: Option<Role>,
    /// True until the startup session check settles or times out
    pub loading: bool,
    /// True once the startup session check has run at least once
    pub session_checked: bool,
    /// Last surfaced session error
    pub error: Option<String>,
    /// Bumped on every identity change; role writes carry the epoch they were started in
    pub epoch: u64,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            state: AuthState::Unauthenticated,
            user: None,
            role: None,
            loading: false,
            session_checked: false,
            error: None,
            epoch: 0,
        }
    }
}

impl AuthSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.user_id.as_str())
    }

    /// Whether the current role satisfies `required`
    pub fn has_permission(&self, required: Role) -> bool {
        permissions::has_permission(self.role, required)
    }
}

/// Injectable holder of the auth state
#[derive(Debug, Clone)]
pub struct SessionStore {
    sender: watch::Sender<AuthSnapshot>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(AuthSnapshot::default());
        Self { sender }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> AuthSnapshot {
        self.sender.borrow().clone()
    }

    /// Watch every subsequent state change
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.sender.subscribe()
    }

    /// Enter the startup check. Returns the epoch the check runs in.
    pub(crate) fn begin_bootstrap(&self) -> u64 {
        let mut epoch = 0;
        self.sender.send_modify(|s| {
            if s.user.is_none() {
                s.state = AuthState::Bootstrapping;
            }
            s.loading = true;
            s.error = None;
            epoch = s.epoch;
        });
        epoch
    }

    /// Leave the startup check. Idempotent; the later of the timer and the real
    /// call finds nothing to do.
    pub(crate) fn finish_bootstrap(&self, timeout_error: Option<String>) {
        self.sender.send_if_modified(|s| {
            let was = (s.loading, s.session_checked, s.state);
            s.loading = false;
            s.session_checked = true;
            if s.state == AuthState::Bootstrapping {
                match &timeout_error {
                    Some(message) => {
                        s.state = AuthState::BootstrapFailed;
                        s.error = Some(message.clone());
                    }
                    None => s.state = AuthState::Unauthenticated,
                }
            }
            was != (s.loading, s.session_checked, s.state)
        });
    }

    /// Adopt an identity. A new subject starts a new epoch with the `client`
    /// placeholder role; the same subject keeps its role. Returns the epoch.
    pub(crate) fn set_authenticated(&self, user: UserIdentity) -> u64 {
        let mut epoch = 0;
        self.sender.send_modify(|s| {
            let same_subject = s.user.as_ref().is_some_and(|u| u.same_subject(&user));
            if !same_subject {
                s.epoch += 1;
                s.role = None;
            }
            if s.role.is_none() {
                s.role = Some(Role::Client);
            }
            s.user = Some(user);
            s.state = AuthState::Authenticated;
            s.error = None;
            s.session_checked = true;
            epoch = s.epoch;
        });
        epoch
    }

    /// Adopt an identity only if nothing changed identity since `epoch`
    pub(crate) fn set_authenticated_if_current(&self, epoch: u64, user: UserIdentity) -> Option<u64> {
        if self.sender.borrow().epoch != epoch {
            debug!(user_id = %user.user_id, "Identity changed meanwhile, discarding session result");
            return None;
        }
        Some(self.set_authenticated(user))
    }

    /// Write a derived role. Discarded when the identity changed since the
    /// derivation started.
    pub(crate) fn set_role(&self, epoch: u64, role: Role) -> bool {
        let mut applied = false;
        self.sender.send_if_modified(|s| {
            if s.epoch != epoch || s.user.is_none() {
                return false;
            }
            applied = true;
            if s.role == Some(role) {
                return false;
            }
            s.role = Some(role);
            true
        });
        applied
    }

    /// Drop identity and role. Starts a new epoch so pending role writes are void.
    pub(crate) fn clear(&self, error: Option<String>) {
        self.sender.send_modify(|s| {
            s.epoch += 1;
            s.user = None;
            s.role = None;
            s.state = if error.is_some() {
                AuthState::BootstrapFailed
            } else {
                AuthState::Unauthenticated
            };
            s.error = error;
        });
    }

    /// [`clear`](Self::clear) only if nothing changed identity since `epoch`
    pub(crate) fn clear_if_current(&self, epoch: u64, error: Option<String>) -> bool {
        if self.sender.borrow().epoch != epoch {
            return false;
        }
        self.clear(error);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: &str) -> UserIdentity {
        UserIdentity {
            user_id: id.to_string(),
            email: None,
            session_expires_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_subject_gets_placeholder_role() {
        let store = SessionStore::new();
        let epoch = store.set_authenticated(user("u-1"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.state, AuthState::Authenticated);
        assert_eq!(snapshot.role, Some(Role::Client));
        assert_eq!(snapshot.epoch, epoch);
        assert!(snapshot.has_permission(Role::Client));
        assert!(!snapshot.has_permission(Role::Admin));
    }

    #[test]
    fn test_same_subject_keeps_role_and_epoch() {
        let store = SessionStore::new();
        let epoch = store.set_authenticated(user("u-1"));
        assert!(store.set_role(epoch, Role::Admin));

        assert_eq!(store.set_authenticated(user("u-1")), epoch);
        assert_eq!(store.snapshot().role, Some(Role::Admin));
    }

    #[test]
    fn test_stale_role_write_is_discarded() {
        let store = SessionStore::new();
        let epoch = store.set_authenticated(user("u-1"));
        store.clear(None);

        assert!(!store.set_role(epoch, Role::Admin));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.role, None);
        assert_eq!(snapshot.user, None);
    }

    #[test]
    fn test_bootstrap_finish_is_idempotent() {
        let store = SessionStore::new();
        let mut rx = store.subscribe();
        store.begin_bootstrap();
        assert!(store.snapshot().loading);

        store.finish_bootstrap(Some("Session check timed out".to_string()));
        let snapshot = store.snapshot();
        assert!(!snapshot.loading);
        assert!(snapshot.session_checked);
        assert_eq!(snapshot.state, AuthState::BootstrapFailed);

        rx.mark_unchanged();
        store.finish_bootstrap(None);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_guarded_clear_respects_epoch() {
        let store = SessionStore::new();
        let epoch = store.begin_bootstrap();
        store.set_authenticated(user("u-1"));

        assert!(!store.clear_if_current(epoch, None));
        assert!(store.snapshot().is_authenticated());
    }
}
