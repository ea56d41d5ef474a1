//! Session Manager - session lifecycle of the portal
//!
//! Bootstraps the session at startup, signs users in and out, follows the
//! backend's auth notifications and derives the role of whoever is signed in.
//! None of the public operations return an error: failures end up in the
//! returned outcome or on the [`AuthSnapshot`].

use super::storage::RoleCache;
use super::types::{BootstrapOutcome, LoginOutcome, LogoutOutcome, SessionManagerConfig};
use crate::auth::{resolve_role, AuthSnapshot, RoleResolution, SessionStore, UserIdentity};
use crate::repository::ResilientClient;
use portal_core::{AuthBackend, AuthEvent, AuthStateChange, LocalStore, Role};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const BOOTSTRAP_TIMEOUT_MESSAGE: &str = "Session check timed out";

/// Owner of the auth state
pub struct SessionManager {
    inner: Arc<ManagerInner>,
    /// Auth notification listener, alive from the first bootstrap until shutdown
    listener: Mutex<Option<JoinHandle<()>>>,
}

struct ManagerInner {
    auth: Arc<dyn AuthBackend>,
    data: ResilientClient,
    store: SessionStore,
    local: Arc<dyn LocalStore>,
    role_cache: RoleCache,
    config: SessionManagerConfig,
}

impl SessionManager {
    /// Create a session manager. Role lookups go through `data`.
    pub fn new(
        auth: Arc<dyn AuthBackend>,
        data: ResilientClient,
        local: Arc<dyn LocalStore>,
        config: SessionManagerConfig,
    ) -> Self {
        let role_cache = RoleCache::new(local.clone(), config.user_data_key.clone());

        Self {
            inner: Arc::new(ManagerInner {
                auth,
                data,
                store: SessionStore::new(),
                local,
                role_cache,
                config,
            }),
            listener: Mutex::new(None),
        }
    }

    /// Auth state shared with readers
    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.store.subscribe()
    }

    pub fn role_cache(&self) -> &RoleCache {
        &self.inner.role_cache
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.inner.config
    }

    /// Startup session check.
    ///
    /// Refreshes the token, then reads the current session. The loading state
    /// ends within the bootstrap timeout whatever the backend does; a check
    /// still pending at that point keeps running and may authenticate later.
    pub async fn bootstrap(&self) -> BootstrapOutcome {
        self.start_listener();

        let epoch = self.inner.store.begin_bootstrap();
        debug!(
            timeout_ms = self.inner.config.bootstrap_timeout.as_millis() as u64,
            "Bootstrapping session"
        );

        let mut check = tokio::spawn(Arc::clone(&self.inner).check_session(epoch));

        match tokio::time::timeout(self.inner.config.bootstrap_timeout, &mut check).await {
            Ok(Ok(outcome)) => {
                info!(outcome = ?outcome, "Session bootstrap finished");
                outcome
            }
            Ok(Err(e)) => {
                let message = format!("Session check aborted: {}", e);
                warn!("{}", message);
                self.inner.store.finish_bootstrap(Some(message.clone()));
                BootstrapOutcome::Failed { message }
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.inner.config.bootstrap_timeout.as_millis() as u64,
                    "Session check did not settle in time, leaving loading state"
                );
                self.inner
                    .store
                    .finish_bootstrap(Some(BOOTSTRAP_TIMEOUT_MESSAGE.to_string()));
                BootstrapOutcome::TimedOut
            }
        }
    }

    /// Sign in with email and password
    pub async fn login(&self, email: &str, password: &str) -> LoginOutcome {
        if email.trim().is_empty() || password.is_empty() {
            return LoginOutcome::Failure {
                message: "Email and password are required".to_string(),
            };
        }

        info!(email = email, "Signing in");

        match self.inner.auth.sign_in_with_password(email.trim(), password).await {
            Ok(session) => {
                let epoch = self
                    .inner
                    .store
                    .set_authenticated(UserIdentity::from_session(&session));
                self.inner
                    .spawn_role_refinement(session.user.id.clone(), epoch);
                info!(user_id = %session.user.id, "Signed in");
                LoginOutcome::Success { session }
            }
            Err(e) => {
                warn!(email = email, error = %e, "Sign-in failed");
                LoginOutcome::Failure {
                    message: e.user_message(),
                }
            }
        }
    }

    /// Sign out. Local state is cleared even when the backend call fails.
    pub async fn logout(&self) -> LogoutOutcome {
        let user_id = self.snapshot().user_id().map(str::to_string);
        let remote = self.inner.auth.sign_out().await;

        self.inner.store.clear(None);
        if let Err(e) = self.inner.local.remove(&self.inner.config.auth_storage_key) {
            warn!(error = %e, "Failed to clear persisted session");
        }
        self.inner.role_cache.clear();

        let error = match remote {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "Backend sign-out failed, local state cleared anyway");
                Some(e.user_message())
            }
        };

        info!(user_id = ?user_id, "Signed out");

        LogoutOutcome {
            redirect_to: self.inner.config.sign_in_path.clone(),
            error,
        }
    }

    /// Whether the current role satisfies `required`
    pub fn has_permission(&self, required: Role) -> bool {
        self.inner.store.snapshot().has_permission(required)
    }

    /// Derive the role of the signed-in user now and wait for it
    pub async fn refresh_role(&self) -> Option<RoleResolution> {
        let snapshot = self.snapshot();
        let user_id = snapshot.user_id()?.to_string();
        Some(self.inner.derive_role(&user_id, snapshot.epoch).await)
    }

    /// Release the auth notification subscription
    pub fn shutdown(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            debug!("Stopping auth listener");
            handle.abort();
        }
    }

    fn start_listener(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let events = self.inner.auth.subscribe_auth_events();
        *listener = Some(tokio::spawn(Arc::clone(&self.inner).listen(events)));
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ManagerInner {
    /// The real startup check, raced against the bootstrap timeout
    async fn check_session(self: Arc<Self>, epoch: u64) -> BootstrapOutcome {
        if let Err(e) = self.auth.refresh_session().await {
            debug!(error = %e, "Token refresh at startup failed");
        }

        let outcome = match self.auth.get_session().await {
            Ok(Some(session)) => {
                let user_id = session.user.id.clone();
                if let Some(epoch) = self
                    .store
                    .set_authenticated_if_current(epoch, UserIdentity::from_session(&session))
                {
                    self.spawn_role_refinement(user_id.clone(), epoch);
                }
                BootstrapOutcome::Authenticated { user_id }
            }
            Ok(None) => {
                self.store.clear_if_current(epoch, None);
                BootstrapOutcome::Unauthenticated
            }
            Err(e) => {
                e.log();
                let message = e.user_message();
                self.store.clear_if_current(epoch, Some(message.clone()));
                BootstrapOutcome::Failed { message }
            }
        };

        self.store.finish_bootstrap(None);
        outcome
    }

    /// Handle auth notifications in emission order until the channel closes
    async fn listen(self: Arc<Self>, mut events: broadcast::Receiver<AuthStateChange>) {
        loop {
            match events.recv().await {
                Ok(change) => self.handle_auth_change(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Auth listener lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Auth notification channel closed");
                    break;
                }
            }
        }
    }

    fn handle_auth_change(self: &Arc<Self>, change: AuthStateChange) {
        debug!(event = ?change.event, "Auth state change");

        match change.event {
            AuthEvent::SignedIn | AuthEvent::TokenRefreshed => {
                let Some(session) = change.session else {
                    debug!(event = ?change.event, "Notification without session, ignoring");
                    return;
                };
                let epoch = self
                    .store
                    .set_authenticated(UserIdentity::from_session(&session));
                self.spawn_role_refinement(session.user.id, epoch);
            }
            AuthEvent::SignedOut => {
                self.store.clear(None);
                self.role_cache.clear();
            }
            _ => {}
        }
    }

    fn spawn_role_refinement(self: &Arc<Self>, user_id: String, epoch: u64) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.derive_role(&user_id, epoch).await;
        });
    }

    /// Resolve, adopt and cache the role of `user_id`. Nothing is written when
    /// the identity changed since `epoch`.
    async fn derive_role(&self, user_id: &str, epoch: u64) -> RoleResolution {
        let resolution = resolve_role(
            &self.data,
            &self.role_cache,
            &self.config.role_lookup,
            user_id,
        )
        .await;

        if self.store.set_role(epoch, resolution.role) {
            debug!(
                user_id = user_id,
                role = %resolution.role,
                source = ?resolution.source,
                "Role adopted"
            );
            if resolution.is_authoritative() {
                self.role_cache.save(user_id, resolution.role);
            }
        } else {
            debug!(user_id = user_id, "Identity changed during role lookup, discarding");
        }

        resolution
    }
}
