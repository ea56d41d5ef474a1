//! In-process backend
//!
//! Holds users, tables and the current session in memory. Faults can be
//! injected per collection (failures, hangs, delays) and on the session calls,
//! which makes it the backend of choice for tests and offline demos.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use portal_core::{
    AuthBackend, AuthEvent, AuthStateChange, DataBackend, ErrorContext, Filter, PortalError,
    PortalResult, Query, Session, SessionUser,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryUser {
    id: String,
    email: String,
    password: String,
}

#[derive(Debug, Clone)]
enum SelectFault {
    /// Fail the next `remaining` reads (`None` = forever)
    Fail {
        remaining: Option<usize>,
        code: Option<String>,
        message: String,
    },
    /// Never answer
    Hang,
    /// Answer after a delay
    Delay(Duration),
}

#[derive(Debug, Default)]
struct Faults {
    selects: HashMap<String, SelectFault>,
    hang_session: bool,
    session_error: Option<String>,
    sign_out_error: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    users: Vec<MemoryUser>,
    tables: HashMap<String, Vec<Value>>,
    rpc: HashMap<String, Value>,
    session: Option<Session>,
}

/// Backend keeping all state in process
pub struct MemoryBackend {
    state: Mutex<State>,
    faults: Mutex<Faults>,
    events: broadcast::Sender<AuthStateChange>,
    select_calls: Mutex<HashMap<String, usize>>,
    auth_calls: AtomicUsize,
    session_ttl: ChronoDuration,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(State::default()),
            faults: Mutex::new(Faults::default()),
            events,
            select_calls: Mutex::new(HashMap::new()),
            auth_calls: AtomicUsize::new(0),
            session_ttl: ChronoDuration::hours(1),
        }
    }

    /// Register a user able to sign in
    pub fn with_user(self, id: &str, email: &str, password: &str) -> Self {
        self.lock_state().users.push(MemoryUser {
            id: id.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        });
        self
    }

    /// Seed rows into a collection
    pub fn with_rows(self, collection: &str, rows: Vec<Value>) -> Self {
        self.lock_state()
            .tables
            .entry(collection.to_string())
            .or_default()
            .extend(rows);
        self
    }

    /// Canned answer for a remote procedure
    pub fn with_rpc(self, function: &str, result: Value) -> Self {
        self.lock_state().rpc.insert(function.to_string(), result);
        self
    }

    /// Start with an already established session
    pub fn with_session(self, session: Session) -> Self {
        self.lock_state().session = Some(session);
        self
    }

    /// Fail the next `times` reads on `collection`
    pub fn fail_selects(&self, collection: &str, times: usize, code: Option<&str>) {
        self.set_select_fault(
            collection,
            SelectFault::Fail {
                remaining: Some(times),
                code: code.map(str::to_string),
                message: format!("{} temporarily unavailable", collection),
            },
        );
    }

    /// Fail every read on `collection`
    pub fn fail_selects_forever(&self, collection: &str, code: Option<&str>) {
        self.set_select_fault(
            collection,
            SelectFault::Fail {
                remaining: None,
                code: code.map(str::to_string),
                message: format!("{} unavailable", collection),
            },
        );
    }

    /// Reads on `collection` never complete
    pub fn hang_selects(&self, collection: &str) {
        self.set_select_fault(collection, SelectFault::Hang);
    }

    /// Reads on `collection` complete after `delay`
    pub fn delay_selects(&self, collection: &str, delay: Duration) {
        self.set_select_fault(collection, SelectFault::Delay(delay));
    }

    pub fn clear_faults(&self) {
        *self.lock_faults() = Faults::default();
    }

    /// `get_session` and `refresh_session` never complete
    pub fn hang_session_calls(&self, hang: bool) {
        self.lock_faults().hang_session = hang;
    }

    /// `get_session` and `refresh_session` fail with `message`
    pub fn fail_session_calls(&self, message: Option<&str>) {
        self.lock_faults().session_error = message.map(str::to_string);
    }

    /// `sign_out` reports `message` after dropping the session
    pub fn fail_sign_out(&self, message: Option<&str>) {
        self.lock_faults().sign_out_error = message.map(str::to_string);
    }

    /// Broadcast an auth notification as the hosted service would
    pub fn emit(&self, change: AuthStateChange) {
        if matches!(change.event, AuthEvent::SignedOut) {
            self.lock_state().session = None;
        } else if let Some(session) = &change.session {
            self.lock_state().session = Some(session.clone());
        }
        let _ = self.events.send(change);
    }

    /// Reads issued against `collection` so far, including failed ones
    pub fn select_count(&self, collection: &str) -> usize {
        self.select_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection)
            .copied()
            .unwrap_or(0)
    }

    /// Sign-in, sign-out, session and refresh calls so far
    pub fn auth_call_count(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    /// Rows currently stored in `collection`
    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.lock_state()
            .tables
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Build a session for `user` as the sign-in endpoint would
    pub fn issue_session(&self, user_id: &str, email: Option<&str>) -> Session {
        let now = Utc::now();
        Session {
            access_token: format!("access-{}", uuid::Uuid::new_v4()),
            refresh_token: Some(format!("refresh-{}", uuid::Uuid::new_v4())),
            issued_at: now,
            expires_at: now + self.session_ttl,
            user: SessionUser {
                id: user_id.to_string(),
                email: email.map(str::to_string),
            },
        }
    }

    fn set_select_fault(&self, collection: &str, fault: SelectFault) {
        self.lock_faults()
            .selects
            .insert(collection.to_string(), fault);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fault to apply to the next read on `collection`, consuming one failure
    fn take_select_fault(&self, collection: &str) -> Option<SelectFault> {
        let mut faults = self.lock_faults();
        let fault = faults.selects.get_mut(collection)?;

        let taken = fault.clone();
        if let SelectFault::Fail {
            remaining: Some(remaining),
            ..
        } = fault
        {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                faults.selects.remove(collection);
            }
        }
        Some(taken)
    }

    async fn session_gate(&self) -> PortalResult<()> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);

        let (hang, error) = {
            let faults = self.lock_faults();
            (faults.hang_session, faults.session_error.clone())
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(message) = error {
            return Err(PortalError::backend(None, message, "memory_backend"));
        }
        Ok(())
    }

    fn filtered(rows: &[Value], filters: &[Filter]) -> Vec<Value> {
        rows.iter()
            .filter(|row| filters.iter().all(|f| f.matches(row)))
            .cloned()
            .collect()
    }
}

fn sort_key(row: &Value, column: &str) -> String {
    match row.get(column) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> PortalResult<Session> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);

        let user = self
            .lock_state()
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email) && u.password == password)
            .cloned();

        let Some(user) = user else {
            return Err(PortalError::Backend {
                message: "Invalid login credentials".to_string(),
                code: Some("invalid_credentials".to_string()),
                status: Some(400),
                source: None,
                context: ErrorContext::new("memory_backend").with_operation("sign_in"),
            });
        };

        let session = self.issue_session(&user.id, Some(&user.email));
        self.lock_state().session = Some(session.clone());
        let _ = self.events.send(AuthStateChange::new(
            AuthEvent::SignedIn,
            Some(session.clone()),
        ));

        Ok(session)
    }

    async fn sign_out(&self) -> PortalResult<()> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);

        self.lock_state().session = None;
        let _ = self
            .events
            .send(AuthStateChange::new(AuthEvent::SignedOut, None));

        let error = self.lock_faults().sign_out_error.clone();
        match error {
            Some(message) => Err(PortalError::backend(None, message, "memory_backend")),
            None => Ok(()),
        }
    }

    async fn get_session(&self) -> PortalResult<Option<Session>> {
        self.session_gate().await?;
        let session = self.lock_state().session.clone();
        Ok(session.filter(|s| !s.is_expired()))
    }

    async fn refresh_session(&self) -> PortalResult<Option<Session>> {
        self.session_gate().await?;

        let current = self.lock_state().session.clone();
        let Some(current) = current.filter(|s| s.can_refresh()) else {
            return Ok(None);
        };

        let refreshed = self.issue_session(&current.user.id, current.user.email.as_deref());
        self.lock_state().session = Some(refreshed.clone());
        let _ = self.events.send(AuthStateChange::new(
            AuthEvent::TokenRefreshed,
            Some(refreshed.clone()),
        ));
        Ok(Some(refreshed))
    }

    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

#[async_trait]
impl DataBackend for MemoryBackend {
    async fn select(&self, query: &Query) -> PortalResult<Vec<Value>> {
        *self
            .select_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(query.collection.clone())
            .or_default() += 1;

        match self.take_select_fault(&query.collection) {
            Some(SelectFault::Fail { code, message, .. }) => {
                debug!(collection = %query.collection, "Injected read failure");
                return Err(PortalError::backend(code.as_deref(), message, "memory_backend"));
            }
            Some(SelectFault::Hang) => {
                debug!(collection = %query.collection, "Injected hanging read");
                std::future::pending::<()>().await;
            }
            Some(SelectFault::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        let mut rows = {
            let state = self.lock_state();
            let table = state
                .tables
                .get(&query.collection)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            Self::filtered(table, &query.filters)
        };

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = sort_key(a, &order.column).cmp(&sort_key(b, &order.column));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    async fn insert(&self, collection: &str, rows: Vec<Value>) -> PortalResult<Vec<Value>> {
        let mut stored = Vec::with_capacity(rows.len());
        let mut state = self.lock_state();
        let table = state.tables.entry(collection.to_string()).or_default();

        for mut row in rows {
            let Some(object) = row.as_object_mut() else {
                return Err(PortalError::backend(
                    Some("PGRST102"),
                    "Rows must be JSON objects",
                    "memory_backend",
                ));
            };
            object
                .entry("id")
                .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
            object
                .entry("created_at")
                .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
            table.push(row.clone());
            stored.push(row);
        }

        Ok(stored)
    }

    async fn update(
        &self,
        collection: &str,
        filters: &[Filter],
        patch: Value,
    ) -> PortalResult<Vec<Value>> {
        let Some(patch) = patch.as_object() else {
            return Err(PortalError::backend(
                Some("PGRST102"),
                "Patch must be a JSON object",
                "memory_backend",
            ));
        };

        let mut state = self.lock_state();
        let mut updated = Vec::new();
        if let Some(table) = state.tables.get_mut(collection) {
            for row in table.iter_mut() {
                if !filters.iter().all(|f| f.matches(row)) {
                    continue;
                }
                if let Some(object) = row.as_object_mut() {
                    for (key, value) in patch {
                        object.insert(key.clone(), value.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, collection: &str, filters: &[Filter]) -> PortalResult<()> {
        let mut state = self.lock_state();
        if let Some(table) = state.tables.get_mut(collection) {
            table.retain(|row| !filters.iter().all(|f| f.matches(row)));
        }
        Ok(())
    }

    async fn rpc(&self, function: &str, _args: Value) -> PortalResult<Value> {
        self.lock_state().rpc.get(function).cloned().ok_or_else(|| {
            PortalError::backend(
                Some("PGRST202"),
                format!("Could not find the function {}", function),
                "memory_backend",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
            .with_user("u-1", "client@example.com", "secret")
            .with_rows(
                "projects",
                vec![
                    json!({"id": "p-1", "client_id": "u-1", "name": "Villa", "created_at": "2024-01-02"}),
                    json!({"id": "p-2", "client_id": "u-2", "name": "Office", "created_at": "2024-01-01"}),
                    json!({"id": "p-3", "client_id": "u-1", "name": "Garage", "created_at": "2024-01-03"}),
                ],
            )
    }

    #[tokio::test]
    async fn test_select_filters_orders_and_limits() {
        let backend = backend();
        let rows = backend
            .select(
                &Query::from("projects")
                    .eq("client_id", "u-1")
                    .order("created_at", false)
                    .limit(1),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "p-3");
        assert_eq!(backend.select_count("projects"), 1);
    }

    #[tokio::test]
    async fn test_select_single_requires_exactly_one_row() {
        let backend = backend();
        let err = backend
            .select_single(&Query::from("projects").eq("client_id", "u-1"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), Some("PGRST116"));

        let row = backend
            .select_single(&Query::from("projects").eq("id", "p-2"))
            .await
            .unwrap();
        assert_eq!(row["name"], "Office");
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let backend = backend();
        backend.fail_selects("projects", 2, Some("22P02"));

        let query = Query::from("projects");
        assert_err!(backend.select(&query).await);
        assert_err!(backend.select(&query).await);
        let rows = assert_ok!(backend.select(&query).await);
        assert_eq!(rows.len(), 3);
        assert_eq!(backend.select_count("projects"), 3);
    }

    #[tokio::test]
    async fn test_sign_in_emits_and_stores_session() {
        let backend = backend();
        let mut events = backend.subscribe_auth_events();

        let bad = backend.sign_in_with_password("client@example.com", "nope").await;
        assert!(matches!(bad, Err(PortalError::Backend { status: Some(400), .. })));

        let session = backend
            .sign_in_with_password("CLIENT@example.com", "secret")
            .await
            .unwrap();
        assert_eq!(session.user.id, "u-1");

        let change = events.recv().await.unwrap();
        assert_eq!(change.event, AuthEvent::SignedIn);
        assert_eq!(backend.get_session().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_writes_apply_to_matching_rows() {
        let backend = backend();

        let inserted = backend
            .insert("payments", vec![json!({"amount": 1200, "client_id": "u-1"})])
            .await
            .unwrap();
        assert!(inserted[0]["id"].is_string());

        let updated = backend
            .update(
                "projects",
                &[Filter::eq("client_id", "u-1")],
                json!({"status": "done"}),
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 2);

        backend
            .delete("projects", &[Filter::eq("id", "p-2")])
            .await
            .unwrap();
        assert_eq!(backend.rows("projects").len(), 2);
    }
}
