//! HTTP client for the hosted backend
//!
//! Authentication goes through the `/auth/v1` endpoints and relational data
//! through the `/rest/v1` endpoints. The current session is kept in memory,
//! mirrored to a [`LocalStore`] and announced on a broadcast channel.

use portal_core::{
    AuthStateChange, ErrorContext, LocalStore, PortalConfig, PortalError, PortalResult, Session,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

pub mod auth;
pub mod rest;

#[cfg(test)]
mod tests;

/// Configuration for the HTTP backend client
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL of the hosted project
    pub base_url: String,
    /// Public API key
    pub anon_key: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
    /// Additional headers
    pub headers: HashMap<String, String>,
    /// Local storage key of the persisted session
    pub auth_storage_key: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            anon_key: String::new(),
            timeout_seconds: 30,
            user_agent: "portal/0.1".to_string(),
            headers: HashMap::new(),
            auth_storage_key: "portal-auth-token".to_string(),
        }
    }
}

impl ApiClientConfig {
    /// Build from the portal configuration
    pub fn from_portal_config(config: &PortalConfig) -> Self {
        Self {
            base_url: config.backend.url.clone(),
            anon_key: config.backend.anon_key.clone(),
            timeout_seconds: config.backend.request_timeout_secs,
            auth_storage_key: config.storage.auth_storage_key.clone(),
            ..Default::default()
        }
    }

    /// Set additional header
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// Hosted backend reached over HTTP
pub struct HttpBackend {
    client: reqwest::Client,
    config: ApiClientConfig,
    base_url: url::Url,
    store: Arc<dyn LocalStore>,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl HttpBackend {
    /// Create a client, restoring any session persisted under the auth key
    pub fn new(config: ApiClientConfig, store: Arc<dyn LocalStore>) -> PortalResult<Self> {
        let client = create_http_client(&config)?;

        let mut base_url = url::Url::parse(&config.base_url).map_err(|e| PortalError::Config {
            message: format!("Invalid backend URL '{}': {}", config.base_url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_backend")
                .with_operation("new")
                .with_suggestion("Set backend.url to an absolute http(s) URL"),
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let restored = restore_session(store.as_ref(), &config.auth_storage_key);
        if restored.is_some() {
            debug!("Restored persisted session");
        }

        let (events, _) = broadcast::channel(64);

        info!("Created HTTP backend client for {}", base_url);

        Ok(Self {
            client,
            config,
            base_url,
            store,
            session: RwLock::new(restored),
            events,
        })
    }

    /// Resolve an endpoint path against the project URL
    pub(crate) fn endpoint(&self, path: &str) -> PortalResult<url::Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| PortalError::Internal {
                message: format!("Failed to build URL for '{}': {}", path, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_backend").with_operation("endpoint"),
            })
    }

    /// Headers carried by every request: API key plus the best bearer token available
    pub(crate) async fn auth_headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();

        if let Ok(value) = reqwest::header::HeaderValue::from_str(&self.config.anon_key) {
            headers.insert("apikey", value);
        }

        let bearer = match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.config.anon_key.clone(),
        };
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", bearer)) {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        headers
    }

    /// Replace the held session, mirror it to local storage and announce the change
    pub(crate) async fn store_session(&self, session: Option<Session>, change: AuthStateChange) {
        match &session {
            Some(session) => match serde_json::to_string(session) {
                Ok(json) => {
                    if let Err(e) = self.store.set(&self.config.auth_storage_key, &json) {
                        warn!(error = %e, "Failed to persist session");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize session"),
            },
            None => {
                if let Err(e) = self.store.remove(&self.config.auth_storage_key) {
                    warn!(error = %e, "Failed to clear persisted session");
                }
            }
        }

        *self.session.write().await = session;

        // No receivers is fine
        let _ = self.events.send(change);
    }

    pub(crate) async fn current_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }
}

fn restore_session(store: &dyn LocalStore, key: &str) -> Option<Session> {
    let raw = match store.get(key) {
        Ok(raw) => raw?,
        Err(e) => {
            warn!(error = %e, "Failed to read persisted session");
            return None;
        }
    };

    match serde_json::from_str::<Session>(&raw) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(error = %e, "Discarding unreadable persisted session");
            let _ = store.remove(key);
            None
        }
    }
}

/// Helper function to create HTTP client with common configuration
pub(crate) fn create_http_client(config: &ApiClientConfig) -> PortalResult<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();

    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_str(&config.user_agent).map_err(|e| {
            PortalError::Config {
                message: format!("Invalid user agent: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?,
    );

    for (key, value) in &config.headers {
        let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            PortalError::Config {
                message: format!("Invalid header name '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?;

        let header_value =
            reqwest::header::HeaderValue::from_str(value).map_err(|e| PortalError::Config {
                message: format!("Invalid header value for '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            })?;

        headers.insert(header_name, header_value);
    }

    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_seconds))
        .default_headers(headers)
        .build()
        .map_err(|e| PortalError::Config {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })
}

/// Error body shapes returned by the auth and REST endpoints
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    code: Option<serde_json::Value>,
    error_code: Option<String>,
    message: Option<String>,
    msg: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    hint: Option<String>,
}

impl ErrorBody {
    /// Symbolic error code, preferring the REST `code` string over numeric codes
    pub(crate) fn code(&self) -> Option<String> {
        match &self.code {
            Some(serde_json::Value::String(code)) => Some(code.clone()),
            _ => self.error_code.clone().or_else(|| self.error.clone()),
        }
    }

    pub(crate) fn message(&self) -> Option<String> {
        self.message
            .clone()
            .or_else(|| self.msg.clone())
            .or_else(|| self.error_description.clone())
            .or_else(|| self.error.clone())
    }
}

/// Turn a non-success response into a backend error
pub(crate) async fn handle_response_error(
    response: reqwest::Response,
    operation: &str,
) -> PortalError {
    let status = response.status();
    let raw = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&raw).unwrap_or_default();

    let message = body.message().unwrap_or_else(|| {
        if raw.is_empty() {
            status.canonical_reason().unwrap_or("Unknown error").to_string()
        } else {
            raw.clone()
        }
    });

    let mut context = ErrorContext::new("http_backend")
        .with_operation(operation)
        .with_metadata("status", &status.as_u16().to_string())
        .with_suggestion(match status.as_u16() {
            400 => "Check the request parameters",
            401 => "Sign in again",
            403 => "The signed-in user cannot access this resource",
            404 => "Collection or function not found",
            _ => "Check network connectivity and backend status",
        });
    if let Some(hint) = &body.hint {
        context = context.with_suggestion(hint);
    }

    PortalError::Backend {
        message,
        code: body.code(),
        status: Some(status.as_u16()),
        source: None,
        context,
    }
}

/// Map a transport failure
pub(crate) fn transport_error(e: reqwest::Error, operation: &str, timeout_secs: u64) -> PortalError {
    if e.is_timeout() {
        return PortalError::Timeout {
            operation: operation.to_string(),
            duration_ms: timeout_secs * 1000,
            context: ErrorContext::new("http_backend").with_operation(operation),
        };
    }

    PortalError::Backend {
        message: format!("Failed to reach backend: {}", e),
        code: None,
        status: None,
        source: Some(Box::new(e)),
        context: ErrorContext::new("http_backend")
            .with_operation(operation)
            .with_suggestion("Check network connectivity"),
    }
}
