//! Auth endpoints of the hosted backend

use super::{handle_response_error, transport_error, HttpBackend};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use portal_core::{
    AuthBackend, AuthEvent, AuthStateChange, ErrorContext, PortalError, PortalResult, Session,
    SessionUser,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Token endpoint response
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    email: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(|| now + Duration::seconds(self.expires_in.unwrap_or(3600)));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            issued_at: now,
            expires_at,
            user: SessionUser {
                id: self.user.id,
                email: self.user.email,
            },
        }
    }
}

impl HttpBackend {
    async fn token_request(
        &self,
        grant_type: &str,
        body: serde_json::Value,
        operation: &str,
    ) -> PortalResult<Session> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        debug!(grant_type = grant_type, "Requesting token");

        let response = self
            .client
            .post(url)
            .headers(self.auth_headers().await)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, operation, self.config.timeout_seconds))?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, operation).await);
        }

        let token: TokenResponse = response.json().await.map_err(|e| PortalError::Backend {
            message: format!("Failed to parse token response: {}", e),
            code: None,
            status: None,
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_backend").with_operation(operation),
        })?;

        Ok(token.into_session(Utc::now()))
    }
}

#[async_trait]
impl AuthBackend for HttpBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> PortalResult<Session> {
        info!(email = email, "Signing in");

        let session = self
            .token_request(
                "password",
                json!({ "email": email, "password": password }),
                "sign_in_with_password",
            )
            .await?;

        self.store_session(
            Some(session.clone()),
            AuthStateChange::new(AuthEvent::SignedIn, Some(session.clone())),
        )
        .await;

        Ok(session)
    }

    async fn sign_out(&self) -> PortalResult<()> {
        let had_session = self.current_session().await.is_some();

        let remote = if had_session {
            let url = self.endpoint("auth/v1/logout")?;
            match self
                .client
                .post(url)
                .headers(self.auth_headers().await)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => Err(handle_response_error(response, "sign_out").await),
                Err(e) => Err(transport_error(e, "sign_out", self.config.timeout_seconds)),
            }
        } else {
            Ok(())
        };

        // The local grant is dropped whatever the backend answered
        self.store_session(None, AuthStateChange::new(AuthEvent::SignedOut, None))
            .await;

        if let Err(e) = &remote {
            warn!(error = %e, "Backend sign-out failed, local session cleared anyway");
        }
        remote
    }

    async fn get_session(&self) -> PortalResult<Option<Session>> {
        let Some(session) = self.current_session().await else {
            return Ok(None);
        };

        if !session.is_expired() {
            return Ok(Some(session));
        }

        if session.can_refresh() {
            debug!("Held session expired, refreshing");
            return self.refresh_session().await;
        }

        self.store_session(None, AuthStateChange::new(AuthEvent::SignedOut, None))
            .await;
        Ok(None)
    }

    async fn refresh_session(&self) -> PortalResult<Option<Session>> {
        let Some(refresh_token) = self
            .current_session()
            .await
            .and_then(|session| session.refresh_token)
            .filter(|token| !token.is_empty())
        else {
            return Ok(None);
        };

        match self
            .token_request(
                "refresh_token",
                json!({ "refresh_token": refresh_token }),
                "refresh_session",
            )
            .await
        {
            Ok(session) => {
                self.store_session(
                    Some(session.clone()),
                    AuthStateChange::new(AuthEvent::TokenRefreshed, Some(session.clone())),
                )
                .await;
                Ok(Some(session))
            }
            Err(e) => {
                // A rejected refresh token ends the grant; transport faults keep it
                if matches!(&e, PortalError::Backend { status: Some(400..=401), .. }) {
                    self.store_session(None, AuthStateChange::new(AuthEvent::SignedOut, None))
                        .await;
                }
                Err(e)
            }
        }
    }

    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}
