//! Tests for the HTTP backend client

#[cfg(test)]
mod tests {
    use super::super::auth::TokenResponse;
    use super::super::rest::filter_pair;
    use super::super::*;
    use chrono::{Duration, Utc};
    use portal_core::{AuthBackend, AuthEvent, Filter, Query, SessionUser};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestStore {
        values: Mutex<HashMap<String, String>>,
    }

    impl LocalStore for TestStore {
        fn get(&self, key: &str) -> PortalResult<Option<String>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> PortalResult<()> {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove(&self, key: &str) -> PortalResult<()> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn config() -> ApiClientConfig {
        ApiClientConfig {
            base_url: "https://project.example.invalid".to_string(),
            anon_key: "anon-key".to_string(),
            ..Default::default()
        }
    }

    fn session(expires_in_minutes: i64, refresh_token: Option<&str>) -> Session {
        let now = Utc::now();
        Session {
            access_token: "access".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            issued_at: now,
            expires_at: now + Duration::minutes(expires_in_minutes),
            user: SessionUser {
                id: "user-1".to_string(),
                email: Some("client@example.com".to_string()),
            },
        }
    }

    #[test]
    fn test_config_from_portal_config() {
        let mut portal = PortalConfig::default();
        portal.backend.url = "https://abc.example.invalid".to_string();
        portal.backend.anon_key = "key".to_string();
        portal.storage.auth_storage_key = "custom-auth".to_string();

        let config = ApiClientConfig::from_portal_config(&portal).with_timeout(5);
        assert_eq!(config.base_url, "https://abc.example.invalid");
        assert_eq!(config.anon_key, "key");
        assert_eq!(config.auth_storage_key, "custom-auth");
        assert_eq!(config.timeout_seconds, 5);
    }

    #[test]
    fn test_invalid_base_url_is_a_config_error() {
        let config = ApiClientConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        let result = HttpBackend::new(config, Arc::new(TestStore::default()));
        assert!(matches!(result, Err(PortalError::Config { .. })));
    }

    #[test]
    fn test_query_url_rendering() {
        let backend = HttpBackend::new(config(), Arc::new(TestStore::default())).unwrap();
        let query = Query::from("projects")
            .select("id,name")
            .eq("client_id", "c 1")
            .order("created_at", false)
            .limit(10);

        let url = backend.query_url(&query).unwrap();
        assert_eq!(url.path(), "/rest/v1/projects");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".to_string(), "eq.c 1".to_string())));
        assert!(pairs.contains(&("select".to_string(), "id,name".to_string())));
        assert!(pairs.contains(&("order".to_string(), "created_at.desc".to_string())));
        assert!(pairs.contains(&("limit".to_string(), "10".to_string())));
    }

    #[test]
    fn test_in_filter_rendering() {
        let filter = Query::from("quotes")
            .in_list("status", ["sent", "accepted"])
            .filters
            .remove(0);
        assert_eq!(
            filter_pair(&filter),
            ("status".to_string(), "in.(\"sent\",\"accepted\")".to_string())
        );
        assert_eq!(
            filter_pair(&Filter::eq("id", 3)),
            ("id".to_string(), "eq.3".to_string())
        );
    }

    #[test]
    fn test_error_body_variants() {
        let rest: ErrorBody = serde_json::from_str(
            r#"{"code":"PGRST116","details":"The result contains 0 rows","hint":null,"message":"JSON object requested, multiple (or no) rows returned"}"#,
        )
        .unwrap();
        assert_eq!(rest.code().as_deref(), Some("PGRST116"));
        assert!(rest.message().unwrap().starts_with("JSON object requested"));

        let auth: ErrorBody = serde_json::from_str(
            r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#,
        )
        .unwrap();
        assert_eq!(auth.code().as_deref(), Some("invalid_credentials"));
        assert_eq!(auth.message().as_deref(), Some("Invalid login credentials"));

        let legacy: ErrorBody = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token"}"#,
        )
        .unwrap();
        assert_eq!(legacy.code().as_deref(), Some("invalid_grant"));
        assert_eq!(legacy.message().as_deref(), Some("Invalid Refresh Token"));
    }

    #[test]
    fn test_token_response_expiry() {
        let now = Utc::now();
        let token: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","token_type":"bearer","expires_in":600,"refresh_token":"r","user":{"id":"u","email":"x@example.com"}}"#,
        )
        .unwrap();
        let session = token.into_session(now);
        assert_eq!(session.expires_at, now + Duration::seconds(600));
        assert_eq!(session.user.id, "u");
        assert!(session.can_refresh());
    }

    #[tokio::test]
    async fn test_persisted_session_is_restored() {
        let store = Arc::new(TestStore::default());
        let persisted = session(30, Some("refresh"));
        store
            .set("portal-auth-token", &serde_json::to_string(&persisted).unwrap())
            .unwrap();

        let backend = HttpBackend::new(config(), store).unwrap();
        assert_eq!(backend.get_session().await.unwrap(), Some(persisted));
    }

    #[tokio::test]
    async fn test_corrupt_persisted_session_is_discarded() {
        let store = Arc::new(TestStore::default());
        store.set("portal-auth-token", "{not json").unwrap();

        let backend = HttpBackend::new(config(), store.clone()).unwrap();
        assert_eq!(backend.get_session().await.unwrap(), None);
        assert_eq!(store.get("portal-auth-token").unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_session_without_refresh_token_signs_out() {
        let store = Arc::new(TestStore::default());
        store
            .set(
                "portal-auth-token",
                &serde_json::to_string(&session(-5, None)).unwrap(),
            )
            .unwrap();

        let backend = HttpBackend::new(config(), store.clone()).unwrap();
        let mut events = backend.subscribe_auth_events();

        assert_eq!(backend.get_session().await.unwrap(), None);
        assert_eq!(store.get("portal-auth-token").unwrap(), None);
        assert_eq!(events.recv().await.unwrap().event, AuthEvent::SignedOut);
    }

    #[tokio::test]
    async fn test_refresh_without_session_is_a_no_op() {
        let backend = HttpBackend::new(config(), Arc::new(TestStore::default())).unwrap();
        assert_eq!(backend.refresh_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sign_out_without_session_stays_local() {
        let backend = HttpBackend::new(config(), Arc::new(TestStore::default())).unwrap();
        let mut events = backend.subscribe_auth_events();

        assert!(backend.sign_out().await.is_ok());
        let change = events.recv().await.unwrap();
        assert_eq!(change.event, AuthEvent::SignedOut);
        assert!(change.session.is_none());
    }
}
