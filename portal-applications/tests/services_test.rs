//! Entity services: scoping by role, admin-gated writes, client actions

use portal_applications::repository::types::{NewPayment, NewProject};
use portal_applications::{
    ApplicationError, MemoryLocalStore, PaymentStatus, PortalServices, ProjectStatus, PvStatus,
    QuoteStatus, ResilientClient, SessionManager, SessionManagerConfig,
};
use portal_backend::MemoryBackend;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    backend: Arc<MemoryBackend>,
    manager: SessionManager,
    services: PortalServices,
}

fn fixture() -> Fixture {
    let backend = Arc::new(
        MemoryBackend::new()
            .with_user("u-admin", "admin@example.com", "secret")
            .with_user("u-1", "one@example.com", "secret")
            .with_rows(
                "users",
                vec![
                    json!({"id": "u-admin", "role": "admin"}),
                    json!({"id": "u-1", "role": "client"}),
                ],
            )
            .with_rows(
                "projects",
                vec![
                    json!({"id": "p-1", "client_id": "u-1", "name": "Villa", "status": "in_progress", "created_at": "2024-01-01T00:00:00Z"}),
                    json!({"id": "p-2", "client_id": "u-2", "name": "Office", "status": "planned", "created_at": "2024-02-01T00:00:00Z"}),
                ],
            )
            .with_rows(
                "payments",
                vec![
                    json!({"id": "pay-1", "client_id": "u-1", "project_id": "p-1", "amount": 1200.0, "status": "pending", "created_at": "2024-01-05T00:00:00Z"}),
                    json!({"id": "pay-2", "client_id": "u-1", "project_id": "p-1", "amount": 800.0, "status": "paid", "created_at": "2024-01-02T00:00:00Z"}),
                    json!({"id": "pay-3", "client_id": "u-2", "amount": 99.0, "status": "overdue", "created_at": "2024-01-03T00:00:00Z"}),
                ],
            )
            .with_rows(
                "quotes",
                vec![
                    json!({"id": "q-1", "client_id": "u-1", "amount": 5000.0, "status": "sent", "created_at": "2024-01-01T00:00:00Z"}),
                    json!({"id": "q-2", "client_id": "u-1", "amount": 700.0, "status": "draft", "created_at": "2024-01-02T00:00:00Z"}),
                ],
            )
            .with_rows(
                "pv_documents",
                vec![
                    json!({"id": "pv-1", "client_id": "u-1", "project_id": "p-1", "title": "Handover", "status": "pending", "created_at": "2024-03-01T00:00:00Z"}),
                    json!({"id": "pv-2", "client_id": "u-2", "title": "Handover", "status": "pending", "created_at": "2024-03-02T00:00:00Z"}),
                ],
            ),
    );

    let data = ResilientClient::new(backend.clone());
    let manager = SessionManager::new(
        backend.clone(),
        data.clone(),
        Arc::new(MemoryLocalStore::new()),
        SessionManagerConfig::default(),
    );
    let services = PortalServices::new(data, manager.store().clone());

    Fixture {
        backend,
        manager,
        services,
    }
}

async fn sign_in(fixture: &Fixture, email: &str) {
    assert!(fixture.manager.login(email, "secret").await.is_success());
    tokio::time::sleep(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_reads_require_a_session() {
    let fixture = fixture();

    let err = fixture.services.projects.list().await.unwrap_err();
    assert!(matches!(err, ApplicationError::Unauthenticated { .. }));
    assert_eq!(fixture.backend.select_count("projects"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_client_sees_only_own_rows() {
    let fixture = fixture();
    sign_in(&fixture, "one@example.com").await;

    let projects = fixture.services.projects.list().await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].id, "p-1");
    assert_eq!(projects[0].status, ProjectStatus::InProgress);

    let err = fixture.services.projects.get("p-2").await.unwrap_err();
    assert!(matches!(err, ApplicationError::NotFound { .. }));

    let payments = fixture.services.payments.list().await.unwrap();
    assert_eq!(payments.len(), 2);
    assert_eq!(payments[0].id, "pay-1");
    assert_eq!(fixture.services.payments.outstanding_total().await.unwrap(), 1200.0);
}

#[tokio::test(start_paused = true)]
async fn test_admin_sees_everything() {
    let fixture = fixture();
    sign_in(&fixture, "admin@example.com").await;

    let projects = fixture.services.projects.list().await.unwrap();
    assert_eq!(projects.len(), 2);
    // Newest first
    assert_eq!(projects[0].id, "p-2");

    assert_eq!(fixture.services.payments.outstanding_total().await.unwrap(), 1299.0);
}

#[tokio::test(start_paused = true)]
async fn test_writes_are_admin_only() {
    let fixture = fixture();
    sign_in(&fixture, "one@example.com").await;

    let err = fixture
        .services
        .projects
        .create(NewProject {
            client_id: "u-1".to_string(),
            name: "Garage".to_string(),
            description: None,
            status: ProjectStatus::Planned,
            address: None,
            start_date: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Permission { .. }));
    assert_eq!(fixture.backend.rows("projects").len(), 2);

    let err = fixture.services.payments.mark_paid("pay-1").await.unwrap_err();
    assert!(matches!(err, ApplicationError::Permission { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_admin_creates_and_updates() {
    let fixture = fixture();
    sign_in(&fixture, "admin@example.com").await;

    let payment = fixture
        .services
        .payments
        .create(NewPayment {
            client_id: "u-1".to_string(),
            project_id: Some("p-1".to_string()),
            amount: 450.0,
            status: PaymentStatus::Pending,
            due_date: None,
        })
        .await
        .unwrap();
    assert!(!payment.id.is_empty());

    let paid = fixture.services.payments.mark_paid(&payment.id).await.unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);
    assert!(paid.paid_at.is_some());

    let invalid = fixture
        .services
        .payments
        .create(NewPayment {
            client_id: "u-1".to_string(),
            project_id: None,
            amount: -1.0,
            status: PaymentStatus::Pending,
            due_date: None,
        })
        .await;
    assert!(matches!(invalid, Err(ApplicationError::Validation { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_client_answers_sent_quote_only() {
    let fixture = fixture();
    sign_in(&fixture, "one@example.com").await;

    let accepted = fixture.services.quotes.respond("q-1", true).await.unwrap();
    assert_eq!(accepted.status, QuoteStatus::Accepted);

    let err = fixture.services.quotes.respond("q-2", true).await.unwrap_err();
    assert!(matches!(err, ApplicationError::Validation { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_client_signs_own_document() {
    let fixture = fixture();
    sign_in(&fixture, "one@example.com").await;

    let signed = fixture.services.documents.sign("pv-1", "Jane Client").await.unwrap();
    assert_eq!(signed.status, PvStatus::Signed);
    assert_eq!(signed.signed_by.as_deref(), Some("Jane Client"));

    let again = fixture.services.documents.sign("pv-1", "Jane Client").await;
    assert!(matches!(again, Err(ApplicationError::Validation { .. })));

    let foreign = fixture.services.documents.sign("pv-2", "Jane Client").await;
    assert!(matches!(foreign, Err(ApplicationError::NotFound { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_overview_loads_all_collections() {
    let fixture = fixture();
    sign_in(&fixture, "one@example.com").await;

    let overview = fixture.services.overview().await.unwrap();
    assert_eq!(overview.projects.len(), 1);
    assert_eq!(overview.payments.len(), 2);
    assert_eq!(overview.quotes.len(), 2);
    assert_eq!(overview.documents.len(), 1);
    assert_eq!(overview.outstanding_amount(), 1200.0);
    assert_eq!(overview.active_projects(), 1);
    assert_eq!(overview.pending_signatures(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_overview_fails_when_a_collection_stays_down() {
    let fixture = fixture();
    sign_in(&fixture, "one@example.com").await;
    fixture.backend.fail_selects_forever("quotes", None);

    let err = fixture.services.overview().await.unwrap_err();
    assert!(matches!(err, ApplicationError::Core(_)));
    assert_eq!(fixture.backend.select_count("quotes"), 2);
}
