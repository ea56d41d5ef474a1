//! Integration tests for portal-core infrastructure

use portal_core::{
    backend_error, config_error, init_logging, not_found_error, validation_error,
    with_call_timeout, with_retry, with_timeout, LogFormat, LoggingConfig, PortalError,
    PortalResult, RetryConfig,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_test::{assert_err, assert_ok};

type Attempt = Pin<Box<dyn Future<Output = PortalResult<&'static str>> + Send>>;

fn counting_operation(
    counter: &Arc<AtomicUsize>,
    failures: usize,
    make_error: fn() -> PortalError,
) -> impl FnMut() -> Attempt {
    let counter = Arc::clone(counter);
    move || {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            if call <= failures {
                Err(make_error())
            } else {
                Ok("rows")
            }
        })
    }
}

fn transient() -> PortalError {
    backend_error!("connection reset by peer", "test")
}

fn malformed() -> PortalError {
    backend_error!("invalid input syntax for type uuid", "22P02", "test")
}

#[tokio::test(start_paused = true)]
async fn test_single_transient_failure_is_retried_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let result = with_retry(
        counting_operation(&calls, 1, transient),
        &RetryConfig::default(),
        "select projects",
    )
    .await;

    let elapsed = start.elapsed();
    assert_eq!(assert_ok!(result), "rows");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(elapsed >= Duration::from_millis(300), "slept {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(350), "slept {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_code_short_circuits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let result = with_retry(
        counting_operation(&calls, usize::MAX, malformed),
        &RetryConfig::default().with_max_retries(5),
        "select quote",
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(assert_err!(result).error_code(), Some("22P02"));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_return_last_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let result = with_retry(
        counting_operation(&calls, usize::MAX, transient),
        &RetryConfig::default(),
        "select payments",
    )
    .await;

    let elapsed = start.elapsed();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(350));

    match result.unwrap_err() {
        PortalError::Backend { message, .. } => {
            assert_eq!(message, "connection reset by peer")
        }
        other => panic!("Expected Backend error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_configured_code_short_circuits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig {
        non_retryable_codes: vec!["57014".to_string()],
        ..RetryConfig::default().with_max_retries(3)
    };

    let result = with_retry(
        counting_operation(&calls, usize::MAX, || {
            backend_error!("statement timeout", "57014", "test")
        }),
        &config,
        "select payments",
    )
    .await;

    assert_eq!(assert_err!(result).error_code(), Some("57014"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_exponentially() {
    let calls = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let result = with_retry(
        counting_operation(&calls, 3, transient),
        &RetryConfig::default().with_max_retries(3),
        "select pv",
    )
    .await;

    // 300 + 600 + 1200
    assert_ok!(result);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2100));
    assert!(elapsed < Duration::from_millis(2200));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_at_ceiling() {
    let start = Instant::now();

    let result = with_timeout(std::future::pending::<()>(), 8_000, "select projects").await;

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(8_000));
    assert!(elapsed < Duration::from_millis(8_100));

    match result.unwrap_err() {
        PortalError::Timeout {
            operation,
            duration_ms,
            ..
        } => {
            assert_eq!(operation, "select projects");
            assert_eq!(duration_ms, 8_000);
        }
        other => panic!("Expected Timeout error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fast_call_is_not_delayed_by_timeout() {
    let quick = async {
        sleep(Duration::from_millis(10)).await;
        Ok::<_, PortalError>("done")
    };

    let start = Instant::now();
    let result = with_call_timeout(quick, 8_000, "quick").await;
    assert_eq!(assert_ok!(result), "done");
    assert!(start.elapsed() < Duration::from_millis(20));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_inside_retry_is_not_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let result: PortalResult<()> = with_retry(
        || {
            calls.fetch_add(1, Ordering::SeqCst);
            with_call_timeout(std::future::pending(), 8_000, "hanging read")
        },
        &RetryConfig::default(),
        "hanging read",
    )
    .await;

    assert!(assert_err!(result).is_timeout());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() < Duration::from_millis(8_100));
}

#[tokio::test]
async fn test_logging_initialization() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        format: LogFormat::Compact,
        include_location: false,
        include_thread: false,
        log_to_file: false,
        log_file_path: None,
        enable_performance_monitoring: false,
        filter_directives: vec!["portal_core=debug".to_string()],
    };

    // A global subscriber may already be installed by another test; only a
    // panic would be a failure here.
    let _ = init_logging(&config);

    let missing_path = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };
    assert_err!(init_logging(&missing_path));
}

#[tokio::test]
async fn test_error_macros() {
    let err = config_error!("Invalid config", "loader");
    match &err {
        PortalError::Config { context, .. } => {
            assert_eq!(context.component, "loader");
            assert!(!context.recovery_suggestions.is_empty());
        }
        other => panic!("Expected Config error, got {:?}", other),
    }
    assert!(!err.is_retryable());
    err.log();

    match validation_error!("Invalid email", "email", "login_form") {
        PortalError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("email")),
        other => panic!("Expected Validation error, got {:?}", other),
    }

    match not_found_error!("projects/42", "project_service") {
        PortalError::NotFound { resource, context } => {
            assert_eq!(resource, "projects/42");
            assert_eq!(context.component, "project_service");
        }
        other => panic!("Expected NotFound error, got {:?}", other),
    }
}
