mod common;

use chrono::{Duration, Utc};
use common::{CUSTOMER_PHONE, TestContext};
use producer_market::{
    AppConfig, AppState, MockSmsSender,
    error::ApiError,
    repository::{Repository, RepositoryState},
    services::verification::{hash_code, normalize_phone, require_verified},
    sms::SmsState,
};
use std::sync::Arc;
use uuid::Uuid;

#[test]
fn test_normalize_phone() {
    assert_eq!(normalize_phone("+1 (555) 123-0001").unwrap(), "+15551230001");
    assert_eq!(normalize_phone("  +44.20.7946.0958 ").unwrap(), "+442079460958");
    assert!(normalize_phone("5551230001").is_err());
    assert!(normalize_phone("+1555abc0001").is_err());
    assert!(normalize_phone("+1234").is_err());
    assert!(normalize_phone("+1234567890123456").is_err());
}

#[test]
fn test_hash_code_is_salted_by_session() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    assert_eq!(hash_code(a, "123456"), hash_code(a, "123456"));
    assert_ne!(hash_code(a, "123456"), hash_code(b, "123456"));
    assert_eq!(hash_code(a, "123456").len(), 64);
}

#[tokio::test]
async fn test_start_sends_code_and_stores_only_its_hash() {
    let ctx = TestContext::new();

    let started = ctx.state.verification().start("+1 555 123 0001").await.unwrap();

    assert_eq!(started.phone, CUSTOMER_PHONE);
    let code = ctx.sms.last_code_for(CUSTOMER_PHONE).unwrap();
    assert_eq!(code.len(), 6);

    let session = ctx
        .repo()
        .get_verification(started.verification_id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(session.code_hash, code);
    assert_eq!(session.code_hash, hash_code(session.id, &code));
    assert!(!session.is_verified());
}

#[tokio::test]
async fn test_confirm_with_correct_code_verifies_and_extends_expiry() {
    let ctx = TestContext::new();
    let service = ctx.state.verification();
    let now = Utc::now();
    let started = service.start_at(CUSTOMER_PHONE, now).await.unwrap();
    let code = ctx.sms.last_code_for(CUSTOMER_PHONE).unwrap();

    let confirmed_at = now + Duration::minutes(2);
    let status = service
        .confirm_at(started.verification_id, &code, confirmed_at)
        .await
        .unwrap();

    assert!(status.verified);
    assert_eq!(status.expires_at, confirmed_at + Duration::minutes(30));

    // Confirming again is a no-op.
    let again = service
        .confirm_at(started.verification_id, &code, confirmed_at)
        .await
        .unwrap();
    assert!(again.verified);
}

#[tokio::test]
async fn test_wrong_code_counts_attempts_until_locked() {
    let ctx = TestContext::new();
    let service = ctx.state.verification();
    let started = service.start(CUSTOMER_PHONE).await.unwrap();
    let code = ctx.sms.last_code_for(CUSTOMER_PHONE).unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    for _ in 0..4 {
        let err = service.confirm(started.verification_id, wrong).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidCode));
    }
    let err = service.confirm(started.verification_id, wrong).await.unwrap_err();
    assert!(matches!(err, ApiError::TooManyAttempts));

    // Locked even for the right code.
    let err = service.confirm(started.verification_id, &code).await.unwrap_err();
    assert!(matches!(err, ApiError::TooManyAttempts));
    assert_eq!(err.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_expired_code_is_rejected() {
    let ctx = TestContext::new();
    let service = ctx.state.verification();
    let now = Utc::now();
    let started = service.start_at(CUSTOMER_PHONE, now).await.unwrap();
    let code = ctx.sms.last_code_for(CUSTOMER_PHONE).unwrap();

    let err = service
        .confirm_at(started.verification_id, &code, now + Duration::minutes(6))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::VerificationExpired));
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx
        .state
        .verification()
        .confirm(Uuid::new_v4(), "123456")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn test_sms_failure_surfaces_as_internal_error() {
    let ctx = TestContext::new();
    let state = AppState {
        repo: ctx.memory.clone() as RepositoryState,
        sms: Arc::new(MockSmsSender::new_failing()) as SmsState,
        config: AppConfig::default(),
    };

    let err = state.verification().start(CUSTOMER_PHONE).await.unwrap_err();

    assert!(matches!(err, ApiError::Internal(_)));
}

#[tokio::test]
async fn test_require_verified_states() {
    let ctx = TestContext::new();
    let now = Utc::now();
    let started = ctx.state.verification().start_at(CUSTOMER_PHONE, now).await.unwrap();
    let mut session = ctx
        .repo()
        .get_verification(started.verification_id)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(
        require_verified(&session, now),
        Err(ApiError::VerificationRequired(_))
    ));

    session.verified_at = Some(now);
    assert!(require_verified(&session, now).is_ok());
    assert!(matches!(
        require_verified(&session, session.expires_at),
        Err(ApiError::VerificationExpired)
    ));

    session.used_at = Some(now);
    assert!(matches!(
        require_verified(&session, now),
        Err(ApiError::Conflict(_))
    ));
}
