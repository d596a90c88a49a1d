//! SMS phone verification.
//!
//! A session starts unverified with a hashed six-digit code. Confirming the code
//! marks it verified and extends its lifetime long enough to finish checkout.
//! Checkout consumes the session, so one verification backs one order.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::ApiError,
    models::{VerificationSession, VerificationStarted, VerificationStatus},
    repository::RepositoryState,
    sms::{SmsState, mask_phone},
};

/// Normalizes a phone number to `+` followed by 8 to 15 digits.
///
/// Spaces, dashes, dots and parentheses are dropped; anything else is rejected.
pub fn normalize_phone(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix('+') else {
        return Err(ApiError::Validation(
            "phone must be in international format, e.g. +15551234567".to_string(),
        ));
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return Err(ApiError::Validation("phone contains invalid characters".to_string())),
        }
    }

    if !(8..=15).contains(&digits.len()) {
        return Err(ApiError::Validation("phone must have 8 to 15 digits".to_string()));
    }
    Ok(format!("+{digits}"))
}

/// SHA-256 over the session id and the code, hex encoded. Salting with the id
/// keeps equal codes in different sessions from sharing a hash.
pub fn hash_code(session_id: Uuid, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_code() -> String {
    let code: u32 = rand::rng().random_range(0..1_000_000);
    format!("{code:06}")
}

/// Checks that a session can back an order at `now`.
pub fn require_verified(session: &VerificationSession, now: DateTime<Utc>) -> Result<(), ApiError> {
    if session.is_used() {
        return Err(ApiError::Conflict(
            "verification session was already used for an order".to_string(),
        ));
    }
    if !session.is_verified() {
        return Err(ApiError::VerificationRequired(
            "phone number has not been verified".to_string(),
        ));
    }
    if session.is_expired(now) {
        return Err(ApiError::VerificationExpired);
    }
    Ok(())
}

/// VerificationService
///
/// Issues SMS one-time codes and confirms them. A confirmed, unused session is
/// what authorizes a single checkout.
#[derive(Clone)]
pub struct VerificationService {
    repo: RepositoryState,
    sms: SmsState,
    config: AppConfig,
}

impl VerificationService {
    pub fn new(repo: RepositoryState, sms: SmsState, config: AppConfig) -> Self {
        Self { repo, sms, config }
    }

    pub async fn start(&self, phone: &str) -> Result<VerificationStarted, ApiError> {
        self.start_at(phone, Utc::now()).await
    }

    /// start_at
    ///
    /// Creates a session for `phone` and texts it a fresh code. The session is
    /// stored before the SMS goes out so a delivered code always has a session.
    pub async fn start_at(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<VerificationStarted, ApiError> {
        let phone = normalize_phone(phone)?;
        let code = generate_code();
        let id = Uuid::new_v4();

        let session = VerificationSession {
            id,
            phone: phone.clone(),
            code_hash: hash_code(id, &code),
            attempts: 0,
            verified_at: None,
            used_at: None,
            created_at: now,
            expires_at: now + self.config.otp_ttl(),
        };
        self.repo.create_verification(&session).await?;

        let body = format!(
            "Your verification code is {code}. It expires in {} minutes.",
            self.config.otp_ttl_minutes
        );
        self.sms
            .send(&phone, &body)
            .await
            .map_err(|e| ApiError::Internal(format!("sms delivery failed: {e}")))?;

        tracing::info!(verification_id = %id, phone = %mask_phone(&phone), "verification started");

        Ok(VerificationStarted {
            verification_id: id,
            phone,
            expires_at: session.expires_at,
        })
    }

    pub async fn confirm(&self, id: Uuid, code: &str) -> Result<VerificationStatus, ApiError> {
        self.confirm_at(id, code, Utc::now()).await
    }

    /// confirm_at
    ///
    /// Checks `code` against the session. Wrong codes burn an attempt; once
    /// `otp_max_attempts` is reached the session is locked and a new one is needed.
    pub async fn confirm_at(
        &self,
        id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<VerificationStatus, ApiError> {
        let mut session = self
            .repo
            .get_verification(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("verification session".to_string()))?;

        if session.is_used() {
            return Err(ApiError::Conflict(
                "verification session was already used for an order".to_string(),
            ));
        }
        if session.is_expired(now) {
            return Err(ApiError::VerificationExpired);
        }
        if session.is_verified() {
            return Ok(status_of(&session));
        }
        if session.attempts >= self.config.otp_max_attempts {
            return Err(ApiError::TooManyAttempts);
        }

        if hash_code(session.id, code.trim()) != session.code_hash {
            session.attempts += 1;
            self.repo.save_verification(&session).await?;
            tracing::info!(verification_id = %id, attempts = session.attempts, "verification code rejected");
            return Err(if session.attempts >= self.config.otp_max_attempts {
                ApiError::TooManyAttempts
            } else {
                ApiError::InvalidCode
            });
        }

        session.verified_at = Some(now);
        session.expires_at = now + self.config.verification_ttl();
        self.repo.save_verification(&session).await?;
        tracing::info!(verification_id = %id, "phone verified");

        Ok(status_of(&session))
    }
}

fn status_of(session: &VerificationSession) -> VerificationStatus {
    VerificationStatus {
        verification_id: session.id,
        phone: session.phone.clone(),
        verified: session.is_verified(),
        expires_at: session.expires_at,
    }
}
