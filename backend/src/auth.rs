use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    extract::{FromRef, FromRequestParts, Request},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::ApiError,
    models::{LoginRequest, LoginResponse, ROLE_ADMIN, User},
    repository::RepositoryState,
    services::verification::normalize_phone,
};

/// Claims
///
/// Payload of the admin session token, signed with `JWT_SECRET` (HS256).
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The user's id.
    pub sub: Uuid,
    /// Role at the time of issue. The extractor re-reads the role from the store.
    pub role: String,
    pub iat: usize,
    pub exp: usize,
}

/// AuthUser
///
/// The resolved identity of an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// AuthUser Extractor Implementation
///
/// 1. Local bypass: in `Env::Local` an `x-user-id` header naming an existing user
///    is accepted without a token.
/// 2. Bearer token extraction and JWT validation.
/// 3. User lookup, so deleted users lose access before their token expires.
///
/// Rejection: `ApiError::Unauthorized` on any failure.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if config.env == Env::Local {
            let bypass_id = parts
                .headers
                .get("x-user-id")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| Uuid::parse_str(value).ok());
            if let Some(user_id) = bypass_id {
                if let Some(user) = repo.get_user(user_id).await? {
                    return Ok(AuthUser {
                        id: user.id,
                        role: user.role,
                    });
                }
            }
        }

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let claims = decode_token(token, &config)?;

        let user = repo
            .get_user(claims.sub)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        Ok(AuthUser {
            id: user.id,
            role: user.role,
        })
    }
}

/// require_admin
///
/// Guards the `/admin` namespace: 401 without a valid identity, 403 for a
/// non-admin role.
pub async fn require_admin(
    user: AuthUser,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !user.is_admin() {
        tracing::warn!(user_id = %user.id, role = %user.role, "admin route refused");
        return Err(ApiError::Forbidden);
    }
    Ok(next.run(request).await)
}

pub fn issue_token(
    user: &User,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> Result<LoginResponse, ApiError> {
    let expires_at = now + config.jwt_ttl();
    let claims = Claims {
        sub: user.id,
        role: user.role.clone(),
        iat: now.timestamp().max(0) as usize,
        exp: expires_at.timestamp().max(0) as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))?;

    Ok(LoginResponse { token, expires_at })
}

pub fn decode_token(token: &str, config: &AppConfig) -> Result<Claims, ApiError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        match e.kind() {
            ErrorKind::ExpiredSignature => tracing::debug!("expired token"),
            other => tracing::debug!(error = ?other, "rejected token"),
        }
        ApiError::Unauthorized
    })
}

/// Hashes a password with Argon2id and a random salt.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// login
///
/// Exchanges an admin's phone and password for a session token. Unknown phones,
/// non-admin users and wrong passwords all yield the same 401.
pub async fn login(
    repo: &RepositoryState,
    config: &AppConfig,
    req: &LoginRequest,
) -> Result<LoginResponse, ApiError> {
    let phone = normalize_phone(&req.phone).map_err(|_| ApiError::Unauthorized)?;
    let user = repo
        .get_user_by_phone(&phone)
        .await?
        .filter(User::is_admin)
        .ok_or(ApiError::Unauthorized)?;

    let hash = user.password_hash.as_deref().ok_or(ApiError::Unauthorized)?;
    if !verify_password(&req.password, hash) {
        tracing::info!(user_id = %user.id, "admin login failed");
        return Err(ApiError::Unauthorized);
    }

    tracing::info!(user_id = %user.id, "admin logged in");
    issue_token(&user, config, Utc::now())
}

/// bootstrap_admin
///
/// Creates or refreshes the admin account named by `ADMIN_PHONE`/`ADMIN_PASSWORD`.
/// Returns `None` when either variable is unset.
pub async fn bootstrap_admin(
    repo: &RepositoryState,
    config: &AppConfig,
) -> Result<Option<User>, ApiError> {
    let (Some(phone), Some(password)) = (&config.admin_phone, &config.admin_password) else {
        return Ok(None);
    };
    let phone = normalize_phone(phone)?;
    let hash = hash_password(password)?;
    let user = repo.upsert_admin(&phone, &hash).await?;
    tracing::info!(user_id = %user.id, "admin account ready");
    Ok(Some(user))
}
