use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{models::OrderStatus, pricing::PricingError};

/// StoreError
///
/// Failures raised by a `Repository` implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: Uuid },

    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// ApiError
///
/// Every failure a handler can return. Rendered as
/// `{"success": false, "error": {"code": "...", "message": "..."}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid request: {0}")]
    InvalidFields(#[from] validator::ValidationErrors),

    #[error("authentication required")]
    Unauthorized,

    #[error("you have no permission to access this resource")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InsufficientStock(String),

    #[error("{0}")]
    VerificationRequired(String),

    #[error("the verification code is incorrect")]
    InvalidCode,

    #[error("too many verification attempts, request a new code")]
    TooManyAttempts,

    #[error("the cart session has expired")]
    CartExpired,

    #[error("the verification session has expired")]
    VerificationExpired,

    #[error("{0}")]
    InvalidTransition(String),

    // The detail is logged, never sent to the client.
    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(..) | Self::InvalidFields(..) | Self::InvalidCode => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::VerificationRequired(..) => StatusCode::FORBIDDEN,
            Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::Conflict(..) | Self::InsufficientStock(..) | Self::InvalidTransition(..) => {
                StatusCode::CONFLICT
            }
            Self::CartExpired | Self::VerificationExpired => StatusCode::GONE,
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(..) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the client.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(..) | Self::InvalidFields(..) => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound(..) => "NOT_FOUND",
            Self::Conflict(..) => "CONFLICT",
            Self::InsufficientStock(..) => "INSUFFICIENT_STOCK",
            Self::VerificationRequired(..) => "VERIFICATION_REQUIRED",
            Self::InvalidCode => "INVALID_CODE",
            Self::TooManyAttempts => "TOO_MANY_ATTEMPTS",
            Self::CartExpired => "CART_EXPIRED",
            Self::VerificationExpired => "VERIFICATION_EXPIRED",
            Self::InvalidTransition(..) => "INVALID_TRANSITION",
            Self::Internal(..) => "INTERNAL_ERROR",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what.to_string()),
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::InsufficientStock { .. } => Self::InsufficientStock(err.to_string()),
            StoreError::InvalidTransition { .. } => Self::InvalidTransition(err.to_string()),
            StoreError::Database(..) | StoreError::Unavailable(..) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<PricingError> for ApiError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::Unavailable(..) => Self::Conflict(err.to_string()),
            PricingError::InvalidQuantity(..) | PricingError::AmountTooLarge => {
                Self::Validation(err.to_string())
            }
            PricingError::InsufficientStock { .. } => Self::InsufficientStock(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Internal(detail) => tracing::error!(error = %detail, "request failed"),
            other => tracing::debug!(code = other.code(), error = %other, "request rejected"),
        }

        let envelope = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(envelope)).into_response()
    }
}

/// ApiResponse
///
/// Success envelope: `{"success": true, "data": ...}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;
