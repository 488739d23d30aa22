//! API error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use storefront_billing::BillingError;
use storefront_shared::AccessError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthenticated,

    /// Generic on purpose: never says whether the target exists
    #[error("Access denied")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Payment provider error ({code}): {description}")]
    UpstreamPayment { code: String, description: String },

    #[error("{0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthenticated,
    Unauthorized,
    NotFound,
    ValidationError,
    Conflict,
    UpstreamPaymentError,
    ServiceUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::UpstreamPaymentError => "UPSTREAM_PAYMENT_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Unauthorized => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UpstreamPayment { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Unauthenticated => ErrorCode::Unauthenticated,
            ApiError::Unauthorized => ErrorCode::Unauthorized,
            ApiError::NotFound(_) => ErrorCode::NotFound,
            ApiError::Validation(_) => ErrorCode::ValidationError,
            ApiError::Conflict(_) => ErrorCode::Conflict,
            ApiError::UpstreamPayment { .. } => ErrorCode::UpstreamPaymentError,
            ApiError::Unavailable(_) => ErrorCode::ServiceUnavailable,
            ApiError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(error = %self, code = code.as_str(), "Request failed");
        } else {
            tracing::debug!(error = %self, code = code.as_str(), "Request rejected");
        }

        match self {
            ApiError::UpstreamPayment { code: provider_code, description } => error_resp(
                status,
                json!({
                    "error": description,
                    "code": code.as_str(),
                    "providerCode": provider_code,
                    "retryable": true,
                }),
            ),
            ApiError::Internal(_) => error_resp(
                status,
                json!({ "error": "Internal server error", "code": code.as_str() }),
            ),
            other => {
                let message = other.to_string();
                error_resp(status, json!({ "error": message, "code": code.as_str() }))
            }
        }
    }
}

fn error_resp(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Unauthenticated => ApiError::Unauthenticated,
            BillingError::Unauthorized => ApiError::Unauthorized,
            BillingError::NotFound(msg) => ApiError::NotFound(msg),
            BillingError::Validation(msg) => ApiError::Validation(msg),
            BillingError::Conflict(msg) => ApiError::Conflict(msg),
            BillingError::UpstreamPayment { code, description } => {
                ApiError::UpstreamPayment { code, description }
            }
            BillingError::Persistence(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Unauthenticated => ApiError::Unauthenticated,
            AccessError::Unauthorized => ApiError::Unauthorized,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
