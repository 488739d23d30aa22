//! Billing error types

use storefront_shared::AccessError;
use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Authentication required")]
    Unauthenticated,

    /// Never carries target details so callers cannot learn whether a target exists
    #[error("Access denied")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Payment provider error ({code}): {description}")]
    UpstreamPayment { code: String, description: String },

    #[error("Record changed concurrently: {0}")]
    Conflict(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => BillingError::NotFound("Record not found".to_string()),
            other => BillingError::Persistence(other.to_string()),
        }
    }
}

impl From<AccessError> for BillingError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Unauthenticated => BillingError::Unauthenticated,
            AccessError::Unauthorized => BillingError::Unauthorized,
        }
    }
}

impl BillingError {
    /// Whether the caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::UpstreamPayment { .. } | BillingError::Conflict(_)
        )
    }
}
