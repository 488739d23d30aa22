//! Gift code validation

use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use storefront_shared::RequestContext;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ValidateGiftCodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateGiftCodeResponse {
    pub valid: bool,
}

/// POST /gift-codes/validate. Read-only; redemption goes through
/// `POST /tenants/{id}/gift-code`.
pub async fn validate_gift_code(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<ValidateGiftCodeRequest>,
) -> ApiResult<Json<ValidateGiftCodeResponse>> {
    if req.code.trim().is_empty() {
        return Err(ApiError::Validation("code: required".to_string()));
    }

    let valid = state.billing.gift_codes.is_redeemable(&req.code).await?;
    tracing::debug!(uid = %ctx.caller.uid, valid = valid, "Gift code checked");

    Ok(Json(ValidateGiftCodeResponse { valid }))
}
