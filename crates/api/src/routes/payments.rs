//! Payment provider return redirect

use axum::{
    extract::{Query, State},
    response::Redirect,
    Extension,
};
use serde::Deserialize;
use storefront_billing::{PaymentOutcome, PaymentReturn};
use storefront_shared::TenantId;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::MaybeSession;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentReturnQuery {
    pub tenant: Uuid,
    pub status: String,
    pub months: Option<u32>,
    pub key: Option<String>,
}

/// GET /payments/return?tenant=..&status=..&months=..&key=..
///
/// Redirects to the admin console carrying only `notice`, so a reload of the
/// landing page never replays the provider parameters.
pub async fn payment_return(
    State(state): State<AppState>,
    Extension(MaybeSession(ctx)): Extension<MaybeSession>,
    Query(query): Query<PaymentReturnQuery>,
) -> ApiResult<Redirect> {
    let outcome: PaymentOutcome = query.status.parse().map_err(ApiError::Validation)?;

    let notice = state
        .billing
        .reconciler
        .reconcile(
            ctx.as_ref(),
            PaymentReturn {
                tenant_id: TenantId(query.tenant),
                outcome,
                months: query.months,
                idempotency_key: query.key,
            },
            OffsetDateTime::now_utc(),
        )
        .await?;

    let target = format!(
        "{}?notice={}",
        state.config.admin_console_url,
        notice.as_str()
    );
    Ok(Redirect::to(&target))
}
