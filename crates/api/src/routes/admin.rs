//! Super-admin console endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use storefront_billing::{summarize, DashboardSummary, InvariantChecker, SweepReport};
use storefront_shared::{AuditLogEntry, RequestContext};
use time::OffsetDateTime;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_AUDIT_LIMIT: i64 = 100;

/// GET /admin/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<DashboardSummary>> {
    ctx.caller.require_super_admin()?;

    let tenants = state.billing.tenants.list().await?;
    let users = state.users.list().await?;

    Ok(Json(summarize(
        &tenants,
        &users,
        &state.config.plan_prices,
        OffsetDateTime::now_utc(),
    )))
}

/// POST /admin/sweeps/expiry
pub async fn run_expiry_sweep(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<SweepReport>> {
    ctx.caller.require_super_admin()?;

    tracing::info!(admin_uid = %ctx.caller.uid, "Expiry sweep triggered on demand");
    let report = state.billing.sweeper.run(OffsetDateTime::now_utc()).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct CreateGiftCodeRequest {
    pub code: String,
}

/// POST /admin/gift-codes
pub async fn create_gift_code(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateGiftCodeRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let code = state
        .billing
        .transitions
        .create_gift_code(&ctx, &req.code, OffsetDateTime::now_utc())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "code": code }))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    pub limit: Option<i64>,
    pub target_id: Option<String>,
}

/// GET /admin/audit-log?limit=&targetId=
pub async fn audit_log(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<AuditLogQuery>,
) -> ApiResult<Json<Vec<AuditLogEntry>>> {
    ctx.caller.require_super_admin()?;

    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    if limit <= 0 {
        return Err(ApiError::Validation("limit: must be positive".to_string()));
    }

    let entries = state
        .billing
        .audit
        .recent(limit, query.target_id.as_deref())
        .await?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct InvariantQuery {
    pub check: Option<String>,
}

/// GET /admin/invariants[?check=name]
pub async fn check_invariants(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<InvariantQuery>,
) -> ApiResult<Json<Value>> {
    ctx.caller.require_super_admin()?;

    let now = OffsetDateTime::now_utc();
    match query.check {
        Some(name) => {
            if !InvariantChecker::available_checks().contains(&name.as_str()) {
                return Err(ApiError::Validation(format!(
                    "check: unknown invariant '{}'",
                    name
                )));
            }
            let violations = state.billing.invariants.run_check(&name, now).await?;
            Ok(Json(json!({
                "check": name,
                "passed": violations.is_empty(),
                "violations": violations,
            })))
        }
        None => {
            let summary = state.billing.invariants.run_all_checks(now).await?;
            Ok(Json(json!({
                "summary": summary,
                "availableChecks": InvariantChecker::available_checks(),
            })))
        }
    }
}
