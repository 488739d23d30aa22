//! Tenant routes: creation, reads, privileged overrides, gift codes, checkout

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use storefront_billing::{evaluate, AdminAction, CheckoutSession, Entitlement};
use storefront_shared::{
    Caller, InternalRecord, RequestContext, StoreProfile, Tenant, TenantId, TenantSubscription,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Tenant as returned over HTTP. `internal` is only present for super admins.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantResponse {
    pub id: TenantId,
    pub owner_uid: String,
    pub profile: StoreProfile,
    pub plan: Option<String>,
    pub payment_status: Option<String>,
    pub subscription: Option<TenantSubscription>,
    pub gift_card_active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub gift_card_activated_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal: Option<InternalRecord>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TenantResponse {
    fn for_caller(tenant: Tenant, caller: &Caller) -> Self {
        Self {
            id: tenant.id,
            owner_uid: tenant.owner_uid,
            profile: tenant.profile,
            plan: tenant.plan,
            payment_status: tenant.payment_status,
            subscription: tenant.subscription,
            gift_card_active: tenant.gift_card_active,
            gift_card_activated_at: tenant.gift_card_activated_at,
            deleted_at: tenant.deleted_at,
            internal: caller.is_super_admin().then_some(tenant.internal),
            created_at: tenant.created_at,
            updated_at: tenant.updated_at,
        }
    }
}

/// Tenant plus its entitlement at response time
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantView {
    pub tenant: TenantResponse,
    pub entitlement: Entitlement,
    /// Lockout message when inactive
    pub message: Option<&'static str>,
}

impl TenantView {
    fn at(tenant: Tenant, caller: &Caller, now: OffsetDateTime) -> Self {
        let entitlement = evaluate(&tenant, now);
        let message = entitlement.reason.map(|r| r.message());
        Self {
            tenant: TenantResponse::for_caller(tenant, caller),
            entitlement,
            message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub plan: Option<String>,
}

/// POST /tenants
pub async fn create_tenant(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateTenantRequest>,
) -> ApiResult<(StatusCode, Json<TenantView>)> {
    let now = OffsetDateTime::now_utc();
    let tenant = state
        .billing
        .transitions
        .create_tenant(&ctx.caller, &req.name, req.plan, now)
        .await?;
    Ok((StatusCode::CREATED, Json(TenantView::at(tenant, &ctx.caller, now))))
}

/// GET /tenants/{id}
pub async fn get_tenant(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TenantView>> {
    let tenant = state
        .billing
        .transitions
        .tenant_for(&ctx.caller, TenantId(id))
        .await?;
    Ok(Json(TenantView::at(
        tenant,
        &ctx.caller,
        OffsetDateTime::now_utc(),
    )))
}

/// GET /tenants/{id}/entitlement
pub async fn get_entitlement(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let tenant = state
        .billing
        .transitions
        .tenant_for(&ctx.caller, TenantId(id))
        .await?;
    let entitlement = evaluate(&tenant, OffsetDateTime::now_utc());
    Ok(Json(json!({
        "tenantId": tenant.id,
        "message": entitlement.reason.map(|r| r.message()),
        "entitlement": entitlement,
    })))
}

/// PATCH /tenants/{id} with `{ action, ...args }`. Super admin only.
pub async fn override_tenant(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    // Role first, so non-admins learn nothing from body validation
    ctx.caller.require_super_admin()?;

    let admin_action: AdminAction = serde_json::from_value(body)
        .map_err(|e| ApiError::Validation(format!("action: {}", e)))?;

    let now = OffsetDateTime::now_utc();
    let result = state
        .billing
        .transitions
        .apply_override(&ctx, TenantId(id), admin_action, now)
        .await?;

    Ok(Json(json!({
        "ok": true,
        "action": result.action,
        "tenantId": result.tenant_id,
        "audited": result.audited,
        "tenant": result.tenant.map(|t| TenantView::at(t, &ctx.caller, now)),
    })))
}

#[derive(Debug, Deserialize)]
pub struct GiftCodeRequest {
    pub code: String,
}

/// POST /tenants/{id}/gift-code
pub async fn redeem_gift_code(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<GiftCodeRequest>,
) -> ApiResult<Json<Value>> {
    if req.code.trim().is_empty() {
        return Err(ApiError::Validation("code: required".to_string()));
    }

    let now = OffsetDateTime::now_utc();
    let tenant = state
        .billing
        .transitions
        .gift_code_redeemed(&ctx, TenantId(id), &req.code, now)
        .await?;

    Ok(Json(json!({
        "ok": true,
        "tenant": TenantView::at(tenant, &ctx.caller, now),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub months: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    #[serde(flatten)]
    pub session: CheckoutSession,
    pub idempotency_key: String,
}

/// POST /tenants/{id}/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let provider = state
        .payments
        .clone()
        .ok_or_else(|| ApiError::Unavailable("Checkout is not configured".to_string()))?;

    // The key is recorded against this tenant and month count before the
    // customer leaves; the return redirect can only credit what was issued here.
    let idempotency_key = Uuid::new_v4().to_string();
    let tenant = state
        .billing
        .transitions
        .register_checkout(&ctx.caller, TenantId(id), req.months, &idempotency_key)
        .await?;
    let return_url = format!(
        "{}/payments/return?tenant={}&months={}&key={}",
        state.config.public_base_url.trim_end_matches('/'),
        tenant.id,
        req.months,
        idempotency_key
    );

    let session = provider
        .create_checkout(tenant.id, req.months, &idempotency_key, &return_url)
        .await?;

    tracing::info!(
        tenant_id = %tenant.id,
        months = req.months,
        checkout_id = %session.checkout_id,
        "Checkout created"
    );

    Ok(Json(CheckoutResponse {
        session,
        idempotency_key,
    }))
}
