//! HTTP routes

pub mod admin;
pub mod gift_codes;
pub mod payments;
pub mod sessions;
pub mod tenants;


use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::auth::{optional_session, require_session};
use crate::state::AppState;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/tenants", post(tenants::create_tenant))
        .route(
            "/tenants/{id}",
            get(tenants::get_tenant).patch(tenants::override_tenant),
        )
        .route("/tenants/{id}/entitlement", get(tenants::get_entitlement))
        .route("/tenants/{id}/gift-code", post(tenants::redeem_gift_code))
        .route("/tenants/{id}/checkout", post(tenants::create_checkout))
        .route("/gift-codes/validate", post(gift_codes::validate_gift_code))
        .route("/admin/dashboard", get(admin::dashboard))
        .route("/admin/sweeps/expiry", post(admin::run_expiry_sweep))
        .route("/admin/gift-codes", post(admin::create_gift_code))
        .route("/admin/audit-log", get(admin::audit_log))
        .route("/admin/invariants", get(admin::check_invariants))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    let payment_return = Router::new()
        .route("/payments/return", get(payments::payment_return))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            optional_session,
        ));

    Router::new()
        .route("/health", get(health))
        .route(
            "/sessions",
            post(sessions::create_session).delete(sessions::destroy_session),
        )
        .merge(protected)
        .merge(payment_return)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
