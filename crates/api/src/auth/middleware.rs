//! Session middleware for Axum

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use storefront_shared::RequestContext;
use time::OffsetDateTime;

use super::sessions::{ClientInfo, SESSION_COOKIE};
use crate::error::ApiError;
use crate::state::AppState;

/// Request extension set by `optional_session`
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<RequestContext>);

/// Session token from the HttpOnly cookie, or `Authorization: Session <token>`
/// for non-browser clients
pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = CookieJar::from_headers(headers).get(SESSION_COOKIE) {
        let value = cookie.value().trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Session "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Identity-provider ID token from `Authorization: Bearer <token>`
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Extract client IP address from request headers
pub(crate) fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    // X-Forwarded-For may carry a chain; the first hop is the client
    if let Some(xff) = headers.get("X-Forwarded-For") {
        if let Ok(xff_str) = xff.to_str() {
            return xff_str.split(',').next().map(|s| s.trim().to_string());
        }
    }
    if let Some(cf_ip) = headers.get("CF-Connecting-IP") {
        if let Ok(ip) = cf_ip.to_str() {
            return Some(ip.to_string());
        }
    }
    if let Some(real_ip) = headers.get("X-Real-IP") {
        if let Ok(ip) = real_ip.to_str() {
            return Some(ip.to_string());
        }
    }
    None
}

pub(crate) fn client_info(headers: &HeaderMap) -> ClientInfo {
    ClientInfo {
        ip_address: extract_ip_address(headers),
        user_agent: headers
            .get("User-Agent")
            .and_then(|h| h.to_str().ok())
            .map(String::from),
    }
}

async fn resolve_context(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<RequestContext, ApiError> {
    let token = extract_session_token(headers).ok_or(ApiError::Unauthenticated)?;
    let caller = state
        .sessions
        .resolve(&token, OffsetDateTime::now_utc())
        .await?;
    let client = client_info(headers);

    Ok(RequestContext {
        caller,
        ip_address: client.ip_address,
        user_agent: client.user_agent,
    })
}

/// Middleware that requires a live session
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve_context(&state, request.headers()).await {
        Ok(ctx) => {
            tracing::debug!(
                uid = %ctx.caller.uid,
                role = %ctx.caller.role,
                path = %request.uri().path(),
                "Session resolved"
            );
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(path = %request.uri().path(), error = %e, "Session required");
            e.into_response()
        }
    }
}

/// Middleware that resolves a session if one is present. Invalid or missing
/// sessions yield `MaybeSession(None)`; the handler decides what that means.
pub async fn optional_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = match resolve_context(&state, request.headers()).await {
        Ok(ctx) => Some(ctx),
        Err(ApiError::Unauthenticated) => None,
        Err(e) => return e.into_response(),
    };
    request.extensions_mut().insert(MaybeSession(ctx));
    next.run(request).await
}
