//! Session create / destroy

use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use storefront_shared::Role;
use time::OffsetDateTime;

use crate::auth::middleware::{client_info, extract_bearer_token, extract_session_token};
use crate::auth::{clear_session_cookie, session_cookie};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub uid: String,
    pub email: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// POST /sessions with `Authorization: Bearer <id token>`
pub async fn create_session(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, CookieJar, Json<SessionResponse>)> {
    let id_token = extract_bearer_token(&headers).ok_or(ApiError::Unauthenticated)?;

    let issued = state
        .sessions
        .create(&id_token, client_info(&headers), OffsetDateTime::now_utc())
        .await?;

    let jar = jar.add(session_cookie(
        issued.token,
        state.sessions.ttl(),
        state.config.cookie_secure,
    ));

    Ok((
        StatusCode::CREATED,
        jar,
        Json(SessionResponse {
            uid: issued.caller.uid,
            email: issued.caller.email,
            role: issued.caller.role,
            expires_at: issued.expires_at,
        }),
    ))
}

/// DELETE /sessions
pub async fn destroy_session(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, CookieJar)> {
    let token = extract_session_token(&headers).ok_or(ApiError::Unauthenticated)?;

    state
        .sessions
        .destroy(&token, client_info(&headers), OffsetDateTime::now_utc())
        .await?;

    Ok((
        StatusCode::NO_CONTENT,
        jar.add(clear_session_cookie(state.config.cookie_secure)),
    ))
}
