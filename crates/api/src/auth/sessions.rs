//! Session authority
//!
//! Exchanges an identity-provider ID token for an opaque session token and
//! resolves that token back to a `Caller` on every request. Only the SHA-256
//! hash of a session token is persisted, so a leaked sessions table cannot be
//! replayed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, SameSite};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use storefront_billing::{action, target_type, AuditEvent, AuditLogger};
use storefront_shared::{Caller, RequestContext, Role};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

use crate::error::{ApiError, ApiResult};
use crate::users::UserStore;

pub const SESSION_COOKIE: &str = "session";

/// Stored session. `token_hash` is the only handle on the raw token.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SessionRecord {
    pub token_hash: String,
    pub uid: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl SessionRecord {
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &SessionRecord) -> ApiResult<()>;

    async fn get(&self, token_hash: &str) -> ApiResult<Option<SessionRecord>>;

    /// Returns true if the session was found and not already revoked
    async fn revoke(&self, token_hash: &str, at: OffsetDateTime) -> ApiResult<bool>;
}

// ============================================================================
// Stores
// ============================================================================

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &SessionRecord) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token_hash, uid, created_at, expires_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&session.token_hash)
        .bind(&session.uid)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, token_hash: &str) -> ApiResult<Option<SessionRecord>> {
        let session = sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT token_hash, uid, created_at, expires_at, revoked_at, ip_address, user_agent
            FROM sessions
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn revoke(&self, token_hash: &str, at: OffsetDateTime) -> ApiResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked_at = $2
            WHERE token_hash = $1
              AND revoked_at IS NULL
            "#,
        )
        .bind(token_hash)
        .bind(at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected > 0)
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<SessionRecord> {
        self.sessions.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &SessionRecord) -> ApiResult<()> {
        self.sessions
            .write()
            .await
            .insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, token_hash: &str) -> ApiResult<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(token_hash).cloned())
    }

    async fn revoke(&self, token_hash: &str, at: OffsetDateTime) -> ApiResult<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(token_hash) {
            Some(s) if s.revoked_at.is_none() => {
                s.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// Authority
// ============================================================================

/// Claims we read from the identity provider's ID token
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    exp: i64,
}

/// A freshly issued session. `token` is shown to the client once.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub caller: Caller,
    pub expires_at: OffsetDateTime,
}

/// Request metadata recorded on the session row and its audit entry
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct SessionAuthority {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    audit: AuditLogger,
    decoding_key: DecodingKey,
    ttl: Duration,
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

impl SessionAuthority {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        audit: AuditLogger,
        id_token_secret: &str,
        ttl_days: i64,
    ) -> Self {
        Self {
            sessions,
            users,
            audit,
            decoding_key: DecodingKey::from_secret(id_token_secret.as_bytes()),
            ttl: Duration::days(ttl_days),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Verify the bearer ID token and resolve its subject to a known user
    fn verify_id_token(&self, id_token: &str, now: OffsetDateTime) -> ApiResult<String> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the caller-supplied clock below
        validation.validate_exp = false;
        validation.validate_aud = false;

        let claims = decode::<IdTokenClaims>(id_token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "ID token rejected");
                ApiError::Unauthenticated
            })?
            .claims;

        if claims.exp <= now.unix_timestamp() {
            tracing::debug!(sub = %claims.sub, "ID token expired");
            return Err(ApiError::Unauthenticated);
        }
        Ok(claims.sub)
    }

    /// Exchange a bearer ID token for a new session
    pub async fn create(
        &self,
        id_token: &str,
        client: ClientInfo,
        now: OffsetDateTime,
    ) -> ApiResult<IssuedSession> {
        let uid = self.verify_id_token(id_token, now)?;

        let user = self.users.get(&uid).await?.ok_or_else(|| {
            tracing::warn!(uid = %uid, "ID token for unknown user");
            ApiError::Unauthenticated
        })?;
        if !user.is_active {
            tracing::warn!(uid = %uid, "Session refused for inactive user");
            return Err(ApiError::Unauthorized);
        }

        let token = generate_token();
        let expires_at = now + self.ttl;
        self.sessions
            .insert(&SessionRecord {
                token_hash: hash_token(&token),
                uid: user.uid.clone(),
                created_at: now,
                expires_at,
                revoked_at: None,
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
            })
            .await?;

        let caller = Caller {
            uid: user.uid,
            email: user.email,
            role: user.role,
            is_active: user.is_active,
        };

        tracing::info!(uid = %caller.uid, role = %caller.role, "Session created");

        if caller.role == Role::SuperAdmin {
            let ctx = RequestContext {
                caller: caller.clone(),
                ip_address: client.ip_address,
                user_agent: client.user_agent,
            };
            self.audit
                .record(
                    &ctx,
                    AuditEvent::new(action::SUPER_ADMIN_LOGIN, target_type::SESSION, &caller.uid)
                        .details(serde_json::json!({ "expires_at": expires_at.to_string() })),
                    now,
                )
                .await;
        }

        Ok(IssuedSession {
            token,
            caller,
            expires_at,
        })
    }

    /// Resolve a session token to the caller's current identity and role
    pub async fn resolve(&self, token: &str, now: OffsetDateTime) -> ApiResult<Caller> {
        let session = self
            .sessions
            .get(&hash_token(token))
            .await?
            .filter(|s| s.is_live(now))
            .ok_or(ApiError::Unauthenticated)?;

        // Role and active flag are read fresh so demotions apply immediately
        let user = self
            .users
            .get(&session.uid)
            .await?
            .ok_or(ApiError::Unauthenticated)?;

        Ok(Caller {
            uid: user.uid,
            email: user.email,
            role: user.role,
            is_active: user.is_active,
        })
    }

    /// Revoke the session behind `token`
    pub async fn destroy(
        &self,
        token: &str,
        client: ClientInfo,
        now: OffsetDateTime,
    ) -> ApiResult<()> {
        let caller = self.resolve(token, now).await?;
        if !self.sessions.revoke(&hash_token(token), now).await? {
            return Err(ApiError::Unauthenticated);
        }

        tracing::info!(uid = %caller.uid, "Session destroyed");

        if caller.role == Role::SuperAdmin {
            let ctx = RequestContext {
                caller: caller.clone(),
                ip_address: client.ip_address,
                user_agent: client.user_agent,
            };
            self.audit
                .record(
                    &ctx,
                    AuditEvent::new(action::SUPER_ADMIN_LOGOUT, target_type::SESSION, &caller.uid),
                    now,
                )
                .await;
        }
        Ok(())
    }
}

/// `Set-Cookie` for a new session
pub fn session_cookie(token: String, ttl: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(ttl)
        .build()
}

/// `Set-Cookie` that clears the session cookie
pub fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_stable_hex() {
        let h = hash_token("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_token("abc"));
        assert_ne!(h, hash_token("abd"));
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let header = session_cookie("tok".to_string(), Duration::days(7), true).to_string();
        assert!(header.starts_with("session=tok"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Secure"));
        assert!(header.contains("SameSite=Lax"));
        assert!(header.contains("Path=/"));
        assert!(header.contains("Max-Age=604800"));
    }

    #[test]
    fn test_clear_cookie_expires_immediately() {
        let header = clear_session_cookie(true).to_string();
        assert!(header.starts_with("session="));
        assert!(header.contains("Max-Age=0"));
    }
}
