//! In-process fixtures shared by the API test modules

use std::sync::Arc;

use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use storefront_billing::{
    BillingService, InMemoryAuditSink, InMemoryGiftCodeStore, InMemoryPaymentLedger,
    InMemoryTenantStore, PaymentProvider,
};
use storefront_shared::{Role, User};
use time::{Duration, OffsetDateTime};

use crate::auth::{ClientInfo, InMemorySessionStore};
use crate::config::Config;
use crate::state::AppState;
use crate::users::InMemoryUserStore;

pub const SECRET: &str = "test-id-token-secret";
pub const ADMIN: &str = "admin-1";
pub const OWNER: &str = "owner-1";
pub const OTHER_OWNER: &str = "owner-2";
pub const INACTIVE: &str = "inactive-1";

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    email: &'a str,
    exp: i64,
}

pub fn id_token_with(secret: &str, uid: &str, exp: OffsetDateTime) -> String {
    encode(
        &Header::default(),
        &Claims {
            sub: uid,
            email: "someone@example.com",
            exp: exp.unix_timestamp(),
        },
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("encode id token")
}

pub fn id_token(uid: &str, now: OffsetDateTime) -> String {
    id_token_with(SECRET, uid, now + Duration::hours(1))
}

pub fn user(uid: &str, role: Role, is_active: bool, created_at: OffsetDateTime) -> User {
    User {
        uid: uid.to_string(),
        email: format!("{}@example.com", uid),
        role,
        is_active,
        is_hidden: false,
        created_at,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub users: Arc<InMemoryUserStore>,
    pub sessions: Arc<InMemorySessionStore>,
    pub tenants: Arc<InMemoryTenantStore>,
    pub ledger: Arc<InMemoryPaymentLedger>,
    pub audit: Arc<InMemoryAuditSink>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_provider(None)
    }

    pub fn with_provider(payments: Option<Arc<dyn PaymentProvider>>) -> Self {
        let created = OffsetDateTime::now_utc() - Duration::days(90);
        let users = Arc::new(InMemoryUserStore::with_users([
            user(ADMIN, Role::SuperAdmin, true, created),
            user(OWNER, Role::StoreOwner, true, created),
            user(OTHER_OWNER, Role::StoreOwner, true, created),
            user(INACTIVE, Role::StoreOwner, false, created),
        ]));
        let sessions = Arc::new(InMemorySessionStore::new());
        let tenants = Arc::new(InMemoryTenantStore::new());
        let ledger = Arc::new(InMemoryPaymentLedger::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let gift_codes = Arc::new(InMemoryGiftCodeStore::with_codes(["WELCOME-2026"]));

        let billing = BillingService::new(
            tenants.clone(),
            ledger.clone(),
            gift_codes,
            audit.clone(),
            7,
        );

        let state = AppState::from_parts(
            Config::local(SECRET),
            billing,
            users.clone(),
            sessions.clone(),
            payments,
        );

        Self {
            state,
            users,
            sessions,
            tenants,
            ledger,
            audit,
        }
    }

    /// Issue a session for `uid` and return the raw token
    pub async fn login(&self, uid: &str) -> String {
        let now = OffsetDateTime::now_utc();
        self.state
            .sessions
            .create(&id_token(uid, now), ClientInfo::default(), now)
            .await
            .expect("login")
            .token
    }
}
