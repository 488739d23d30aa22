//! Common types used across the storefront platform

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Tenant (store) ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Subscription lifecycle status. Exactly one applies at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Expired,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" | "cancelled" => Ok(SubscriptionStatus::Canceled),
            "expired" => Ok(SubscriptionStatus::Expired),
            "paused" => Ok(SubscriptionStatus::Paused),
            other => Err(format!("Unknown subscription status '{}'", other)),
        }
    }
}

/// Subscription fields embedded in the tenant record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSubscription {
    pub status: SubscriptionStatus,
    /// Set once when the subscription object is first created, copied forward on every write
    #[serde(with = "time::serde::rfc3339")]
    pub trial_ends_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_end_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_billing_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_payment_date: Option<OffsetDateTime>,
}

impl TenantSubscription {
    /// Fresh trial subscription
    pub fn trial(trial_ends_at: OffsetDateTime) -> Self {
        Self {
            status: SubscriptionStatus::Trialing,
            trial_ends_at,
            subscription_end_date: None,
            next_billing_date: None,
            last_payment_date: None,
        }
    }
}

// =============================================================================
// Tenant
// =============================================================================

/// Public store profile fields editable through the allow-listed patch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreProfile {
    pub name: String,
    pub description: Option<String>,
    pub contact_phone: Option<String>,
    pub logo_url: Option<String>,
}

/// Operator-only record attached to each tenant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalRecord {
    pub is_clone: bool,
    pub is_suspicious: bool,
    pub notes: Option<String>,
    pub tags: Vec<String>,
}

/// A store account whose access is gated by the entitlement engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: TenantId,
    pub owner_uid: String,
    pub profile: StoreProfile,
    /// Revenue reporting only, never consulted for access control
    pub plan: Option<String>,
    pub payment_status: Option<String>,
    /// None for legacy tenants that never received a subscription object
    pub subscription: Option<TenantSubscription>,
    pub gift_card_active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub gift_card_activated_at: Option<OffsetDateTime>,
    /// Soft-delete marker
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    pub internal: InternalRecord,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Bumped on every write; used as the compare-and-swap token
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Tenant {
    /// New tenant starting a trial of `trial_days`
    pub fn new_trial(
        owner_uid: impl Into<String>,
        name: impl Into<String>,
        plan: Option<String>,
        trial_days: i64,
        now: OffsetDateTime,
    ) -> Self {
        let now = storage_timestamp(now);
        Self {
            id: TenantId::new(),
            owner_uid: owner_uid.into(),
            profile: StoreProfile {
                name: name.into(),
                ..StoreProfile::default()
            },
            plan,
            payment_status: None,
            subscription: Some(TenantSubscription::trial(
                now + time::Duration::days(trial_days),
            )),
            gift_card_active: false,
            gift_card_activated_at: None,
            deleted_at: None,
            internal: InternalRecord::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Truncate to microseconds so timestamps survive a Postgres round trip and
/// stay comparable as concurrency tokens.
pub fn storage_timestamp(at: OffsetDateTime) -> OffsetDateTime {
    let micros = at.nanosecond() / 1_000 * 1_000;
    at.replace_nanosecond(micros).unwrap_or(at)
}

// =============================================================================
// Users
// =============================================================================

/// Platform user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub email: String,
    pub role: crate::identity::Role,
    pub is_active: bool,
    pub is_hidden: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Audit
// =============================================================================

/// Append-only audit record. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    /// Actor email
    pub performed_by: String,
    pub performed_by_uid: String,
    pub target_type: String,
    pub target_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
