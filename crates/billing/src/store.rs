//! Storage ports
//!
//! Every service in this crate talks to persistence through these traits.
//! `postgres` provides the production adapters, `memory` the in-process ones
//! used by tests and local development.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storefront_shared::{AuditLogEntry, SubscriptionStatus, Tenant, TenantId};
use time::OffsetDateTime;

use crate::error::BillingResult;

/// Tenant records, written with compare-and-swap on `updated_at`
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn insert(&self, tenant: &Tenant) -> BillingResult<()>;

    async fn get(&self, id: TenantId) -> BillingResult<Option<Tenant>>;

    async fn list(&self) -> BillingResult<Vec<Tenant>>;

    async fn list_by_status(&self, status: SubscriptionStatus) -> BillingResult<Vec<Tenant>>;

    /// Write `tenant` (including its internal record) only if the stored
    /// `updated_at` still equals `expected_updated_at`. Returns false when the
    /// record changed or disappeared in between.
    async fn replace_if_unchanged(
        &self,
        tenant: &Tenant,
        expected_updated_at: OffsetDateTime,
    ) -> BillingResult<bool>;

    /// Remove the tenant and its internal record, guarded the same way
    async fn delete_if_unchanged(
        &self,
        id: TenantId,
        expected_updated_at: OffsetDateTime,
    ) -> BillingResult<bool>;
}

/// Result of trying to claim an idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Caller holds exclusive processing rights
    Claimed,
    /// The payment was already credited
    AlreadyApplied,
    /// Another request is crediting it right now
    InProgress,
    /// No checkout issued this key for that tenant and quantity
    Unrecognized,
}

/// Ledger state of a single idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    Issued,
    Processing,
    Applied,
    Failed,
}

impl LedgerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerState::Issued => "issued",
            LedgerState::Processing => "processing",
            LedgerState::Applied => "applied",
            LedgerState::Failed => "failed",
        }
    }
}

impl std::str::FromStr for LedgerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issued" => Ok(LedgerState::Issued),
            "processing" => Ok(LedgerState::Processing),
            "applied" => Ok(LedgerState::Applied),
            "failed" => Ok(LedgerState::Failed),
            other => Err(format!("Unknown ledger state '{}'", other)),
        }
    }
}

/// Durable record of payment idempotency keys.
///
/// Keys are issued at checkout, bound to one tenant and month count. Only an
/// `issued` or `failed` key with matching tenant and months can be claimed.
/// A key stuck in `processing` is never reclaimed automatically since the
/// credit may already have been written.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Record a key handed out with a checkout. Fails with `Conflict` if the
    /// key already exists.
    async fn issue(
        &self,
        idempotency_key: &str,
        tenant_id: TenantId,
        months: u32,
    ) -> BillingResult<()>;

    async fn claim(
        &self,
        idempotency_key: &str,
        tenant_id: TenantId,
        months: u32,
    ) -> BillingResult<ClaimOutcome>;

    async fn mark_applied(&self, idempotency_key: &str) -> BillingResult<()>;

    async fn mark_failed(&self, idempotency_key: &str, error: &str) -> BillingResult<()>;
}

/// Single-use promotional codes
#[async_trait]
pub trait GiftCodeStore: Send + Sync {
    /// True iff the code exists and has not been redeemed
    async fn is_redeemable(&self, code: &str) -> BillingResult<bool>;

    /// Add a new unredeemed code. False if the code already exists.
    async fn insert_code(&self, code: &str) -> BillingResult<bool>;

    /// Atomically consume the code. False if missing or already used.
    async fn redeem(&self, code: &str, tenant_id: TenantId, at: OffsetDateTime)
        -> BillingResult<bool>;

    /// Undo a redemption whose tenant write failed
    async fn release(&self, code: &str, tenant_id: TenantId) -> BillingResult<()>;
}

/// Append-only audit storage
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> BillingResult<()>;

    /// Newest first
    async fn list_recent(
        &self,
        limit: i64,
        target_id: Option<&str>,
    ) -> BillingResult<Vec<AuditLogEntry>>;
}

/// Trim and upper-case a gift code so lookups are case-insensitive
pub fn normalize_gift_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_gift_code() {
        assert_eq!(normalize_gift_code("  promo-2026 "), "PROMO-2026");
    }

    #[test]
    fn test_ledger_state_parse() {
        assert_eq!("applied".parse::<LedgerState>(), Ok(LedgerState::Applied));
        assert_eq!("issued".parse::<LedgerState>(), Ok(LedgerState::Issued));
        assert!("done".parse::<LedgerState>().is_err());
    }
}
