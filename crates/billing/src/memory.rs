//! In-memory implementations of the storage ports.
//!
//! Used by the test suites and by `BillingService::new_in_memory()` for local
//! development without Postgres.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use storefront_shared::{AuditLogEntry, SubscriptionStatus, Tenant, TenantId};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{BillingError, BillingResult};
use crate::store::{
    normalize_gift_code, AuditSink, ClaimOutcome, GiftCodeStore, LedgerState, PaymentLedger,
    TenantStore,
};

// ============================================================================
// InMemoryTenantStore
// ============================================================================

#[derive(Default)]
pub struct InMemoryTenantStore {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
    /// Successful replace/delete calls
    writes: AtomicUsize,
    /// Number of upcoming replace calls to reject as if another writer won
    injected_conflicts: AtomicUsize,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `n` compare-and-swap writes fail
    pub fn inject_conflicts(&self, n: usize) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn insert(&self, tenant: &Tenant) -> BillingResult<()> {
        let mut tenants = self.tenants.write().await;
        if tenants.contains_key(&tenant.id) {
            return Err(BillingError::Validation(format!(
                "Tenant {} already exists",
                tenant.id
            )));
        }
        tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn get(&self, id: TenantId) -> BillingResult<Option<Tenant>> {
        Ok(self.tenants.read().await.get(&id).cloned())
    }

    async fn list(&self) -> BillingResult<Vec<Tenant>> {
        let mut all: Vec<Tenant> = self.tenants.read().await.values().cloned().collect();
        all.sort_by_key(|t| t.created_at);
        Ok(all)
    }

    async fn list_by_status(&self, status: SubscriptionStatus) -> BillingResult<Vec<Tenant>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.subscription.as_ref().map(|s| s.status) == Some(status))
            .collect())
    }

    async fn replace_if_unchanged(
        &self,
        tenant: &Tenant,
        expected_updated_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        if self.take_injected_conflict() {
            return Ok(false);
        }

        let mut tenants = self.tenants.write().await;
        match tenants.get_mut(&tenant.id) {
            Some(current) if current.updated_at == expected_updated_at => {
                *current = tenant.clone();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if_unchanged(
        &self,
        id: TenantId,
        expected_updated_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut tenants = self.tenants.write().await;
        match tenants.get(&id) {
            Some(current) if current.updated_at == expected_updated_at => {
                tenants.remove(&id);
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// InMemoryPaymentLedger
// ============================================================================

#[derive(Default)]
pub struct InMemoryPaymentLedger {
    entries: RwLock<HashMap<String, (TenantId, u32, LedgerState)>>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state_of(&self, idempotency_key: &str) -> Option<LedgerState> {
        self.entries
            .read()
            .await
            .get(idempotency_key)
            .map(|(_, _, state)| *state)
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn issue(
        &self,
        idempotency_key: &str,
        tenant_id: TenantId,
        months: u32,
    ) -> BillingResult<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(idempotency_key) {
            return Err(BillingError::Conflict(format!(
                "Ledger key {} already issued",
                idempotency_key
            )));
        }
        entries.insert(
            idempotency_key.to_string(),
            (tenant_id, months, LedgerState::Issued),
        );
        Ok(())
    }

    async fn claim(
        &self,
        idempotency_key: &str,
        tenant_id: TenantId,
        months: u32,
    ) -> BillingResult<ClaimOutcome> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(idempotency_key) else {
            return Ok(ClaimOutcome::Unrecognized);
        };
        if entry.0 != tenant_id || entry.1 != months {
            return Ok(ClaimOutcome::Unrecognized);
        }
        match entry.2 {
            LedgerState::Applied => Ok(ClaimOutcome::AlreadyApplied),
            LedgerState::Processing => Ok(ClaimOutcome::InProgress),
            LedgerState::Issued | LedgerState::Failed => {
                entry.2 = LedgerState::Processing;
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn mark_applied(&self, idempotency_key: &str) -> BillingResult<()> {
        set_state(&self.entries, idempotency_key, LedgerState::Applied).await
    }

    async fn mark_failed(&self, idempotency_key: &str, _error: &str) -> BillingResult<()> {
        set_state(&self.entries, idempotency_key, LedgerState::Failed).await
    }
}

async fn set_state(
    entries: &RwLock<HashMap<String, (TenantId, u32, LedgerState)>>,
    key: &str,
    state: LedgerState,
) -> BillingResult<()> {
    let mut entries = entries.write().await;
    let entry = entries
        .get_mut(key)
        .ok_or_else(|| BillingError::NotFound(format!("Ledger key {}", key)))?;
    entry.2 = state;
    Ok(())
}

// ============================================================================
// InMemoryGiftCodeStore
// ============================================================================

#[derive(Default)]
struct GiftCodes {
    available: HashSet<String>,
    redeemed: HashMap<String, TenantId>,
}

/// Both sets live under one lock so redeem and release stay atomic
#[derive(Default)]
pub struct InMemoryGiftCodeStore {
    codes: RwLock<GiftCodes>,
}

impl InMemoryGiftCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            codes: RwLock::new(GiftCodes {
                available: codes
                    .into_iter()
                    .map(|c| normalize_gift_code(c.as_ref()))
                    .collect(),
                redeemed: HashMap::new(),
            }),
        }
    }
}

#[async_trait]
impl GiftCodeStore for InMemoryGiftCodeStore {
    async fn is_redeemable(&self, code: &str) -> BillingResult<bool> {
        Ok(self
            .codes
            .read()
            .await
            .available
            .contains(&normalize_gift_code(code)))
    }

    async fn insert_code(&self, code: &str) -> BillingResult<bool> {
        let code = normalize_gift_code(code);
        let mut codes = self.codes.write().await;
        if codes.redeemed.contains_key(&code) {
            return Ok(false);
        }
        Ok(codes.available.insert(code))
    }

    async fn redeem(
        &self,
        code: &str,
        tenant_id: TenantId,
        _at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let code = normalize_gift_code(code);
        let mut codes = self.codes.write().await;
        if !codes.available.remove(&code) {
            return Ok(false);
        }
        codes.redeemed.insert(code, tenant_id);
        Ok(true)
    }

    async fn release(&self, code: &str, tenant_id: TenantId) -> BillingResult<()> {
        let code = normalize_gift_code(code);
        let mut codes = self.codes.write().await;
        if codes.redeemed.get(&code) == Some(&tenant_id) {
            codes.redeemed.remove(&code);
            codes.available.insert(code);
        }
        Ok(())
    }
}

// ============================================================================
// InMemoryAuditSink
// ============================================================================

#[derive(Default)]
pub struct InMemoryAuditSink {
    entries: RwLock<Vec<AuditLogEntry>>,
    fail_writes: AtomicBool,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail, to exercise the audit-loss path
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> BillingResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BillingError::Persistence(
                "audit sink unavailable".to_string(),
            ));
        }
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn list_recent(
        &self,
        limit: i64,
        target_id: Option<&str>,
    ) -> BillingResult<Vec<AuditLogEntry>> {
        let mut matching: Vec<AuditLogEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| target_id.is_none_or(|t| e.target_id == t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(usize::try_from(limit.max(0)).unwrap_or(0));
        Ok(matching)
    }
}
