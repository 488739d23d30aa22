//! Postgres implementations of the storage ports

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use storefront_shared::{
    AuditLogEntry, InternalRecord, StoreProfile, SubscriptionStatus, Tenant, TenantId,
    TenantSubscription,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::{
    normalize_gift_code, AuditSink, ClaimOutcome, GiftCodeStore, LedgerState, PaymentLedger,
    TenantStore,
};

const TENANT_COLUMNS: &str = r#"
    t.id, t.owner_uid, t.name, t.description, t.contact_phone, t.logo_url,
    t.plan, t.payment_status, t.subscription_status, t.trial_ends_at,
    t.subscription_end_date, t.next_billing_date, t.last_payment_date,
    t.gift_card_active, t.gift_card_activated_at, t.deleted_at,
    t.created_at, t.updated_at,
    COALESCE(i.is_clone, false) AS is_clone,
    COALESCE(i.is_suspicious, false) AS is_suspicious,
    i.notes,
    COALESCE(i.tags, '{}') AS tags
"#;

/// Row type for the tenants + tenant_internal join
#[derive(Debug, FromRow)]
struct TenantRow {
    id: Uuid,
    owner_uid: String,
    name: String,
    description: Option<String>,
    contact_phone: Option<String>,
    logo_url: Option<String>,
    plan: Option<String>,
    payment_status: Option<String>,
    subscription_status: Option<String>,
    trial_ends_at: Option<OffsetDateTime>,
    subscription_end_date: Option<OffsetDateTime>,
    next_billing_date: Option<OffsetDateTime>,
    last_payment_date: Option<OffsetDateTime>,
    gift_card_active: bool,
    gift_card_activated_at: Option<OffsetDateTime>,
    deleted_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    is_clone: bool,
    is_suspicious: bool,
    notes: Option<String>,
    tags: Vec<String>,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = BillingError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        let subscription = match row.subscription_status {
            None => None,
            Some(status) => {
                let status: SubscriptionStatus =
                    status.parse().map_err(BillingError::Persistence)?;
                let trial_ends_at = row.trial_ends_at.ok_or_else(|| {
                    BillingError::Persistence(format!(
                        "Tenant {} has a subscription without trial_ends_at",
                        row.id
                    ))
                })?;
                Some(TenantSubscription {
                    status,
                    trial_ends_at,
                    subscription_end_date: row.subscription_end_date,
                    next_billing_date: row.next_billing_date,
                    last_payment_date: row.last_payment_date,
                })
            }
        };

        Ok(Tenant {
            id: TenantId(row.id),
            owner_uid: row.owner_uid,
            profile: StoreProfile {
                name: row.name,
                description: row.description,
                contact_phone: row.contact_phone,
                logo_url: row.logo_url,
            },
            plan: row.plan,
            payment_status: row.payment_status,
            subscription,
            gift_card_active: row.gift_card_active,
            gift_card_activated_at: row.gift_card_activated_at,
            deleted_at: row.deleted_at,
            internal: InternalRecord {
                is_clone: row.is_clone,
                is_suspicious: row.is_suspicious,
                notes: row.notes,
                tags: row.tags,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// PgTenantStore
// ============================================================================

#[derive(Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_internal<'e, E>(executor: E, tenant: &Tenant) -> BillingResult<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO tenant_internal (tenant_id, is_clone, is_suspicious, notes, tags)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id) DO UPDATE SET
                is_clone = EXCLUDED.is_clone,
                is_suspicious = EXCLUDED.is_suspicious,
                notes = EXCLUDED.notes,
                tags = EXCLUDED.tags
            "#,
        )
        .bind(tenant.id.0)
        .bind(tenant.internal.is_clone)
        .bind(tenant.internal.is_suspicious)
        .bind(&tenant.internal.notes)
        .bind(&tenant.internal.tags)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn insert(&self, tenant: &Tenant) -> BillingResult<()> {
        let sub = tenant.subscription.as_ref();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tenants (
                id, owner_uid, name, description, contact_phone, logo_url,
                plan, payment_status, subscription_status, trial_ends_at,
                subscription_end_date, next_billing_date, last_payment_date,
                gift_card_active, gift_card_activated_at, deleted_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(tenant.id.0)
        .bind(&tenant.owner_uid)
        .bind(&tenant.profile.name)
        .bind(&tenant.profile.description)
        .bind(&tenant.profile.contact_phone)
        .bind(&tenant.profile.logo_url)
        .bind(&tenant.plan)
        .bind(&tenant.payment_status)
        .bind(sub.map(|s| s.status.as_str()))
        .bind(sub.map(|s| s.trial_ends_at))
        .bind(sub.and_then(|s| s.subscription_end_date))
        .bind(sub.and_then(|s| s.next_billing_date))
        .bind(sub.and_then(|s| s.last_payment_date))
        .bind(tenant.gift_card_active)
        .bind(tenant.gift_card_activated_at)
        .bind(tenant.deleted_at)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&mut *tx)
        .await?;

        Self::upsert_internal(&mut *tx, tenant).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: TenantId) -> BillingResult<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tenants t LEFT JOIN tenant_internal i ON i.tenant_id = t.id WHERE t.id = $1",
            TENANT_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Tenant::try_from).transpose()
    }

    async fn list(&self) -> BillingResult<Vec<Tenant>> {
        let rows: Vec<TenantRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tenants t LEFT JOIN tenant_internal i ON i.tenant_id = t.id ORDER BY t.created_at",
            TENANT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Tenant::try_from).collect()
    }

    async fn list_by_status(&self, status: SubscriptionStatus) -> BillingResult<Vec<Tenant>> {
        let rows: Vec<TenantRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tenants t LEFT JOIN tenant_internal i ON i.tenant_id = t.id \
             WHERE t.subscription_status = $1 ORDER BY t.created_at",
            TENANT_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Tenant::try_from).collect()
    }

    async fn replace_if_unchanged(
        &self,
        tenant: &Tenant,
        expected_updated_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let sub = tenant.subscription.as_ref();
        let mut tx = self.pool.begin().await?;

        // trial_ends_at is only written when it was still NULL
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET name = $3,
                description = $4,
                contact_phone = $5,
                logo_url = $6,
                plan = $7,
                payment_status = $8,
                subscription_status = $9,
                trial_ends_at = COALESCE(trial_ends_at, $10),
                subscription_end_date = $11,
                next_billing_date = $12,
                last_payment_date = $13,
                gift_card_active = $14,
                gift_card_activated_at = $15,
                deleted_at = $16,
                updated_at = $17
            WHERE id = $1 AND updated_at = $2
            "#,
        )
        .bind(tenant.id.0)
        .bind(expected_updated_at)
        .bind(&tenant.profile.name)
        .bind(&tenant.profile.description)
        .bind(&tenant.profile.contact_phone)
        .bind(&tenant.profile.logo_url)
        .bind(&tenant.plan)
        .bind(&tenant.payment_status)
        .bind(sub.map(|s| s.status.as_str()))
        .bind(sub.map(|s| s.trial_ends_at))
        .bind(sub.and_then(|s| s.subscription_end_date))
        .bind(sub.and_then(|s| s.next_billing_date))
        .bind(sub.and_then(|s| s.last_payment_date))
        .bind(tenant.gift_card_active)
        .bind(tenant.gift_card_activated_at)
        .bind(tenant.deleted_at)
        .bind(tenant.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::upsert_internal(&mut *tx, tenant).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_if_unchanged(
        &self,
        id: TenantId,
        expected_updated_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        // tenant_internal rows go with ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM tenants WHERE id = $1 AND updated_at = $2")
            .bind(id.0)
            .bind(expected_updated_at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// PgPaymentLedger
// ============================================================================

#[derive(Clone)]
pub struct PgPaymentLedger {
    pool: PgPool,
}

impl PgPaymentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn months_column(months: u32) -> i32 {
    i32::try_from(months).unwrap_or(i32::MAX)
}

#[async_trait]
impl PaymentLedger for PgPaymentLedger {
    async fn issue(
        &self,
        idempotency_key: &str,
        tenant_id: TenantId,
        months: u32,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_ledger (idempotency_key, tenant_id, months, state, issued_at)
            VALUES ($1, $2, $3, 'issued', NOW())
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(idempotency_key)
        .bind(tenant_id.0)
        .bind(months_column(months))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::Conflict(format!(
                "Ledger key {} already issued",
                idempotency_key
            )));
        }
        Ok(())
    }

    async fn claim(
        &self,
        idempotency_key: &str,
        tenant_id: TenantId,
        months: u32,
    ) -> BillingResult<ClaimOutcome> {
        // Conditional UPDATE .. RETURNING: only one concurrent caller gets a row back,
        // and only for a key issued to this tenant for this many months.
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE payment_ledger
            SET state = 'processing',
                claimed_at = NOW(),
                error_message = NULL,
                completed_at = NULL
            WHERE idempotency_key = $1
              AND tenant_id = $2
              AND months = $3
              AND state IN ('issued', 'failed')
            RETURNING idempotency_key
            "#,
        )
        .bind(idempotency_key)
        .bind(tenant_id.0)
        .bind(months_column(months))
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(ClaimOutcome::Claimed);
        }

        let existing: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT state FROM payment_ledger
            WHERE idempotency_key = $1 AND tenant_id = $2 AND months = $3
            "#,
        )
        .bind(idempotency_key)
        .bind(tenant_id.0)
        .bind(months_column(months))
        .fetch_optional(&self.pool)
        .await?;

        match existing.map(|(s,)| s.parse::<LedgerState>()) {
            Some(Ok(LedgerState::Applied)) => Ok(ClaimOutcome::AlreadyApplied),
            Some(Ok(LedgerState::Processing)) => Ok(ClaimOutcome::InProgress),
            // Lost a race with a claim that has since failed; the caller may retry
            Some(Ok(LedgerState::Issued | LedgerState::Failed)) => Err(BillingError::Conflict(
                format!("Ledger key {} changed during claim", idempotency_key),
            )),
            Some(Err(e)) => Err(BillingError::Persistence(e)),
            None => Ok(ClaimOutcome::Unrecognized),
        }
    }

    async fn mark_applied(&self, idempotency_key: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_ledger
            SET state = 'applied', completed_at = NOW()
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, idempotency_key: &str, error: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_ledger
            SET state = 'failed', error_message = $2, completed_at = NOW()
            WHERE idempotency_key = $1 AND state = 'processing'
            "#,
        )
        .bind(idempotency_key)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============================================================================
// PgGiftCodeStore
// ============================================================================

#[derive(Clone)]
pub struct PgGiftCodeStore {
    pool: PgPool,
}

impl PgGiftCodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GiftCodeStore for PgGiftCodeStore {
    async fn is_redeemable(&self, code: &str) -> BillingResult<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT TRUE FROM gift_codes WHERE code = $1 AND redeemed_at IS NULL",
        )
        .bind(normalize_gift_code(code))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn insert_code(&self, code: &str) -> BillingResult<bool> {
        let result = sqlx::query(
            "INSERT INTO gift_codes (code) VALUES ($1) ON CONFLICT (code) DO NOTHING",
        )
        .bind(normalize_gift_code(code))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn redeem(
        &self,
        code: &str,
        tenant_id: TenantId,
        at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE gift_codes
            SET redeemed_by_tenant = $2, redeemed_at = $3
            WHERE code = $1 AND redeemed_at IS NULL
            "#,
        )
        .bind(normalize_gift_code(code))
        .bind(tenant_id.0)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, code: &str, tenant_id: TenantId) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE gift_codes
            SET redeemed_by_tenant = NULL, redeemed_at = NULL
            WHERE code = $1 AND redeemed_by_tenant = $2
            "#,
        )
        .bind(normalize_gift_code(code))
        .bind(tenant_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============================================================================
// PgAuditSink
// ============================================================================

#[derive(Debug, FromRow)]
struct AuditRow {
    id: Uuid,
    action: String,
    performed_by: String,
    performed_by_uid: String,
    target_type: String,
    target_id: String,
    timestamp: OffsetDateTime,
    details: serde_json::Value,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl From<AuditRow> for AuditLogEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            action: row.action,
            performed_by: row.performed_by,
            performed_by_uid: row.performed_by_uid,
            target_type: row.target_type,
            target_id: row.target_id,
            timestamp: row.timestamp,
            details: row.details,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
        }
    }
}

#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, action, performed_by, performed_by_uid, target_type,
                target_id, timestamp, details, ip_address, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(&entry.action)
        .bind(&entry.performed_by)
        .bind(&entry.performed_by_uid)
        .bind(&entry.target_type)
        .bind(&entry.target_id)
        .bind(entry.timestamp)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_recent(
        &self,
        limit: i64,
        target_id: Option<&str>,
    ) -> BillingResult<Vec<AuditLogEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, action, performed_by, performed_by_uid, target_type,
                   target_id, timestamp, details, ip_address, user_agent
            FROM audit_log
            WHERE ($2::TEXT IS NULL OR target_id = $2)
            ORDER BY timestamp DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditLogEntry::from).collect())
    }
}
