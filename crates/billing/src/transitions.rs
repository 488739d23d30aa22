//! Subscription lifecycle transitions
//!
//! Every change to a tenant's subscription, gift override or internal flags
//! goes through `SubscriptionTransitionService`. Each mutating call:
//!
//! 1. checks the caller's authorization,
//! 2. reads the current record and computes the next state from it,
//! 3. writes it with compare-and-swap on `updated_at` (retrying on conflict),
//! 4. records exactly one audit entry.
//!
//! The state computations are plain functions (`apply_payment`,
//! `apply_admin_action`, `expire_trial`) so they can be tested without a store.

use std::sync::Arc;

use serde::Deserialize;
use storefront_shared::{
    storage_timestamp, Caller, RequestContext, SubscriptionStatus, Tenant, TenantId,
    TenantSubscription,
};
use time::{Duration, OffsetDateTime};

use crate::audit::{action, target_type, AuditEvent, AuditLogger};
use crate::error::{BillingError, BillingResult};
use crate::store::{normalize_gift_code, ClaimOutcome, GiftCodeStore, PaymentLedger, TenantStore};

/// A purchased "month" is a fixed 30 days
pub const BILLING_MONTH_DAYS: i64 = 30;

/// Upper bound for a single payment or extension
const MAX_MONTHS_PER_PAYMENT: u32 = 36;
const MAX_EXTEND_DAYS: i64 = 3650;

/// Compare-and-swap attempts before giving up with `Conflict`
const MAX_WRITE_ATTEMPTS: usize = 3;

const STORE_PATCH_KEYS: &[&str] = &["name", "description", "contactPhone", "logoUrl"];
const INTERNAL_PATCH_KEYS: &[&str] = &["notes", "tags"];

// ============================================================================
// Admin actions
// ============================================================================

/// Privileged override, as sent in the body of `PATCH /tenants/{id}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminAction {
    Pause,
    Reactivate,
    Extend {
        days: i64,
    },
    ForceRenewal,
    ChangePlan {
        plan: Option<String>,
        #[serde(default, alias = "paymentStatus")]
        payment_status: Option<String>,
    },
    SoftDelete,
    HardDelete,
    MarkClone {
        #[serde(default = "default_true")]
        value: bool,
    },
    MarkSuspicious {
        #[serde(default = "default_true")]
        value: bool,
    },
    Patch {
        #[serde(default)]
        store: Option<serde_json::Map<String, serde_json::Value>>,
        #[serde(default)]
        internal: Option<serde_json::Map<String, serde_json::Value>>,
    },
}

fn default_true() -> bool {
    true
}

impl AdminAction {
    pub fn name(&self) -> &'static str {
        match self {
            AdminAction::Pause => "pause",
            AdminAction::Reactivate => "reactivate",
            AdminAction::Extend { .. } => "extend",
            AdminAction::ForceRenewal => "force_renewal",
            AdminAction::ChangePlan { .. } => "change_plan",
            AdminAction::SoftDelete => "soft_delete",
            AdminAction::HardDelete => "hard_delete",
            AdminAction::MarkClone { .. } => "mark_clone",
            AdminAction::MarkSuspicious { .. } => "mark_suspicious",
            AdminAction::Patch { .. } => "patch",
        }
    }

    fn audit_action(&self) -> &'static str {
        match self {
            AdminAction::Pause => action::STORE_PAUSED,
            AdminAction::Reactivate => action::STORE_REACTIVATED,
            AdminAction::Extend { .. } => action::SUBSCRIPTION_EXTENDED,
            AdminAction::ForceRenewal => action::SUBSCRIPTION_FORCE_RENEWED,
            AdminAction::ChangePlan { .. } => action::PLAN_CHANGED,
            AdminAction::SoftDelete => action::STORE_SOFT_DELETED,
            AdminAction::HardDelete => action::STORE_HARD_DELETED,
            AdminAction::MarkClone { .. } => action::STORE_MARKED_CLONE,
            AdminAction::MarkSuspicious { .. } => action::STORE_MARKED_SUSPICIOUS,
            AdminAction::Patch { .. } => action::STORE_PATCHED,
        }
    }

    /// Argument checks that need no stored state
    pub fn validate(&self) -> BillingResult<()> {
        match self {
            AdminAction::Extend { days } => {
                if *days <= 0 {
                    return Err(BillingError::Validation(
                        "days: must be a positive number of days".to_string(),
                    ));
                }
                if *days > MAX_EXTEND_DAYS {
                    return Err(BillingError::Validation(format!(
                        "days: cannot extend by more than {} days at once",
                        MAX_EXTEND_DAYS
                    )));
                }
                Ok(())
            }
            AdminAction::ChangePlan { plan, .. } => match plan.as_deref().map(str::trim) {
                Some(p) if !p.is_empty() => Ok(()),
                _ => Err(BillingError::Validation("plan: a plan id is required".to_string())),
            },
            AdminAction::Patch { store, internal } => {
                let store_empty = store.as_ref().is_none_or(|m| m.is_empty());
                let internal_empty = internal.as_ref().is_none_or(|m| m.is_empty());
                if store_empty && internal_empty {
                    return Err(BillingError::Validation(
                        "patch: at least one store or internal field is required".to_string(),
                    ));
                }
                check_allowed_keys("store", store.as_ref(), STORE_PATCH_KEYS)?;
                check_allowed_keys("internal", internal.as_ref(), INTERNAL_PATCH_KEYS)
            }
            _ => Ok(()),
        }
    }

    fn details(&self) -> serde_json::Value {
        match self {
            AdminAction::Extend { days } => serde_json::json!({ "days": days }),
            AdminAction::ChangePlan {
                plan,
                payment_status,
            } => serde_json::json!({ "plan": plan, "payment_status": payment_status }),
            AdminAction::MarkClone { value } | AdminAction::MarkSuspicious { value } => {
                serde_json::json!({ "value": value })
            }
            AdminAction::Patch { store, internal } => {
                serde_json::json!({ "store": store, "internal": internal })
            }
            _ => serde_json::json!({}),
        }
    }
}

fn validate_months(months: u32) -> BillingResult<()> {
    if months == 0 || months > MAX_MONTHS_PER_PAYMENT {
        return Err(BillingError::Validation(format!(
            "months: must be between 1 and {}",
            MAX_MONTHS_PER_PAYMENT
        )));
    }
    Ok(())
}

fn check_allowed_keys(
    section: &str,
    fields: Option<&serde_json::Map<String, serde_json::Value>>,
    allowed: &[&str],
) -> BillingResult<()> {
    if let Some(fields) = fields {
        if let Some(key) = fields.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(BillingError::Validation(format!(
                "{}.{}: field cannot be patched",
                section, key
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Pure transitions
// ============================================================================

/// Next `updated_at`: the request time, but always strictly after the previous value
pub(crate) fn next_version(previous: OffsetDateTime, now: OffsetDateTime) -> OffsetDateTime {
    let now = storage_timestamp(now);
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Subscription to mutate. Legacy tenants get one materialised with the trial
/// already consumed (trial end = creation time), so no new trial is granted.
fn subscription_for_write(tenant: &Tenant) -> TenantSubscription {
    tenant.subscription.clone().unwrap_or(TenantSubscription {
        status: SubscriptionStatus::Active,
        trial_ends_at: tenant.created_at,
        subscription_end_date: None,
        next_billing_date: None,
        last_payment_date: None,
    })
}

fn later_of(a: OffsetDateTime, b: Option<OffsetDateTime>) -> OffsetDateTime {
    match b {
        Some(b) if b > a => b,
        _ => a,
    }
}

/// Credit `months` of paid time
pub fn apply_payment(tenant: &Tenant, months: u32, now: OffsetDateTime) -> Tenant {
    let mut next = tenant.clone();
    let mut sub = subscription_for_write(tenant);

    let base = later_of(now, sub.subscription_end_date);
    let end = base + Duration::days(i64::from(months) * BILLING_MONTH_DAYS);

    sub.status = SubscriptionStatus::Active;
    sub.subscription_end_date = Some(end);
    sub.next_billing_date = Some(end);
    sub.last_payment_date = Some(now);

    next.subscription = Some(sub);
    next.payment_status = Some("paid".to_string());
    next
}

/// Flip an elapsed trial to `expired`. None when nothing should change.
pub fn expire_trial(tenant: &Tenant, now: OffsetDateTime) -> Option<Tenant> {
    let sub = tenant.subscription.as_ref()?;
    if sub.status != SubscriptionStatus::Trialing || sub.trial_ends_at > now {
        return None;
    }
    let mut next = tenant.clone();
    if let Some(s) = next.subscription.as_mut() {
        s.status = SubscriptionStatus::Expired;
    }
    Some(next)
}

/// Apply a privileged override other than `hard_delete`
pub fn apply_admin_action(
    tenant: &Tenant,
    admin_action: &AdminAction,
    now: OffsetDateTime,
) -> BillingResult<Tenant> {
    admin_action.validate()?;
    let mut next = tenant.clone();

    match admin_action {
        AdminAction::Pause => {
            let mut sub = subscription_for_write(tenant);
            if sub.status == SubscriptionStatus::Paused {
                return Err(BillingError::Validation(
                    "action: store is already paused".to_string(),
                ));
            }
            sub.status = SubscriptionStatus::Paused;
            next.subscription = Some(sub);
        }
        AdminAction::Reactivate => {
            let paused = tenant
                .subscription
                .as_ref()
                .is_some_and(|s| s.status == SubscriptionStatus::Paused);
            if !paused && !tenant.is_soft_deleted() {
                return Err(BillingError::Validation(
                    "action: store is neither paused nor deleted".to_string(),
                ));
            }
            if paused {
                let mut sub = subscription_for_write(tenant);
                sub.status = if sub.last_payment_date.is_none() && sub.trial_ends_at > now {
                    SubscriptionStatus::Trialing
                } else {
                    SubscriptionStatus::Active
                };
                next.subscription = Some(sub);
            }
            next.deleted_at = None;
        }
        AdminAction::Extend { days } => {
            let mut sub = subscription_for_write(tenant);
            // A running trial counts as time already owed to the tenant
            let current_end = match sub.status {
                SubscriptionStatus::Trialing => {
                    Some(later_of(sub.trial_ends_at, sub.subscription_end_date))
                }
                _ => sub.subscription_end_date,
            };
            let end = later_of(now, current_end) + Duration::days(*days);
            sub.subscription_end_date = Some(end);
            sub.next_billing_date = Some(end);
            if sub.status != SubscriptionStatus::Paused {
                sub.status = SubscriptionStatus::Active;
            }
            next.subscription = Some(sub);
        }
        AdminAction::ForceRenewal => {
            let mut sub = subscription_for_write(tenant);
            let end = now + Duration::days(BILLING_MONTH_DAYS);
            sub.status = SubscriptionStatus::Active;
            sub.last_payment_date = Some(now);
            sub.subscription_end_date = Some(end);
            sub.next_billing_date = Some(end);
            next.subscription = Some(sub);
        }
        AdminAction::ChangePlan {
            plan,
            payment_status,
        } => {
            next.plan = plan.as_deref().map(|p| p.trim().to_string());
            if let Some(status) = payment_status {
                next.payment_status = Some(status.clone());
            }
        }
        AdminAction::SoftDelete => {
            if tenant.is_soft_deleted() {
                return Err(BillingError::Validation(
                    "action: store is already deleted".to_string(),
                ));
            }
            next.deleted_at = Some(now);
        }
        AdminAction::HardDelete => {
            return Err(BillingError::Validation(
                "action: hard_delete removes the record and has no next state".to_string(),
            ));
        }
        AdminAction::MarkClone { value } => next.internal.is_clone = *value,
        AdminAction::MarkSuspicious { value } => next.internal.is_suspicious = *value,
        AdminAction::Patch { store, internal } => {
            if let Some(fields) = store {
                apply_store_patch(&mut next, fields)?;
            }
            if let Some(fields) = internal {
                apply_internal_patch(&mut next, fields)?;
            }
        }
    }

    Ok(next)
}

fn optional_string(section: &str, key: &str, value: &serde_json::Value) -> BillingResult<Option<String>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s.clone())),
        _ => Err(BillingError::Validation(format!(
            "{}.{}: expected a string or null",
            section, key
        ))),
    }
}

fn apply_store_patch(
    tenant: &mut Tenant,
    fields: &serde_json::Map<String, serde_json::Value>,
) -> BillingResult<()> {
    for (key, value) in fields {
        match key.as_str() {
            "name" => match value.as_str().map(str::trim) {
                Some(name) if !name.is_empty() => tenant.profile.name = name.to_string(),
                _ => {
                    return Err(BillingError::Validation(
                        "store.name: must be a non-empty string".to_string(),
                    ))
                }
            },
            "description" => tenant.profile.description = optional_string("store", key, value)?,
            "contactPhone" => tenant.profile.contact_phone = optional_string("store", key, value)?,
            "logoUrl" => tenant.profile.logo_url = optional_string("store", key, value)?,
            other => {
                return Err(BillingError::Validation(format!(
                    "store.{}: field cannot be patched",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn apply_internal_patch(
    tenant: &mut Tenant,
    fields: &serde_json::Map<String, serde_json::Value>,
) -> BillingResult<()> {
    for (key, value) in fields {
        match key.as_str() {
            "notes" => tenant.internal.notes = optional_string("internal", key, value)?,
            "tags" => {
                let tags: Vec<String> = serde_json::from_value(value.clone()).map_err(|_| {
                    BillingError::Validation("internal.tags: expected an array of strings".to_string())
                })?;
                tenant.internal.tags = tags;
            }
            other => {
                return Err(BillingError::Validation(format!(
                    "internal.{}: field cannot be patched",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// Compact snapshot for audit details
fn snapshot(tenant: &Tenant) -> serde_json::Value {
    serde_json::json!({
        "subscription": tenant.subscription,
        "plan": tenant.plan,
        "payment_status": tenant.payment_status,
        "gift_card_active": tenant.gift_card_active,
        "deleted_at": tenant.deleted_at.map(|t| t.to_string()),
        "is_clone": tenant.internal.is_clone,
        "is_suspicious": tenant.internal.is_suspicious,
    })
}

// ============================================================================
// Service
// ============================================================================

/// Result of a payment credit attempt
#[derive(Debug, Clone)]
pub struct PaymentCredit {
    pub tenant: Tenant,
    /// False when the idempotency key had already been used
    pub applied: bool,
}

/// Result of a privileged override
#[derive(Debug, Clone)]
pub struct OverrideResult {
    pub tenant_id: TenantId,
    pub action: &'static str,
    /// None after `hard_delete`
    pub tenant: Option<Tenant>,
    pub audited: bool,
}

#[derive(Clone)]
pub struct SubscriptionTransitionService {
    tenants: Arc<dyn TenantStore>,
    ledger: Arc<dyn PaymentLedger>,
    gift_codes: Arc<dyn GiftCodeStore>,
    audit: AuditLogger,
    trial_days: i64,
}

impl SubscriptionTransitionService {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        ledger: Arc<dyn PaymentLedger>,
        gift_codes: Arc<dyn GiftCodeStore>,
        audit: AuditLogger,
        trial_days: i64,
    ) -> Self {
        Self {
            tenants,
            ledger,
            gift_codes,
            audit,
            trial_days,
        }
    }

    /// Create a tenant owned by the caller, starting its one and only trial
    pub async fn create_tenant(
        &self,
        caller: &Caller,
        name: &str,
        plan: Option<String>,
        now: OffsetDateTime,
    ) -> BillingResult<Tenant> {
        if !caller.is_active {
            return Err(BillingError::Unauthorized);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(BillingError::Validation(
                "name: store name is required".to_string(),
            ));
        }

        let tenant = Tenant::new_trial(caller.uid.clone(), name, plan, self.trial_days, now);
        self.tenants.insert(&tenant).await?;

        tracing::info!(
            tenant_id = %tenant.id,
            owner_uid = %tenant.owner_uid,
            trial_days = self.trial_days,
            "Tenant created with trial"
        );
        Ok(tenant)
    }

    /// Load a tenant the caller may see: its owner, or any active super admin.
    /// Other callers get `Unauthorized` whether or not the tenant exists.
    pub async fn tenant_for(&self, caller: &Caller, tenant_id: TenantId) -> BillingResult<Tenant> {
        let tenant = self.tenants.get(tenant_id).await?;
        if caller.is_super_admin() {
            return tenant.ok_or_else(|| BillingError::NotFound(format!("Tenant {}", tenant_id)));
        }
        match tenant {
            Some(t) if caller.is_active && t.owner_uid == caller.uid => Ok(t),
            _ => Err(BillingError::Unauthorized),
        }
    }

    /// Read-compute-CAS loop. Returns (before, after).
    async fn update_with_retry<F>(
        &self,
        tenant_id: TenantId,
        now: OffsetDateTime,
        mut mutate: F,
    ) -> BillingResult<(Tenant, Tenant)>
    where
        F: FnMut(&Tenant) -> BillingResult<Tenant>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self
                .tenants
                .get(tenant_id)
                .await?
                .ok_or_else(|| BillingError::NotFound(format!("Tenant {}", tenant_id)))?;

            let mut next = mutate(&current)?;
            next.updated_at = next_version(current.updated_at, now);

            if self
                .tenants
                .replace_if_unchanged(&next, current.updated_at)
                .await?
            {
                return Ok((current, next));
            }

            tracing::warn!(
                tenant_id = %tenant_id,
                attempt = attempt,
                "Tenant changed between read and write, retrying"
            );
        }

        Err(BillingError::Conflict(format!(
            "Tenant {} kept changing; gave up after {} attempts",
            tenant_id, MAX_WRITE_ATTEMPTS
        )))
    }

    /// Bind a checkout's idempotency key to the tenant and month count it was
    /// issued for. Only keys recorded here can later be credited.
    pub async fn register_checkout(
        &self,
        caller: &Caller,
        tenant_id: TenantId,
        months: u32,
        idempotency_key: &str,
    ) -> BillingResult<Tenant> {
        validate_months(months)?;
        let tenant = self.tenant_for(caller, tenant_id).await?;
        self.ledger.issue(idempotency_key, tenant_id, months).await?;

        tracing::debug!(
            tenant_id = %tenant_id,
            months = months,
            "Checkout key issued"
        );
        Ok(tenant)
    }

    /// Credit a successful payment exactly once per issued idempotency key
    pub async fn payment_succeeded(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
        months: u32,
        idempotency_key: &str,
        now: OffsetDateTime,
    ) -> BillingResult<PaymentCredit> {
        let idempotency_key = idempotency_key.trim();
        if idempotency_key.is_empty() {
            return Err(BillingError::Validation(
                "key: an idempotency key is required".to_string(),
            ));
        }
        validate_months(months)?;

        let current = self.tenant_for(&ctx.caller, tenant_id).await?;

        match self.ledger.claim(idempotency_key, tenant_id, months).await? {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::Unrecognized => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    caller_uid = %ctx.caller.uid,
                    months = months,
                    "Rejected payment return with no matching checkout"
                );
                return Err(BillingError::Validation(
                    "key: no checkout was issued for this payment".to_string(),
                ));
            }
            outcome => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    idempotency_key = %idempotency_key,
                    outcome = ?outcome,
                    "Duplicate payment callback ignored"
                );
                return Ok(PaymentCredit {
                    tenant: current,
                    applied: false,
                });
            }
        }

        let result = self
            .update_with_retry(tenant_id, now, |t| Ok(apply_payment(t, months, now)))
            .await;

        let (before, after) = match result {
            Ok(pair) => pair,
            Err(e) => {
                if let Err(mark_err) = self.ledger.mark_failed(idempotency_key, &e.to_string()).await {
                    tracing::error!(
                        tenant_id = %tenant_id,
                        idempotency_key = %idempotency_key,
                        error = %mark_err,
                        "Failed to release payment claim; key stays in processing"
                    );
                }
                return Err(e);
            }
        };

        if let Err(e) = self.ledger.mark_applied(idempotency_key).await {
            // The key stays in processing, which still blocks a second credit
            tracing::error!(
                tenant_id = %tenant_id,
                idempotency_key = %idempotency_key,
                error = %e,
                "Failed to mark payment as applied"
            );
        }

        tracing::info!(
            tenant_id = %tenant_id,
            months = months,
            subscription_end_date = ?after.subscription.as_ref().and_then(|s| s.subscription_end_date),
            "Payment credited"
        );

        self.audit
            .record(
                ctx,
                AuditEvent::new(action::PAYMENT_CREDITED, target_type::STORE, tenant_id).details(
                    serde_json::json!({
                        "months": months,
                        "idempotency_key": idempotency_key,
                        "before": snapshot(&before),
                        "after": snapshot(&after),
                    }),
                ),
                now,
            )
            .await;

        Ok(PaymentCredit {
            tenant: after,
            applied: true,
        })
    }

    /// Activate the gift override with a single-use code
    pub async fn gift_code_redeemed(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
        code: &str,
        now: OffsetDateTime,
    ) -> BillingResult<Tenant> {
        let tenant = self.tenant_for(&ctx.caller, tenant_id).await?;
        if tenant.gift_card_active {
            return Err(BillingError::Validation(
                "code: a gift card is already active for this store".to_string(),
            ));
        }

        if !self.gift_codes.redeem(code, tenant_id, now).await? {
            return Err(BillingError::Validation(
                "code: invalid or already used gift code".to_string(),
            ));
        }

        let result = self
            .update_with_retry(tenant_id, now, |t| {
                // Another redemption may have landed since the first check
                if t.gift_card_active {
                    return Err(BillingError::Validation(
                        "code: a gift card is already active for this store".to_string(),
                    ));
                }
                let mut next = t.clone();
                next.gift_card_active = true;
                next.gift_card_activated_at = Some(now);
                Ok(next)
            })
            .await;

        let (_, after) = match result {
            Ok(pair) => pair,
            Err(e) => {
                if let Err(release_err) = self.gift_codes.release(code, tenant_id).await {
                    tracing::error!(
                        tenant_id = %tenant_id,
                        error = %release_err,
                        "Failed to release gift code after tenant write failure"
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(tenant_id = %tenant_id, "Gift card activated");

        self.audit
            .record(
                ctx,
                AuditEvent::new(action::GIFT_CARD_REDEEMED, target_type::STORE, tenant_id)
                    .details(serde_json::json!({ "code": code.trim() })),
                now,
            )
            .await;

        Ok(after)
    }

    /// Add a single-use gift code. Super admin only, audited.
    pub async fn create_gift_code(
        &self,
        ctx: &RequestContext,
        code: &str,
        now: OffsetDateTime,
    ) -> BillingResult<String> {
        ctx.caller.require_super_admin()?;
        let code = normalize_gift_code(code);
        if code.is_empty() {
            return Err(BillingError::Validation("code: required".to_string()));
        }
        if !self.gift_codes.insert_code(&code).await? {
            return Err(BillingError::Conflict(format!("Gift code {} already exists", code)));
        }

        tracing::info!(admin_uid = %ctx.caller.uid, "Gift code created");

        self.audit
            .record(
                ctx,
                AuditEvent::new(action::GIFT_CODE_CREATED, target_type::GIFT_CODE, &code),
                now,
            )
            .await;

        Ok(code)
    }

    /// Apply a privileged override. Super admin only, always audited.
    pub async fn apply_override(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
        admin_action: AdminAction,
        now: OffsetDateTime,
    ) -> BillingResult<OverrideResult> {
        ctx.caller.require_super_admin()?;
        admin_action.validate()?;

        if admin_action == AdminAction::HardDelete {
            return self.hard_delete(ctx, tenant_id, now).await;
        }

        let (before, after) = self
            .update_with_retry(tenant_id, now, |t| apply_admin_action(t, &admin_action, now))
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            action = admin_action.name(),
            admin_uid = %ctx.caller.uid,
            "Admin override applied"
        );

        let mut details = admin_action.details();
        if let Some(obj) = details.as_object_mut() {
            obj.insert("before".to_string(), snapshot(&before));
            obj.insert("after".to_string(), snapshot(&after));
        }

        let audited = self
            .audit
            .record(
                ctx,
                AuditEvent::new(admin_action.audit_action(), target_type::STORE, tenant_id)
                    .details(details),
                now,
            )
            .await;

        Ok(OverrideResult {
            tenant_id,
            action: admin_action.name(),
            tenant: Some(after),
            audited,
        })
    }

    /// Irreversible removal, only for tenants flagged as clones
    async fn hard_delete(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
        now: OffsetDateTime,
    ) -> BillingResult<OverrideResult> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self
                .tenants
                .get(tenant_id)
                .await?
                .ok_or_else(|| BillingError::NotFound(format!("Tenant {}", tenant_id)))?;

            if !current.internal.is_clone {
                return Err(BillingError::Validation(
                    "action: hard_delete is only permitted for stores marked as clones".to_string(),
                ));
            }

            if self
                .tenants
                .delete_if_unchanged(tenant_id, current.updated_at)
                .await?
            {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    admin_uid = %ctx.caller.uid,
                    "Tenant permanently deleted"
                );

                let audited = self
                    .audit
                    .record(
                        ctx,
                        AuditEvent::new(action::STORE_HARD_DELETED, target_type::STORE, tenant_id)
                            .details(serde_json::json!({
                                "owner_uid": current.owner_uid,
                                "name": current.profile.name,
                                "before": snapshot(&current),
                            })),
                        now,
                    )
                    .await;

                return Ok(OverrideResult {
                    tenant_id,
                    action: AdminAction::HardDelete.name(),
                    tenant: None,
                    audited,
                });
            }

            tracing::warn!(
                tenant_id = %tenant_id,
                attempt = attempt,
                "Tenant changed before hard delete, retrying"
            );
        }

        Err(BillingError::Conflict(format!(
            "Tenant {} kept changing; hard delete aborted",
            tenant_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn trial_tenant(now: OffsetDateTime) -> Tenant {
        Tenant::new_trial("owner-1", "Shop", Some("basic".to_string()), 7, now)
    }

    #[test]
    fn test_payment_after_expiry_starts_from_now() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let now = t0 + Duration::days(40);
        let next = apply_payment(&trial_tenant(t0), 1, now);
        let sub = next.subscription.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.subscription_end_date, Some(now + Duration::days(30)));
        assert_eq!(sub.next_billing_date, sub.subscription_end_date);
        assert_eq!(sub.last_payment_date, Some(now));
    }

    #[test]
    fn test_payment_stacks_on_future_end_date() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let first = apply_payment(&trial_tenant(t0), 1, t0);
        let second = apply_payment(&first, 2, t0 + Duration::days(10));
        assert_eq!(
            second.subscription.unwrap().subscription_end_date,
            Some(t0 + Duration::days(90))
        );
    }

    #[test]
    fn test_payment_never_touches_trial_end() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let tenant = trial_tenant(t0);
        let next = apply_payment(&tenant, 1, t0 + Duration::days(2));
        assert_eq!(
            next.subscription.unwrap().trial_ends_at,
            tenant.subscription.unwrap().trial_ends_at
        );
    }

    #[test]
    fn test_extend_from_past_end_uses_now() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let now = t0 + Duration::days(100);
        let mut tenant = apply_payment(&trial_tenant(t0), 1, t0);
        if let Some(sub) = tenant.subscription.as_mut() {
            sub.subscription_end_date = Some(now - Duration::days(10));
            sub.status = SubscriptionStatus::Expired;
        }

        let next = apply_admin_action(&tenant, &AdminAction::Extend { days: 5 }, now).unwrap();
        let sub = next.subscription.unwrap();
        assert_eq!(sub.subscription_end_date, Some(now + Duration::days(5)));
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_extend_during_trial_keeps_remaining_trial() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let tenant = trial_tenant(t0);
        let next =
            apply_admin_action(&tenant, &AdminAction::Extend { days: 5 }, t0 + Duration::days(1))
                .unwrap();
        assert_eq!(
            next.subscription.unwrap().subscription_end_date,
            Some(t0 + Duration::days(12))
        );
    }

    #[test]
    fn test_extend_rejects_non_positive_days() {
        let tenant = trial_tenant(datetime!(2026-01-01 0:00 UTC));
        for days in [0, -3] {
            let err = apply_admin_action(&tenant, &AdminAction::Extend { days }, tenant.created_at)
                .unwrap_err();
            assert!(matches!(err, BillingError::Validation(_)));
        }
    }

    #[test]
    fn test_pause_and_reactivate_leave_dates_alone() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let paid = apply_payment(&trial_tenant(t0), 1, t0);

        let paused = apply_admin_action(&paid, &AdminAction::Pause, t0 + Duration::days(1)).unwrap();
        assert_eq!(paused.subscription.as_ref().unwrap().status, SubscriptionStatus::Paused);
        assert_eq!(
            paused.subscription.as_ref().unwrap().subscription_end_date,
            paid.subscription.as_ref().unwrap().subscription_end_date
        );

        let resumed =
            apply_admin_action(&paused, &AdminAction::Reactivate, t0 + Duration::days(2)).unwrap();
        assert_eq!(resumed.subscription.as_ref().unwrap().status, SubscriptionStatus::Active);
        assert_eq!(resumed.subscription, {
            let mut s = paid.subscription.clone();
            if let Some(s) = s.as_mut() {
                s.status = SubscriptionStatus::Active;
            }
            s
        });
    }

    #[test]
    fn test_reactivate_unpaid_trial_goes_back_to_trialing() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let paused = apply_admin_action(&trial_tenant(t0), &AdminAction::Pause, t0).unwrap();
        let resumed =
            apply_admin_action(&paused, &AdminAction::Reactivate, t0 + Duration::days(1)).unwrap();
        assert_eq!(resumed.subscription.unwrap().status, SubscriptionStatus::Trialing);
    }

    #[test]
    fn test_pause_twice_is_rejected() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let paused = apply_admin_action(&trial_tenant(t0), &AdminAction::Pause, t0).unwrap();
        assert!(matches!(
            apply_admin_action(&paused, &AdminAction::Pause, t0),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_force_renewal_sets_thirty_days() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let now = t0 + Duration::days(60);
        let next = apply_admin_action(&trial_tenant(t0), &AdminAction::ForceRenewal, now).unwrap();
        let sub = next.subscription.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.last_payment_date, Some(now));
        assert_eq!(sub.subscription_end_date, Some(now + Duration::days(30)));
        assert_eq!(sub.next_billing_date, Some(now + Duration::days(30)));
    }

    #[test]
    fn test_change_plan_requires_plan_and_keeps_dates() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let tenant = trial_tenant(t0);
        assert!(matches!(
            apply_admin_action(
                &tenant,
                &AdminAction::ChangePlan {
                    plan: Some("  ".to_string()),
                    payment_status: None
                },
                t0
            ),
            Err(BillingError::Validation(_))
        ));

        let next = apply_admin_action(
            &tenant,
            &AdminAction::ChangePlan {
                plan: Some("pro".to_string()),
                payment_status: Some("manual".to_string()),
            },
            t0,
        )
        .unwrap();
        assert_eq!(next.plan.as_deref(), Some("pro"));
        assert_eq!(next.payment_status.as_deref(), Some("manual"));
        assert_eq!(next.subscription, tenant.subscription);
    }

    #[test]
    fn test_soft_delete_and_restore() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let deleted = apply_admin_action(&trial_tenant(t0), &AdminAction::SoftDelete, t0).unwrap();
        assert_eq!(deleted.deleted_at, Some(t0));

        let restored = apply_admin_action(&deleted, &AdminAction::Reactivate, t0).unwrap();
        assert_eq!(restored.deleted_at, None);
        assert_eq!(
            restored.subscription.unwrap().status,
            SubscriptionStatus::Trialing
        );
    }

    #[test]
    fn test_patch_allow_list() {
        let tenant = trial_tenant(datetime!(2026-01-01 0:00 UTC));
        let action: AdminAction = serde_json::from_value(serde_json::json!({
            "action": "patch",
            "store": { "name": "New name", "logoUrl": null },
            "internal": { "tags": ["vip"] }
        }))
        .unwrap();
        let next = apply_admin_action(&tenant, &action, tenant.created_at).unwrap();
        assert_eq!(next.profile.name, "New name");
        assert_eq!(next.internal.tags, vec!["vip".to_string()]);

        let forbidden: AdminAction = serde_json::from_value(serde_json::json!({
            "action": "patch",
            "store": { "giftCardActive": true }
        }))
        .unwrap();
        let err = apply_admin_action(&tenant, &forbidden, tenant.created_at).unwrap_err();
        assert!(err.to_string().contains("store.giftCardActive"));
    }

    #[test]
    fn test_action_body_parsing() {
        let action: AdminAction =
            serde_json::from_value(serde_json::json!({ "action": "extend", "days": 14 })).unwrap();
        assert_eq!(action, AdminAction::Extend { days: 14 });

        let action: AdminAction =
            serde_json::from_value(serde_json::json!({ "action": "mark_clone" })).unwrap();
        assert_eq!(action, AdminAction::MarkClone { value: true });

        let action: AdminAction = serde_json::from_value(serde_json::json!({
            "action": "change_plan", "plan": "pro", "paymentStatus": "paid"
        }))
        .unwrap();
        assert_eq!(
            action,
            AdminAction::ChangePlan {
                plan: Some("pro".to_string()),
                payment_status: Some("paid".to_string())
            }
        );

        assert!(serde_json::from_value::<AdminAction>(serde_json::json!({ "action": "nuke" })).is_err());
    }

    #[test]
    fn test_expire_trial_only_touches_elapsed_trials() {
        let t0 = datetime!(2026-01-01 0:00 UTC);
        let tenant = trial_tenant(t0);
        assert!(expire_trial(&tenant, t0 + Duration::days(6)).is_none());

        let expired = expire_trial(&tenant, t0 + Duration::days(7)).unwrap();
        assert_eq!(expired.subscription.unwrap().status, SubscriptionStatus::Expired);

        let paid = apply_payment(&tenant, 1, t0);
        assert!(expire_trial(&paid, t0 + Duration::days(8)).is_none());
    }

    #[test]
    fn test_next_version_is_strictly_increasing() {
        let t = datetime!(2026-01-01 0:00 UTC);
        assert_eq!(next_version(t, t), t + Duration::microseconds(1));
        assert_eq!(
            next_version(t, t + Duration::seconds(1)),
            t + Duration::seconds(1)
        );
    }
}
