//! Tenant Invariants Module
//!
//! Runnable consistency checks over the tenant records. Run them after a
//! data migration, a batch of manual overrides, or on demand from the
//! admin console.
//!
//! ## Design Principles
//!
//! 1. **Explanatory**: Violations include enough context to debug
//! 2. **Non-destructive**: Checks only read, never write
//! 3. **Shared logic**: Anything about access goes through `entitlement::evaluate`

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use storefront_shared::{SubscriptionStatus, Tenant, TenantId};
use time::OffsetDateTime;

use crate::entitlement::evaluate;
use crate::error::BillingResult;
use crate::store::TenantStore;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Tenant(s) affected
    pub tenant_ids: Vec<TenantId>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - tenants may be getting or losing access incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub tenants_scanned: usize,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

type Check = fn(&Tenant, OffsetDateTime) -> Option<InvariantViolation>;

const CHECKS: &[(&str, Check)] = &[
    ("active_has_end_date", check_active_has_end_date),
    ("gift_has_activation_time", check_gift_has_activation_time),
    ("next_billing_matches_end", check_next_billing_matches_end),
    ("deleted_not_active", check_deleted_not_active),
    ("trial_window_sane", check_trial_window_sane),
];

/// Service for running tenant invariant checks
#[derive(Clone)]
pub struct InvariantChecker {
    tenants: Arc<dyn TenantStore>,
}

impl InvariantChecker {
    pub fn new(tenants: Arc<dyn TenantStore>) -> Self {
        Self { tenants }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self, now: OffsetDateTime) -> BillingResult<InvariantCheckSummary> {
        let tenants = self.tenants.list().await?;
        let violations: Vec<InvariantViolation> = tenants
            .iter()
            .flat_map(|t| CHECKS.iter().filter_map(move |(_, check)| check(t, now)))
            .collect();

        let checks_run = CHECKS.len();
        let checks_failed = violations
            .iter()
            .map(|v| v.invariant.as_str())
            .collect::<HashSet<_>>()
            .len();

        if !violations.is_empty() {
            tracing::warn!(
                violations = violations.len(),
                checks_failed = checks_failed,
                "Tenant invariant violations found"
            );
        }

        Ok(InvariantCheckSummary {
            checked_at: now,
            tenants_scanned: tenants.len(),
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Run a single invariant check by name
    pub async fn run_check(
        &self,
        name: &str,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let Some((_, check)) = CHECKS.iter().find(|(n, _)| *n == name) else {
            return Ok(vec![]);
        };
        Ok(self
            .tenants
            .list()
            .await?
            .iter()
            .filter_map(|t| check(t, now))
            .collect())
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        CHECKS.iter().map(|(name, _)| *name).collect()
    }
}

/// Invariant 1: A paid-for active subscription has an end date
///
/// Without one the tenant stays active forever, which only the gift
/// override is supposed to do.
fn check_active_has_end_date(tenant: &Tenant, _now: OffsetDateTime) -> Option<InvariantViolation> {
    let sub = tenant.subscription.as_ref()?;
    if sub.status != SubscriptionStatus::Active
        || sub.subscription_end_date.is_some()
        || tenant.gift_card_active
    {
        return None;
    }
    Some(InvariantViolation {
        invariant: "active_has_end_date".to_string(),
        tenant_ids: vec![tenant.id],
        description: format!(
            "Store '{}' is active with no subscription end date",
            tenant.profile.name
        ),
        context: serde_json::json!({
            "last_payment_date": sub.last_payment_date.map(|t| t.to_string()),
        }),
        severity: ViolationSeverity::High,
    })
}

/// Invariant 2: Gift overrides record when they were activated
fn check_gift_has_activation_time(
    tenant: &Tenant,
    _now: OffsetDateTime,
) -> Option<InvariantViolation> {
    if !tenant.gift_card_active || tenant.gift_card_activated_at.is_some() {
        return None;
    }
    Some(InvariantViolation {
        invariant: "gift_has_activation_time".to_string(),
        tenant_ids: vec![tenant.id],
        description: format!(
            "Store '{}' has an active gift card with no activation time",
            tenant.profile.name
        ),
        context: serde_json::json!({}),
        severity: ViolationSeverity::Medium,
    })
}

/// Invariant 3: Next billing date tracks the subscription end date
fn check_next_billing_matches_end(
    tenant: &Tenant,
    _now: OffsetDateTime,
) -> Option<InvariantViolation> {
    let sub = tenant.subscription.as_ref()?;
    let end = sub.subscription_end_date?;
    if sub.next_billing_date == Some(end) {
        return None;
    }
    Some(InvariantViolation {
        invariant: "next_billing_matches_end".to_string(),
        tenant_ids: vec![tenant.id],
        description: format!(
            "Store '{}' next billing date {:?} differs from subscription end {}",
            tenant.profile.name, sub.next_billing_date, end
        ),
        context: serde_json::json!({
            "subscription_end_date": end.to_string(),
            "next_billing_date": sub.next_billing_date.map(|t| t.to_string()),
        }),
        severity: ViolationSeverity::Medium,
    })
}

/// Invariant 4: Soft-deleted stores never evaluate as active
fn check_deleted_not_active(tenant: &Tenant, now: OffsetDateTime) -> Option<InvariantViolation> {
    if !tenant.is_soft_deleted() || !evaluate(tenant, now).active {
        return None;
    }
    Some(InvariantViolation {
        invariant: "deleted_not_active".to_string(),
        tenant_ids: vec![tenant.id],
        description: format!(
            "Store '{}' is soft-deleted but still evaluates as active",
            tenant.profile.name
        ),
        context: serde_json::json!({
            "deleted_at": tenant.deleted_at.map(|t| t.to_string()),
            "gift_card_active": tenant.gift_card_active,
        }),
        severity: ViolationSeverity::High,
    })
}

/// Invariant 5: The trial cannot end before the store was created
fn check_trial_window_sane(tenant: &Tenant, _now: OffsetDateTime) -> Option<InvariantViolation> {
    let sub = tenant.subscription.as_ref()?;
    if sub.trial_ends_at >= tenant.created_at {
        return None;
    }
    Some(InvariantViolation {
        invariant: "trial_window_sane".to_string(),
        tenant_ids: vec![tenant.id],
        description: format!(
            "Store '{}' trial ends at {} before its creation at {}",
            tenant.profile.name, sub.trial_ends_at, tenant.created_at
        ),
        context: serde_json::json!({
            "trial_ends_at": sub.trial_ends_at.to_string(),
            "created_at": tenant.created_at.to_string(),
        }),
        severity: ViolationSeverity::Low,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTenantStore;
    use time::macros::datetime;
    use time::Duration;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 5);
        assert!(checks.contains(&"active_has_end_date"));
        assert!(checks.contains(&"trial_window_sane"));
    }

    #[tokio::test]
    async fn test_healthy_store_passes_all_checks() {
        let store = Arc::new(InMemoryTenantStore::new());
        let now = datetime!(2026-04-01 0:00 UTC);
        store
            .insert(&Tenant::new_trial("owner", "Shop", None, 7, now))
            .await
            .unwrap();

        let summary = InvariantChecker::new(store).run_all_checks(now).await.unwrap();
        assert!(summary.healthy);
        assert_eq!(summary.tenants_scanned, 1);
        assert_eq!(summary.checks_passed, 5);
    }

    #[tokio::test]
    async fn test_broken_records_are_reported() {
        let store = Arc::new(InMemoryTenantStore::new());
        let now = datetime!(2026-04-01 0:00 UTC);

        let mut gifted = Tenant::new_trial("owner", "Gifted", None, 7, now);
        gifted.gift_card_active = true;
        store.insert(&gifted).await.unwrap();

        let mut drifted = Tenant::new_trial("owner", "Drifted", None, 7, now);
        if let Some(sub) = drifted.subscription.as_mut() {
            sub.status = SubscriptionStatus::Active;
            sub.subscription_end_date = Some(now + Duration::days(30));
            sub.next_billing_date = Some(now + Duration::days(31));
        }
        store.insert(&drifted).await.unwrap();

        let summary = InvariantChecker::new(store.clone())
            .run_all_checks(now)
            .await
            .unwrap();
        assert!(!summary.healthy);
        assert_eq!(summary.checks_failed, 2);

        let gift = InvariantChecker::new(store)
            .run_check("gift_has_activation_time", now)
            .await
            .unwrap();
        assert_eq!(gift.len(), 1);
        assert_eq!(gift[0].tenant_ids, vec![gifted.id]);
        assert_eq!(gift[0].severity, ViolationSeverity::Medium);
    }
}
