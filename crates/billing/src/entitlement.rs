//! Entitlement Module
//!
//! Answers the question "may this tenant use the storefront and admin
//! console right now?".
//!
//! `evaluate()` is the only function that derives that answer. The storefront
//! gate, the admin views, the dashboard aggregate and the invariant checks all
//! call it instead of re-deriving the formula.
//!
//! Precedence, first match wins:
//!
//! 1. Soft-deleted tenant: inactive
//! 2. Gift override active: active
//! 3. `active` subscription with no end date or an end date in the future: active
//! 4. `trialing` subscription with `trial_ends_at > now` (strict): active
//! 5. No subscription object at all: active (legacy grace)
//! 6. Otherwise inactive, with the failing condition as the reason

use serde::{Deserialize, Serialize};
use storefront_shared::{SubscriptionStatus, Tenant};
use time::OffsetDateTime;

/// What granted access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementSource {
    GiftOverride,
    Subscription,
    Trial,
    /// Tenant record predates subscription objects
    LegacyGrace,
}

/// Why access was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactiveReason {
    Deleted,
    SubscriptionEnded,
    TrialEnded,
    PastDue,
    Canceled,
    Expired,
    Paused,
}

impl InactiveReason {
    /// User-facing message for the lockout screen
    pub fn message(&self) -> &'static str {
        match self {
            InactiveReason::Deleted => "This store has been deleted",
            InactiveReason::SubscriptionEnded => "Your subscription period has ended",
            InactiveReason::TrialEnded => "Your free trial has ended",
            InactiveReason::PastDue => "Your last payment failed - please update your payment",
            InactiveReason::Canceled => "Your subscription was canceled",
            InactiveReason::Expired => "Your subscription has expired",
            InactiveReason::Paused => "This store has been paused by an administrator",
        }
    }
}

impl std::fmt::Display for InactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InactiveReason::Deleted => "deleted",
            InactiveReason::SubscriptionEnded => "subscription_ended",
            InactiveReason::TrialEnded => "trial_ended",
            InactiveReason::PastDue => "past_due",
            InactiveReason::Canceled => "canceled",
            InactiveReason::Expired => "expired",
            InactiveReason::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Outcome of an entitlement evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub active: bool,
    pub source: Option<EntitlementSource>,
    pub reason: Option<InactiveReason>,
    /// When the current grant lapses, if it is time-boxed
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl Entitlement {
    fn granted(source: EntitlementSource, expires_at: Option<OffsetDateTime>) -> Self {
        Self {
            active: true,
            source: Some(source),
            reason: None,
            expires_at,
        }
    }

    fn refused(reason: InactiveReason) -> Self {
        Self {
            active: false,
            source: None,
            reason: Some(reason),
            expires_at: None,
        }
    }
}

/// Pure function: compute entitlement from the stored tenant fields.
/// Deterministic and side-effect free.
pub fn evaluate(tenant: &Tenant, now: OffsetDateTime) -> Entitlement {
    if tenant.is_soft_deleted() {
        return Entitlement::refused(InactiveReason::Deleted);
    }

    if tenant.gift_card_active {
        return Entitlement::granted(EntitlementSource::GiftOverride, None);
    }

    let Some(sub) = tenant.subscription.as_ref() else {
        return Entitlement::granted(EntitlementSource::LegacyGrace, None);
    };

    match sub.status {
        SubscriptionStatus::Active => match sub.subscription_end_date {
            None => Entitlement::granted(EntitlementSource::Subscription, None),
            Some(end) if end > now => {
                Entitlement::granted(EntitlementSource::Subscription, Some(end))
            }
            Some(_) => Entitlement::refused(InactiveReason::SubscriptionEnded),
        },
        SubscriptionStatus::Trialing => {
            if sub.trial_ends_at > now {
                Entitlement::granted(EntitlementSource::Trial, Some(sub.trial_ends_at))
            } else {
                Entitlement::refused(InactiveReason::TrialEnded)
            }
        }
        SubscriptionStatus::PastDue => Entitlement::refused(InactiveReason::PastDue),
        SubscriptionStatus::Canceled => Entitlement::refused(InactiveReason::Canceled),
        SubscriptionStatus::Expired => Entitlement::refused(InactiveReason::Expired),
        SubscriptionStatus::Paused => Entitlement::refused(InactiveReason::Paused),
    }
}

/// Convenience for gates that only need the boolean
pub fn is_active(tenant: &Tenant, now: OffsetDateTime) -> bool {
    evaluate(tenant, now).active
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_shared::TenantSubscription;
    use time::macros::datetime;
    use time::Duration;

    fn tenant_with(sub: Option<TenantSubscription>) -> Tenant {
        let mut tenant = Tenant::new_trial("owner", "Shop", None, 7, datetime!(2026-01-01 0:00 UTC));
        tenant.subscription = sub;
        tenant
    }

    fn sub(status: SubscriptionStatus, end: Option<OffsetDateTime>) -> TenantSubscription {
        TenantSubscription {
            status,
            trial_ends_at: datetime!(2026-01-08 0:00 UTC),
            subscription_end_date: end,
            next_billing_date: end,
            last_payment_date: None,
        }
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let tenant = tenant_with(Some(sub(SubscriptionStatus::Trialing, None)));
        let now = datetime!(2026-01-05 0:00 UTC);
        assert_eq!(evaluate(&tenant, now), evaluate(&tenant, now));
    }

    #[test]
    fn test_gift_override_beats_every_status() {
        for status in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Expired,
            SubscriptionStatus::Paused,
        ] {
            let mut tenant = tenant_with(Some(sub(status, Some(datetime!(2020-01-01 0:00 UTC)))));
            tenant.gift_card_active = true;
            let result = evaluate(&tenant, datetime!(2030-01-01 0:00 UTC));
            assert!(result.active, "gift should win over {}", status);
            assert_eq!(result.source, Some(EntitlementSource::GiftOverride));
        }
    }

    #[test]
    fn test_trial_boundary_is_strict() {
        let tenant = tenant_with(Some(sub(SubscriptionStatus::Trialing, None)));
        let t0 = datetime!(2026-01-08 0:00 UTC);

        let at_boundary = evaluate(&tenant, t0);
        assert!(!at_boundary.active);
        assert_eq!(at_boundary.reason, Some(InactiveReason::TrialEnded));

        assert!(evaluate(&tenant, t0 - Duration::milliseconds(1)).active);
    }

    #[test]
    fn test_active_without_end_date_is_active() {
        let tenant = tenant_with(Some(sub(SubscriptionStatus::Active, None)));
        let result = evaluate(&tenant, datetime!(2099-01-01 0:00 UTC));
        assert!(result.active);
        assert_eq!(result.expires_at, None);
    }

    #[test]
    fn test_active_with_past_end_date_is_inactive() {
        let end = datetime!(2026-02-01 0:00 UTC);
        let tenant = tenant_with(Some(sub(SubscriptionStatus::Active, Some(end))));
        assert!(evaluate(&tenant, end - Duration::seconds(1)).active);
        let result = evaluate(&tenant, end);
        assert!(!result.active);
        assert_eq!(result.reason, Some(InactiveReason::SubscriptionEnded));
    }

    #[test]
    fn test_missing_subscription_is_legacy_grace() {
        let tenant = tenant_with(None);
        let result = evaluate(&tenant, datetime!(2099-01-01 0:00 UTC));
        assert!(result.active);
        assert_eq!(result.source, Some(EntitlementSource::LegacyGrace));
    }

    #[test]
    fn test_soft_deleted_is_inactive_even_with_gift() {
        let mut tenant = tenant_with(Some(sub(SubscriptionStatus::Active, None)));
        tenant.gift_card_active = true;
        tenant.deleted_at = Some(datetime!(2026-01-02 0:00 UTC));
        let result = evaluate(&tenant, datetime!(2026-01-03 0:00 UTC));
        assert!(!result.active);
        assert_eq!(result.reason, Some(InactiveReason::Deleted));
    }

    #[test]
    fn test_terminal_statuses_report_reason() {
        let now = datetime!(2026-01-03 0:00 UTC);
        for (status, reason) in [
            (SubscriptionStatus::PastDue, InactiveReason::PastDue),
            (SubscriptionStatus::Canceled, InactiveReason::Canceled),
            (SubscriptionStatus::Expired, InactiveReason::Expired),
            (SubscriptionStatus::Paused, InactiveReason::Paused),
        ] {
            let tenant = tenant_with(Some(sub(status, None)));
            let result = evaluate(&tenant, now);
            assert!(!result.active);
            assert_eq!(result.reason, Some(reason));
        }
    }
}
