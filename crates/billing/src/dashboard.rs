//! Admin dashboard aggregate
//!
//! Every access-related count here comes from `entitlement::evaluate`, the
//! same function that gates the storefront.

use std::collections::HashMap;

use serde::Serialize;
use storefront_shared::{SubscriptionStatus, Tenant, User};
use time::{Duration, OffsetDateTime};

use crate::entitlement::{evaluate, EntitlementSource};

/// Monthly list price per plan id, in cents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanPrices(HashMap<String, i64>);

impl PlanPrices {
    pub fn price_cents(&self, plan: &str) -> Option<i64> {
        self.0.get(plan).copied()
    }
}

impl std::str::FromStr for PlanPrices {
    type Err = String;

    /// Parses `basic:1900,pro:4900`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut prices = HashMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (plan, cents) = pair
                .split_once(':')
                .ok_or_else(|| format!("Invalid plan price '{}', expected plan:cents", pair))?;
            let cents: i64 = cents
                .trim()
                .parse()
                .map_err(|_| format!("Invalid price for plan '{}'", plan.trim()))?;
            if cents < 0 {
                return Err(format!("Negative price for plan '{}'", plan.trim()));
            }
            prices.insert(plan.trim().to_string(), cents);
        }
        Ok(Self(prices))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringStores {
    pub in7_days: usize,
    pub in3_days: usize,
    pub in1_day: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGrowth {
    pub total: usize,
    pub last30_days: usize,
    pub previous30_days: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardAlerts {
    pub suspicious_stores: usize,
    pub past_due_stores: usize,
    pub clone_stores: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_stores: usize,
    pub active_stores: usize,
    pub expiring_stores: ExpiringStores,
    pub expired_stores: usize,
    pub paused_stores: usize,
    pub deleted_stores: usize,
    pub paying_stores: usize,
    pub gifted_stores: usize,
    pub estimated_monthly_revenue_cents: i64,
    pub user_growth: UserGrowth,
    pub alerts: DashboardAlerts,
}

fn within(expires_at: OffsetDateTime, now: OffsetDateTime, days: i64) -> bool {
    expires_at > now && expires_at <= now + Duration::days(days)
}

/// Build the dashboard from a snapshot of all tenants and users
pub fn summarize(
    tenants: &[Tenant],
    users: &[User],
    prices: &PlanPrices,
    now: OffsetDateTime,
) -> DashboardSummary {
    let mut summary = DashboardSummary::default();

    for tenant in tenants {
        if tenant.is_soft_deleted() {
            summary.deleted_stores += 1;
            continue;
        }
        summary.total_stores += 1;

        let status = tenant.subscription.as_ref().map(|s| s.status);
        let entitlement = evaluate(tenant, now);

        if tenant.internal.is_suspicious {
            summary.alerts.suspicious_stores += 1;
        }
        if tenant.internal.is_clone {
            summary.alerts.clone_stores += 1;
        }
        if status == Some(SubscriptionStatus::PastDue) {
            summary.alerts.past_due_stores += 1;
        }

        if !entitlement.active {
            if status == Some(SubscriptionStatus::Paused) {
                summary.paused_stores += 1;
            } else {
                summary.expired_stores += 1;
            }
            continue;
        }

        summary.active_stores += 1;

        if let Some(expires_at) = entitlement.expires_at {
            if within(expires_at, now, 7) {
                summary.expiring_stores.in7_days += 1;
            }
            if within(expires_at, now, 3) {
                summary.expiring_stores.in3_days += 1;
            }
            if within(expires_at, now, 1) {
                summary.expiring_stores.in1_day += 1;
            }
        }

        match entitlement.source {
            Some(EntitlementSource::GiftOverride) => summary.gifted_stores += 1,
            Some(EntitlementSource::Subscription) => {
                let paid = tenant
                    .subscription
                    .as_ref()
                    .is_some_and(|s| s.last_payment_date.is_some());
                if paid {
                    summary.paying_stores += 1;
                    let price = tenant
                        .plan
                        .as_deref()
                        .and_then(|p| prices.price_cents(p))
                        .unwrap_or(0);
                    summary.estimated_monthly_revenue_cents += price;
                }
            }
            _ => {}
        }
    }

    let month_ago = now - Duration::days(30);
    let two_months_ago = now - Duration::days(60);
    for user in users.iter().filter(|u| !u.is_hidden) {
        summary.user_growth.total += 1;
        if user.created_at > month_ago && user.created_at <= now {
            summary.user_growth.last30_days += 1;
        } else if user.created_at > two_months_ago && user.created_at <= month_ago {
            summary.user_growth.previous30_days += 1;
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transitions::apply_payment;
    use storefront_shared::Role;
    use time::macros::datetime;

    fn user(created_at: OffsetDateTime, hidden: bool) -> User {
        User {
            uid: uuid::Uuid::new_v4().to_string(),
            email: "u@example.com".to_string(),
            role: Role::StoreOwner,
            is_active: true,
            is_hidden: hidden,
            created_at,
        }
    }

    #[test]
    fn test_plan_prices_parse() {
        let prices: PlanPrices = "basic:1900, pro:4900".parse().unwrap();
        assert_eq!(prices.price_cents("basic"), Some(1900));
        assert_eq!(prices.price_cents("pro"), Some(4900));
        assert_eq!(prices.price_cents("team"), None);
        assert!("basic=1900".parse::<PlanPrices>().is_err());
        assert!("basic:-1".parse::<PlanPrices>().is_err());
    }

    #[test]
    fn test_summary_uses_entitlement_for_counts() {
        let now = datetime!(2026-05-01 0:00 UTC);
        let prices: PlanPrices = "basic:1900,pro:4900".parse().unwrap();

        // trial ending in 2 days
        let trial = Tenant::new_trial("a", "Trial", Some("basic".to_string()), 7, now - Duration::days(5));
        // paid pro, 30 days left
        let paid = apply_payment(
            &Tenant::new_trial("b", "Paid", Some("pro".to_string()), 7, now - Duration::days(20)),
            1,
            now,
        );
        // trial over, never swept
        let lapsed = Tenant::new_trial("c", "Lapsed", None, 7, now - Duration::days(30));
        // expired but gifted
        let mut gifted = lapsed.clone();
        gifted.id = storefront_shared::TenantId::new();
        gifted.gift_card_active = true;
        gifted.gift_card_activated_at = Some(now);
        // paused
        let mut paused = paid.clone();
        paused.id = storefront_shared::TenantId::new();
        if let Some(s) = paused.subscription.as_mut() {
            s.status = SubscriptionStatus::Paused;
        }
        // soft-deleted, suspicious
        let mut deleted = paid.clone();
        deleted.id = storefront_shared::TenantId::new();
        deleted.deleted_at = Some(now);
        deleted.internal.is_suspicious = true;

        let tenants = vec![trial, paid, lapsed, gifted, paused, deleted];
        let users = vec![
            user(now - Duration::days(1), false),
            user(now - Duration::days(40), false),
            user(now - Duration::days(90), false),
            user(now - Duration::days(2), true),
        ];

        let summary = summarize(&tenants, &users, &prices, now);

        assert_eq!(summary.total_stores, 5);
        assert_eq!(summary.deleted_stores, 1);
        assert_eq!(summary.active_stores, 3);
        assert_eq!(summary.expired_stores, 1);
        assert_eq!(summary.paused_stores, 1);
        assert_eq!(summary.paying_stores, 1);
        assert_eq!(summary.gifted_stores, 1);
        assert_eq!(summary.estimated_monthly_revenue_cents, 4900);
        assert_eq!(
            summary.expiring_stores,
            ExpiringStores {
                in7_days: 1,
                in3_days: 1,
                in1_day: 0
            }
        );
        assert_eq!(
            summary.user_growth,
            UserGrowth {
                total: 3,
                last30_days: 1,
                previous30_days: 1
            }
        );
        // deleted stores are not counted in alerts
        assert_eq!(summary.alerts.suspicious_stores, 0);
    }

    #[test]
    fn test_summary_json_shape() {
        let json = serde_json::to_value(DashboardSummary::default()).unwrap();
        assert!(json["expiringStores"]["in7Days"].is_number());
        assert!(json["userGrowth"]["last30Days"].is_number());
        assert!(json["alerts"]["pastDueStores"].is_number());
    }
}
