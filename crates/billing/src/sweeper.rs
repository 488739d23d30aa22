//! Trial expiry sweep
//!
//! Moves elapsed trials from `trialing` to `expired`. The transition is
//! monotonic and written with compare-and-swap, so overlapping runs (the
//! worker's cron job and an on-demand admin trigger) cannot clobber each
//! other or a concurrent payment: whoever loses the swap leaves the record
//! alone and the next run re-evaluates it.

use std::sync::Arc;

use serde::Serialize;
use storefront_shared::SubscriptionStatus;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::store::TenantStore;
use crate::transitions::{expire_trial, next_version};

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    /// Records that changed under us; picked up by the next run
    pub conflicts: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct ExpirySweeper {
    tenants: Arc<dyn TenantStore>,
}

impl ExpirySweeper {
    pub fn new(tenants: Arc<dyn TenantStore>) -> Self {
        Self { tenants }
    }

    pub async fn run(&self, now: OffsetDateTime) -> BillingResult<SweepReport> {
        let trialing = self
            .tenants
            .list_by_status(SubscriptionStatus::Trialing)
            .await?;

        let mut report = SweepReport {
            scanned: trialing.len(),
            ..SweepReport::default()
        };

        for tenant in trialing {
            let Some(mut next) = expire_trial(&tenant, now) else {
                continue;
            };
            next.updated_at = next_version(tenant.updated_at, now);

            match self.tenants.replace_if_unchanged(&next, tenant.updated_at).await {
                Ok(true) => {
                    report.expired += 1;
                    tracing::info!(tenant_id = %tenant.id, "Trial expired");
                }
                Ok(false) => {
                    report.conflicts += 1;
                    tracing::debug!(
                        tenant_id = %tenant.id,
                        "Tenant changed during sweep, skipping"
                    );
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(
                        tenant_id = %tenant.id,
                        error = %e,
                        "Failed to expire trial"
                    );
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            expired = report.expired,
            conflicts = report.conflicts,
            errors = report.errors,
            "Expiry sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTenantStore;
    use storefront_shared::Tenant;
    use time::macros::datetime;
    use time::Duration;

    #[tokio::test]
    async fn test_sweep_expires_only_elapsed_trials() {
        let store = Arc::new(InMemoryTenantStore::new());
        let t0 = datetime!(2026-03-01 0:00 UTC);
        let old = Tenant::new_trial("a", "Old", None, 7, t0);
        let fresh = Tenant::new_trial("b", "Fresh", None, 7, t0 + Duration::days(5));
        store.insert(&old).await.unwrap();
        store.insert(&fresh).await.unwrap();

        let report = ExpirySweeper::new(store.clone())
            .run(t0 + Duration::days(7))
            .await
            .unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.expired, 1);
        let old = store.get(old.id).await.unwrap().unwrap();
        assert_eq!(
            old.subscription.unwrap().status,
            SubscriptionStatus::Expired
        );
        let fresh = store.get(fresh.id).await.unwrap().unwrap();
        assert_eq!(
            fresh.subscription.unwrap().status,
            SubscriptionStatus::Trialing
        );
    }

    #[tokio::test]
    async fn test_sweep_counts_lost_swaps_as_conflicts() {
        let store = Arc::new(InMemoryTenantStore::new());
        let t0 = datetime!(2026-03-01 0:00 UTC);
        let tenant = Tenant::new_trial("a", "Shop", None, 7, t0);
        store.insert(&tenant).await.unwrap();
        store.inject_conflicts(1);

        let report = ExpirySweeper::new(store.clone())
            .run(t0 + Duration::days(8))
            .await
            .unwrap();

        assert_eq!(report.expired, 0);
        assert_eq!(report.conflicts, 1);
        assert_eq!(store.write_count(), 0);
    }
}
