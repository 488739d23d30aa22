//! Payment return reconciliation
//!
//! The provider sends the customer back with `status`, `months` and the
//! idempotency key issued at checkout. The same redirect can arrive any
//! number of times (refresh, back button), so crediting relies on the
//! durable ledger inside `SubscriptionTransitionService`, never on the
//! client remembering that it already handled the redirect.

use serde::{Deserialize, Serialize};
use storefront_shared::{RequestContext, TenantId};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::transitions::SubscriptionTransitionService;

/// Outcome reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Success,
    Failure,
    Pending,
}

impl std::str::FromStr for PaymentOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(PaymentOutcome::Success),
            "failure" | "failed" => Ok(PaymentOutcome::Failure),
            "pending" => Ok(PaymentOutcome::Pending),
            other => Err(format!("Unknown payment status '{}'", other)),
        }
    }
}

/// Parsed return signal
#[derive(Debug, Clone)]
pub struct PaymentReturn {
    pub tenant_id: TenantId,
    pub outcome: PaymentOutcome,
    pub months: Option<u32>,
    pub idempotency_key: Option<String>,
}

/// User-visible result. The only thing carried forward after the redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentNotice {
    PaymentCredited,
    PaymentAlreadyApplied,
    PaymentFailed,
    PaymentPending,
}

impl PaymentNotice {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentNotice::PaymentCredited => "payment_credited",
            PaymentNotice::PaymentAlreadyApplied => "payment_already_applied",
            PaymentNotice::PaymentFailed => "payment_failed",
            PaymentNotice::PaymentPending => "payment_pending",
        }
    }
}

#[derive(Clone)]
pub struct PaymentCallbackReconciler {
    transitions: SubscriptionTransitionService,
}

impl PaymentCallbackReconciler {
    pub fn new(transitions: SubscriptionTransitionService) -> Self {
        Self { transitions }
    }

    /// `ctx` is None when the redirect arrived without a valid session
    pub async fn reconcile(
        &self,
        ctx: Option<&RequestContext>,
        signal: PaymentReturn,
        now: OffsetDateTime,
    ) -> BillingResult<PaymentNotice> {
        match signal.outcome {
            PaymentOutcome::Failure => {
                tracing::info!(tenant_id = %signal.tenant_id, "Payment reported as failed");
                return Ok(PaymentNotice::PaymentFailed);
            }
            PaymentOutcome::Pending => {
                tracing::info!(tenant_id = %signal.tenant_id, "Payment reported as pending");
                return Ok(PaymentNotice::PaymentPending);
            }
            PaymentOutcome::Success => {}
        }

        let Some(ctx) = ctx else {
            tracing::warn!(
                tenant_id = %signal.tenant_id,
                "Rejected anonymous payment success callback"
            );
            return Err(BillingError::Unauthenticated);
        };

        let months = signal
            .months
            .ok_or_else(|| BillingError::Validation("months: required on success".to_string()))?;
        let key = signal
            .idempotency_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| BillingError::Validation("key: required on success".to_string()))?;

        // Ownership (or super admin) is enforced inside payment_succeeded
        let credit = self
            .transitions
            .payment_succeeded(ctx, signal.tenant_id, months, key, now)
            .await?;

        Ok(if credit.applied {
            PaymentNotice::PaymentCredited
        } else {
            PaymentNotice::PaymentAlreadyApplied
        })
    }
}
