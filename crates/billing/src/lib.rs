// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storefront Billing Module
//!
//! Entitlement and subscription lifecycle engine for storefront tenants.
//!
//! ## Features
//!
//! - **Entitlement**: The single "is this tenant active now" decision
//! - **Transitions**: Payments, gift codes and audited super-admin overrides
//! - **Payment Returns**: Idempotent reconciliation of provider redirects
//! - **Expiry Sweep**: Batch trialing → expired transition, safe to re-run
//! - **Audit Log**: One entry per privileged mutation
//! - **Dashboard**: Admin aggregate computed with the same evaluator
//! - **Invariants**: Read-only consistency checks over tenant records

pub mod audit;
pub mod callback;
pub mod dashboard;
pub mod entitlement;
pub mod error;
pub mod invariants;
pub mod memory;
pub mod postgres;
pub mod provider;
pub mod store;
pub mod sweeper;
pub mod transitions;


use std::sync::Arc;

// Audit
pub use audit::{action, target_type, AuditEvent, AuditLogger};

// Callback
pub use callback::{PaymentCallbackReconciler, PaymentNotice, PaymentOutcome, PaymentReturn};

// Dashboard
pub use dashboard::{summarize, DashboardSummary, PlanPrices};

// Entitlement
pub use entitlement::{evaluate, is_active, Entitlement, EntitlementSource, InactiveReason};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Provider
pub use provider::{CheckoutSession, HttpPaymentProvider, PaymentProvider, PaymentProviderConfig};

// Storage
pub use memory::{InMemoryAuditSink, InMemoryGiftCodeStore, InMemoryPaymentLedger, InMemoryTenantStore};
pub use postgres::{PgAuditSink, PgGiftCodeStore, PgPaymentLedger, PgTenantStore};
pub use store::{AuditSink, ClaimOutcome, GiftCodeStore, LedgerState, PaymentLedger, TenantStore};

// Sweeper
pub use sweeper::{ExpirySweeper, SweepReport};

// Transitions
pub use transitions::{
    AdminAction, OverrideResult, PaymentCredit, SubscriptionTransitionService, BILLING_MONTH_DAYS,
};

use sqlx::PgPool;

/// Main billing service that wires the engine to one set of stores
#[derive(Clone)]
pub struct BillingService {
    pub tenants: Arc<dyn TenantStore>,
    pub gift_codes: Arc<dyn GiftCodeStore>,
    pub audit: AuditLogger,
    pub transitions: SubscriptionTransitionService,
    pub reconciler: PaymentCallbackReconciler,
    pub sweeper: ExpirySweeper,
    pub invariants: InvariantChecker,
}

impl BillingService {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        ledger: Arc<dyn PaymentLedger>,
        gift_codes: Arc<dyn GiftCodeStore>,
        audit_sink: Arc<dyn AuditSink>,
        trial_days: i64,
    ) -> Self {
        let audit = AuditLogger::new(audit_sink);
        let transitions = SubscriptionTransitionService::new(
            tenants.clone(),
            ledger,
            gift_codes.clone(),
            audit.clone(),
            trial_days,
        );

        Self {
            tenants: tenants.clone(),
            gift_codes,
            audit,
            reconciler: PaymentCallbackReconciler::new(transitions.clone()),
            transitions,
            sweeper: ExpirySweeper::new(tenants.clone()),
            invariants: InvariantChecker::new(tenants),
        }
    }

    /// Postgres-backed service
    pub fn from_pool(pool: PgPool, trial_days: i64) -> Self {
        Self::new(
            Arc::new(PgTenantStore::new(pool.clone())),
            Arc::new(PgPaymentLedger::new(pool.clone())),
            Arc::new(PgGiftCodeStore::new(pool.clone())),
            Arc::new(PgAuditSink::new(pool)),
            trial_days,
        )
    }

    /// Process-local service for tests and local development
    pub fn new_in_memory(trial_days: i64) -> Self {
        Self::new(
            Arc::new(InMemoryTenantStore::new()),
            Arc::new(InMemoryPaymentLedger::new()),
            Arc::new(InMemoryGiftCodeStore::new()),
            Arc::new(InMemoryAuditSink::new()),
            trial_days,
        )
    }
}
