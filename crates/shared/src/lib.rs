#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storefront shared types
//!
//! Data model and database helpers used by the API server, the billing
//! engine and the background worker.

pub mod db;
pub mod identity;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use identity::{AccessError, Caller, RequestContext, Role};
pub use types::{
    storage_timestamp, AuditLogEntry, InternalRecord, StoreProfile, SubscriptionStatus, Tenant,
    TenantId, TenantSubscription, User,
};
