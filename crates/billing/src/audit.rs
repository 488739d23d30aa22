//! Audit logging for privileged actions
//!
//! `AuditLogger::record` appends one entry per privileged mutation. It never
//! fails the caller: by the time it runs the mutation is already persisted,
//! and a lost audit record is preferable to reverting a support action or a
//! customer's payment credit. A write that still fails after one retry is
//! logged at error level with a `CRITICAL:` prefix for operator paging.

use std::sync::Arc;
use std::time::Duration;

use storefront_shared::{AuditLogEntry, RequestContext};
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::AuditSink;

/// Audit action names
pub mod action {
    pub const SUPER_ADMIN_LOGIN: &str = "super_admin_login";
    pub const SUPER_ADMIN_LOGOUT: &str = "super_admin_logout";
    pub const STORE_PAUSED: &str = "store_paused";
    pub const STORE_REACTIVATED: &str = "store_reactivated";
    pub const SUBSCRIPTION_EXTENDED: &str = "subscription_extended";
    pub const SUBSCRIPTION_FORCE_RENEWED: &str = "subscription_force_renewed";
    pub const PLAN_CHANGED: &str = "plan_changed";
    pub const STORE_SOFT_DELETED: &str = "store_soft_deleted";
    pub const STORE_HARD_DELETED: &str = "store_hard_deleted";
    pub const STORE_MARKED_CLONE: &str = "store_marked_clone";
    pub const STORE_MARKED_SUSPICIOUS: &str = "store_marked_suspicious";
    pub const STORE_PATCHED: &str = "store_patched";
    pub const PAYMENT_CREDITED: &str = "payment_credited";
    pub const GIFT_CARD_REDEEMED: &str = "gift_card_redeemed";
    pub const GIFT_CODE_CREATED: &str = "gift_code_created";
}

/// Audit target types
pub mod target_type {
    pub const STORE: &str = "store";
    pub const SESSION: &str = "session";
    pub const GIFT_CODE: &str = "gift_code";
}

/// Keys whose values never reach the audit log
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "session_token",
    "id_token",
    "api_key",
    "secret",
    "bearer_token",
    "card_number",
];

/// What happened, to what. The actor comes from the `RequestContext`.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: &'static str,
    pub target_type: &'static str,
    pub target_id: String,
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(action: &'static str, target_type: &'static str, target_id: impl ToString) -> Self {
        Self {
            action,
            target_type,
            target_id: target_id.to_string(),
            details: serde_json::json!({}),
        }
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Append an entry for `event` performed by `ctx.caller` at `now`.
    /// Returns whether the entry was persisted.
    pub async fn record(&self, ctx: &RequestContext, event: AuditEvent, now: OffsetDateTime) -> bool {
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            action: event.action.to_string(),
            performed_by: ctx.caller.email.clone(),
            performed_by_uid: ctx.caller.uid.clone(),
            target_type: event.target_type.to_string(),
            target_id: event.target_id,
            timestamp: now,
            details: sanitize_details(event.details),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        };

        // The entry id is fixed before the first attempt, so a retry after an
        // ambiguous failure cannot produce a second row.
        let strategy = ExponentialBackoff::from_millis(50)
            .max_delay(Duration::from_millis(500))
            .map(jitter)
            .take(1);

        match Retry::spawn(strategy, || self.sink.append(&entry)).await {
            Ok(()) => {
                tracing::debug!(
                    action = %entry.action,
                    target_id = %entry.target_id,
                    performed_by_uid = %entry.performed_by_uid,
                    "Audit entry recorded"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    action = %entry.action,
                    target_type = %entry.target_type,
                    target_id = %entry.target_id,
                    performed_by_uid = %entry.performed_by_uid,
                    details = %entry.details,
                    "CRITICAL: Failed to write audit log entry after retry. \
                     The mutation stands but the audit trail is incomplete."
                );
                false
            }
        }
    }

    /// Newest first, optionally restricted to one target
    pub async fn recent(
        &self,
        limit: i64,
        target_id: Option<&str>,
    ) -> BillingResult<Vec<AuditLogEntry>> {
        self.sink.list_recent(limit.clamp(1, 500), target_id).await
    }
}

/// Redact secret-looking keys at the top level of the details object
fn sanitize_details(mut details: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = details.as_object_mut() {
        for key in SENSITIVE_KEYS {
            if obj.contains_key(*key) {
                obj.insert(key.to_string(), serde_json::json!("[REDACTED]"));
            }
        }
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAuditSink;
    use storefront_shared::{Caller, Role};
    use time::macros::datetime;

    fn ctx() -> RequestContext {
        RequestContext {
            caller: Caller {
                uid: "admin-1".to_string(),
                email: "root@example.com".to_string(),
                role: Role::SuperAdmin,
                is_active: true,
            },
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("tests".to_string()),
        }
    }

    #[test]
    fn test_sanitize_redacts_secrets() {
        let details = sanitize_details(serde_json::json!({
            "token": "abc",
            "reason": "support ticket",
        }));
        assert_eq!(details["token"], "[REDACTED]");
        assert_eq!(details["reason"], "support ticket");
    }

    #[tokio::test]
    async fn test_record_persists_actor_and_target() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone());

        let ok = logger
            .record(
                &ctx(),
                AuditEvent::new(action::STORE_PAUSED, target_type::STORE, "store-1")
                    .details(serde_json::json!({ "previous_status": "active" })),
                datetime!(2026-02-01 0:00 UTC),
            )
            .await;

        assert!(ok);
        let entries = sink.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "store_paused");
        assert_eq!(entries[0].performed_by_uid, "admin-1");
        assert_eq!(entries[0].performed_by, "root@example.com");
        assert_eq!(entries[0].target_id, "store-1");
        assert_eq!(entries[0].ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_record_failure_is_swallowed() {
        let sink = Arc::new(InMemoryAuditSink::new());
        sink.fail_writes(true);
        let logger = AuditLogger::new(sink.clone());

        let ok = logger
            .record(
                &ctx(),
                AuditEvent::new(action::STORE_PAUSED, target_type::STORE, "store-1"),
                datetime!(2026-02-01 0:00 UTC),
            )
            .await;

        assert!(!ok);
        assert!(sink.entries().await.is_empty());
    }
}
