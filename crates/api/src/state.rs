//! Application state

use std::sync::Arc;

use sqlx::PgPool;
use storefront_billing::{BillingService, HttpPaymentProvider, PaymentProvider};

use crate::{
    auth::{PgSessionStore, SessionAuthority, SessionStore},
    config::Config,
    users::{PgUserStore, UserStore},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub billing: BillingService,
    pub sessions: SessionAuthority,
    pub users: Arc<dyn UserStore>,
    /// None when no payment provider is configured
    pub payments: Option<Arc<dyn PaymentProvider>>,
}

impl AppState {
    /// Postgres-backed state for the server binary
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let billing = BillingService::from_pool(pool.clone(), config.trial_days);

        let payments: Option<Arc<dyn PaymentProvider>> = match &config.payment_provider {
            Some(provider) => {
                tracing::info!(base_url = %provider.base_url, "Payment provider configured");
                Some(Arc::new(HttpPaymentProvider::new(provider.clone())?))
            }
            None => {
                tracing::warn!("Payment provider not configured - checkout disabled");
                None
            }
        };

        Ok(Self::from_parts(
            config,
            billing,
            Arc::new(PgUserStore::new(pool.clone())),
            Arc::new(PgSessionStore::new(pool)),
            payments,
        ))
    }

    /// Assemble state from already-built services
    pub fn from_parts(
        config: Config,
        billing: BillingService,
        users: Arc<dyn UserStore>,
        session_store: Arc<dyn SessionStore>,
        payments: Option<Arc<dyn PaymentProvider>>,
    ) -> Self {
        let sessions = SessionAuthority::new(
            session_store,
            users.clone(),
            billing.audit.clone(),
            &config.session_token_secret,
            config.session_ttl_days,
        );

        Self {
            config: Arc::new(config),
            billing,
            sessions,
            users,
            payments,
        }
    }
}
