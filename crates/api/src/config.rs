//! Server configuration loaded from the environment

use std::str::FromStr;
use std::time::Duration;

use storefront_billing::{PaymentProviderConfig, PlanPrices};

const DEFAULT_PLAN_PRICES: &str = "basic:1900,pro:4900";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// HS256 secret shared with the identity provider that signs bearer ID tokens
    pub session_token_secret: String,
    pub session_ttl_days: i64,
    pub cookie_secure: bool,
    pub trial_days: i64,
    /// None disables checkout
    pub payment_provider: Option<PaymentProviderConfig>,
    pub plan_prices: PlanPrices,
    /// Externally reachable base URL of this server, used to build the payment return URL
    pub public_base_url: String,
    /// Where the payment return endpoint sends the customer afterwards
    pub admin_console_url: String,
    pub allowed_origins: Vec<String>,
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn parsed_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| {
            ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }
        }),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let session_token_secret = required("SESSION_TOKEN_SECRET")?;

        let session_ttl_days: i64 = parsed_or("SESSION_TTL_DAYS", 7)?;
        if session_ttl_days <= 0 {
            return Err(ConfigError::Invalid {
                key: "SESSION_TTL_DAYS",
                reason: "must be positive".to_string(),
            });
        }
        let trial_days: i64 = parsed_or("TRIAL_DAYS", 7)?;
        if trial_days < 0 {
            return Err(ConfigError::Invalid {
                key: "TRIAL_DAYS",
                reason: "must not be negative".to_string(),
            });
        }

        let payment_provider = match (
            std::env::var("PAYMENT_PROVIDER_URL").ok().filter(|v| !v.is_empty()),
            std::env::var("PAYMENT_PROVIDER_API_KEY").ok().filter(|v| !v.is_empty()),
        ) {
            (Some(base_url), Some(api_key)) => Some(PaymentProviderConfig {
                base_url,
                api_key,
                timeout: Duration::from_secs(parsed_or("PAYMENT_PROVIDER_TIMEOUT_SECS", 10)?),
            }),
            _ => None,
        };

        let plan_prices = match std::env::var("PLAN_PRICES") {
            Ok(raw) if !raw.trim().is_empty() => raw,
            _ => DEFAULT_PLAN_PRICES.to_string(),
        }
        .parse()
        .map_err(|reason| ConfigError::Invalid {
            key: "PLAN_PRICES",
            reason,
        })?;

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_url,
            bind_address: parsed_or("BIND_ADDRESS", "0.0.0.0:8080".to_string())?,
            session_token_secret,
            session_ttl_days,
            cookie_secure: parsed_or("COOKIE_SECURE", true)?,
            trial_days,
            payment_provider,
            plan_prices,
            public_base_url: parsed_or("PUBLIC_BASE_URL", "http://localhost:8080".to_string())?,
            admin_console_url: parsed_or("ADMIN_CONSOLE_URL", "/admin".to_string())?,
            allowed_origins,
        })
    }

    /// Defaults for in-process servers: no database, no payment provider
    pub fn local(session_token_secret: impl Into<String>) -> Self {
        Self {
            database_url: String::new(),
            bind_address: "127.0.0.1:8080".to_string(),
            session_token_secret: session_token_secret.into(),
            session_ttl_days: 7,
            cookie_secure: true,
            trial_days: 7,
            payment_provider: None,
            plan_prices: DEFAULT_PLAN_PRICES.parse().unwrap_or_default(),
            public_base_url: "http://localhost:8080".to_string(),
            admin_console_url: "/admin".to_string(),
            allowed_origins: vec![],
        }
    }
}
