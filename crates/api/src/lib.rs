// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Storefront API Library
//!
//! HTTP surface of the entitlement engine: sessions, tenant overrides,
//! payment returns, gift codes and the super-admin console endpoints.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod users;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;

#[cfg(test)]
pub(crate) mod test_support;
