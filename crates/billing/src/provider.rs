//! External payment provider
//!
//! Only checkout creation goes through the provider. Credits arrive later via
//! the return redirect and are reconciled by `PaymentCallbackReconciler`.
//! Calls are bounded by a timeout and never retried here; the error is
//! surfaced to the user, who may try again.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use storefront_shared::TenantId;

use crate::error::{BillingError, BillingResult};

/// Provider settings
#[derive(Debug, Clone)]
pub struct PaymentProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// A checkout the customer should be redirected to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub checkout_id: String,
    pub redirect_url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout(
        &self,
        tenant_id: TenantId,
        months: u32,
        idempotency_key: &str,
        return_url: &str,
    ) -> BillingResult<CheckoutSession>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutRequest<'a> {
    tenant_id: String,
    months: u32,
    idempotency_key: &'a str,
    return_url: &'a str,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    code: Option<String>,
    #[serde(alias = "message")]
    description: Option<String>,
}

/// JSON-over-HTTP provider adapter
#[derive(Clone)]
pub struct HttpPaymentProvider {
    client: Client,
    config: PaymentProviderConfig,
}

impl HttpPaymentProvider {
    pub fn new(config: PaymentProviderConfig) -> BillingResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout.min(Duration::from_secs(5)))
            .timeout(config.timeout)
            .build()
            .map_err(|e| BillingError::UpstreamPayment {
                code: "client_init".to_string(),
                description: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    fn transport_error(err: reqwest::Error) -> BillingError {
        let code = if err.is_timeout() { "timeout" } else { "transport" };
        BillingError::UpstreamPayment {
            code: code.to_string(),
            description: err.to_string(),
        }
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_checkout(
        &self,
        tenant_id: TenantId,
        months: u32,
        idempotency_key: &str,
        return_url: &str,
    ) -> BillingResult<CheckoutSession> {
        let url = format!("{}/checkouts", self.config.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(&CheckoutRequest {
                tenant_id: tenant_id.to_string(),
                months,
                idempotency_key,
                return_url,
            })
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed = serde_json::from_str::<ProviderErrorBody>(&body).ok();
            let code = parsed
                .as_ref()
                .and_then(|b| b.code.clone())
                .unwrap_or_else(|| format!("http_{}", status.as_u16()));
            let description = parsed
                .and_then(|b| b.description)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

            tracing::warn!(
                tenant_id = %tenant_id,
                status = status.as_u16(),
                code = %code,
                "Payment provider rejected checkout"
            );
            return Err(BillingError::UpstreamPayment { code, description });
        }

        let checkout: CheckoutSession = response.json().await.map_err(|e| {
            BillingError::UpstreamPayment {
                code: "invalid_response".to_string(),
                description: e.to_string(),
            }
        })?;

        tracing::info!(
            tenant_id = %tenant_id,
            months = months,
            checkout_id = %checkout.checkout_id,
            "Checkout created"
        );
        Ok(checkout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(url: String, timeout: Duration) -> HttpPaymentProvider {
        HttpPaymentProvider::new(PaymentProviderConfig {
            base_url: url,
            api_key: "sk_test".to_string(),
            timeout,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_checkout_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/checkouts")
            .match_header("authorization", "Bearer sk_test")
            .match_header("idempotency-key", "key-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"checkoutId":"co_1","redirectUrl":"https://pay.example.com/co_1"}"#)
            .create_async()
            .await;

        let checkout = provider(server.url(), Duration::from_secs(5))
            .create_checkout(TenantId::new(), 3, "key-1", "https://app.example.com/return")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(checkout.checkout_id, "co_1");
        assert_eq!(checkout.redirect_url, "https://pay.example.com/co_1");
    }

    #[tokio::test]
    async fn test_provider_rejection_keeps_code_and_description() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/checkouts")
            .with_status(402)
            .with_body(r#"{"code":"card_declined","description":"Card was declined"}"#)
            .create_async()
            .await;

        let err = provider(server.url(), Duration::from_secs(5))
            .create_checkout(TenantId::new(), 1, "key-2", "https://app.example.com/return")
            .await
            .unwrap_err();

        match err {
            BillingError::UpstreamPayment { code, description } => {
                assert_eq!(code, "card_declined");
                assert_eq!(description, "Card was declined");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_error_body_falls_back_to_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/checkouts")
            .with_status(503)
            .with_body("upstream down")
            .create_async()
            .await;

        let err = provider(server.url(), Duration::from_secs(5))
            .create_checkout(TenantId::new(), 1, "key-3", "https://app.example.com/return")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BillingError::UpstreamPayment { ref code, .. } if code == "http_503"
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transport_error() {
        // Nothing listens on port 9 locally
        let err = provider("http://127.0.0.1:9".to_string(), Duration::from_secs(2))
            .create_checkout(TenantId::new(), 1, "key-4", "https://app.example.com/return")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BillingError::UpstreamPayment { ref code, .. } if code == "transport" || code == "timeout"
        ));
    }
}
