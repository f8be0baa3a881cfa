//! # Payment Gateway
//!
//! Port to the hosted-checkout payment gateway, plus the HTTP adapter.
//!
//! ## Checkout & Verification Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  App              WashPass                       Gateway                │
//! │   │  POST /v1/checkouts │                            │                  │
//! │   │────────────────────►│  POST /v1/checkouts        │                  │
//! │   │                     │───────────────────────────►│                  │
//! │   │                     │◄─────────── { id } ────────│                  │
//! │   │                     │  payments row (pending,    │                  │
//! │   │◄─── checkout id ────│  external id = checkout id)│                  │
//! │   │                                                  │                  │
//! │   │  pays on the hosted page ───────────────────────►│                  │
//! │   │                                                  │                  │
//! │   │  confirm { id, resourcePath } (UNTRUSTED)        │                  │
//! │   │────────────────────►│                            │                  │
//! │   │                     │  GET /v1/checkouts/{id}/payment               │
//! │   │                     │───────────────────────────►│                  │
//! │   │                     │◄──── { result.code } ──────│                  │
//! │   │                     │                            │                  │
//! │   │                     │  code in allow-list? ──► entitlement          │
//! │   │                     │  otherwise ──────────► payment failed         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The inbound `resourcePath` is never used to build a URL; verification
//! always goes to the configured base URL with our own credentials.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;
use washpass_core::Money;

use crate::config::GatewayConfig;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway is not configured")]
    NotConfigured,

    #[error("Payment gateway request failed: {0}")]
    Transport(String),

    #[error("Payment gateway returned HTTP {status}")]
    Status { status: u16 },

    #[error("Payment gateway response could not be read: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            GatewayError::Status {
                status: status.as_u16(),
            }
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidResponse(err.to_string())
    }
}

/// What we ask the gateway to collect.
#[derive(Debug, Clone)]
pub struct CheckoutDraft {
    pub amount: Money,
    /// Our payment id, echoed back by the gateway in its reports.
    pub merchant_reference: String,
}

/// The gateway's own answer about a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayVerification {
    pub result_code: String,
    pub description: Option<String>,
    /// Amount the gateway reports as charged, when it reports one.
    pub amount_cents: Option<i64>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Prepares a hosted checkout and returns its id.
    async fn prepare_checkout(&self, draft: &CheckoutDraft) -> Result<String, GatewayError>;

    /// Server-to-server status check for a checkout id.
    async fn verify(&self, transaction_id: &str) -> Result<GatewayVerification, GatewayError>;
}

// =============================================================================
// HTTP Adapter
// =============================================================================

#[derive(Debug, Deserialize)]
struct ResultBody {
    code: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    #[serde(default)]
    id: Option<String>,
    result: ResultBody,
}

#[derive(Debug, Deserialize)]
struct PaymentStatusResponse {
    result: ResultBody,
    #[serde(default)]
    amount: Option<String>,
}

/// `reqwest` client for a HyperPay-style REST gateway.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let base_url = Url::parse(&config.base_url)?;

        Ok(HttpGateway {
            client,
            base_url,
            config: config.clone(),
        })
    }

    fn ensure_configured(&self) -> Result<(), GatewayError> {
        if self.config.is_configured() {
            Ok(())
        } else {
            Err(GatewayError::NotConfigured)
        }
    }

    fn checkout_status_url(&self, transaction_id: &str) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidResponse("base URL cannot have a path".into()))?
            .pop_if_empty()
            .extend(["v1", "checkouts", transaction_id, "payment"]);
        url.query_pairs_mut()
            .append_pair("entityId", &self.config.entity_id);
        Ok(url)
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn prepare_checkout(&self, draft: &CheckoutDraft) -> Result<String, GatewayError> {
        self.ensure_configured()?;
        let url = self.base_url.join("v1/checkouts")?;
        let amount = draft.amount.to_decimal_string();

        debug!(payment_id = %draft.merchant_reference, amount = %amount, "Preparing gateway checkout");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.access_token)
            .form(&[
                ("entityId", self.config.entity_id.as_str()),
                ("amount", amount.as_str()),
                ("currency", self.config.currency.as_str()),
                ("paymentType", "DB"),
                ("merchantTransactionId", draft.merchant_reference.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: CheckoutResponse = response.json().await?;
        match body.id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => {
                warn!(code = %body.result.code, "Gateway did not return a checkout id");
                Err(GatewayError::InvalidResponse(format!(
                    "no checkout id (result code {})",
                    body.result.code
                )))
            }
        }
    }

    async fn verify(&self, transaction_id: &str) -> Result<GatewayVerification, GatewayError> {
        self.ensure_configured()?;
        let url = self.checkout_status_url(transaction_id)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;

        // The gateway answers declined payments with 400 and a JSON body;
        // only a body without a result code is a transport-level failure.
        let status = response.status();
        let body: PaymentStatusResponse = match response.json().await {
            Ok(body) => body,
            Err(_) => {
                return Err(GatewayError::Status {
                    status: status.as_u16(),
                })
            }
        };

        let amount_cents = match body.amount.as_deref() {
            Some(raw) => Some(
                Money::parse_decimal(raw)
                    .ok_or_else(|| GatewayError::InvalidResponse(format!("bad amount '{}'", raw)))?
                    .cents(),
            ),
            None => None,
        };

        debug!(code = %body.result.code, http_status = status.as_u16(), "Gateway verification answered");

        Ok(GatewayVerification {
            result_code: body.result.code,
            description: body.result.description,
            amount_cents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> GatewayConfig {
        GatewayConfig {
            base_url: "https://gateway.example/".into(),
            entity_id: "entity-1".into(),
            access_token: "token".into(),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_status_url_ignores_hostile_ids() {
        let gateway = HttpGateway::new(&configured()).unwrap();

        let url = gateway.checkout_status_url("ABC123").unwrap();
        assert_eq!(
            url.as_str(),
            "https://gateway.example/v1/checkouts/ABC123/payment?entityId=entity-1"
        );

        // Path segments are percent-encoded, so an id cannot change the host or path
        let url = gateway.checkout_status_url("../../admin?x=1").unwrap();
        assert_eq!(url.host_str(), Some("gateway.example"));
        assert!(url.path().starts_with("/v1/checkouts/"));
        assert!(!url.path().contains("/admin"));
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_refuses() {
        let gateway = HttpGateway::new(&GatewayConfig::default()).unwrap();
        let err = gateway.verify("ABC").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured));
    }

    #[test]
    fn test_status_body_parses() {
        let body: PaymentStatusResponse = serde_json::from_str(
            r#"{"id":"8ac7","result":{"code":"000.100.110","description":"Request successfully processed"},"amount":"120.00","currency":"SAR"}"#,
        )
        .unwrap();
        assert_eq!(body.result.code, "000.100.110");
        assert_eq!(body.amount.as_deref(), Some("120.00"));
    }
}
