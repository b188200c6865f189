//! Payment gateway adapters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::payments::{ChargeOutcome, ChargeRequest, PaymentError, PaymentGateway};
use crate::config::PaymentSettings;

use super::error::InfraError;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Serialize)]
struct ChargeBody<'a> {
    amount: Decimal,
    currency: &'a str,
    reference: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ChargeReply {
    Approved { reference: String },
    Declined { reason: String },
}

/// JSON-over-HTTP gateway. The order id travels as the idempotency key header.
pub struct HttpPaymentGateway {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("storefront/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::payments(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PaymentError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(IDEMPOTENCY_HEADER, request.idempotency_key.as_str())
            .json(&ChargeBody {
                amount: request.amount,
                currency: &request.currency,
                reference: &request.order_number,
            });
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| PaymentError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PaymentError::Transport(format!("gateway answered {status}")));
        }
        if !status.is_success() && status != StatusCode::PAYMENT_REQUIRED {
            let text = response.text().await.unwrap_or_default();
            return Err(PaymentError::Protocol(format!("status {status} body {text}")));
        }

        match response
            .json::<ChargeReply>()
            .await
            .map_err(|err| PaymentError::Protocol(err.to_string()))?
        {
            ChargeReply::Approved { reference } => Ok(ChargeOutcome::Approved { reference }),
            ChargeReply::Declined { reason } => Ok(ChargeOutcome::Declined { reason }),
        }
    }
}

/// Approves every charge; settlement happens outside the service.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualPaymentGateway;

#[async_trait]
impl PaymentGateway for ManualPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PaymentError> {
        Ok(ChargeOutcome::Approved {
            reference: format!("manual-{}", request.idempotency_key),
        })
    }
}

/// Pick the gateway the settings describe.
pub fn gateway_from_settings(
    settings: &PaymentSettings,
) -> Result<Box<dyn PaymentGateway>, InfraError> {
    match settings.endpoint.as_deref() {
        Some(endpoint) => Ok(Box::new(HttpPaymentGateway::new(
            endpoint,
            settings.api_key.clone(),
            settings.timeout,
        )?)),
        None => Ok(Box::new(ManualPaymentGateway)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_gateway_reference_is_stable() {
        let request = ChargeRequest {
            idempotency_key: "5b1f".into(),
            order_number: "ORD-00AA11BB".into(),
            amount: Decimal::new(3168, 2),
            currency: "USD".into(),
        };
        let first = ManualPaymentGateway.charge(&request).await.expect("charge");
        let second = ManualPaymentGateway.charge(&request).await.expect("charge");
        assert_eq!(first, second);
        assert_eq!(
            first,
            ChargeOutcome::Approved {
                reference: "manual-5b1f".into()
            }
        );
    }

    #[test]
    fn reply_decodes_tagged_status() {
        let reply: ChargeReply =
            serde_json::from_str(r#"{"status":"declined","reason":"insufficient funds"}"#)
                .expect("decode");
        assert!(matches!(reply, ChargeReply::Declined { reason } if reason == "insufficient funds"));
    }
}
