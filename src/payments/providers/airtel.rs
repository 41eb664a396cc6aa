//! Airtel Money collection adapter.
//!
//! Same contract as the MTN adapter with Airtel's transaction codes:
//! TS = success, TF = failed, TIP = transaction in progress.

use crate::config::MomoConfig;
use crate::error::{AppError, AppResult};
use crate::payments::providers::verify_hmac_sha256;
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    ChargeIntent, PaymentMethod, ProviderCharge, ProviderPaymentStatus, ProviderRefund,
    RefundOutcome, RefundStatus, TransactionStatus, WebhookUpdate,
};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

const PROVIDER: &str = "airtel_money";

pub struct AirtelMoneyProvider {
    config: MomoConfig,
    client: Client,
}

impl AirtelMoneyProvider {
    pub fn new(config: MomoConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    async fn make_request<T>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> AppResult<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.config.base_url, endpoint);

        for attempt in 0..=self.config.max_retries {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.config.api_key)
                .header("Content-Type", "application/json");

            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    if attempt < self.config.max_retries && (e.is_timeout() || e.is_connect()) {
                        let backoff = 2_u64.pow(attempt);
                        warn!(
                            "Airtel Money request error, retrying after {}s (attempt {}): {}",
                            backoff,
                            attempt + 1,
                            e
                        );
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        continue;
                    }
                    return Err(AppError::provider_unavailable(PROVIDER, e.to_string()));
                }
            };

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if attempt < self.config.max_retries {
                    let backoff = 2_u64.pow(attempt);
                    warn!(
                        "Airtel Money returned {}, retrying after {}s (attempt {})",
                        status,
                        backoff,
                        attempt + 1
                    );
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    continue;
                }
                return Err(AppError::provider_unavailable(
                    PROVIDER,
                    format!("HTTP {} after {} retries", status, self.config.max_retries),
                ));
            }

            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(AppError::provider_rejected(
                    PROVIDER,
                    format!("HTTP {}: {}", status, text),
                ));
            }

            return serde_json::from_str::<T>(&text).map(Some).map_err(|e| {
                AppError::provider_rejected(PROVIDER, format!("invalid response format: {}", e))
            });
        }

        Err(AppError::provider_unavailable(
            PROVIDER,
            "retries exhausted".to_string(),
        ))
    }

    fn map_status(code: &str, message: Option<String>) -> ProviderPaymentStatus {
        match code {
            "TS" => ProviderPaymentStatus::Completed { paid_at: None },
            "TF" => ProviderPaymentStatus::Failed { reason: message },
            _ => ProviderPaymentStatus::Pending,
        }
    }
}

#[async_trait]
impl PaymentProvider for AirtelMoneyProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::AirtelMoney
    }

    async fn initiate(&self, intent: &ChargeIntent) -> AppResult<ProviderCharge> {
        let msisdn = intent
            .msisdn
            .as_deref()
            .ok_or_else(|| AppError::validation("Airtel Money payments require a phone number"))?;

        info!(
            reference = %intent.reference,
            amount = %intent.amount,
            currency = %intent.currency,
            "initiating Airtel Money collection"
        );

        let payload = serde_json::json!({
            "reference": intent.reference,
            "subscriber": { "msisdn": msisdn },
            "transaction": {
                // The internal reference is the transaction id, so a retried
                // initiate lands on the same provider-side transaction.
                "id": intent.reference,
                "amount": intent.amount.to_string(),
                "currency": intent.currency,
            },
        });

        let response: AirtelPaymentResponse = self
            .make_request(Method::POST, "/merchant/v1/payments/", Some(&payload))
            .await?
            .ok_or_else(|| {
                AppError::provider_rejected(PROVIDER, "payments endpoint not found".to_string())
            })?;

        Ok(ProviderCharge {
            provider_reference: Some(response.data.transaction.id),
            instructions: format!(
                "Confirm the payment of {} {} from your Airtel Money account {}.",
                intent.amount, intent.currency, msisdn
            ),
            initial_status: TransactionStatus::Processing,
            provider_data: Some(serde_json::json!({
                "status": response.data.transaction.status,
            })),
            crypto: None,
        })
    }

    async fn verify(&self, reference: &str) -> AppResult<ProviderPaymentStatus> {
        let response: Option<AirtelPaymentResponse> = self
            .make_request(
                Method::GET,
                &format!("/standard/v1/payments/{}", reference),
                None,
            )
            .await?;

        Ok(match response {
            Some(body) => Self::map_status(&body.data.transaction.status, body.data.transaction.message),
            None => ProviderPaymentStatus::Pending,
        })
    }

    async fn refund(&self, request: &ProviderRefund) -> AppResult<RefundOutcome> {
        let provider_reference = request.provider_reference.as_deref().ok_or_else(|| {
            AppError::validation("cannot refund an Airtel Money payment without a provider reference")
        })?;

        let payload = serde_json::json!({
            "transaction": { "airtel_money_id": provider_reference },
        });

        let response: AirtelPaymentResponse = self
            .make_request(Method::POST, "/standard/v1/payments/refund", Some(&payload))
            .await?
            .ok_or_else(|| {
                AppError::provider_rejected(PROVIDER, "refund endpoint not found".to_string())
            })?;

        Ok(RefundOutcome {
            refund_reference: response.data.transaction.id,
            status: RefundStatus::Pending,
        })
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha256(&self.config.webhook_secret, payload, signature)
    }

    fn parse_webhook(&self, payload: &[u8]) -> AppResult<WebhookUpdate> {
        let event: AirtelWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            AppError::InvalidWebhookPayload {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(WebhookUpdate {
            provider_reference: event.transaction.id,
            status: Self::map_status(&event.transaction.status, event.transaction.message),
            event_type: format!("airtel.{}", event.transaction.status.to_lowercase()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AirtelPaymentResponse {
    data: AirtelPaymentData,
}

#[derive(Debug, Deserialize)]
struct AirtelPaymentData {
    transaction: AirtelTransaction,
}

#[derive(Debug, Deserialize)]
struct AirtelTransaction {
    id: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AirtelWebhookEvent {
    transaction: AirtelTransaction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::sign_hmac_sha256;

    fn test_provider() -> AirtelMoneyProvider {
        AirtelMoneyProvider::new(MomoConfig {
            base_url: "https://openapiuat.airtel.africa".to_string(),
            api_key: "token".to_string(),
            webhook_secret: "hook_secret".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        })
    }

    #[test]
    fn airtel_codes_map_to_lifecycle() {
        assert_eq!(
            AirtelMoneyProvider::map_status("TS", None),
            ProviderPaymentStatus::Completed { paid_at: None }
        );
        assert!(matches!(
            AirtelMoneyProvider::map_status("TF", Some("insufficient funds".to_string())),
            ProviderPaymentStatus::Failed { .. }
        ));
        assert_eq!(
            AirtelMoneyProvider::map_status("TIP", None),
            ProviderPaymentStatus::Pending
        );
    }

    #[test]
    fn webhook_round_trip() {
        let provider = test_provider();
        let payload = br#"{"transaction":{"id":"PAY-7","status":"TS"}}"#;
        let signature = sign_hmac_sha256("hook_secret", payload);
        assert!(provider.validate_webhook_signature(payload, &signature));

        let update = provider.parse_webhook(payload).unwrap();
        assert_eq!(update.provider_reference, "PAY-7");
        assert_eq!(
            update.status,
            ProviderPaymentStatus::Completed { paid_at: None }
        );
    }
}
