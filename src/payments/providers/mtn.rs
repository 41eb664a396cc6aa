//! MTN Mobile Money collection adapter.
//!
//! Charges are requested against the subscriber's phone and confirmed
//! asynchronously; the internal reference is sent as the provider-side
//! idempotency key, so retrying `initiate` cannot double-charge.

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

const PROVIDER: &str = "mtn_momo";

pub struct MtnMomoProvider {
    config: MomoConfig,
    client: Client,
}

impl MtnMomoProvider {
    pub fn new(config: MomoConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    /// Authenticated request with exponential backoff on 429/5xx. A 404 is
    /// surfaced as `Ok(None)` so `verify` can treat provider lag as pending.
    async fn make_request<T>(
        &self,
        method: Method,
        endpoint: &str,
        reference: Option<&str>,
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
                .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
                .header("Content-Type", "application/json");

            if let Some(reference) = reference {
                request = request.header("X-Reference-Id", reference);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    if attempt < self.config.max_retries && (e.is_timeout() || e.is_connect()) {
                        let backoff = 2_u64.pow(attempt);
                        warn!(
                            "MTN MoMo request error, retrying after {}s (attempt {}): {}",
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
                        "MTN MoMo returned {}, retrying after {}s (attempt {})",
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

    fn map_status(status: &str, reason: Option<String>) -> ProviderPaymentStatus {
        match status {
            "SUCCESSFUL" => ProviderPaymentStatus::Completed { paid_at: None },
            "FAILED" | "REJECTED" | "TIMEOUT" => ProviderPaymentStatus::Failed { reason },
            _ => ProviderPaymentStatus::Pending,
        }
    }
}

#[async_trait]
impl PaymentProvider for MtnMomoProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::MtnMomo
    }

    async fn initiate(&self, intent: &ChargeIntent) -> AppResult<ProviderCharge> {
        let msisdn = intent
            .msisdn
            .as_deref()
            .ok_or_else(|| AppError::validation("MTN MoMo payments require a phone number"))?;

        info!(
            reference = %intent.reference,
            amount = %intent.amount,
            currency = %intent.currency,
            "initiating MTN MoMo collection"
        );

        let payload = serde_json::json!({
            "amount": intent.amount.to_string(),
            "currency": intent.currency,
            "externalId": intent.reference,
            "payer": { "partyIdType": "MSISDN", "partyId": msisdn },
            "payerMessage": "IkazeProperty payment",
        });

        let response: MomoRequestToPayResponse = self
            .make_request(
                Method::POST,
                "/collection/v1_0/requesttopay",
                Some(&intent.reference),
                Some(&payload),
            )
            .await?
            .ok_or_else(|| {
                AppError::provider_rejected(PROVIDER, "collection endpoint not found".to_string())
            })?;

        Ok(ProviderCharge {
            provider_reference: Some(response.reference_id),
            instructions: format!(
                "Approve the payment of {} {} on your MTN Mobile Money phone {}.",
                intent.amount, intent.currency, msisdn
            ),
            initial_status: TransactionStatus::Processing,
            provider_data: Some(serde_json::json!({ "status": response.status })),
            crypto: None,
        })
    }

    async fn verify(&self, reference: &str) -> AppResult<ProviderPaymentStatus> {
        let response: Option<MomoStatusResponse> = self
            .make_request(
                Method::GET,
                &format!("/collection/v1_0/requesttopay/{}", reference),
                None,
                None,
            )
            .await?;

        // The provider may lag behind its own acknowledgement; an unknown
        // reference is pending, not an error.
        Ok(match response {
            Some(body) => Self::map_status(&body.status, body.reason),
            None => ProviderPaymentStatus::Pending,
        })
    }

    async fn refund(&self, request: &ProviderRefund) -> AppResult<RefundOutcome> {
        let provider_reference = request.provider_reference.as_deref().ok_or_else(|| {
            AppError::validation("cannot refund an MTN MoMo payment without a provider reference")
        })?;

        let payload = serde_json::json!({
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "referenceIdToRefund": provider_reference,
            "payerMessage": request.reason.clone().unwrap_or_default(),
        });

        let refund_reference = format!("RF-{}", request.reference);
        let response: MomoRequestToPayResponse = self
            .make_request(
                Method::POST,
                "/disbursement/v1_0/refund",
                Some(&refund_reference),
                Some(&payload),
            )
            .await?
            .ok_or_else(|| {
                AppError::provider_rejected(PROVIDER, "refund endpoint not found".to_string())
            })?;

        Ok(RefundOutcome {
            refund_reference: response.reference_id,
            status: RefundStatus::Pending,
        })
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha256(&self.config.webhook_secret, payload, signature)
    }

    fn parse_webhook(&self, payload: &[u8]) -> AppResult<WebhookUpdate> {
        let event: MomoWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            AppError::InvalidWebhookPayload {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(WebhookUpdate {
            provider_reference: event.reference_id,
            status: Self::map_status(&event.status, event.reason),
            event_type: format!("momo.{}", event.status.to_lowercase()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MomoRequestToPayResponse {
    #[serde(rename = "referenceId")]
    reference_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct MomoStatusResponse {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MomoWebhookEvent {
    #[serde(rename = "referenceId")]
    reference_id: String,
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::sign_hmac_sha256;

    fn test_provider() -> MtnMomoProvider {
        MtnMomoProvider::new(MomoConfig {
            base_url: "https://sandbox.momodeveloper.mtn.com".to_string(),
            api_key: "sk_test".to_string(),
            webhook_secret: "hook_secret".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        })
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            MtnMomoProvider::map_status("SUCCESSFUL", None),
            ProviderPaymentStatus::Completed { paid_at: None }
        );
        assert_eq!(
            MtnMomoProvider::map_status("PENDING", None),
            ProviderPaymentStatus::Pending
        );
        assert!(matches!(
            MtnMomoProvider::map_status("FAILED", Some("payer declined".to_string())),
            ProviderPaymentStatus::Failed { .. }
        ));
        // Anything unrecognized is treated as still in flight.
        assert_eq!(
            MtnMomoProvider::map_status("CREATED", None),
            ProviderPaymentStatus::Pending
        );
    }

    #[test]
    fn webhook_signature_validation() {
        let provider = test_provider();
        let payload = br#"{"referenceId":"PAY-1","status":"SUCCESSFUL"}"#;
        let signature = sign_hmac_sha256("hook_secret", payload);
        assert!(provider.validate_webhook_signature(payload, &signature));
        assert!(!provider.validate_webhook_signature(payload, "bogus"));
    }

    #[test]
    fn webhook_parses_to_update() {
        let provider = test_provider();
        let update = provider
            .parse_webhook(br#"{"referenceId":"PAY-1","status":"SUCCESSFUL"}"#)
            .unwrap();
        assert_eq!(update.provider_reference, "PAY-1");
        assert_eq!(
            update.status,
            ProviderPaymentStatus::Completed { paid_at: None }
        );
        assert_eq!(update.event_type, "momo.successful");
    }

    #[test]
    fn malformed_webhook_is_rejected() {
        let provider = test_provider();
        assert!(provider.parse_webhook(b"not json").is_err());
    }
}
