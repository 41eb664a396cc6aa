//! Cryptocurrency gateway adapter.
//!
//! Quotes the fiat amount into the settlement asset at request time using
//! the exchange-rate store (refreshed from the gateway when stale), allocates
//! a receiving address, and treats a charge as completed only once the chain
//! has confirmed it deeply enough.

use crate::config::CryptoConfig;
use crate::database::exchange_rate_repository::ExchangeRateRepository;
use crate::error::{AppError, AppResult};
use crate::payments::providers::verify_hmac_sha256;
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    ChargeIntent, CryptoQuote, PaymentMethod, ProviderCharge, ProviderPaymentStatus,
    ProviderRefund, RefundOutcome, RefundStatus, TransactionStatus, WebhookUpdate,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PROVIDER: &str = "crypto";

pub struct CryptoProvider {
    config: CryptoConfig,
    client: Client,
    rates: Arc<ExchangeRateRepository>,
}

impl CryptoProvider {
    pub fn new(config: CryptoConfig, rates: Arc<ExchangeRateRepository>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            client,
            rates,
        }
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
        let url = format!("{}{}", self.config.gateway_url, endpoint);
        let mut request = self
            .client
            .request(method, &url)
            .header("X-Api-Key", &self.config.api_key)
            .header("Content-Type", "application/json");

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            AppError::provider_unavailable(PROVIDER, e.to_string())
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::provider_unavailable(
                PROVIDER,
                format!("HTTP {}", status),
            ));
        }
        if !status.is_success() {
            return Err(AppError::provider_rejected(
                PROVIDER,
                format!("HTTP {}: {}", status, text),
            ));
        }

        serde_json::from_str::<T>(&text).map(Some).map_err(|e| {
            AppError::provider_rejected(PROVIDER, format!("invalid response format: {}", e))
        })
    }

    /// Current fiat -> asset rate: stored quote when fresh enough, gateway
    /// otherwise (persisting what the gateway returned).
    async fn resolve_rate(&self, fiat_currency: &str) -> AppResult<BigDecimal> {
        let max_age = ChronoDuration::minutes(self.config.rate_max_age_minutes);

        if let Some(stored) = self
            .rates
            .get_current_rate(fiat_currency, &self.config.asset_code)
            .await?
        {
            if stored.is_fresh(Utc::now(), max_age) {
                return Ok(stored.rate);
            }
            warn!(
                "Stored {}->{} rate is stale, refreshing from gateway",
                fiat_currency, self.config.asset_code
            );
        }

        let quote: GatewayRate = self
            .make_request(
                Method::GET,
                &format!(
                    "/v1/rates?from={}&to={}",
                    fiat_currency, self.config.asset_code
                ),
                None,
            )
            .await?
            .ok_or_else(|| {
                AppError::provider_unavailable(PROVIDER, "rate endpoint not found".to_string())
            })?;

        let rate = BigDecimal::from_str(&quote.rate).map_err(|e| {
            AppError::provider_rejected(PROVIDER, format!("unparseable rate '{}': {}", quote.rate, e))
        })?;

        self.rates
            .upsert_rate(fiat_currency, &self.config.asset_code, &rate, Some("gateway"))
            .await?;

        Ok(rate)
    }

    pub(crate) fn convert(amount: &BigDecimal, rate: &BigDecimal) -> BigDecimal {
        (amount * rate).round(8)
    }

    fn map_status(status: &str, confirmations: u32, required: u32) -> ProviderPaymentStatus {
        match status {
            "confirmed" if confirmations >= required => {
                ProviderPaymentStatus::Completed { paid_at: None }
            }
            "failed" | "underpaid" => ProviderPaymentStatus::Failed {
                reason: Some(status.to_string()),
            },
            // Seen on chain but not deep enough yet, or not seen at all.
            _ => ProviderPaymentStatus::Pending,
        }
    }
}

#[async_trait]
impl PaymentProvider for CryptoProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Crypto
    }

    async fn initiate(&self, intent: &ChargeIntent) -> AppResult<ProviderCharge> {
        let rate = self.resolve_rate(&intent.currency).await?;
        let pay_amount = Self::convert(&intent.amount, &rate);

        let payload = serde_json::json!({
            "reference": intent.reference,
            "amount": pay_amount.to_string(),
            "asset": self.config.asset_code,
        });

        let charge: GatewayCharge = self
            .make_request(Method::POST, "/v1/charges", Some(&payload))
            .await?
            .ok_or_else(|| {
                AppError::provider_unavailable(PROVIDER, "charge endpoint not found".to_string())
            })?;

        info!(
            reference = %intent.reference,
            charge_id = %charge.charge_id,
            %pay_amount,
            asset = %self.config.asset_code,
            "crypto charge created"
        );

        let quote = CryptoQuote {
            pay_amount,
            pay_currency: self.config.asset_code.clone(),
            pay_address: charge.address.clone(),
        };

        Ok(ProviderCharge {
            provider_reference: Some(charge.charge_id),
            instructions: format!(
                "Send exactly {} {} to address {}. The payment confirms after {} network \
                 confirmations.",
                quote.pay_amount,
                quote.pay_currency,
                quote.pay_address,
                self.config.confirmations_required
            ),
            initial_status: TransactionStatus::Processing,
            provider_data: Some(serde_json::json!({ "address": charge.address })),
            crypto: Some(quote),
        })
    }

    async fn verify(&self, reference: &str) -> AppResult<ProviderPaymentStatus> {
        let charge: Option<GatewayChargeStatus> = self
            .make_request(Method::GET, &format!("/v1/charges/{}", reference), None)
            .await?;

        Ok(match charge {
            Some(body) => Self::map_status(
                &body.status,
                body.confirmations,
                self.config.confirmations_required,
            ),
            None => ProviderPaymentStatus::Pending,
        })
    }

    async fn refund(&self, request: &ProviderRefund) -> AppResult<RefundOutcome> {
        let provider_reference = request.provider_reference.as_deref().ok_or_else(|| {
            AppError::validation("cannot refund a crypto charge without a provider reference")
        })?;

        let refund: GatewayRefund = self
            .make_request(
                Method::POST,
                &format!("/v1/charges/{}/refund", provider_reference),
                Some(&serde_json::json!({ "reason": request.reason })),
            )
            .await?
            .ok_or_else(|| {
                AppError::provider_rejected(PROVIDER, "charge not found for refund".to_string())
            })?;

        Ok(RefundOutcome {
            refund_reference: refund.refund_id,
            status: RefundStatus::Pending,
        })
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha256(&self.config.webhook_secret, payload, signature)
    }

    fn parse_webhook(&self, payload: &[u8]) -> AppResult<WebhookUpdate> {
        let event: GatewayWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            AppError::InvalidWebhookPayload {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(WebhookUpdate {
            provider_reference: event.charge_id,
            status: Self::map_status(
                &event.status,
                event.confirmations,
                self.config.confirmations_required,
            ),
            event_type: format!("crypto.{}", event.status),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GatewayRate {
    rate: String,
}

#[derive(Debug, Deserialize)]
struct GatewayCharge {
    charge_id: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct GatewayChargeStatus {
    status: String,
    #[serde(default)]
    confirmations: u32,
}

#[derive(Debug, Deserialize)]
struct GatewayRefund {
    refund_id: String,
}

#[derive(Debug, Deserialize)]
struct GatewayWebhookEvent {
    charge_id: String,
    status: String,
    #[serde(default)]
    confirmations: u32,
}
