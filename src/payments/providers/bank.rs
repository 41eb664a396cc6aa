//! Manual bank-transfer adapter.
//!
//! There is no live bank API: `initiate` hands the customer wiring
//! instructions carrying the payment reference, and settlement arrives later
//! as an authenticated back-office confirmation webhook. `verify` therefore
//! always reports pending; only the webhook (or expiry) resolves a transfer.

use crate::config::BankConfig;
use crate::error::{AppError, AppResult};
use crate::payments::providers::verify_hmac_sha256;
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    ChargeIntent, PaymentMethod, ProviderCharge, ProviderPaymentStatus, ProviderRefund,
    RefundOutcome, RefundStatus, TransactionStatus, WebhookUpdate,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

const PROVIDER: &str = "bank_transfer";

pub struct BankTransferProvider {
    config: BankConfig,
}

impl BankTransferProvider {
    pub fn new(config: BankConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PaymentProvider for BankTransferProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::BankTransfer
    }

    async fn initiate(&self, intent: &ChargeIntent) -> AppResult<ProviderCharge> {
        info!(
            reference = %intent.reference,
            amount = %intent.amount,
            "issuing bank transfer instructions"
        );

        Ok(ProviderCharge {
            provider_reference: Some(intent.reference.clone()),
            instructions: format!(
                "Transfer {} {} to {} account {} ({}). Use '{}' as the transfer reference so \
                 we can match your payment.",
                intent.amount,
                intent.currency,
                self.config.bank_name,
                self.config.account_number,
                self.config.account_name,
                intent.reference
            ),
            initial_status: TransactionStatus::Pending,
            provider_data: None,
            crypto: None,
        })
    }

    async fn verify(&self, _reference: &str) -> AppResult<ProviderPaymentStatus> {
        // Nothing to poll; the back office confirms via webhook.
        Ok(ProviderPaymentStatus::Pending)
    }

    async fn refund(&self, request: &ProviderRefund) -> AppResult<RefundOutcome> {
        // Refunds are wired back manually by finance; record the request.
        info!(
            reference = %request.reference,
            amount = %request.amount,
            "bank transfer refund queued for manual processing"
        );
        Ok(RefundOutcome {
            refund_reference: format!("RF-{}", request.reference),
            status: RefundStatus::Pending,
        })
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha256(&self.config.webhook_secret, payload, signature)
    }

    fn parse_webhook(&self, payload: &[u8]) -> AppResult<WebhookUpdate> {
        let event: BankConfirmation = serde_json::from_slice(payload).map_err(|e| {
            AppError::InvalidWebhookPayload {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            }
        })?;

        let status = match event.status.as_str() {
            "confirmed" => ProviderPaymentStatus::Completed {
                paid_at: event.confirmed_at,
            },
            "rejected" => ProviderPaymentStatus::Failed {
                reason: event.note,
            },
            _ => ProviderPaymentStatus::Pending,
        };

        Ok(WebhookUpdate {
            provider_reference: event.reference,
            status,
            event_type: format!("bank.{}", event.status),
        })
    }
}

/// Back-office confirmation posted by finance tooling.
#[derive(Debug, Deserialize)]
struct BankConfirmation {
    reference: String,
    status: String,
    #[serde(default)]
    confirmed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::sign_hmac_sha256;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use uuid::Uuid;

    fn test_provider() -> BankTransferProvider {
        BankTransferProvider::new(BankConfig {
            bank_name: "Bank of Kigali".to_string(),
            account_number: "00012345".to_string(),
            account_name: "IkazeProperty Ltd".to_string(),
            webhook_secret: "bank_secret".to_string(),
        })
    }

    #[tokio::test]
    async fn instructions_carry_the_reference() {
        let provider = test_provider();
        let intent = ChargeIntent {
            reference: "PAY-abc123".to_string(),
            user_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("50000").unwrap(),
            currency: "RWF".to_string(),
            msisdn: None,
        };

        let charge = provider.initiate(&intent).await.unwrap();
        assert!(charge.instructions.contains("PAY-abc123"));
        assert!(charge.instructions.contains("00012345"));
        assert_eq!(charge.initial_status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn verify_is_always_pending() {
        let provider = test_provider();
        assert_eq!(
            provider.verify("PAY-abc123").await.unwrap(),
            ProviderPaymentStatus::Pending
        );
    }

    #[test]
    fn confirmation_webhook_completes() {
        let provider = test_provider();
        let payload = br#"{"reference":"PAY-abc123","status":"confirmed"}"#;
        let signature = sign_hmac_sha256("bank_secret", payload);
        assert!(provider.validate_webhook_signature(payload, &signature));

        let update = provider.parse_webhook(payload).unwrap();
        assert!(matches!(
            update.status,
            ProviderPaymentStatus::Completed { .. }
        ));
    }

    #[test]
    fn rejection_webhook_fails_with_note() {
        let provider = test_provider();
        let update = provider
            .parse_webhook(br#"{"reference":"PAY-abc123","status":"rejected","note":"no matching deposit"}"#)
            .unwrap();
        assert_eq!(
            update.status,
            ProviderPaymentStatus::Failed {
                reason: Some("no matching deposit".to_string())
            }
        );
    }
}
