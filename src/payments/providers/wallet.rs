//! Internal wallet adapter.
//!
//! The one provider with no external call: `initiate` checks and locks the
//! balance synchronously, failing fast with the shortfall when the wallet
//! cannot cover the amount. The lock is the authorization, so `verify`
//! reports completed and settlement later converts the lock into a debit,
//! keeping wallet payments on the same reconciliation path as the rest.

use crate::database::error::DatabaseErrorKind;
use crate::database::wallet_repository::WalletRepository;
use crate::error::{AppError, AppResult};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    ChargeIntent, PaymentMethod, ProviderCharge, ProviderPaymentStatus, ProviderRefund,
    RefundOutcome, RefundStatus, TransactionStatus, WebhookUpdate,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct WalletProvider {
    wallets: Arc<WalletRepository>,
}

impl WalletProvider {
    pub fn new(wallets: Arc<WalletRepository>) -> Self {
        Self { wallets }
    }
}

#[async_trait]
impl PaymentProvider for WalletProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Wallet
    }

    async fn initiate(&self, intent: &ChargeIntent) -> AppResult<ProviderCharge> {
        self.wallets
            .ensure_wallet(intent.user_id, &intent.currency)
            .await?;

        let wallet = self
            .wallets
            .lock(intent.user_id, &intent.amount, &intent.reference)
            .await
            .map_err(|e| match e.kind {
                DatabaseErrorKind::InsufficientBalance {
                    available,
                    required,
                } => AppError::InsufficientBalance {
                    shortfall: required - available,
                    currency: intent.currency.clone(),
                },
                _ => AppError::Database(e),
            })?;

        info!(
            reference = %intent.reference,
            user_id = %intent.user_id,
            amount = %intent.amount,
            remaining = %wallet.available_balance,
            "wallet funds locked"
        );

        Ok(ProviderCharge {
            provider_reference: Some(intent.reference.clone()),
            instructions: format!(
                "{} {} reserved from your IkazeProperty wallet.",
                intent.amount, intent.currency
            ),
            initial_status: TransactionStatus::Processing,
            provider_data: None,
            crypto: None,
        })
    }

    async fn verify(&self, _reference: &str) -> AppResult<ProviderPaymentStatus> {
        // Funds were locked at initiate; there is nothing external left to
        // confirm.
        Ok(ProviderPaymentStatus::Completed { paid_at: None })
    }

    async fn refund(&self, request: &ProviderRefund) -> AppResult<RefundOutcome> {
        // The ledger credit is applied by settlement; the adapter only names
        // the refund.
        Ok(RefundOutcome {
            refund_reference: format!("RF-{}", request.reference),
            status: RefundStatus::Completed,
        })
    }

    fn validate_webhook_signature(&self, _payload: &[u8], _signature: &str) -> bool {
        // Wallet payments never receive webhooks; fail closed.
        false
    }

    fn parse_webhook(&self, _payload: &[u8]) -> AppResult<WebhookUpdate> {
        Err(AppError::InvalidWebhookPayload {
            provider: PaymentMethod::Wallet.to_string(),
            message: "wallet payments have no webhook channel".to_string(),
        })
    }
}
