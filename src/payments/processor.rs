//! Payment processor: the factory fronting every provider adapter.
//!
//! Dispatch is keyed on `PaymentMethod` through a registry built once at
//! startup. The processor owns request validation, idempotent initiation and
//! webhook intake; outcome handling lives in the settlement engine.

use crate::config::PaymentsConfig;
use crate::database::promotion_repository::PromotionRepository;
use crate::database::transaction_repository::{
    NewPaymentTransaction, PaymentTransaction, TransactionRepository,
};
use crate::database::wallet_repository::WalletRepository;
use crate::database::webhook_repository::{WebhookEvent, WebhookRepository};
use crate::error::{AppError, AppResult};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    ChargeIntent, CryptoQuote, InitiatePayment, PaymentInitResult, PaymentMethod,
    ProviderCharge, ProviderPaymentStatus, ProviderRefund, RefundOutcome, TransactionStatus,
    TransactionType, WebhookUpdate,
};
use crate::promotions::PromotionCatalog;
use crate::settlement::SettlementEngine;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PaymentProcessor {
    registry: HashMap<PaymentMethod, Arc<dyn PaymentProvider>>,
    transactions: Arc<TransactionRepository>,
    promotions: Arc<PromotionRepository>,
    webhooks: Arc<WebhookRepository>,
    wallets: Arc<WalletRepository>,
    settlement: Arc<SettlementEngine>,
    catalog: Arc<dyn PromotionCatalog>,
    config: PaymentsConfig,
}

impl PaymentProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PaymentsConfig,
        providers: Vec<Arc<dyn PaymentProvider>>,
        transactions: Arc<TransactionRepository>,
        promotions: Arc<PromotionRepository>,
        webhooks: Arc<WebhookRepository>,
        wallets: Arc<WalletRepository>,
        settlement: Arc<SettlementEngine>,
        catalog: Arc<dyn PromotionCatalog>,
    ) -> Self {
        let registry = providers
            .into_iter()
            .map(|provider| (provider.method(), provider))
            .collect();

        Self {
            registry,
            transactions,
            promotions,
            webhooks,
            wallets,
            settlement,
            catalog,
            config,
        }
    }

    /// Adapter lookup; an unregistered method is a hard error, never a
    /// silent no-op.
    fn provider(&self, method: PaymentMethod) -> AppResult<Arc<dyn PaymentProvider>> {
        self.registry
            .get(&method)
            .cloned()
            .ok_or_else(|| AppError::unsupported_method(method.to_string()))
    }

    /// Start a payment. Safe to retry: a repeated idempotency key returns
    /// the original intent without charging again.
    pub async fn initiate_payment(&self, request: InitiatePayment) -> AppResult<PaymentInitResult> {
        validate_request(&self.config, &request)?;
        let adapter = self.provider(request.payment_method)?;

        if let Some(existing) = self
            .transactions
            .find_by_idempotency_key(&request.idempotency_key)
            .await?
        {
            info!(
                reference = %existing.internal_reference,
                "idempotency key replay, returning existing intent"
            );
            return Ok(init_result_from(&existing));
        }

        if request.transaction_type == TransactionType::ListingPromotion {
            self.check_promotion_purchase(&request).await?;
        }

        let reference = TransactionRepository::generate_reference();
        let intent = ChargeIntent {
            reference: reference.clone(),
            user_id: request.user_id,
            amount: request.amount.clone(),
            currency: request.currency.clone(),
            msisdn: request.msisdn.clone(),
        };
        let expires_at = Utc::now() + Duration::minutes(self.config.payment_expiry_minutes);

        if request.payment_method == PaymentMethod::Wallet {
            self.initiate_wallet(adapter, request, intent, expires_at)
                .await
        } else {
            self.initiate_external(adapter, request, intent, expires_at)
                .await
        }
    }

    /// Wallet payments lock funds synchronously; only a successful lock
    /// creates a transaction row, so an insufficient balance leaves no
    /// state behind.
    async fn initiate_wallet(
        &self,
        adapter: Arc<dyn PaymentProvider>,
        request: InitiatePayment,
        intent: ChargeIntent,
        expires_at: chrono::DateTime<Utc>,
    ) -> AppResult<PaymentInitResult> {
        let charge = adapter.initiate(&intent).await?;
        let blob = response_blob(&charge);

        let created = self
            .transactions
            .create(NewPaymentTransaction {
                user_id: request.user_id,
                amount: request.amount.clone(),
                currency: request.currency.clone(),
                payment_method: request.payment_method,
                transaction_type: request.transaction_type,
                idempotency_key: request.idempotency_key.clone(),
                status: charge.initial_status,
                provider_reference: charge.provider_reference.clone(),
                provider_response: Some(blob),
                listing_id: request.listing_id,
                package_id: request.package_id,
                metadata: request.metadata.clone(),
                expires_at,
            })
            .await;

        match created {
            Ok(tx) => Ok(init_result_from(&tx)),
            Err(e) if e.is_unique_violation() => {
                // Lost an idempotency race after locking: give the funds
                // back and return the intent that won.
                self.wallets
                    .unlock(intent.user_id, &intent.amount, &intent.reference)
                    .await?;
                let existing = self
                    .transactions
                    .find_by_idempotency_key(&request.idempotency_key)
                    .await?
                    .ok_or_else(|| AppError::Database(e))?;
                Ok(init_result_from(&existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// External providers get the row first: the intent must exist before
    /// any network call so a crash or timeout leaves a pending record for
    /// the reconciliation loop to chase.
    async fn initiate_external(
        &self,
        adapter: Arc<dyn PaymentProvider>,
        request: InitiatePayment,
        intent: ChargeIntent,
        expires_at: chrono::DateTime<Utc>,
    ) -> AppResult<PaymentInitResult> {
        let created = self
            .transactions
            .create(NewPaymentTransaction {
                user_id: request.user_id,
                amount: request.amount.clone(),
                currency: request.currency.clone(),
                payment_method: request.payment_method,
                transaction_type: request.transaction_type,
                idempotency_key: request.idempotency_key.clone(),
                status: TransactionStatus::Pending,
                provider_reference: None,
                provider_response: None,
                listing_id: request.listing_id,
                package_id: request.package_id,
                metadata: request.metadata.clone(),
                expires_at,
            })
            .await;

        match created {
            Ok(_) => {}
            Err(e) if e.is_unique_violation() => {
                let existing = self
                    .transactions
                    .find_by_idempotency_key(&request.idempotency_key)
                    .await?
                    .ok_or_else(|| AppError::Database(e))?;
                return Ok(init_result_from(&existing));
            }
            Err(e) => return Err(e.into()),
        }

        match adapter.initiate(&intent).await {
            Ok(charge) => {
                if let Some(ref provider_reference) = charge.provider_reference {
                    self.transactions
                        .set_provider_reference(&intent.reference, provider_reference)
                        .await?;
                }
                self.transactions
                    .set_provider_response(&intent.reference, &response_blob(&charge))
                    .await?;
                if charge.initial_status == TransactionStatus::Processing {
                    self.transactions
                        .transition(&intent.reference, TransactionStatus::Processing, None)
                        .await?;
                }

                Ok(PaymentInitResult {
                    reference: intent.reference,
                    status: charge.initial_status,
                    instructions: charge.instructions,
                    expires_at,
                    crypto: charge.crypto,
                })
            }
            Err(e) if e.is_retryable() => {
                // Transient provider trouble is not a user-facing failure:
                // the intent stays pending and the loop re-verifies it.
                warn!(
                    reference = %intent.reference,
                    "provider unreachable during initiate, leaving intent pending: {}",
                    e
                );
                Ok(PaymentInitResult {
                    reference: intent.reference,
                    status: TransactionStatus::Pending,
                    instructions: "Your payment request was received and is awaiting provider \
                                   confirmation."
                        .to_string(),
                    expires_at,
                    crypto: None,
                })
            }
            Err(e) => {
                self.transactions
                    .transition(
                        &intent.reference,
                        TransactionStatus::Failed,
                        Some(json!({ "reason": e.to_string() })),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Promotion purchases are priced by the catalog, not by the caller.
    async fn check_promotion_purchase(&self, request: &InitiatePayment) -> AppResult<()> {
        let package_id = request
            .package_id
            .ok_or_else(|| AppError::validation("promotion payments require a package id"))?;
        let listing_id = request
            .listing_id
            .ok_or_else(|| AppError::validation("promotion payments require a listing id"))?;

        let package = self.catalog.package(package_id).await?;
        if package.price != request.amount || package.currency != request.currency {
            return Err(AppError::validation(format!(
                "amount does not match package '{}' price of {} {}",
                package.name, package.price, package.currency
            )));
        }

        self.catalog.listing(listing_id).await?;

        if self
            .promotions
            .find_active_by_listing(listing_id)
            .await?
            .is_some()
        {
            return Err(AppError::validation(
                "listing already has an active promotion",
            ));
        }

        Ok(())
    }

    /// Provider-side status of a charge; pure dispatch, no state change.
    pub async fn verify_payment(
        &self,
        method: PaymentMethod,
        reference: &str,
    ) -> AppResult<ProviderPaymentStatus> {
        self.provider(method)?.verify(reference).await
    }

    /// Stored view of a transaction, backing the public status endpoint.
    pub async fn get_transaction(&self, reference: &str) -> AppResult<PaymentTransaction> {
        self.transactions
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| AppError::not_found("transaction", reference))
    }

    /// User-initiated cancellation, legal only before resolution.
    pub async fn cancel_payment(&self, reference: &str, user_id: uuid::Uuid) -> AppResult<()> {
        let tx = self.get_transaction(reference).await?;
        if tx.user_id != user_id {
            return Err(AppError::not_found("transaction", reference));
        }
        if tx.status.is_terminal() {
            return Err(AppError::IllegalTransition {
                reference: reference.to_string(),
                from: tx.status,
                to: TransactionStatus::Failed,
            });
        }

        if self.settlement.cancel(&tx).await? {
            Ok(())
        } else {
            Err(AppError::validation("payment is already resolved"))
        }
    }

    /// Admin-initiated refund of a completed payment, full or partial.
    pub async fn refund_payment(
        &self,
        reference: &str,
        amount: Option<BigDecimal>,
        reason: Option<String>,
    ) -> AppResult<RefundOutcome> {
        let tx = self.get_transaction(reference).await?;
        if tx.status != TransactionStatus::Completed {
            return Err(AppError::IllegalTransition {
                reference: reference.to_string(),
                from: tx.status,
                to: TransactionStatus::Refunded,
            });
        }

        let amount = amount.unwrap_or_else(|| tx.amount.clone());
        if amount <= BigDecimal::from(0) || amount > tx.amount {
            return Err(AppError::validation(
                "refund amount must be positive and within the original payment",
            ));
        }

        let adapter = self.provider(tx.payment_method)?;
        let outcome = adapter
            .refund(&ProviderRefund {
                reference: tx.internal_reference.clone(),
                provider_reference: tx.provider_reference.clone(),
                amount: amount.clone(),
                currency: tx.currency.clone(),
                reason,
            })
            .await?;

        self.settlement
            .refund(&tx, &outcome.refund_reference, &amount)
            .await?;

        Ok(outcome)
    }

    /// Provider-pushed update. The payload is authenticated before anything
    /// is mutated, journaled, then routed through the same settlement paths
    /// as the reconciliation loop.
    pub async fn process_webhook(
        &self,
        method: PaymentMethod,
        payload: &[u8],
        signature: &str,
    ) -> AppResult<()> {
        let adapter = self.provider(method)?;

        if !adapter.validate_webhook_signature(payload, signature) {
            return Err(AppError::InvalidWebhookSignature {
                provider: method.to_string(),
            });
        }

        let update = adapter.parse_webhook(payload)?;
        let payload_json: serde_json::Value = serde_json::from_slice(payload).map_err(|e| {
            AppError::InvalidWebhookPayload {
                provider: method.to_string(),
                message: e.to_string(),
            }
        })?;

        let event = self
            .webhooks
            .log_event(&update.event_type, method.as_str(), payload_json.clone())
            .await?;

        match self.apply_update(&update, payload_json).await {
            Ok(()) => {
                self.webhooks.mark_processed(event.id).await?;
                Ok(())
            }
            Err(e) => {
                self.webhooks
                    .record_failure(event.id, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Re-run a journaled webhook event whose first processing attempt
    /// failed. The payload was authenticated at receipt; replay decodes the
    /// stored copy and routes it through the same settlement paths, which
    /// are idempotent against repeats.
    pub async fn replay_webhook_event(&self, event: &WebhookEvent) -> AppResult<()> {
        let method: PaymentMethod = event
            .source
            .parse()
            .map_err(|_| AppError::unsupported_method(event.source.clone()))?;
        let adapter = self.provider(method)?;

        let raw = serde_json::to_vec(&event.payload)
            .map_err(|e| AppError::internal(e.to_string()))?;
        let update = adapter.parse_webhook(&raw)?;

        match self.apply_update(&update, event.payload.clone()).await {
            Ok(()) => {
                self.webhooks.mark_processed(event.id).await?;
                Ok(())
            }
            Err(e) => {
                self.webhooks
                    .record_failure(event.id, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    async fn apply_update(
        &self,
        update: &WebhookUpdate,
        payload_json: serde_json::Value,
    ) -> AppResult<()> {
        let tx = match self
            .transactions
            .find_by_provider_reference(&update.provider_reference)
            .await?
        {
            Some(tx) => Some(tx),
            None => {
                self.transactions
                    .find_by_reference(&update.provider_reference)
                    .await?
            }
        };
        let tx = tx.ok_or_else(|| {
            AppError::not_found("transaction", update.provider_reference.clone())
        })?;

        match update.status.clone() {
            ProviderPaymentStatus::Completed { .. } => {
                self.settlement
                    .settle_completed(&tx, Some(payload_json))
                    .await
                    .map(|_| ())
            }
            ProviderPaymentStatus::Failed { reason } => self
                .settlement
                .settle_failed(&tx, reason)
                .await
                .map(|_| ()),
            ProviderPaymentStatus::Pending => Ok(()),
        }
    }
}

fn validate_request(config: &PaymentsConfig, request: &InitiatePayment) -> AppResult<()> {
    if request.amount <= BigDecimal::from(0) {
        return Err(AppError::validation("amount must be positive"));
    }
    if !config.supported_currencies.contains(&request.currency) {
        return Err(AppError::validation(format!(
            "currency '{}' is not supported",
            request.currency
        )));
    }
    if request.idempotency_key.trim().is_empty() {
        return Err(AppError::validation("idempotency key must not be empty"));
    }
    if request.transaction_type == TransactionType::WalletTopup
        && request.payment_method == PaymentMethod::Wallet
    {
        return Err(AppError::validation(
            "a wallet cannot be topped up from itself",
        ));
    }
    if matches!(
        request.payment_method,
        PaymentMethod::MtnMomo | PaymentMethod::AirtelMoney
    ) && request.msisdn.as_deref().map_or(true, str::is_empty)
    {
        return Err(AppError::validation(
            "mobile money payments require a phone number",
        ));
    }
    Ok(())
}

/// Rebuild the public init view from a stored transaction, used for
/// idempotent replays.
fn init_result_from(tx: &PaymentTransaction) -> PaymentInitResult {
    let instructions = tx
        .provider_response
        .as_ref()
        .and_then(|blob| blob.get("instructions"))
        .and_then(|v| v.as_str())
        .unwrap_or("Your payment is being processed.")
        .to_string();

    let crypto: Option<CryptoQuote> = tx
        .provider_response
        .as_ref()
        .and_then(|blob| blob.get("crypto"))
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    PaymentInitResult {
        reference: tx.internal_reference.clone(),
        status: tx.status,
        instructions,
        expires_at: tx.expires_at,
        crypto,
    }
}

fn response_blob(charge: &ProviderCharge) -> serde_json::Value {
    json!({
        "instructions": charge.instructions,
        "provider_data": charge.provider_data,
        "crypto": charge.crypto,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use uuid::Uuid;

    fn payments_config() -> PaymentsConfig {
        PaymentsConfig {
            default_currency: "RWF".to_string(),
            supported_currencies: vec!["RWF".to_string()],
            payment_expiry_minutes: 60,
            reconcile_interval_secs: 180,
            reconcile_batch_size: 25,
            claim_lease_secs: 300,
        }
    }

    fn base_request() -> InitiatePayment {
        InitiatePayment {
            user_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("15000").unwrap(),
            currency: "RWF".to_string(),
            payment_method: PaymentMethod::MtnMomo,
            transaction_type: TransactionType::ListingPromotion,
            idempotency_key: "idem-1".to_string(),
            msisdn: Some("250780000001".to_string()),
            listing_id: Some(Uuid::new_v4()),
            package_id: Some(Uuid::new_v4()),
            metadata: None,
        }
    }

    #[test]
    fn negative_amount_is_rejected() {
        let mut request = base_request();
        request.amount = BigDecimal::from_str("-5").unwrap();
        assert!(matches!(
            validate_request(&payments_config(), &request),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn unsupported_currency_is_rejected() {
        let mut request = base_request();
        request.currency = "EUR".to_string();
        assert!(validate_request(&payments_config(), &request).is_err());
    }

    #[test]
    fn momo_without_msisdn_is_rejected() {
        let mut request = base_request();
        request.msisdn = None;
        assert!(validate_request(&payments_config(), &request).is_err());
    }

    #[test]
    fn wallet_topup_from_wallet_is_rejected() {
        let mut request = base_request();
        request.transaction_type = TransactionType::WalletTopup;
        request.payment_method = PaymentMethod::Wallet;
        request.listing_id = None;
        request.package_id = None;
        assert!(validate_request(&payments_config(), &request).is_err());
    }

    #[test]
    fn valid_request_passes() {
        assert!(validate_request(&payments_config(), &base_request()).is_ok());
    }

    #[test]
    fn replay_view_restores_instructions_and_quote() {
        let tx = PaymentTransaction {
            id: Uuid::new_v4(),
            internal_reference: "PAY-1".to_string(),
            provider_reference: Some("ch_1".to_string()),
            idempotency_key: "idem-1".to_string(),
            user_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("50000").unwrap(),
            currency: "RWF".to_string(),
            payment_method: PaymentMethod::Crypto,
            transaction_type: TransactionType::ListingPromotion,
            status: TransactionStatus::Processing,
            listing_id: Some(Uuid::new_v4()),
            package_id: Some(Uuid::new_v4()),
            provider_response: Some(json!({
                "instructions": "Send exactly 35.5 USDT to address addr1.",
                "crypto": {
                    "pay_amount": "35.5",
                    "pay_currency": "USDT",
                    "pay_address": "addr1",
                },
            })),
            metadata: None,
            claimed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: Utc::now() + Duration::minutes(60),
            completed_at: None,
        };

        let result = init_result_from(&tx);
        assert_eq!(result.reference, "PAY-1");
        assert!(result.instructions.contains("USDT"));
        let quote = result.crypto.expect("quote should survive replay");
        assert_eq!(quote.pay_address, "addr1");
    }
}
