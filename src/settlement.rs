//! Settlement engine: the single place a payment outcome is turned into
//! state.
//!
//! Every path here transitions the transaction status FIRST. The conditional
//! transition is the claim: of any number of concurrent settlers (webhook
//! delivery racing the reconciliation loop, overlapping loop runs), exactly
//! one observes the transition applied and runs the side effects. The rest
//! see an illegal edge and walk away.

use crate::database::promotion_repository::PromotionRepository;
use crate::database::transaction_repository::{
    PaymentTransaction, TransactionRepository, TransitionOutcome,
};
use crate::database::wallet_repository::{WalletEntryType, WalletRepository};
use crate::error::{AppError, AppResult};
use crate::notifications::{NotificationEmitter, NotificationKind};
use crate::payments::types::{PaymentMethod, TransactionStatus, TransactionType};
use crate::promotions::PromotionActivator;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SettlementEngine {
    transactions: Arc<TransactionRepository>,
    wallets: Arc<WalletRepository>,
    promotions: Arc<PromotionRepository>,
    activator: Arc<PromotionActivator>,
    notifier: Arc<dyn NotificationEmitter>,
}

impl SettlementEngine {
    pub fn new(
        transactions: Arc<TransactionRepository>,
        wallets: Arc<WalletRepository>,
        promotions: Arc<PromotionRepository>,
        activator: Arc<PromotionActivator>,
        notifier: Arc<dyn NotificationEmitter>,
    ) -> Self {
        Self {
            transactions,
            wallets,
            promotions,
            activator,
            notifier,
        }
    }

    /// Finalize a payment the provider confirmed. Returns `false` when
    /// another settler already resolved the transaction.
    pub async fn settle_completed(
        &self,
        tx: &PaymentTransaction,
        provider_response: Option<serde_json::Value>,
    ) -> AppResult<bool> {
        let settled = match self
            .transactions
            .transition(
                &tx.internal_reference,
                TransactionStatus::Completed,
                provider_response,
            )
            .await?
        {
            TransitionOutcome::Applied(tx) => tx,
            TransitionOutcome::Illegal { current } => {
                if !matches!(current, TransactionStatus::Completed | TransactionStatus::Refunded) {
                    // The provider says paid but we already gave up on the
                    // transaction. Funds arrived late; needs operator eyes.
                    warn!(
                        reference = %tx.internal_reference,
                        %current,
                        "provider reports completion for a transaction already resolved as {current}"
                    );
                }
                return Ok(false);
            }
        };

        info!(
            reference = %settled.internal_reference,
            method = %settled.payment_method,
            amount = %settled.amount,
            "payment completed"
        );

        if settled.payment_method == PaymentMethod::Wallet {
            self.wallets
                .debit(settled.user_id, &settled.amount, &settled.internal_reference)
                .await?;
        }

        match settled.transaction_type {
            TransactionType::WalletTopup => {
                self.wallets
                    .ensure_wallet(settled.user_id, &settled.currency)
                    .await?;
                self.wallets
                    .credit(
                        settled.user_id,
                        &settled.amount,
                        WalletEntryType::Deposit,
                        Some(&settled.internal_reference),
                    )
                    .await?;
                self.notify(
                    &settled,
                    NotificationKind::WalletCredited,
                    json!({ "amount": settled.amount.to_string(), "currency": settled.currency }),
                )
                .await;
            }
            TransactionType::ListingPromotion => {
                let promotion = self.activator.activate(&settled).await?;
                self.notify(
                    &settled,
                    NotificationKind::PromotionActivated,
                    json!({
                        "listing_id": promotion.listing_id,
                        "expires_at": promotion.expires_at,
                    }),
                )
                .await;
            }
        }

        self.notify(
            &settled,
            NotificationKind::PaymentCompleted,
            json!({ "reference": settled.internal_reference }),
        )
        .await;

        Ok(true)
    }

    /// Resolve a payment the provider declined.
    pub async fn settle_failed(
        &self,
        tx: &PaymentTransaction,
        reason: Option<String>,
    ) -> AppResult<bool> {
        self.resolve_unsuccessful(
            tx,
            TransactionStatus::Failed,
            NotificationKind::PaymentFailed,
            reason,
        )
        .await
    }

    /// Expire a payment that never got a definitive provider answer.
    pub async fn settle_expired(&self, tx: &PaymentTransaction) -> AppResult<bool> {
        self.resolve_unsuccessful(
            tx,
            TransactionStatus::Expired,
            NotificationKind::PaymentExpired,
            None,
        )
        .await
    }

    /// User-requested cancellation; only legal while unresolved.
    pub async fn cancel(&self, tx: &PaymentTransaction) -> AppResult<bool> {
        self.resolve_unsuccessful(
            tx,
            TransactionStatus::Failed,
            NotificationKind::PaymentCancelled,
            Some("cancelled by user".to_string()),
        )
        .await
    }

    async fn resolve_unsuccessful(
        &self,
        tx: &PaymentTransaction,
        next: TransactionStatus,
        kind: NotificationKind,
        reason: Option<String>,
    ) -> AppResult<bool> {
        let response = reason.map(|r| json!({ "reason": r }));

        let resolved = match self
            .transactions
            .transition(&tx.internal_reference, next, response)
            .await?
        {
            TransitionOutcome::Applied(tx) => tx,
            TransitionOutcome::Illegal { current } => {
                if current == TransactionStatus::Completed {
                    return Err(AppError::IllegalTransition {
                        reference: tx.internal_reference.clone(),
                        from: current,
                        to: next,
                    });
                }
                return Ok(false);
            }
        };

        info!(
            reference = %resolved.internal_reference,
            status = %next,
            "payment resolved without settlement"
        );

        // Locked wallet funds go back to the owner.
        if resolved.payment_method == PaymentMethod::Wallet {
            self.wallets
                .unlock(
                    resolved.user_id,
                    &resolved.amount,
                    &resolved.internal_reference,
                )
                .await?;
        }

        self.notify(
            &resolved,
            kind,
            json!({ "reference": resolved.internal_reference }),
        )
        .await;

        Ok(true)
    }

    /// Reverse a completed payment after the provider accepted the refund.
    pub async fn refund(
        &self,
        tx: &PaymentTransaction,
        refund_reference: &str,
        amount: &bigdecimal::BigDecimal,
    ) -> AppResult<()> {
        let refunded = match self
            .transactions
            .transition(
                &tx.internal_reference,
                TransactionStatus::Refunded,
                Some(json!({ "refund_reference": refund_reference })),
            )
            .await?
        {
            TransitionOutcome::Applied(tx) => tx,
            TransitionOutcome::Illegal { current } => {
                return Err(AppError::IllegalTransition {
                    reference: tx.internal_reference.clone(),
                    from: current,
                    to: TransactionStatus::Refunded,
                });
            }
        };

        if refunded.payment_method == PaymentMethod::Wallet {
            self.wallets
                .credit(
                    refunded.user_id,
                    amount,
                    WalletEntryType::Refund,
                    Some(&refunded.internal_reference),
                )
                .await?;
        }

        // A refunded promotion purchase loses its promotion slot.
        if refunded.transaction_type == TransactionType::ListingPromotion {
            if let Some(cancelled) = self
                .promotions
                .cancel_for_payment(&refunded.internal_reference)
                .await?
            {
                info!(
                    reference = %refunded.internal_reference,
                    listing_id = %cancelled.listing_id,
                    "promotion cancelled after refund"
                );
            }
        }

        self.notify(
            &refunded,
            NotificationKind::RefundIssued,
            json!({
                "reference": refunded.internal_reference,
                "refund_reference": refund_reference,
            }),
        )
        .await;

        Ok(())
    }

    /// Notification failures are logged by the emitter, never propagated:
    /// the state transition already happened and must stand.
    async fn notify(&self, tx: &PaymentTransaction, kind: NotificationKind, payload: serde_json::Value) {
        self.notifier.emit(tx.user_id, kind, payload).await;
    }
}
