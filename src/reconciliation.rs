//! Reconciliation loop.
//!
//! The only long-running actor: on a fixed interval it claims a batch of
//! stale pending/processing transactions, re-verifies each against its
//! provider and routes the outcome through the settlement engine, then
//! sweeps overdue promotions. Multiple instances may run concurrently; the
//! claim lease plus `SKIP LOCKED` keeps them off each other's rows, and the
//! settlement transitions make any residual overlap a no-op.

use crate::config::PaymentsConfig;
use crate::database::promotion_repository::PromotionRepository;
use crate::database::transaction_repository::{PaymentTransaction, TransactionRepository};
use crate::database::webhook_repository::WebhookRepository;
use crate::error::{AppError, AppResult};
use crate::notifications::{NotificationEmitter, NotificationKind};
use crate::payments::types::ProviderPaymentStatus;
use crate::payments::PaymentProcessor;
use crate::promotions::PromotionCatalog;
use crate::settlement::SettlementEngine;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// Transactions younger than this are left for their own request flow;
/// reconciliation only chases intents the synchronous path has abandoned.
const MIN_PENDING_AGE_SECS: i64 = 30;

const WEBHOOK_REPLAY_BATCH: i64 = 20;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub expired: usize,
    pub still_pending: usize,
    pub promotions_expired: usize,
    pub webhooks_replayed: usize,
}

pub struct Reconciler {
    transactions: Arc<TransactionRepository>,
    promotions: Arc<PromotionRepository>,
    webhooks: Arc<WebhookRepository>,
    processor: Arc<PaymentProcessor>,
    settlement: Arc<SettlementEngine>,
    catalog: Arc<dyn PromotionCatalog>,
    notifier: Arc<dyn NotificationEmitter>,
    config: PaymentsConfig,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transactions: Arc<TransactionRepository>,
        promotions: Arc<PromotionRepository>,
        webhooks: Arc<WebhookRepository>,
        processor: Arc<PaymentProcessor>,
        settlement: Arc<SettlementEngine>,
        catalog: Arc<dyn PromotionCatalog>,
        notifier: Arc<dyn NotificationEmitter>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            transactions,
            promotions,
            webhooks,
            processor,
            settlement,
            catalog,
            notifier,
            config,
        }
    }

    /// Run forever on the configured interval. Batch errors are logged and
    /// the next tick continues; a wedged provider must not kill the loop.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_secs = self.config.reconcile_interval_secs,
            "reconciliation loop started"
        );

        loop {
            match self.run_once().await {
                Ok(summary) => {
                    if summary.claimed > 0 || summary.promotions_expired > 0 {
                        info!(?summary, "reconciliation pass finished");
                    } else {
                        debug!("reconciliation pass found nothing to do");
                    }
                }
                Err(e) => error!("reconciliation pass error: {}", e),
            }

            sleep(Duration::from_secs(self.config.reconcile_interval_secs)).await;
        }
    }

    /// One full pass: stale-transaction sweep, then promotion-expiry sweep.
    pub async fn run_once(&self) -> AppResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        let now = Utc::now();
        let cutoff = now - ChronoDuration::seconds(MIN_PENDING_AGE_SECS);

        let batch = self
            .transactions
            .claim_stale_pending(
                cutoff,
                self.config.claim_lease_secs as f64,
                self.config.reconcile_batch_size,
            )
            .await?;
        summary.claimed = batch.len();

        for tx in &batch {
            if let Err(e) = self.reconcile_one(tx, &mut summary).await {
                // One stuck transaction must not starve the rest of the
                // batch.
                error!(
                    reference = %tx.internal_reference,
                    "failed to reconcile transaction: {}",
                    e
                );
            }
        }

        summary.promotions_expired = self.sweep_promotions().await?;
        summary.webhooks_replayed = self.replay_failed_webhooks().await?;

        Ok(summary)
    }

    async fn reconcile_one(
        &self,
        tx: &PaymentTransaction,
        summary: &mut ReconcileSummary,
    ) -> AppResult<()> {
        let now = Utc::now();

        // Past its deadline with no definitive answer: expire and release
        // any locked funds.
        if tx.is_overdue(now) {
            if self.settlement.settle_expired(tx).await? {
                summary.expired += 1;
            }
            return Ok(());
        }

        let verify_reference = tx
            .provider_reference
            .as_deref()
            .unwrap_or(&tx.internal_reference);

        match self
            .processor
            .verify_payment(tx.payment_method, verify_reference)
            .await
        {
            Ok(ProviderPaymentStatus::Completed { .. }) => {
                if self.settlement.settle_completed(tx, None).await? {
                    summary.completed += 1;
                }
            }
            Ok(ProviderPaymentStatus::Failed { reason }) => {
                if self.settlement.settle_failed(tx, reason).await? {
                    summary.failed += 1;
                }
            }
            Ok(ProviderPaymentStatus::Pending) => {
                summary.still_pending += 1;
                self.transactions
                    .release_claim(&tx.internal_reference)
                    .await?;
            }
            Err(e) if e.is_retryable() => {
                // Timeout or transient outage counts as "still pending".
                warn!(
                    reference = %tx.internal_reference,
                    "provider unreachable during reconciliation, will retry: {}",
                    e
                );
                summary.still_pending += 1;
                self.transactions
                    .release_claim(&tx.internal_reference)
                    .await?;
            }
            Err(AppError::ProviderRejected { message, .. }) => {
                if self.settlement.settle_failed(tx, Some(message)).await? {
                    summary.failed += 1;
                }
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    /// Flip overdue active promotions to expired and tell their owners.
    async fn sweep_promotions(&self) -> AppResult<usize> {
        let expired = self.promotions.expire_overdue(Utc::now()).await?;

        for promotion in &expired {
            info!(
                listing_id = %promotion.listing_id,
                expired_at = %promotion.expires_at,
                "promotion expired"
            );

            match self.catalog.listing(promotion.listing_id).await {
                Ok(listing) => {
                    self.notifier
                        .emit(
                            listing.owner_id,
                            NotificationKind::PromotionExpired,
                            json!({
                                "listing_id": promotion.listing_id,
                                "views_gained": promotion.views_during,
                                "inquiries_gained": promotion.inquiries_during,
                            }),
                        )
                        .await;
                }
                Err(e) => warn!(
                    listing_id = %promotion.listing_id,
                    "cannot notify owner of expired promotion: {}",
                    e
                ),
            }
        }

        Ok(expired.len())
    }

    /// Journaled webhook events whose processing failed get another go;
    /// settlement idempotency makes repeats harmless.
    async fn replay_failed_webhooks(&self) -> AppResult<usize> {
        let events = self.webhooks.get_pending_events(WEBHOOK_REPLAY_BATCH).await?;
        let mut replayed = 0;

        for event in &events {
            match self.processor.replay_webhook_event(event).await {
                Ok(()) => replayed += 1,
                Err(e) => warn!(
                    event_id = %event.id,
                    source = %event.source,
                    "webhook replay failed again: {}",
                    e
                ),
            }
        }

        Ok(replayed)
    }
}
