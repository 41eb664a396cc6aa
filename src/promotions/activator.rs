//! Turns a settled promotion payment into a live listing promotion,
//! exactly once per transaction no matter how often it is replayed.

use crate::database::error::DatabaseErrorKind;
use crate::database::promotion_repository::{
    ActivationOutcome, ListingPromotion, NewPromotion, PromotionRepository,
};
use crate::database::transaction_repository::PaymentTransaction;
use crate::error::{AppError, AppResult};
use crate::promotions::catalog::PromotionCatalog;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info};

pub struct PromotionActivator {
    promotions: Arc<PromotionRepository>,
    catalog: Arc<dyn PromotionCatalog>,
}

impl PromotionActivator {
    pub fn new(promotions: Arc<PromotionRepository>, catalog: Arc<dyn PromotionCatalog>) -> Self {
        Self {
            promotions,
            catalog,
        }
    }

    /// Activate the promotion paid for by `transaction`. Re-invocations with
    /// the same transaction return the existing row without touching its
    /// expiry; the unique constraint on the payment reference carries the
    /// idempotency, so concurrent reconciliation passes cannot double-create.
    pub async fn activate(&self, transaction: &PaymentTransaction) -> AppResult<ListingPromotion> {
        let listing_id = transaction.listing_id.ok_or_else(|| {
            AppError::validation("promotion payment is missing a listing id")
        })?;
        let package_id = transaction.package_id.ok_or_else(|| {
            AppError::validation("promotion payment is missing a package id")
        })?;

        let package = self.catalog.package(package_id).await?;
        let listing = self.catalog.listing(listing_id).await?;

        let outcome = self
            .promotions
            .activate(NewPromotion {
                listing_id,
                package_id,
                payment_transaction_reference: transaction.internal_reference.clone(),
                views_before: listing.view_count,
                inquiries_before: listing.inquiry_count,
                expires_at: Utc::now() + Duration::days(i64::from(package.duration_days)),
            })
            .await;

        match outcome {
            Ok(ActivationOutcome::Created(promotion)) => {
                info!(
                    reference = %transaction.internal_reference,
                    %listing_id,
                    expires_at = %promotion.expires_at,
                    "promotion activated"
                );
                Ok(*promotion)
            }
            Ok(ActivationOutcome::AlreadyExists(promotion)) => {
                info!(
                    reference = %transaction.internal_reference,
                    %listing_id,
                    "promotion already activated for this payment, no-op"
                );
                Ok(*promotion)
            }
            Err(e) if matches!(e.kind, DatabaseErrorKind::UniqueViolation { .. }) => {
                // The per-transaction guard was bypassed and a different
                // payment holds the active slot for this listing. Invariant
                // breach: surface loudly, never swallow.
                error!(
                    reference = %transaction.internal_reference,
                    %listing_id,
                    "duplicate promotion activation detected: {}",
                    e
                );
                Err(AppError::DuplicateActivation {
                    reference: transaction.internal_reference.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
