use crate::database::error::{DatabaseError, DbResult};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const PROMOTION_COLUMNS: &str = "id, listing_id, package_id, payment_transaction_reference, \
     status, views_before, inquiries_before, views_during, inquiries_during, starts_at, \
     expires_at, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PromotionStatus {
    Active,
    Expired,
    Cancelled,
}

/// A paid listing promotion. Never deleted; flipped to `expired` by the
/// reconciliation sweep or `cancelled` when the funding payment is refunded.
#[derive(Debug, Clone, FromRow)]
pub struct ListingPromotion {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub package_id: Uuid,
    pub payment_transaction_reference: String,
    pub status: PromotionStatus,
    pub views_before: i64,
    pub inquiries_before: i64,
    pub views_during: i64,
    pub inquiries_during: i64,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPromotion {
    pub listing_id: Uuid,
    pub package_id: Uuid,
    pub payment_transaction_reference: String,
    pub views_before: i64,
    pub inquiries_before: i64,
    pub expires_at: DateTime<Utc>,
}

/// Result of an activation attempt.
#[derive(Debug)]
pub enum ActivationOutcome {
    Created(Box<ListingPromotion>),
    /// A promotion for this payment reference already exists; the repeated
    /// activation is a no-op and does not reset the expiry.
    AlreadyExists(Box<ListingPromotion>),
}

pub struct PromotionRepository {
    pool: PgPool,
}

impl PromotionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert-once keyed on the payment reference. The conflict target makes
    /// re-activation of the same transaction a no-op; a violation of the
    /// one-active-per-listing index still surfaces as a unique violation for
    /// the activator to treat as an invariant breach.
    pub async fn activate(&self, new: NewPromotion) -> DbResult<ActivationOutcome> {
        let inserted = sqlx::query_as::<_, ListingPromotion>(&format!(
            "INSERT INTO listing_promotions \
             (id, listing_id, package_id, payment_transaction_reference, status, views_before, \
              inquiries_before, starts_at, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 'active', $5, $6, NOW(), $7, NOW(), NOW()) \
             ON CONFLICT (payment_transaction_reference) DO NOTHING \
             RETURNING {PROMOTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.listing_id)
        .bind(new.package_id)
        .bind(&new.payment_transaction_reference)
        .bind(new.views_before)
        .bind(new.inquiries_before)
        .bind(new.expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(promotion) = inserted {
            return Ok(ActivationOutcome::Created(Box::new(promotion)));
        }

        let existing = self
            .find_by_payment_reference(&new.payment_transaction_reference)
            .await?
            .ok_or_else(|| {
                DatabaseError::not_found("promotion", &new.payment_transaction_reference)
            })?;
        Ok(ActivationOutcome::AlreadyExists(Box::new(existing)))
    }

    pub async fn find_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> DbResult<Option<ListingPromotion>> {
        sqlx::query_as::<_, ListingPromotion>(&format!(
            "SELECT {PROMOTION_COLUMNS} FROM listing_promotions \
             WHERE payment_transaction_reference = $1"
        ))
        .bind(payment_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_active_by_listing(
        &self,
        listing_id: Uuid,
    ) -> DbResult<Option<ListingPromotion>> {
        sqlx::query_as::<_, ListingPromotion>(&format!(
            "SELECT {PROMOTION_COLUMNS} FROM listing_promotions \
             WHERE listing_id = $1 AND status = 'active'"
        ))
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Flip every overdue active promotion to expired. The conditional
    /// update makes the sweep safe to run concurrently with itself.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> DbResult<Vec<ListingPromotion>> {
        sqlx::query_as::<_, ListingPromotion>(&format!(
            "UPDATE listing_promotions \
             SET status = 'expired', updated_at = NOW() \
             WHERE status = 'active' AND expires_at < $1 \
             RETURNING {PROMOTION_COLUMNS}"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Cancel the promotion funded by a refunded payment.
    pub async fn cancel_for_payment(
        &self,
        payment_reference: &str,
    ) -> DbResult<Option<ListingPromotion>> {
        sqlx::query_as::<_, ListingPromotion>(&format!(
            "UPDATE listing_promotions \
             SET status = 'cancelled', updated_at = NOW() \
             WHERE payment_transaction_reference = $1 AND status = 'active' \
             RETURNING {PROMOTION_COLUMNS}"
        ))
        .bind(payment_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Engagement counters incremented by the marketplace UI while the
    /// promotion is live.
    pub async fn record_view(&self, listing_id: Uuid) -> DbResult<()> {
        sqlx::query(
            "UPDATE listing_promotions SET views_during = views_during + 1, updated_at = NOW() \
             WHERE listing_id = $1 AND status = 'active'",
        )
        .bind(listing_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn record_inquiry(&self, listing_id: Uuid) -> DbResult<()> {
        sqlx::query(
            "UPDATE listing_promotions SET inquiries_during = inquiries_during + 1, updated_at = NOW() \
             WHERE listing_id = $1 AND status = 'active'",
        )
        .bind(listing_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
