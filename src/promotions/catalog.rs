//! Read-only lookups against marketplace-owned data.
//!
//! Listings and promotion packages belong to the main application; the
//! payment core reads price, duration and engagement baselines through this
//! boundary and writes nothing.

use crate::database::error::DatabaseError;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct PromotionPackage {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub currency: String,
    pub duration_days: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct ListingSnapshot {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub view_count: i64,
    pub inquiry_count: i64,
}

#[async_trait]
pub trait PromotionCatalog: Send + Sync {
    async fn package(&self, package_id: Uuid) -> AppResult<PromotionPackage>;
    async fn listing(&self, listing_id: Uuid) -> AppResult<ListingSnapshot>;
}

pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PromotionCatalog for PgCatalog {
    async fn package(&self, package_id: Uuid) -> AppResult<PromotionPackage> {
        let package = sqlx::query_as::<_, PromotionPackage>(
            "SELECT id, name, price, currency, duration_days, is_active \
             FROM promotion_packages WHERE id = $1",
        )
        .bind(package_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| AppError::not_found("promotion package", package_id.to_string()))?;

        if !package.is_active {
            return Err(AppError::validation(format!(
                "promotion package '{}' is no longer offered",
                package.name
            )));
        }
        Ok(package)
    }

    async fn listing(&self, listing_id: Uuid) -> AppResult<ListingSnapshot> {
        sqlx::query_as::<_, ListingSnapshot>(
            "SELECT id, owner_id, view_count, inquiry_count FROM listings WHERE id = $1",
        )
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| AppError::not_found("listing", listing_id.to_string()))
    }
}
