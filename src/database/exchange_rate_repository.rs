use crate::cache::RateCache;
use crate::database::error::{DatabaseError, DbResult};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub id: Uuid,
    pub from_currency: String,
    pub to_currency: String,
    pub rate: BigDecimal,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeRate {
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.updated_at <= max_age
    }
}

/// Exchange-rate store backing the crypto adapter's quotes. Reads go through
/// the Redis cache when one is attached; a cache failure falls through to
/// the database.
pub struct ExchangeRateRepository {
    pool: PgPool,
    cache: Option<RateCache>,
}

impl ExchangeRateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, cache: None }
    }

    pub fn with_cache(pool: PgPool, cache: RateCache) -> Self {
        Self {
            pool,
            cache: Some(cache),
        }
    }

    pub async fn get_current_rate(
        &self,
        from_currency: &str,
        to_currency: &str,
    ) -> DbResult<Option<ExchangeRate>> {
        if let Some(ref cache) = self.cache {
            if let Ok(Some(cached)) = cache
                .get::<ExchangeRate>(from_currency, to_currency)
                .await
            {
                debug!(
                    "Cache hit for exchange rate: {} -> {}",
                    from_currency, to_currency
                );
                return Ok(Some(cached));
            }
        }

        let rate = sqlx::query_as::<_, ExchangeRate>(
            "SELECT id, from_currency, to_currency, rate, source, created_at, updated_at \
             FROM exchange_rates \
             WHERE from_currency = $1 AND to_currency = $2",
        )
        .bind(from_currency)
        .bind(to_currency)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let (Some(ref cache), Some(ref found)) = (&self.cache, &rate) {
            if let Err(e) = cache.set(from_currency, to_currency, found).await {
                debug!("Failed to cache exchange rate: {}", e);
            }
        }

        Ok(rate)
    }

    /// Create or refresh a rate and invalidate any cached copy.
    pub async fn upsert_rate(
        &self,
        from_currency: &str,
        to_currency: &str,
        rate: &BigDecimal,
        source: Option<&str>,
    ) -> DbResult<ExchangeRate> {
        let result = sqlx::query_as::<_, ExchangeRate>(
            "INSERT INTO exchange_rates (id, from_currency, to_currency, rate, source, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW()) \
             ON CONFLICT (from_currency, to_currency) \
             DO UPDATE SET rate = $4, source = $5, updated_at = NOW() \
             RETURNING id, from_currency, to_currency, rate, source, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(from_currency)
        .bind(to_currency)
        .bind(rate)
        .bind(source)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(ref cache) = self.cache {
            if let Err(e) = cache.invalidate(from_currency, to_currency).await {
                debug!("Failed to invalidate cached exchange rate: {}", e);
            }
        }

        Ok(result)
    }
}
