//! Cached exchange-rate quotes.

use super::error::CacheResult;
use super::RedisPool;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Quotes go stale fast; keep the window short.
pub const RATE_TTL: Duration = Duration::from_secs(90);

fn rate_key(from_currency: &str, to_currency: &str) -> String {
    format!("rate:{}:{}", from_currency, to_currency)
}

/// Thin JSON cache over the shared Redis pool, keyed per currency pair.
#[derive(Clone)]
pub struct RateCache {
    pool: RedisPool,
}

impl RateCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        from_currency: &str,
        to_currency: &str,
    ) -> CacheResult<Option<T>> {
        let key = rate_key(from_currency, to_currency);
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Rate cache unavailable, falling through: {}", e);
                return Ok(None);
            }
        };

        let raw: Option<String> = conn.get(&key).await?;
        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(value) => {
                    debug!("Rate cache hit: {}", key);
                    Ok(Some(value))
                }
                Err(e) => {
                    warn!("Dropping undecodable cache entry '{}': {}", key, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(
        &self,
        from_currency: &str,
        to_currency: &str,
        value: &T,
    ) -> CacheResult<()> {
        let key = rate_key(from_currency, to_currency);
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Rate cache unavailable, skipping set: {}", e);
                return Ok(());
            }
        };

        let json = serde_json::to_string(value)?;
        let _: () = conn.set_ex(&key, json, RATE_TTL.as_secs()).await?;
        debug!("Rate cache set: {}", key);
        Ok(())
    }

    pub async fn invalidate(&self, from_currency: &str, to_currency: &str) -> CacheResult<bool> {
        let key = rate_key(from_currency, to_currency);
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(_) => return Ok(false),
        };

        let deleted: i32 = conn.del(&key).await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_per_pair() {
        assert_eq!(rate_key("RWF", "USDT"), "rate:RWF:USDT");
        assert_ne!(rate_key("RWF", "USDT"), rate_key("USDT", "RWF"));
    }
}
