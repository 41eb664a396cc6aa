use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub payments: PaymentsConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    pub default_currency: String,
    pub supported_currencies: Vec<String>,
    /// How long an intent may stay unresolved before the loop expires it.
    pub payment_expiry_minutes: i64,
    pub reconcile_interval_secs: u64,
    pub reconcile_batch_size: i64,
    /// Claim lease; a crashed worker's claims become reclaimable after this.
    pub claim_lease_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub mtn: MomoConfig,
    pub airtel: MomoConfig,
    pub bank: BankConfig,
    pub crypto: CryptoConfig,
}

/// Shared shape for the two mobile-money providers.
#[derive(Debug, Clone, Deserialize)]
pub struct MomoConfig {
    pub base_url: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BankConfig {
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
    /// Shared secret authenticating back-office confirmation callbacks.
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    pub gateway_url: String,
    pub api_key: String,
    /// Asset customers pay in, e.g. USDT.
    pub asset_code: String,
    pub confirmations_required: u32,
    pub rate_max_age_minutes: i64,
    pub webhook_secret: String,
    pub timeout_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow!("{} must be a valid number: {}", key, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8080)?,
            environment: env_or("ENVIRONMENT", "development"),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 20)?,
        };

        let redis = RedisConfig {
            url: env::var("REDIS_URL").context("REDIS_URL not set")?,
        };

        let supported_currencies: Vec<String> = env_or("SUPPORTED_CURRENCIES", "RWF")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let payments = PaymentsConfig {
            default_currency: env_or("DEFAULT_CURRENCY", "RWF"),
            supported_currencies,
            payment_expiry_minutes: env_parse("PAYMENT_EXPIRY_MINUTES", 60)?,
            reconcile_interval_secs: env_parse("RECONCILE_INTERVAL_SECS", 180)?,
            reconcile_batch_size: env_parse("RECONCILE_BATCH_SIZE", 25)?,
            claim_lease_secs: env_parse("CLAIM_LEASE_SECS", 300)?,
        };

        let providers = ProvidersConfig {
            mtn: MomoConfig {
                base_url: env_or("MTN_MOMO_BASE_URL", "https://sandbox.momodeveloper.mtn.com"),
                api_key: env::var("MTN_MOMO_API_KEY").context("MTN_MOMO_API_KEY not set")?,
                webhook_secret: env::var("MTN_MOMO_WEBHOOK_SECRET")
                    .context("MTN_MOMO_WEBHOOK_SECRET not set")?,
                timeout_secs: env_parse("MTN_MOMO_TIMEOUT_SECS", 30)?,
                max_retries: env_parse("MTN_MOMO_MAX_RETRIES", 3)?,
            },
            airtel: MomoConfig {
                base_url: env_or("AIRTEL_MONEY_BASE_URL", "https://openapiuat.airtel.africa"),
                api_key: env::var("AIRTEL_MONEY_API_KEY")
                    .context("AIRTEL_MONEY_API_KEY not set")?,
                webhook_secret: env::var("AIRTEL_MONEY_WEBHOOK_SECRET")
                    .context("AIRTEL_MONEY_WEBHOOK_SECRET not set")?,
                timeout_secs: env_parse("AIRTEL_MONEY_TIMEOUT_SECS", 30)?,
                max_retries: env_parse("AIRTEL_MONEY_MAX_RETRIES", 3)?,
            },
            bank: BankConfig {
                bank_name: env_or("BANK_NAME", "Bank of Kigali"),
                account_number: env::var("BANK_ACCOUNT_NUMBER")
                    .context("BANK_ACCOUNT_NUMBER not set")?,
                account_name: env_or("BANK_ACCOUNT_NAME", "IkazeProperty Ltd"),
                webhook_secret: env::var("BANK_WEBHOOK_SECRET")
                    .context("BANK_WEBHOOK_SECRET not set")?,
            },
            crypto: CryptoConfig {
                gateway_url: env::var("CRYPTO_GATEWAY_URL").context("CRYPTO_GATEWAY_URL not set")?,
                api_key: env::var("CRYPTO_GATEWAY_API_KEY")
                    .context("CRYPTO_GATEWAY_API_KEY not set")?,
                asset_code: env_or("CRYPTO_ASSET_CODE", "USDT"),
                confirmations_required: env_parse("CRYPTO_CONFIRMATIONS_REQUIRED", 3)?,
                rate_max_age_minutes: env_parse("CRYPTO_RATE_MAX_AGE_MINUTES", 15)?,
                webhook_secret: env::var("CRYPTO_WEBHOOK_SECRET")
                    .context("CRYPTO_WEBHOOK_SECRET not set")?,
                timeout_secs: env_parse("CRYPTO_GATEWAY_TIMEOUT_SECS", 30)?,
            },
        };

        let config = Config {
            server,
            database,
            redis,
            payments,
            providers,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }
        if self.redis.url.trim().is_empty() {
            return Err(anyhow!("REDIS_URL cannot be empty"));
        }

        if self.payments.supported_currencies.is_empty() {
            return Err(anyhow!(
                "SUPPORTED_CURRENCIES must contain at least one currency"
            ));
        }
        if !self
            .payments
            .supported_currencies
            .contains(&self.payments.default_currency)
        {
            return Err(anyhow!(
                "DEFAULT_CURRENCY {} is not in SUPPORTED_CURRENCIES",
                self.payments.default_currency
            ));
        }
        if self.payments.payment_expiry_minutes <= 0 {
            return Err(anyhow!("PAYMENT_EXPIRY_MINUTES must be positive"));
        }
        if self.payments.reconcile_interval_secs == 0 {
            return Err(anyhow!("RECONCILE_INTERVAL_SECS must be positive"));
        }
        if self.payments.reconcile_batch_size <= 0 {
            return Err(anyhow!("RECONCILE_BATCH_SIZE must be positive"));
        }

        if self.providers.crypto.confirmations_required == 0 {
            return Err(anyhow!("CRYPTO_CONFIRMATIONS_REQUIRED must be at least 1"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                environment: "development".to_string(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/ikaze".to_string(),
                max_connections: 20,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            payments: PaymentsConfig {
                default_currency: "RWF".to_string(),
                supported_currencies: vec!["RWF".to_string()],
                payment_expiry_minutes: 60,
                reconcile_interval_secs: 180,
                reconcile_batch_size: 25,
                claim_lease_secs: 300,
            },
            providers: ProvidersConfig {
                mtn: MomoConfig {
                    base_url: "https://sandbox.momodeveloper.mtn.com".to_string(),
                    api_key: "key".to_string(),
                    webhook_secret: "secret".to_string(),
                    timeout_secs: 30,
                    max_retries: 3,
                },
                airtel: MomoConfig {
                    base_url: "https://openapiuat.airtel.africa".to_string(),
                    api_key: "key".to_string(),
                    webhook_secret: "secret".to_string(),
                    timeout_secs: 30,
                    max_retries: 3,
                },
                bank: BankConfig {
                    bank_name: "Bank of Kigali".to_string(),
                    account_number: "00012345".to_string(),
                    account_name: "IkazeProperty Ltd".to_string(),
                    webhook_secret: "secret".to_string(),
                },
                crypto: CryptoConfig {
                    gateway_url: "https://gateway.test".to_string(),
                    api_key: "key".to_string(),
                    asset_code: "USDT".to_string(),
                    confirmations_required: 3,
                    rate_max_age_minutes: 15,
                    webhook_secret: "secret".to_string(),
                    timeout_secs: 30,
                },
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn privileged_port_is_rejected() {
        let mut config = base_config();
        config.server.port = 80;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_currency_must_be_supported() {
        let mut config = base_config();
        config.payments.default_currency = "USD".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_confirmations_is_rejected() {
        let mut config = base_config();
        config.providers.crypto.confirmations_required = 0;
        assert!(config.validate().is_err());
    }
}
