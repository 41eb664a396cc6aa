use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use ikaze_payments::api::{self, AppContext};
use ikaze_payments::cache::{self, CacheConfig, RateCache};
use ikaze_payments::config::Config;
use ikaze_payments::database::{
    self, exchange_rate_repository::ExchangeRateRepository,
    promotion_repository::PromotionRepository, transaction_repository::TransactionRepository,
    wallet_repository::WalletRepository, webhook_repository::WebhookRepository, PoolConfig,
};
use ikaze_payments::notifications::{LogEmitter, NotificationEmitter};
use ikaze_payments::payments::providers::{
    AirtelMoneyProvider, BankTransferProvider, CryptoProvider, MtnMomoProvider, WalletProvider,
};
use ikaze_payments::payments::{PaymentProcessor, PaymentProvider};
use ikaze_payments::promotions::{PgCatalog, PromotionActivator, PromotionCatalog};
use ikaze_payments::reconciliation::Reconciler;
use ikaze_payments::settlement::SettlementEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting IkazeProperty payments");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!(
        "Supported currencies: {}",
        config.payments.supported_currencies.join(", ")
    );

    // Storage
    let pool = database::init_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            ..PoolConfig::default()
        }),
    )
    .await
    .context("database pool initialization failed")?;
    database::run_migrations(&pool).await?;

    let redis_pool = cache::init_cache_pool(CacheConfig {
        redis_url: config.redis.url.clone(),
        ..CacheConfig::default()
    })
    .await
    .context("redis pool initialization failed")?;

    // Repositories
    let transactions = Arc::new(TransactionRepository::new(pool.clone()));
    let wallets = Arc::new(WalletRepository::new(pool.clone()));
    let promotions = Arc::new(PromotionRepository::new(pool.clone()));
    let webhooks = Arc::new(WebhookRepository::new(pool.clone()));
    let rates = Arc::new(ExchangeRateRepository::with_cache(
        pool.clone(),
        RateCache::new(redis_pool.clone()),
    ));

    // Collaborator boundaries
    let catalog: Arc<dyn PromotionCatalog> = Arc::new(PgCatalog::new(pool.clone()));
    let notifier: Arc<dyn NotificationEmitter> = Arc::new(LogEmitter);

    // Core components
    let activator = Arc::new(PromotionActivator::new(promotions.clone(), catalog.clone()));
    let settlement = Arc::new(SettlementEngine::new(
        transactions.clone(),
        wallets.clone(),
        promotions.clone(),
        activator,
        notifier.clone(),
    ));

    let providers: Vec<Arc<dyn PaymentProvider>> = vec![
        Arc::new(MtnMomoProvider::new(config.providers.mtn.clone())),
        Arc::new(AirtelMoneyProvider::new(config.providers.airtel.clone())),
        Arc::new(BankTransferProvider::new(config.providers.bank.clone())),
        Arc::new(CryptoProvider::new(
            config.providers.crypto.clone(),
            rates.clone(),
        )),
        Arc::new(WalletProvider::new(wallets.clone())),
    ];

    let processor = Arc::new(PaymentProcessor::new(
        config.payments.clone(),
        providers,
        transactions.clone(),
        promotions.clone(),
        webhooks.clone(),
        wallets.clone(),
        settlement.clone(),
        catalog.clone(),
    ));

    // Background reconciliation
    let reconciler = Arc::new(Reconciler::new(
        transactions.clone(),
        promotions.clone(),
        webhooks,
        processor.clone(),
        settlement,
        catalog,
        notifier,
        config.payments.clone(),
    ));
    tokio::spawn(reconciler.run());

    // HTTP surface
    let context = Arc::new(AppContext {
        config: config.clone(),
        db: pool,
        cache: redis_pool,
        processor,
        transactions,
        wallets,
        promotions,
    });
    let app = api::router(context);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
