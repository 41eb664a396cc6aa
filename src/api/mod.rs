//! HTTP surface. Handlers stay thin: decode, call the processor or a
//! repository, encode.

pub mod health;
pub mod payments;
pub mod promotions;
pub mod wallets;

use crate::cache::RedisPool;
use crate::config::Config;
use crate::database::promotion_repository::PromotionRepository;
use crate::database::transaction_repository::TransactionRepository;
use crate::database::wallet_repository::WalletRepository;
use crate::payments::PaymentProcessor;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
pub struct AppContext {
    pub config: Config,
    pub db: PgPool,
    pub cache: RedisPool,
    pub processor: Arc<PaymentProcessor>,
    pub transactions: Arc<TransactionRepository>,
    pub wallets: Arc<WalletRepository>,
    pub promotions: Arc<PromotionRepository>,
}

pub fn router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/payments", post(payments::initiate))
        .route("/api/payments/:reference", get(payments::status))
        .route("/api/payments/:reference/cancel", post(payments::cancel))
        .route("/api/payments/:reference/refund", post(payments::refund))
        .route("/api/webhooks/:method", post(payments::webhook))
        .route("/api/users/:user_id/payments", get(payments::history))
        .route(
            "/api/listings/:listing_id/promotion",
            get(promotions::active_promotion),
        )
        .route(
            "/api/listings/:listing_id/promotion/views",
            post(promotions::record_view),
        )
        .route(
            "/api/listings/:listing_id/promotion/inquiries",
            post(promotions::record_inquiry),
        )
        .route("/api/wallets/:user_id", get(wallets::balance))
        .route(
            "/api/wallets/:user_id/transactions",
            get(wallets::ledger),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(context)
}
