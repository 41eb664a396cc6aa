use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AppContext;
use crate::{cache, database};

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub database: String,
    pub cache: String,
}

pub async fn health_check(State(context): State<Arc<AppContext>>) -> Json<HealthResponse> {
    let database_status = match database::health_check(&context.db).await {
        Ok(()) => "up",
        Err(_) => "down",
    };
    let cache_status = match cache::health_check(&context.cache).await {
        Ok(()) => "up",
        Err(_) => "down",
    };

    let status = if database_status == "up" {
        "healthy"
    } else {
        // The cache degrades gracefully; the database does not.
        "unhealthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: context.config.server.environment.clone(),
        database: database_status.to_string(),
        cache: cache_status.to_string(),
    })
}
