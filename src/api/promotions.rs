use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::AppContext;
use crate::database::promotion_repository::{ListingPromotion, PromotionStatus};
use crate::error::{AppError, AppResult};

#[derive(Debug, Serialize)]
pub struct PromotionView {
    pub listing_id: Uuid,
    pub status: PromotionStatus,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub views_gained: i64,
    pub inquiries_gained: i64,
}

impl From<&ListingPromotion> for PromotionView {
    fn from(promotion: &ListingPromotion) -> Self {
        Self {
            listing_id: promotion.listing_id,
            status: promotion.status,
            starts_at: promotion.starts_at,
            expires_at: promotion.expires_at,
            views_gained: promotion.views_during,
            inquiries_gained: promotion.inquiries_during,
        }
    }
}

pub async fn active_promotion(
    State(context): State<Arc<AppContext>>,
    Path(listing_id): Path<Uuid>,
) -> AppResult<Json<PromotionView>> {
    let promotion = context
        .promotions
        .find_active_by_listing(listing_id)
        .await?
        .ok_or_else(|| AppError::not_found("active promotion", listing_id.to_string()))?;

    Ok(Json(PromotionView::from(&promotion)))
}

/// Engagement pings from the marketplace UI; no-ops when the listing has no
/// live promotion.
pub async fn record_view(
    State(context): State<Arc<AppContext>>,
    Path(listing_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    context.promotions.record_view(listing_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn record_inquiry(
    State(context): State<Arc<AppContext>>,
    Path(listing_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    context.promotions.record_inquiry(listing_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
