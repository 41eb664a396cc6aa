use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::AppContext;
use crate::database::transaction_repository::PaymentTransaction;
use crate::error::{AppError, AppResult};
use crate::payments::types::{InitiatePayment, PaymentMethod};

/// Public view of a payment transaction. Amounts serialize as strings to
/// keep decimal precision out of JSON float territory.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub reference: String,
    pub status: String,
    pub amount: String,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&PaymentTransaction> for TransactionView {
    fn from(tx: &PaymentTransaction) -> Self {
        Self {
            reference: tx.internal_reference.clone(),
            status: tx.status.to_string(),
            amount: tx.amount.to_string(),
            currency: tx.currency.clone(),
            payment_method: tx.payment_method,
            created_at: tx.created_at,
            expires_at: tx.expires_at,
            completed_at: tx.completed_at,
        }
    }
}

pub async fn initiate(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<InitiatePayment>,
) -> AppResult<impl IntoResponse> {
    let result = context.processor.initiate_payment(request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn status(
    State(context): State<Arc<AppContext>>,
    Path(reference): Path<String>,
) -> AppResult<Json<TransactionView>> {
    let tx = context.processor.get_transaction(&reference).await?;
    Ok(Json(TransactionView::from(&tx)))
}

fn authenticated_user(headers: &HeaderMap) -> AppResult<Uuid> {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| AppError::validation("missing or invalid x-user-id header"))
}

pub async fn cancel(
    State(context): State<Arc<AppContext>>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = authenticated_user(&headers)?;
    context.processor.cancel_payment(&reference, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
}

pub async fn refund(
    State(context): State<Arc<AppContext>>,
    Path(reference): Path<String>,
    Json(request): Json<RefundRequest>,
) -> AppResult<impl IntoResponse> {
    let outcome = context
        .processor
        .refund_payment(&reference, request.amount, request.reason)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

/// Provider-pushed status update. The raw body is kept intact for signature
/// validation; parsing happens only after authentication.
pub async fn webhook(
    State(context): State<Arc<AppContext>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let method: PaymentMethod = method
        .parse()
        .map_err(|_| AppError::unsupported_method(method))?;

    let signature = headers
        .get("x-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::InvalidWebhookSignature {
            provider: method.to_string(),
        })?;

    context
        .processor
        .process_webhook(method, &body, signature)
        .await?;

    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct Paging {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

pub async fn history(
    State(context): State<Arc<AppContext>>,
    Path(user_id): Path<Uuid>,
    Query(paging): Query<Paging>,
) -> AppResult<Json<Vec<TransactionView>>> {
    let limit = paging.limit.clamp(1, 100);
    let transactions = context
        .transactions
        .find_by_user(user_id, limit, paging.offset.max(0))
        .await?;

    Ok(Json(transactions.iter().map(TransactionView::from).collect()))
}
