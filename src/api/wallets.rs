use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::payments::Paging;
use super::AppContext;
use crate::database::wallet_repository::WalletTransaction;
use crate::error::{AppError, AppResult};

#[derive(Debug, Serialize)]
pub struct WalletView {
    pub user_id: Uuid,
    pub available_balance: String,
    pub locked_balance: String,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct LedgerEntryView {
    pub entry_type: String,
    pub amount: String,
    pub new_available: String,
    pub new_locked: String,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&WalletTransaction> for LedgerEntryView {
    fn from(entry: &WalletTransaction) -> Self {
        Self {
            entry_type: entry.entry_type.to_string(),
            amount: entry.amount.to_string(),
            new_available: entry.new_available.to_string(),
            new_locked: entry.new_locked.to_string(),
            payment_reference: entry.payment_reference.clone(),
            created_at: entry.created_at,
        }
    }
}

pub async fn balance(
    State(context): State<Arc<AppContext>>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<WalletView>> {
    let wallet = context
        .wallets
        .find_by_user_id(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("wallet", user_id.to_string()))?;

    Ok(Json(WalletView {
        user_id: wallet.user_id,
        available_balance: wallet.available_balance.to_string(),
        locked_balance: wallet.locked_balance.to_string(),
        currency: wallet.currency,
    }))
}

pub async fn ledger(
    State(context): State<Arc<AppContext>>,
    Path(user_id): Path<Uuid>,
    Query(paging): Query<Paging>,
) -> AppResult<Json<Vec<LedgerEntryView>>> {
    let wallet = context
        .wallets
        .find_by_user_id(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("wallet", user_id.to_string()))?;

    let limit = paging.limit.clamp(1, 100);
    let entries = context
        .wallets
        .ledger_entries(wallet.id, limit, paging.offset.max(0))
        .await?;

    Ok(Json(entries.iter().map(LedgerEntryView::from).collect()))
}
