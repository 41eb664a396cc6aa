use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bigdecimal::BigDecimal;
use serde_json::json;
use thiserror::Error;

use crate::database::error::DatabaseError;
use crate::payments::types::TransactionStatus;

pub type AppResult<T> = Result<T, AppError>;

/// Application-level error taxonomy for the payment core.
///
/// Synchronous validation and balance errors surface to the caller;
/// transient provider errors are absorbed by the reconciliation loop.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("insufficient wallet balance: short by {shortfall} {currency}")]
    InsufficientBalance {
        shortfall: BigDecimal,
        currency: String,
    },

    #[error("unsupported payment method: {method}")]
    UnsupportedMethod { method: String },

    #[error("{provider} unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("{provider} rejected the payment: {message}")]
    ProviderRejected { provider: String, message: String },

    #[error("duplicate promotion activation for transaction {reference}")]
    DuplicateActivation { reference: String },

    #[error("illegal transition for {reference}: {from} -> {to}")]
    IllegalTransition {
        reference: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("invalid webhook signature from {provider}")]
    InvalidWebhookSignature { provider: String },

    #[error("malformed webhook payload from {provider}: {message}")]
    InvalidWebhookPayload { provider: String, message: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn unsupported_method(method: impl Into<String>) -> Self {
        Self::UnsupportedMethod {
            method: method.into(),
        }
    }

    pub fn provider_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn provider_rejected(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderRejected {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the reconciliation loop should retry the operation later
    /// instead of treating the transaction as definitively failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderUnavailable { .. } => true,
            Self::Database(e) => e.is_retryable(),
            _ => false,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. }
            | Self::UnsupportedMethod { .. }
            | Self::InvalidWebhookPayload { .. } => StatusCode::BAD_REQUEST,
            Self::InsufficientBalance { .. } | Self::ProviderRejected { .. } => {
                StatusCode::PAYMENT_REQUIRED
            }
            Self::InvalidWebhookSignature { .. } => StatusCode::UNAUTHORIZED,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::IllegalTransition { .. } => StatusCode::CONFLICT,
            Self::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::DuplicateActivation { .. } | Self::Database(_) | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::UnsupportedMethod { .. } => "unsupported_method",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ProviderRejected { .. } => "provider_rejected",
            Self::DuplicateActivation { .. } => "duplicate_activation",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::NotFound { .. } => "not_found",
            Self::InvalidWebhookSignature { .. } => "invalid_signature",
            Self::InvalidWebhookPayload { .. } => "invalid_payload",
            Self::Database(_) => "database_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Raw provider payloads and database details stay out of responses.
        let message = match &self {
            AppError::Database(_) | AppError::Internal { .. } => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "error": self.code(),
            "message": message,
        });

        if let AppError::InsufficientBalance {
            shortfall,
            currency,
        } = &self
        {
            body["shortfall"] = json!(shortfall.to_string());
            body["currency"] = json!(currency);
        }

        (status, Json(body)).into_response()
    }
}
