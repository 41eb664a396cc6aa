//! Outbound user notifications.
//!
//! The payment core only emits; delivery (SMS, email, push) belongs to the
//! marketplace application behind this boundary. Emission is fire-and-forget:
//! a notification failure must never roll back a payment state transition.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    PaymentCompleted,
    PaymentFailed,
    PaymentExpired,
    PaymentCancelled,
    WalletCredited,
    RefundIssued,
    PromotionActivated,
    PromotionExpired,
}

impl NotificationKind {
    pub fn template(&self) -> &'static str {
        match self {
            Self::PaymentCompleted => "payment_completed",
            Self::PaymentFailed => "payment_failed",
            Self::PaymentExpired => "payment_expired",
            Self::PaymentCancelled => "payment_cancelled",
            Self::WalletCredited => "wallet_credited",
            Self::RefundIssued => "refund_issued",
            Self::PromotionActivated => "promotion_activated",
            Self::PromotionExpired => "promotion_expired",
        }
    }

    /// User-facing message body. Provider error payloads never leak here.
    pub fn message(&self) -> &'static str {
        match self {
            Self::PaymentCompleted => "Your payment was received. Thank you!",
            Self::PaymentFailed => "Your payment could not be completed. No funds were taken.",
            Self::PaymentExpired => {
                "Your payment request expired before confirmation. Please try again."
            }
            Self::PaymentCancelled => "Your payment was cancelled as requested.",
            Self::WalletCredited => "Your wallet has been topped up.",
            Self::RefundIssued => "Your payment has been refunded.",
            Self::PromotionActivated => "Your listing promotion is now live.",
            Self::PromotionExpired => "Your listing promotion has ended.",
        }
    }
}

#[async_trait]
pub trait NotificationEmitter: Send + Sync {
    /// Dispatch an event towards a user. Must not fail the caller; delivery
    /// problems are the emitter's to log and swallow.
    async fn emit(&self, user_id: Uuid, kind: NotificationKind, payload: Value);
}

/// Default emitter: structured log lines the marketplace's delivery workers
/// pick up. Stands in for SMS/email/push without coupling the core to them.
pub struct LogEmitter;

#[async_trait]
impl NotificationEmitter for LogEmitter {
    async fn emit(&self, user_id: Uuid, kind: NotificationKind, payload: Value) {
        match serde_json::to_string(&payload) {
            Ok(body) => info!(
                %user_id,
                template = kind.template(),
                message = kind.message(),
                payload = %body,
                "notification emitted"
            ),
            Err(e) => warn!(%user_id, template = kind.template(), "notification payload not serializable: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_template_and_message() {
        for kind in [
            NotificationKind::PaymentCompleted,
            NotificationKind::PaymentFailed,
            NotificationKind::PaymentExpired,
            NotificationKind::PaymentCancelled,
            NotificationKind::WalletCredited,
            NotificationKind::RefundIssued,
            NotificationKind::PromotionActivated,
            NotificationKind::PromotionExpired,
        ] {
            assert!(!kind.template().is_empty());
            assert!(!kind.message().is_empty());
        }
    }
}
