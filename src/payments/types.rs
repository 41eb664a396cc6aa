//! Shared payment types: methods, lifecycle statuses, adapter requests and
//! responses.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Supported payment methods. Adapter dispatch is keyed on this enum so an
/// unhandled method is a compile-time hole, not a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum PaymentMethod {
    MtnMomo,
    AirtelMoney,
    BankTransfer,
    Crypto,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MtnMomo => "mtn_momo",
            Self::AirtelMoney => "airtel_money",
            Self::BankTransfer => "bank_transfer",
            Self::Crypto => "crypto",
            Self::Wallet => "wallet",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mtn_momo" => Ok(Self::MtnMomo),
            "airtel_money" => Ok(Self::AirtelMoney),
            "bank_transfer" => Ok(Self::BankTransfer),
            "crypto" => Ok(Self::Crypto),
            "wallet" => Ok(Self::Wallet),
            other => Err(format!("unknown payment method '{}'", other)),
        }
    }
}

/// What the payment is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TransactionType {
    ListingPromotion,
    WalletTopup,
}

/// Lifecycle status of a payment transaction.
///
/// Transitions are monotonic: `pending` may move forward to `processing` or
/// any terminal outcome, `processing` only to a terminal outcome, and
/// `completed -> refunded` is the single edge out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    Expired,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Refunded | Self::Expired
        )
    }

    /// Legal edges of the lifecycle state machine. Anything else must be
    /// rejected leaving the stored status untouched.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Pending, Processing) => true,
            (Pending, Completed) | (Processing, Completed) => true,
            (Pending, Failed) | (Processing, Failed) => true,
            (Pending, Expired) | (Processing, Expired) => true,
            (Completed, Refunded) => true,
            _ => false,
        }
    }

    /// Source statuses from which `next` may be reached, used for
    /// conditional-update claims in the store.
    pub fn legal_sources(next: TransactionStatus) -> Vec<TransactionStatus> {
        use TransactionStatus::*;
        [Pending, Processing, Completed, Failed, Refunded, Expired]
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated request to take a payment, as handed to the processor by the
/// API layer. The user id arrives already authenticated.
#[derive(Debug, Clone, Deserialize)]
pub struct InitiatePayment {
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub transaction_type: TransactionType,
    /// Caller-supplied token making retries of the same submission safe.
    pub idempotency_key: String,
    /// Subscriber number for mobile-money methods.
    pub msisdn: Option<String>,
    pub listing_id: Option<Uuid>,
    pub package_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

/// What an adapter needs to start a charge.
#[derive(Debug, Clone)]
pub struct ChargeIntent {
    /// Internal reference; also the idempotency key sent to the provider.
    pub reference: String,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub msisdn: Option<String>,
}

/// Crypto-denominated quote returned by the crypto adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoQuote {
    pub pay_amount: BigDecimal,
    pub pay_currency: String,
    pub pay_address: String,
}

/// Adapter response to a successful `initiate`.
#[derive(Debug, Clone)]
pub struct ProviderCharge {
    pub provider_reference: Option<String>,
    /// Human-readable instructions for completing the payment.
    pub instructions: String,
    /// `Processing` once the provider accepted the charge (or wallet funds
    /// were locked), `Pending` while the provider has not yet acknowledged.
    pub initial_status: TransactionStatus,
    pub provider_data: Option<serde_json::Value>,
    pub crypto: Option<CryptoQuote>,
}

/// Provider-side view of a charge. `verify` never errors just because the
/// provider has not seen the reference yet; that is `Pending`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderPaymentStatus {
    Pending,
    Completed { paid_at: Option<DateTime<Utc>> },
    Failed { reason: Option<String> },
}

/// Refund request as passed to an adapter.
#[derive(Debug, Clone)]
pub struct ProviderRefund {
    pub reference: String,
    pub provider_reference: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    pub refund_reference: String,
    pub status: RefundStatus,
}

/// Normalized content of an authenticated provider webhook.
#[derive(Debug, Clone)]
pub struct WebhookUpdate {
    pub provider_reference: String,
    pub status: ProviderPaymentStatus,
    pub event_type: String,
}

/// Result of initiating a payment, surfaced to the API layer.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentInitResult {
    pub reference: String,
    pub status: TransactionStatus,
    pub instructions: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crypto: Option<CryptoQuote>,
}
