//! Payment provider trait definition.
//!
//! Every payment method (MTN MoMo, Airtel Money, bank transfer, crypto,
//! internal wallet) implements this interface so the processor can dispatch
//! uniformly.

use crate::error::AppResult;
use crate::payments::types::{
    ChargeIntent, PaymentMethod, ProviderCharge, ProviderPaymentStatus, ProviderRefund,
    RefundOutcome, WebhookUpdate,
};
use async_trait::async_trait;

/// Uniform contract over heterogeneous payment providers.
///
/// Implementations must make `initiate` safe to retry with the same
/// reference (the reference doubles as the idempotency key towards the
/// provider) and must treat a provider that has not yet seen a charge as
/// `Pending`, never as an error.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// The method this adapter serves, used as the registry key.
    fn method(&self) -> PaymentMethod;

    /// Start a charge. Network calls have bounded timeouts; a timeout is
    /// reported as `ProviderUnavailable` and the transaction stays pending.
    async fn initiate(&self, intent: &ChargeIntent) -> AppResult<ProviderCharge>;

    /// Re-check the provider-side status of a charge.
    async fn verify(&self, reference: &str) -> AppResult<ProviderPaymentStatus>;

    /// Reverse a completed charge.
    async fn refund(&self, request: &ProviderRefund) -> AppResult<RefundOutcome>;

    /// Authenticate a webhook payload against its signature header. Methods
    /// that never emit webhooks fail closed.
    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;

    /// Decode an authenticated webhook body into a normalized update.
    fn parse_webhook(&self, payload: &[u8]) -> AppResult<WebhookUpdate>;
}
