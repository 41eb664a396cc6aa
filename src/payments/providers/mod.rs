//! Payment provider implementations.
//!
//! One adapter per supported method, all behind the `PaymentProvider` trait.

pub mod airtel;
pub mod bank;
pub mod crypto;
pub mod mtn;
pub mod wallet;

pub use airtel::AirtelMoneyProvider;
pub use bank::BankTransferProvider;
pub use crypto::CryptoProvider;
pub use mtn::MtnMomoProvider;
pub use wallet::WalletProvider;

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Validate a hex-encoded HMAC-SHA256 signature over a webhook body.
/// Comparison is constant time to avoid leaking the expected signature.
pub(crate) fn verify_hmac_sha256(secret: &str, payload: &[u8], signature: &str) -> bool {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());

    let provided = signature.trim();
    if computed.len() != provided.len() {
        return false;
    }

    computed
        .as_bytes()
        .iter()
        .zip(provided.as_bytes().iter())
        .fold(0, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Sign a payload the way providers are expected to; used by tests and by
/// the back-office tooling that confirms bank transfers.
pub fn sign_hmac_sha256(secret: &str, payload: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
