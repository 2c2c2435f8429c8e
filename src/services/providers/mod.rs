use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::order::PaymentStatus;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("signature verification failed: {0}")]
    Signature(String),
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("provider api error: {0}")]
    Api(String),
    #[error("transaction not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Api(err.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Wompi,
    Mercadopago,
    Payu,
    Epayco,
    Stripe,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Wompi => "wompi",
            ProviderKind::Mercadopago => "mercadopago",
            ProviderKind::Payu => "payu",
            ProviderKind::Epayco => "epayco",
            ProviderKind::Stripe => "stripe",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "wompi" => Some(ProviderKind::Wompi),
            "mercadopago" => Some(ProviderKind::Mercadopago),
            "payu" => Some(ProviderKind::Payu),
            "epayco" => Some(ProviderKind::Epayco),
            "stripe" => Some(ProviderKind::Stripe),
            _ => None,
        }
    }
}

/// A verified inbound notification, reduced to the fields the pipeline
/// needs. `native_status` stays in the provider's own vocabulary until the
/// adapter's `normalize_status` maps it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub provider: ProviderKind,
    pub transaction_id: String,
    pub order_reference: String,
    pub event_type: String,
    pub native_status: String,
    /// Provider-side event timestamp (unix seconds); part of the
    /// idempotency key so a re-issued transaction id cannot collide.
    pub event_timestamp: i64,
    pub payload: serde_json::Value,
}

impl ProviderEvent {
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.provider.as_str(),
            self.transaction_id,
            self.event_timestamp
        )
    }
}

/// Current transaction state fetched through the provider's query API, used
/// by the manual "verify by reference" fallback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderTransaction {
    pub transaction_id: String,
    pub order_reference: String,
    pub native_status: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Header carrying the signature, when the provider signs out-of-band.
    /// Adapters whose payloads embed the checksum return None.
    fn signature_header(&self) -> Option<&'static str>;

    /// Verifies the shared-secret signature and extracts the event fields.
    /// Rejects before anything touches the ledger.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ProviderEvent, ProviderError>;

    /// Pure, total mapping from the provider's status vocabulary into the
    /// canonical enum; unknown input maps to Pending, never an error.
    fn normalize_status(&self, raw: &str) -> PaymentStatus;

    /// Polls the provider for the current status of a reference. Leaves
    /// local state untouched; callers map errors to GATEWAY_ERROR.
    async fn fetch_transaction(
        &self,
        order_reference: &str,
    ) -> Result<ProviderTransaction, ProviderError>;
}

// Nested json lookup shared by the adapters.
pub(crate) fn jget<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a serde_json::Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

pub(crate) fn extract_str<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a str> {
    jget(val, path)?.as_str()
}

pub(crate) fn extract_i64(val: &serde_json::Value, path: &[&str]) -> Option<i64> {
    jget(val, path)?.as_i64()
}

/// Constant-time hex digest comparison; signature checks must not leak
/// prefix length through timing.
pub(crate) fn digests_match(expected_hex: &str, provided_hex: &str) -> bool {
    use subtle::ConstantTimeEq;

    let (Ok(expected), Ok(provided)) = (hex::decode(expected_hex), hex::decode(provided_hex))
    else {
        return false;
    };
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(&provided).into()
}

mod epayco;
mod mercadopago;
mod mock;
mod payu;
mod stripe;
mod wompi;

pub use epayco::EpaycoProvider;
pub use mercadopago::MercadopagoProvider;
pub use mock::MockProvider;
pub use payu::PayuProvider;
pub use stripe::StripeProvider;
pub use wompi::WompiProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_round_trips() {
        for kind in [
            ProviderKind::Wompi,
            ProviderKind::Mercadopago,
            ProviderKind::Payu,
            ProviderKind::Epayco,
            ProviderKind::Stripe,
        ] {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::parse("paypal"), None);
    }

    #[test]
    fn idempotency_key_includes_provider_tx_and_timestamp() {
        let event = ProviderEvent {
            provider: ProviderKind::Wompi,
            transaction_id: "TX-9".into(),
            order_reference: "ORD-1".into(),
            event_type: "transaction.updated".into(),
            native_status: "APPROVED".into(),
            event_timestamp: 1700000000,
            payload: serde_json::json!({}),
        };
        assert_eq!(event.idempotency_key(), "wompi:TX-9:1700000000");
    }

    #[test]
    fn digest_comparison_rejects_mismatch_and_bad_hex() {
        assert!(digests_match("deadbeef", "deadbeef"));
        assert!(!digests_match("deadbeef", "deadbeee"));
        assert!(!digests_match("deadbeef", "dead"));
        assert!(!digests_match("deadbeef", "not-hex!"));
    }
}
