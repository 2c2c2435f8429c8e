use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::order::PaymentStatus;
use crate::services::providers::{
    digests_match, extract_i64, extract_str, PaymentProvider, ProviderError, ProviderEvent,
    ProviderKind, ProviderTransaction,
};

type HmacSha256 = Hmac<Sha256>;

/// Stripe signs with a `Stripe-Signature` header of the form `t=...,v1=...`
/// where v1 is HMAC-SHA256 over `{t}.{raw body}`.
pub struct StripeProvider {
    webhook_secret: String,
    secret_key: String,
    api_base: String,
    http: reqwest::Client,
}

impl StripeProvider {
    pub fn new(webhook_secret: &str, secret_key: &str, api_base: &str, http: reqwest::Client) -> Self {
        Self {
            webhook_secret: webhook_secret.to_string(),
            secret_key: secret_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn parse_signature(header: &str) -> Option<(i64, Vec<String>)> {
        let mut timestamp = None;
        let mut digests = Vec::new();
        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=')?;
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => digests.push(value.to_string()),
                _ => {}
            }
        }
        Some((timestamp?, digests))
    }

    fn expected_digest(&self, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }
}

pub fn normalize_status(raw: &str) -> PaymentStatus {
    match raw {
        "succeeded" => PaymentStatus::Completed,
        "processing" => PaymentStatus::Processing,
        "canceled" => PaymentStatus::Cancelled,
        "refunded" => PaymentStatus::Refunded,
        "failed" | "requires_payment_method" => PaymentStatus::Failed,
        "requires_action" | "requires_confirmation" | "requires_capture" => PaymentStatus::Pending,
        _ => PaymentStatus::Pending,
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some("stripe-signature")
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ProviderEvent, ProviderError> {
        let header = signature
            .ok_or_else(|| ProviderError::Signature("missing stripe-signature".into()))?;
        let (timestamp, digests) = Self::parse_signature(header)
            .ok_or_else(|| ProviderError::Signature("malformed stripe-signature".into()))?;

        let expected = self.expected_digest(timestamp, payload);
        if !digests.iter().any(|d| digests_match(&expected, d)) {
            return Err(ProviderError::Signature("hmac mismatch".into()));
        }

        let event: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|err| ProviderError::Payload(err.to_string()))?;

        let object = event
            .get("data")
            .and_then(|d| d.get("object"))
            .ok_or_else(|| ProviderError::Payload("missing data.object".into()))?;
        let transaction_id = extract_str(object, &["id"])
            .ok_or_else(|| ProviderError::Payload("missing data.object.id".into()))?
            .to_string();
        let order_reference = extract_str(object, &["metadata", "order_reference"])
            .ok_or_else(|| ProviderError::Payload("missing metadata.order_reference".into()))?
            .to_string();
        let native_status = extract_str(object, &["status"])
            .unwrap_or("requires_payment_method")
            .to_string();
        let event_type = extract_str(&event, &["type"])
            .unwrap_or("payment_intent.updated")
            .to_string();
        let event_timestamp = extract_i64(&event, &["created"]).unwrap_or(timestamp);

        Ok(ProviderEvent {
            provider: ProviderKind::Stripe,
            transaction_id,
            order_reference,
            event_type,
            native_status,
            event_timestamp,
            payload: event,
        })
    }

    fn normalize_status(&self, raw: &str) -> PaymentStatus {
        normalize_status(raw)
    }

    async fn fetch_transaction(
        &self,
        order_reference: &str,
    ) -> Result<ProviderTransaction, ProviderError> {
        let url = format!("{}/v1/payment_intents/search", self.api_base);
        let query = format!("metadata['order_reference']:'{order_reference}'");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .query(&[("query", query.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Api(format!(
                "stripe returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response.json().await?;
        let intent = body
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|a| a.first())
            .ok_or_else(|| ProviderError::NotFound(order_reference.to_string()))?;

        Ok(ProviderTransaction {
            transaction_id: extract_str(intent, &["id"]).unwrap_or_default().to_string(),
            order_reference: order_reference.to_string(),
            native_status: extract_str(intent, &["status"])
                .unwrap_or("requires_payment_method")
                .to_string(),
        })
    }
}
