use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::models::order::PaymentStatus;
use crate::services::providers::{
    digests_match, extract_i64, extract_str, jget, PaymentProvider, ProviderError, ProviderEvent,
    ProviderKind, ProviderTransaction,
};

/// Wompi signs by embedding a checksum in the payload: SHA-256 over the
/// values of `signature.properties` (in order) + timestamp + events secret.
pub struct WompiProvider {
    events_secret: String,
    api_base: String,
    http: reqwest::Client,
}

impl WompiProvider {
    pub fn new(events_secret: &str, api_base: &str, http: reqwest::Client) -> Self {
        Self {
            events_secret: events_secret.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn expected_checksum(&self, event: &serde_json::Value) -> Result<String, ProviderError> {
        let properties = jget(event, &["signature", "properties"])
            .and_then(|p| p.as_array())
            .ok_or_else(|| ProviderError::Payload("missing signature.properties".into()))?;
        let timestamp = extract_i64(event, &["timestamp"])
            .ok_or_else(|| ProviderError::Payload("missing timestamp".into()))?;

        let mut hasher = Sha256::new();
        for property in properties {
            let path: Vec<&str> = property
                .as_str()
                .ok_or_else(|| ProviderError::Payload("non-string signature property".into()))?
                .split('.')
                .collect();
            let value = jget(event, &["data"])
                .and_then(|data| jget(data, &path))
                .ok_or_else(|| {
                    ProviderError::Payload(format!("signed property missing: {:?}", path))
                })?;
            match value {
                serde_json::Value::String(s) => hasher.update(s.as_bytes()),
                other => hasher.update(other.to_string().as_bytes()),
            }
        }
        hasher.update(timestamp.to_string().as_bytes());
        hasher.update(self.events_secret.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

pub fn normalize_status(raw: &str) -> PaymentStatus {
    match raw {
        "APPROVED" => PaymentStatus::Completed,
        "DECLINED" | "ERROR" => PaymentStatus::Failed,
        "VOIDED" => PaymentStatus::Cancelled,
        "PENDING" => PaymentStatus::Pending,
        _ => PaymentStatus::Pending,
    }
}

#[async_trait]
impl PaymentProvider for WompiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Wompi
    }

    fn signature_header(&self) -> Option<&'static str> {
        None
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        _signature: Option<&str>,
    ) -> Result<ProviderEvent, ProviderError> {
        let event: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|err| ProviderError::Payload(err.to_string()))?;

        let provided = extract_str(&event, &["signature", "checksum"])
            .ok_or_else(|| ProviderError::Signature("missing checksum".into()))?;
        let expected = self.expected_checksum(&event)?;
        if !digests_match(&expected, provided) {
            return Err(ProviderError::Signature("checksum mismatch".into()));
        }

        let transaction_id = extract_str(&event, &["data", "transaction", "id"])
            .ok_or_else(|| ProviderError::Payload("missing transaction id".into()))?
            .to_string();
        let order_reference = extract_str(&event, &["data", "transaction", "reference"])
            .ok_or_else(|| ProviderError::Payload("missing transaction reference".into()))?
            .to_string();
        let native_status = extract_str(&event, &["data", "transaction", "status"])
            .unwrap_or("PENDING")
            .to_string();
        let event_type = extract_str(&event, &["event"])
            .unwrap_or("transaction.updated")
            .to_string();
        let event_timestamp = extract_i64(&event, &["timestamp"]).unwrap_or_default();

        Ok(ProviderEvent {
            provider: ProviderKind::Wompi,
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
        let url = format!("{}/transactions?reference={}", self.api_base, order_reference);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Api(format!(
                "wompi returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response.json().await?;
        let tx = jget(&body, &["data"])
            .and_then(|d| d.as_array())
            .and_then(|a| a.first())
            .ok_or_else(|| ProviderError::NotFound(order_reference.to_string()))?;

        Ok(ProviderTransaction {
            transaction_id: extract_str(tx, &["id"]).unwrap_or_default().to_string(),
            order_reference: order_reference.to_string(),
            native_status: extract_str(tx, &["status"]).unwrap_or("PENDING").to_string(),
        })
    }
}
