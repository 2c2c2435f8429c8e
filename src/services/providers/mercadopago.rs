use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::order::PaymentStatus;
use crate::services::providers::{
    digests_match, extract_i64, extract_str, PaymentProvider, ProviderError, ProviderEvent,
    ProviderKind, ProviderTransaction,
};

type HmacSha256 = Hmac<Sha256>;

/// Mercado Pago signs with an `x-signature` header of the form
/// `ts=...,v1=...` where v1 is HMAC-SHA256 over `id:{data.id};ts={ts};`.
pub struct MercadopagoProvider {
    webhook_secret: String,
    access_token: String,
    api_base: String,
    http: reqwest::Client,
}

impl MercadopagoProvider {
    pub fn new(
        webhook_secret: &str,
        access_token: &str,
        api_base: &str,
        http: reqwest::Client,
    ) -> Self {
        Self {
            webhook_secret: webhook_secret.to_string(),
            access_token: access_token.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn parse_signature(header: &str) -> Option<(String, String)> {
        let mut ts = None;
        let mut v1 = None;
        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=')?;
            match key {
                "ts" => ts = Some(value.to_string()),
                "v1" => v1 = Some(value.to_string()),
                _ => {}
            }
        }
        Some((ts?, v1?))
    }

    fn expected_digest(&self, data_id: &str, ts: &str) -> String {
        let manifest = format!("id:{data_id};ts:{ts};");
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(manifest.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

pub fn normalize_status(raw: &str) -> PaymentStatus {
    match raw {
        "approved" => PaymentStatus::Completed,
        "pending" => PaymentStatus::Pending,
        "in_process" | "authorized" => PaymentStatus::Processing,
        "rejected" => PaymentStatus::Failed,
        "cancelled" => PaymentStatus::Cancelled,
        "refunded" | "charged_back" => PaymentStatus::Refunded,
        _ => PaymentStatus::Pending,
    }
}

#[async_trait]
impl PaymentProvider for MercadopagoProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mercadopago
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some("x-signature")
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ProviderEvent, ProviderError> {
        let header =
            signature.ok_or_else(|| ProviderError::Signature("missing x-signature".into()))?;
        let (ts, v1) = Self::parse_signature(header)
            .ok_or_else(|| ProviderError::Signature("malformed x-signature".into()))?;

        let event: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|err| ProviderError::Payload(err.to_string()))?;

        let data_id = extract_str(&event, &["data", "id"])
            .map(|s| s.to_string())
            .or_else(|| extract_i64(&event, &["data", "id"]).map(|n| n.to_string()))
            .ok_or_else(|| ProviderError::Payload("missing data.id".into()))?;

        let expected = self.expected_digest(&data_id, &ts);
        if !digests_match(&expected, &v1) {
            return Err(ProviderError::Signature("hmac mismatch".into()));
        }

        let order_reference = extract_str(&event, &["data", "external_reference"])
            .ok_or_else(|| ProviderError::Payload("missing external_reference".into()))?
            .to_string();
        let native_status = extract_str(&event, &["data", "status"])
            .unwrap_or("pending")
            .to_string();
        let event_type = extract_str(&event, &["action"])
            .unwrap_or("payment.updated")
            .to_string();
        let event_timestamp = ts.parse::<i64>().unwrap_or_default();

        Ok(ProviderEvent {
            provider: ProviderKind::Mercadopago,
            transaction_id: data_id,
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
        let url = format!(
            "{}/v1/payments/search?external_reference={}",
            self.api_base, order_reference
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Api(format!(
                "mercadopago returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response.json().await?;
        let payment = body
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|a| a.first())
            .ok_or_else(|| ProviderError::NotFound(order_reference.to_string()))?;

        Ok(ProviderTransaction {
            transaction_id: payment
                .get("id")
                .map(|id| id.to_string().trim_matches('"').to_string())
                .unwrap_or_default(),
            order_reference: order_reference.to_string(),
            native_status: extract_str(payment, &["status"])
                .unwrap_or("pending")
                .to_string(),
        })
    }
}
