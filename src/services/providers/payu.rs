use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::models::order::PaymentStatus;
use crate::services::providers::{
    digests_match, extract_str, PaymentProvider, ProviderError, ProviderEvent, ProviderKind,
    ProviderTransaction,
};

/// PayU confirmation pages carry the signature inside the form payload as
/// `sign`: SHA-256 over `ApiKey~merchantId~reference_sale~value~currency~state_pol`.
pub struct PayuProvider {
    api_key: String,
    merchant_id: String,
    api_base: String,
    http: reqwest::Client,
}

impl PayuProvider {
    pub fn new(api_key: &str, merchant_id: &str, api_base: &str, http: reqwest::Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            merchant_id: merchant_id.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn expected_sign(&self, reference: &str, value: &str, currency: &str, state: &str) -> String {
        let base = format!(
            "{}~{}~{}~{}~{}~{}",
            self.api_key,
            self.merchant_id,
            reference,
            normalize_amount(value),
            currency,
            state
        );
        hex::encode(Sha256::digest(base.as_bytes()))
    }
}

/// PayU hashes amounts with the second decimal dropped when it is zero
/// ("150000.00" signs as "150000.0").
fn normalize_amount(value: &str) -> String {
    match value.split_once('.') {
        Some((whole, frac)) if frac.len() == 2 && frac.ends_with('0') => {
            format!("{whole}.{}", &frac[..1])
        }
        _ => value.to_string(),
    }
}

pub fn normalize_status(raw: &str) -> PaymentStatus {
    match raw {
        "4" | "APPROVED" => PaymentStatus::Completed,
        "6" | "DECLINED" | "104" | "ERROR" => PaymentStatus::Failed,
        "5" | "EXPIRED" => PaymentStatus::Cancelled,
        "7" | "PENDING" => PaymentStatus::Pending,
        _ => PaymentStatus::Pending,
    }
}

#[async_trait]
impl PaymentProvider for PayuProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Payu
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

        let sign = extract_str(&event, &["sign"])
            .ok_or_else(|| ProviderError::Signature("missing sign field".into()))?;
        let reference = extract_str(&event, &["reference_sale"])
            .ok_or_else(|| ProviderError::Payload("missing reference_sale".into()))?;
        let value = extract_str(&event, &["value"])
            .ok_or_else(|| ProviderError::Payload("missing value".into()))?;
        let currency = extract_str(&event, &["currency"])
            .ok_or_else(|| ProviderError::Payload("missing currency".into()))?;
        let state = extract_str(&event, &["state_pol"])
            .ok_or_else(|| ProviderError::Payload("missing state_pol".into()))?;

        let expected = self.expected_sign(reference, value, currency, state);
        if !digests_match(&expected, &sign.to_lowercase()) {
            return Err(ProviderError::Signature("sign mismatch".into()));
        }

        let transaction_id = extract_str(&event, &["transaction_id"])
            .ok_or_else(|| ProviderError::Payload("missing transaction_id".into()))?
            .to_string();
        let event_timestamp = extract_str(&event, &["transaction_date"])
            .and_then(parse_transaction_date)
            .unwrap_or_default();

        Ok(ProviderEvent {
            provider: ProviderKind::Payu,
            transaction_id,
            order_reference: reference.to_string(),
            event_type: "confirmation".to_string(),
            native_status: state.to_string(),
            event_timestamp,
            payload: event.clone(),
        })
    }

    fn normalize_status(&self, raw: &str) -> PaymentStatus {
        normalize_status(raw)
    }

    async fn fetch_transaction(
        &self,
        order_reference: &str,
    ) -> Result<ProviderTransaction, ProviderError> {
        let body = serde_json::json!({
            "test": false,
            "language": "es",
            "command": "ORDER_DETAIL_BY_REFERENCE_CODE",
            "merchant": { "apiKey": self.api_key, "apiLogin": self.merchant_id },
            "details": { "referenceCode": order_reference }
        });
        let url = format!("{}/reports-api/4.0/service.cgi", self.api_base);
        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Api(format!(
                "payu returned {}",
                response.status()
            )));
        }
        let report: serde_json::Value = response.json().await?;
        let order = report
            .get("result")
            .and_then(|r| r.get("payload"))
            .and_then(|p| p.as_array())
            .and_then(|a| a.first())
            .ok_or_else(|| ProviderError::NotFound(order_reference.to_string()))?;
        let tx = order
            .get("transactions")
            .and_then(|t| t.as_array())
            .and_then(|a| a.last())
            .ok_or_else(|| ProviderError::NotFound(order_reference.to_string()))?;

        Ok(ProviderTransaction {
            transaction_id: extract_str(tx, &["id"]).unwrap_or_default().to_string(),
            order_reference: order_reference.to_string(),
            native_status: extract_str(tx, &["transactionResponse", "state"])
                .unwrap_or("PENDING")
                .to_string(),
        })
    }
}

// "2023-11-14 19:33:20.0" in the merchant account's timezone; fall back to 0
// rather than rejecting the event when the format drifts.
fn parse_transaction_date(raw: &str) -> Option<i64> {
    let format = time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"
    );
    time::PrimitiveDateTime::parse(raw, &format)
        .ok()
        .map(|dt| dt.assume_utc().unix_timestamp())
}
