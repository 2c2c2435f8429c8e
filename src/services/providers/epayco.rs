use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::models::order::PaymentStatus;
use crate::services::providers::{
    digests_match, extract_str, PaymentProvider, ProviderError, ProviderEvent, ProviderKind,
    ProviderTransaction,
};

/// ePayco confirmation payloads carry `x_signature`: SHA-256 over the
/// `^`-joined string `cust_id^p_key^x_ref_payco^x_transaction_id^x_amount^x_currency_code`.
pub struct EpaycoProvider {
    p_cust_id: String,
    p_key: String,
    api_base: String,
    http: reqwest::Client,
}

impl EpaycoProvider {
    pub fn new(p_cust_id: &str, p_key: &str, api_base: &str, http: reqwest::Client) -> Self {
        Self {
            p_cust_id: p_cust_id.to_string(),
            p_key: p_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn expected_signature(
        &self,
        ref_payco: &str,
        transaction_id: &str,
        amount: &str,
        currency: &str,
    ) -> String {
        let base = format!(
            "{}^{}^{}^{}^{}^{}",
            self.p_cust_id, self.p_key, ref_payco, transaction_id, amount, currency
        );
        hex::encode(Sha256::digest(base.as_bytes()))
    }
}

pub fn normalize_status(raw: &str) -> PaymentStatus {
    match raw {
        "Aceptada" => PaymentStatus::Completed,
        "Rechazada" | "Fallida" => PaymentStatus::Failed,
        "Pendiente" => PaymentStatus::Pending,
        "Abandonada" | "Cancelada" | "Expirada" => PaymentStatus::Cancelled,
        "Reversada" => PaymentStatus::Refunded,
        _ => PaymentStatus::Pending,
    }
}

#[async_trait]
impl PaymentProvider for EpaycoProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Epayco
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

        let signature = extract_str(&event, &["x_signature"])
            .ok_or_else(|| ProviderError::Signature("missing x_signature".into()))?;
        let ref_payco = extract_str(&event, &["x_ref_payco"])
            .ok_or_else(|| ProviderError::Payload("missing x_ref_payco".into()))?;
        let transaction_id = extract_str(&event, &["x_transaction_id"])
            .ok_or_else(|| ProviderError::Payload("missing x_transaction_id".into()))?;
        let amount = extract_str(&event, &["x_amount"])
            .ok_or_else(|| ProviderError::Payload("missing x_amount".into()))?;
        let currency = extract_str(&event, &["x_currency_code"])
            .ok_or_else(|| ProviderError::Payload("missing x_currency_code".into()))?;

        let expected = self.expected_signature(ref_payco, transaction_id, amount, currency);
        if !digests_match(&expected, signature) {
            return Err(ProviderError::Signature("x_signature mismatch".into()));
        }

        let order_reference = extract_str(&event, &["x_id_invoice"])
            .ok_or_else(|| ProviderError::Payload("missing x_id_invoice".into()))?
            .to_string();
        let native_status = extract_str(&event, &["x_transaction_state"])
            .unwrap_or("Pendiente")
            .to_string();
        let event_timestamp = extract_str(&event, &["x_transaction_date"])
            .and_then(parse_transaction_date)
            .unwrap_or_default();

        Ok(ProviderEvent {
            provider: ProviderKind::Epayco,
            transaction_id: transaction_id.to_string(),
            order_reference,
            event_type: "confirmation".to_string(),
            native_status,
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
        let url = format!(
            "{}/validation/v1/reference/{}",
            self.api_base, order_reference
        );
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Api(format!(
                "epayco returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response.json().await?;
        if !body.get("success").and_then(|s| s.as_bool()).unwrap_or(false) {
            return Err(ProviderError::NotFound(order_reference.to_string()));
        }
        let data = body
            .get("data")
            .ok_or_else(|| ProviderError::NotFound(order_reference.to_string()))?;

        Ok(ProviderTransaction {
            transaction_id: extract_str(data, &["x_transaction_id"])
                .unwrap_or_default()
                .to_string(),
            order_reference: order_reference.to_string(),
            native_status: extract_str(data, &["x_transaction_state"])
                .unwrap_or("Pendiente")
                .to_string(),
        })
    }
}

// "2023-11-14 19:33:20" local to the merchant account.
fn parse_transaction_date(raw: &str) -> Option<i64> {
    let format =
        time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    time::PrimitiveDateTime::parse(raw, &format)
        .ok()
        .map(|dt| dt.assume_utc().unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> EpaycoProvider {
        EpaycoProvider::new(
            "901234",
            "f1a2b3c4d5",
            "https://secure.epayco.test",
            reqwest::Client::new(),
        )
    }

    fn signed_event(p: &EpaycoProvider, state: &str) -> serde_json::Value {
        serde_json::json!({
            "x_ref_payco": "118742",
            "x_transaction_id": "48291",
            "x_amount": "150000.00",
            "x_currency_code": "COP",
            "x_id_invoice": "ORD-1",
            "x_transaction_state": state,
            "x_transaction_date": "2023-11-14 19:33:20",
            "x_signature": p.expected_signature("118742", "48291", "150000.00", "COP"),
        })
    }

    #[test]
    fn verifies_valid_signature() {
        let p = provider();
        let event = signed_event(&p, "Aceptada");
        let parsed = p
            .verify_webhook(serde_json::to_vec(&event).unwrap().as_slice(), None)
            .unwrap();
        assert_eq!(parsed.order_reference, "ORD-1");
        assert_eq!(parsed.transaction_id, "48291");
        assert_eq!(parsed.native_status, "Aceptada");
    }

    #[test]
    fn rejects_tampered_amount() {
        let p = provider();
        let mut event = signed_event(&p, "Aceptada");
        event["x_amount"] = serde_json::json!("1.00");
        let result = p.verify_webhook(serde_json::to_vec(&event).unwrap().as_slice(), None);
        assert!(matches!(result, Err(ProviderError::Signature(_))));
    }

    #[test]
    fn status_mapping_is_total() {
        assert_eq!(normalize_status("Aceptada"), PaymentStatus::Completed);
        assert_eq!(normalize_status("Rechazada"), PaymentStatus::Failed);
        assert_eq!(normalize_status("Fallida"), PaymentStatus::Failed);
        assert_eq!(normalize_status("Pendiente"), PaymentStatus::Pending);
        assert_eq!(normalize_status("Abandonada"), PaymentStatus::Cancelled);
        assert_eq!(normalize_status("Reversada"), PaymentStatus::Refunded);
        assert_eq!(normalize_status("???"), PaymentStatus::Pending);
    }
}
