use std::sync::Mutex;

use async_trait::async_trait;

use crate::models::order::PaymentStatus;
use crate::services::providers::{
    PaymentProvider, ProviderError, ProviderEvent, ProviderKind, ProviderTransaction,
};

/// Test double: hands back pre-seeded events and transactions instead of
/// checking real signatures.
pub struct MockProvider {
    kind: ProviderKind,
    pub verify_result: Mutex<Option<Result<ProviderEvent, String>>>,
    pub fetch_result: Mutex<Option<Result<ProviderTransaction, String>>>,
    pub verified_payloads: Mutex<Vec<Vec<u8>>>,
    pub fetched_references: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            verify_result: Mutex::new(None),
            fetch_result: Mutex::new(None),
            verified_payloads: Mutex::new(Vec::new()),
            fetched_references: Mutex::new(Vec::new()),
        }
    }

    pub fn with_event(self, event: ProviderEvent) -> Self {
        *self.verify_result.lock().unwrap() = Some(Ok(event));
        self
    }

    pub fn with_transaction(self, tx: ProviderTransaction) -> Self {
        *self.fetch_result.lock().unwrap() = Some(Ok(tx));
        self
    }

    pub fn rejecting_signature(self, reason: &str) -> Self {
        *self.verify_result.lock().unwrap() = Some(Err(reason.to_string()));
        self
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some("x-mock-signature")
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        _signature: Option<&str>,
    ) -> Result<ProviderEvent, ProviderError> {
        self.verified_payloads.lock().unwrap().push(payload.to_vec());
        match self.verify_result.lock().unwrap().clone() {
            Some(Ok(event)) => Ok(event),
            Some(Err(reason)) => Err(ProviderError::Signature(reason)),
            None => Err(ProviderError::Payload("mock has no event seeded".into())),
        }
    }

    fn normalize_status(&self, raw: &str) -> PaymentStatus {
        match raw {
            "APPROVED" => PaymentStatus::Completed,
            "PROCESSING" => PaymentStatus::Processing,
            "DECLINED" => PaymentStatus::Failed,
            "VOIDED" => PaymentStatus::Cancelled,
            "REFUNDED" => PaymentStatus::Refunded,
            _ => PaymentStatus::Pending,
        }
    }

    async fn fetch_transaction(
        &self,
        order_reference: &str,
    ) -> Result<ProviderTransaction, ProviderError> {
        self.fetched_references
            .lock()
            .unwrap()
            .push(order_reference.to_string());
        match self.fetch_result.lock().unwrap().clone() {
            Some(Ok(tx)) => Ok(tx),
            Some(Err(reason)) => Err(ProviderError::Api(reason)),
            None => Err(ProviderError::NotFound(order_reference.to_string())),
        }
    }
}
