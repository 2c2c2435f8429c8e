use async_trait::async_trait;

use crate::models::webhook_event::WebhookEvent;

/// Result of gating an inbound provider event on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerCheck {
    /// True when this key was already processed; the caller must skip all
    /// side effects and still acknowledge success to stop provider retries.
    pub already_processed: bool,
}

/// Append-only ledger of inbound provider notifications. Rows are never
/// deleted; redelivery of a processed key is recognized and skipped. The
/// ledger never retries on its own - the provider's redelivery drives
/// reprocessing of failed rows.
#[async_trait]
pub trait WebhookLedgerRepository: Send + Sync {
    /// Upserts the event (processed = false on first sight) and reports
    /// whether it was already processed, in one atomic statement.
    async fn record_and_check(
        &self,
        provider: &str,
        idempotency_key: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<LedgerCheck, sqlx::Error>;

    async fn mark_processed(&self, idempotency_key: &str) -> Result<(), sqlx::Error>;

    /// Records the failure and increments the retry counter; the row stays
    /// unprocessed so the provider's redelivery can try again.
    async fn mark_failed(&self, idempotency_key: &str, error: &str) -> Result<(), sqlx::Error>;

    async fn find_event(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<WebhookEvent>, sqlx::Error>;
}
