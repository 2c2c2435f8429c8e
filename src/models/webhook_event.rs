use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// One inbound provider notification, recorded exactly once and never deleted.
/// `idempotency_key` is `{provider}:{transaction_id}:{event_timestamp}`.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: String,
    pub idempotency_key: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub failed: bool,
    pub last_error: Option<String>,
    pub retry_count: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
}
