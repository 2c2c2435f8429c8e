use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitlistStatus {
    Waiting,
    OfferPending,
    Accepted,
    Expired,
    Cancelled,
}

impl WaitlistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitlistStatus::Waiting => "WAITING",
            WaitlistStatus::OfferPending => "OFFER_PENDING",
            WaitlistStatus::Accepted => "ACCEPTED",
            WaitlistStatus::Expired => "EXPIRED",
            WaitlistStatus::Cancelled => "CANCELLED",
        }
    }

    /// Active entries occupy a queue position; their positions per event
    /// form a dense 1-based sequence.
    pub fn is_active(&self) -> bool {
        matches!(self, WaitlistStatus::Waiting | WaitlistStatus::OfferPending)
    }
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub event_id: String,
    pub user_id: Uuid,
    pub seats: i32,
    pub position: i32,
    pub status: WaitlistStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub offer_expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
