use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Prepaid multi-session voucher. Invariant: 0 <= sessions_used <=
/// sessions_total; `expires_at` is a hard cutoff regardless of remaining
/// sessions.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct SessionPackCode {
    pub id: Uuid,
    /// Redeemable reference handed to the buyer, e.g. `PACK-4B2E91AC`.
    pub code: String,
    pub user_id: Uuid,
    pub sessions_total: i32,
    pub sessions_used: i32,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub order_id: Uuid,
    /// Booking the pack purchase originated from, used to make pack
    /// issuance idempotent on webhook redelivery.
    pub origin_booking_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl SessionPackCode {
    pub fn sessions_remaining(&self) -> i32 {
        self.sessions_total - self.sessions_used
    }
}

/// Links one consumed pack session to exactly one booking. Deleted (and the
/// usage counter decremented) when that booking is cancelled.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct PackRedemption {
    pub id: Uuid,
    pub pack_code_id: Uuid,
    pub booking_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub redeemed_at: OffsetDateTime,
}
