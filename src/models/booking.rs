use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    PendingPayment,
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "PENDING_PAYMENT",
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
        }
    }

    /// A booking in one of these states holds its slot; at most one such
    /// booking may exist per resource + scheduled time.
    pub fn holds_slot(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Session resource or event being reserved.
    pub resource_id: String,
    pub resource_name: String,
    /// Null for undated reservations (e.g. event tickets without a slot).
    #[serde(with = "time::serde::rfc3339::option")]
    pub scheduled_at: Option<OffsetDateTime>,
    pub status: BookingStatus,
    pub payment_status: crate::models::order::PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub seats: i32,
    /// Order that paid for this booking, when one exists. Pack-funded
    /// bookings carry the pack's originating order instead of their own.
    pub order_id: Option<Uuid>,
    pub reschedule_count: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub previous_scheduled_at: Option<OffsetDateTime>,
    pub rescheduled_by: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    pub sessions_total: Option<i32>,
    pub sessions_remaining: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
