use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::booking::{Booking, BookingStatus};
use crate::models::order::PaymentStatus;

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub user_id: Uuid,
    pub resource_id: String,
    pub resource_name: String,
    pub scheduled_at: Option<OffsetDateTime>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub seats: i32,
    pub order_id: Option<Uuid>,
    pub sessions_total: Option<i32>,
    pub sessions_remaining: Option<i32>,
}

/// Outcome of a slot-checked insert. The conflict check runs inside the
/// insert transaction; a partial unique index on
/// (resource_id, scheduled_at) for slot-holding statuses backs it against
/// check-then-insert races.
#[derive(Debug, Clone)]
pub enum BookingInsertOutcome {
    Created(Booking),
    SlotTaken,
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled {
        booking: Booking,
        /// Pack code whose session counter was restored in the same
        /// transaction, when the booking was pack-funded.
        reversed_pack_code: Option<String>,
    },
    /// Not in a cancellable state (already terminal or awaiting payment).
    NotCancellable,
}

#[derive(Debug, Clone)]
pub enum RescheduleOutcome {
    Rescheduled(Booking),
    SlotTaken,
    NotReschedulable,
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Inserts only when no {PENDING, CONFIRMED} booking holds the same
    /// resource + scheduled time.
    async fn insert_booking(&self, new: NewBooking)
        -> Result<BookingInsertOutcome, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>, sqlx::Error>;

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Booking>, sqlx::Error>;

    /// PENDING_PAYMENT or PENDING -> CONFIRMED with payment marked
    /// COMPLETED. None when the booking is in neither state.
    async fn confirm_booking(&self, id: Uuid) -> Result<Option<Booking>, sqlx::Error>;

    /// Cancels from {PENDING, CONFIRMED} and reverses any pack redemption
    /// (delete the link row, decrement sessions_used while the pack is
    /// active) in the same transaction.
    async fn cancel_booking(&self, id: Uuid, reason: &str)
        -> Result<CancelOutcome, sqlx::Error>;

    /// Moves the slot, re-validating exclusivity against the new time inside
    /// the transaction; records the previous time and the initiator and
    /// increments reschedule_count.
    async fn reschedule_booking(
        &self,
        id: Uuid,
        new_time: OffsetDateTime,
        initiator: Uuid,
    ) -> Result<RescheduleOutcome, sqlx::Error>;

    /// Seats currently held by slot-holding bookings of one resource.
    async fn count_active_seats(&self, resource_id: &str) -> Result<i64, sqlx::Error>;
}
