use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::booking::Booking;
use crate::models::session_pack::SessionPackCode;

#[derive(Debug, Clone)]
pub struct NewPackCode {
    pub user_id: Uuid,
    pub sessions_total: i32,
    pub expires_at: OffsetDateTime,
    pub order_id: Uuid,
    pub origin_booking_id: Option<Uuid>,
}

/// Target slot for a pack redemption.
#[derive(Debug, Clone)]
pub struct RedemptionSlot {
    pub resource_id: String,
    pub resource_name: String,
    pub scheduled_at: OffsetDateTime,
}

/// Outcome of the atomic redeem transaction. The checks run in this order
/// and the first failure wins.
#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    Redeemed {
        booking: Booking,
        pack: SessionPackCode,
    },
    NotFound,
    NotOwner,
    Inactive,
    Expired,
    Exhausted,
    SlotTaken,
}

#[async_trait]
pub trait PackRepository: Send + Sync {
    async fn create_pack(
        &self,
        code: &str,
        new: NewPackCode,
    ) -> Result<SessionPackCode, sqlx::Error>;

    async fn find_by_code(&self, code: &str) -> Result<Option<SessionPackCode>, sqlx::Error>;

    /// Pack issued for this originating booking, if any; makes fulfillment
    /// of pack orders idempotent under webhook redelivery.
    async fn find_by_origin_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<SessionPackCode>, sqlx::Error>;

    async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<SessionPackCode>, sqlx::Error>;

    /// One atomic transaction: validate code/owner/active/expiry/remaining
    /// sessions and slot availability, then create the CONFIRMED zero-amount
    /// booking, the redemption link and `sessions_used += 1`,
    /// all-or-nothing.
    async fn redeem_session(
        &self,
        code: &str,
        user_id: Uuid,
        slot: RedemptionSlot,
        now: OffsetDateTime,
    ) -> Result<RedeemOutcome, sqlx::Error>;
}
