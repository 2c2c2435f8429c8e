use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::models::waitlist::WaitlistEntry;

#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Joined(WaitlistEntry),
    /// The owner already holds an active entry for this event.
    AlreadyQueued,
}

#[async_trait]
pub trait WaitlistRepository: Send + Sync {
    /// Inserts a WAITING entry with position = active-entry count + 1,
    /// refusing when the owner already has an active entry, in one
    /// transaction.
    async fn join(
        &self,
        event_id: &str,
        user_id: Uuid,
        seats: i32,
    ) -> Result<JoinOutcome, sqlx::Error>;

    async fn find_entry(&self, id: Uuid) -> Result<Option<WaitlistEntry>, sqlx::Error>;

    async fn active_entries(&self, event_id: &str) -> Result<Vec<WaitlistEntry>, sqlx::Error>;

    /// OFFER_PENDING -> ACCEPTED, only while unexpired and owned by
    /// `user_id`. None when the conditional update matched nothing.
    async fn accept_offer(
        &self,
        entry_id: Uuid,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error>;

    /// {WAITING, OFFER_PENDING} -> CANCELLED, renumbering subsequent active
    /// entries to keep positions gapless, in one transaction. None when the
    /// entry was not active or not owned by `user_id`.
    async fn cancel_entry(
        &self,
        entry_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error>;

    /// Offers the head of the queue its seat: lowest-position WAITING entry
    /// becomes OFFER_PENDING with `offer_window` to respond, provided no
    /// other offer is outstanding for the event. Used when a cancellation
    /// frees seats. Returns the promoted entry, if any.
    async fn promote_next(
        &self,
        event_id: &str,
        now: OffsetDateTime,
        offer_window: Duration,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error>;

    /// On-access offer cascade: expires overdue OFFER_PENDING entries,
    /// renumbers the remaining active entries, and promotes the
    /// lowest-position WAITING entry to OFFER_PENDING with `offer_window`
    /// to respond. Returns the newly promoted entry, if any.
    async fn expire_and_promote(
        &self,
        event_id: &str,
        now: OffsetDateTime,
        offer_window: Duration,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error>;
}
