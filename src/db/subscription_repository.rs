use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::subscription::Subscription;

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub tier_id: String,
    pub tier_name: String,
    pub billing_interval: String,
    pub amount_cents: i64,
    pub currency: String,
    pub provider_reference: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// The owner's non-terminal subscription, if one exists. A partial
    /// unique index guarantees at most one.
    async fn find_active_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscription>, sqlx::Error>;

    /// Creates an ACTIVE subscription, or reactivates/updates the owner's
    /// existing non-terminal one, in a single transaction.
    async fn create_or_activate(
        &self,
        new: NewSubscription,
    ) -> Result<Subscription, sqlx::Error>;

    /// Deferred cancellation: access continues until the period end.
    async fn set_cancel_at_period_end(
        &self,
        id: Uuid,
        cancel: bool,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// Immediate cancellation. None when the subscription is already
    /// terminal.
    async fn cancel_now(&self, id: Uuid) -> Result<Option<Subscription>, sqlx::Error>;
}
