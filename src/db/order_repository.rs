use async_trait::async_trait;
use uuid::Uuid;

use crate::models::order::{Order, OrderType, PaymentStatus};

/// Insert payload for a purchase intent. Exactly one of `user_id` /
/// `guest_email` must be set; the service layer validates this before
/// calling the repository.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_type: OrderType,
    pub item_id: String,
    pub item_name: String,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: Option<String>,
    pub metadata: serde_json::Value,
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create_order(&self, order_number: &str, new: NewOrder)
        -> Result<Order, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error>;

    async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, sqlx::Error>;

    /// Moves the order to `status` unless it already reached a terminal
    /// state. Returns the updated row, or None when the transition was
    /// refused.
    async fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Order>, sqlx::Error>;

    /// The exactly-once fulfillment gate: sets COMPLETED if and only if the
    /// order is still PENDING or PROCESSING, in one conditional statement.
    /// Returns the freshly completed order for the single winning caller;
    /// every concurrent or repeated caller sees None and must not fulfill.
    async fn complete_once(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error>;

    /// COMPLETED -> REFUNDED, the only transition out of a terminal state.
    /// Returns None when the order was never completed or is already
    /// refunded, so repeated refund notifications collapse to a no-op.
    async fn mark_refunded(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error>;

    /// Records which provider the buyer ended up paying through.
    async fn set_payment_method(&self, id: Uuid, provider: &str) -> Result<(), sqlx::Error>;
}
