use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::entitlement::{Entitlement, EntitlementType};

#[derive(Debug, Clone)]
pub struct NewEntitlement {
    pub user_id: Uuid,
    pub entitlement_type: EntitlementType,
    pub resource_id: String,
    pub resource_name: String,
    pub expires_at: Option<OffsetDateTime>,
    pub subscription_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
}

#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    async fn create_entitlement(
        &self,
        new: NewEntitlement,
    ) -> Result<Entitlement, sqlx::Error>;

    /// Non-revoked entitlement created by this order, if any; keeps
    /// fulfillment idempotent under webhook redelivery.
    async fn find_active_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<Entitlement>, sqlx::Error>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Entitlement>, sqlx::Error>;

    /// Marks revoked with a reason; never deletes. Returns the number of
    /// rows revoked.
    async fn revoke_for_subscription(
        &self,
        subscription_id: Uuid,
        reason: &str,
    ) -> Result<u64, sqlx::Error>;

    async fn revoke_for_order(&self, order_id: Uuid, reason: &str) -> Result<u64, sqlx::Error>;
}
