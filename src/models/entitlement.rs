use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitlementType {
    Membership,
    Course,
    Product,
    PremiumContent,
}

impl EntitlementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementType::Membership => "MEMBERSHIP",
            EntitlementType::Course => "COURSE",
            EntitlementType::Product => "PRODUCT",
            EntitlementType::PremiumContent => "PREMIUM_CONTENT",
        }
    }
}

/// Durable access grant. Ending access is a revocation, never a delete, so
/// the grant history stays auditable.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Entitlement {
    pub id: Uuid,
    pub user_id: Uuid,
    pub entitlement_type: EntitlementType,
    pub resource_id: String,
    pub resource_name: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub subscription_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub revoked: bool,
    pub revoked_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
