use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Canonical payment status shared across every provider. Provider-native
/// vocabularies are mapped into this enum by the adapter's `normalize_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    /// Terminal statuses cannot transition further; COMPLETED additionally
    /// gates fulfillment exactly once via `OrderRepository::complete_once`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Session,
    Event,
    Membership,
    Course,
    Product,
    PremiumContent,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Session => "SESSION",
            OrderType::Event => "EVENT",
            OrderType::Membership => "MEMBERSHIP",
            OrderType::Course => "COURSE",
            OrderType::Product => "PRODUCT",
            OrderType::PremiumContent => "PREMIUM_CONTENT",
        }
    }
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Order {
    pub id: Uuid,
    /// Provider-facing reference, e.g. `ORD-7F3A9C21`.
    pub order_number: String,
    pub order_type: OrderType,
    pub item_id: String,
    pub item_name: String,
    pub amount_cents: i64,
    pub currency: String,
    /// Which provider the buyer paid through, once known.
    pub payment_method: Option<String>,
    pub status: PaymentStatus,
    pub metadata: serde_json::Value,
    // Exactly one of user_id / guest_email is set.
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Order {
    /// Owner email or guest contact for notifications.
    pub fn contact_email<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.guest_email.as_deref().unwrap_or(fallback)
    }
}
