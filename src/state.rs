use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::db::audit_log_repository::AuditLogRepository;
use crate::db::booking_repository::BookingRepository;
use crate::db::entitlement_repository::EntitlementRepository;
use crate::db::order_repository::OrderRepository;
use crate::db::pack_repository::PackRepository;
use crate::db::subscription_repository::SubscriptionRepository;
use crate::db::waitlist_repository::WaitlistRepository;
use crate::db::webhook_ledger_repository::WebhookLedgerRepository;
use crate::services::bookings::BookingService;
use crate::services::catalog::CatalogService;
use crate::services::fulfillment::FulfillmentService;
use crate::services::notifier::Notifier;
use crate::services::packs::PackService;
use crate::services::providers::{PaymentProvider, ProviderKind};
use crate::services::subscriptions::SubscriptionService;
use crate::services::waitlist::WaitlistService;
use crate::utils::jwt::JwtKeys;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<dyn OrderRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub packs: Arc<dyn PackRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub entitlements: Arc<dyn EntitlementRepository>,
    pub waitlist: Arc<dyn WaitlistRepository>,
    pub webhook_ledger: Arc<dyn WebhookLedgerRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub providers: Arc<HashMap<ProviderKind, Arc<dyn PaymentProvider>>>,
    pub catalog: Arc<dyn CatalogService>,
    pub notifier: Arc<dyn Notifier>,
    pub fulfillment: Arc<FulfillmentService>,
    pub pack_service: Arc<PackService>,
    pub booking_service: Arc<BookingService>,
    pub waitlist_service: Arc<WaitlistService>,
    pub subscription_service: Arc<SubscriptionService>,
    pub jwt_keys: JwtKeys,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn provider(&self, kind: ProviderKind) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(&kind).cloned()
    }
}
