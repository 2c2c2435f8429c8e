use std::collections::HashMap;
use std::sync::Arc;

use time::Duration;
use uuid::Uuid;

use crate::config::{Config, ProviderSettings, SmtpSettings};
use crate::db::mock_db::MockDb;
use crate::models::user::UserRole;
use crate::services::bookings::BookingService;
use crate::services::catalog::MockCatalog;
use crate::services::fulfillment::FulfillmentService;
use crate::services::notifier::MockNotifier;
use crate::services::packs::PackService;
use crate::services::providers::{PaymentProvider, ProviderKind};
use crate::services::subscriptions::SubscriptionService;
use crate::services::waitlist::WaitlistService;
use crate::state::AppState;
use crate::utils::jwt::JwtKeys;

pub(crate) const TEST_JWT_SECRET: &str = "0123456789abcdef0123456789abcdef";

pub(crate) fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/encore_test".to_string(),
        frontend_origin: "http://localhost:5173".to_string(),
        catalog_base_url: "http://localhost:9000".to_string(),
        providers: ProviderSettings {
            wompi_events_secret: "test_events_secret".to_string(),
            wompi_api_base: "http://localhost:9001".to_string(),
            mercadopago_webhook_secret: "test_mp_secret".to_string(),
            mercadopago_access_token: "test_mp_token".to_string(),
            mercadopago_api_base: "http://localhost:9002".to_string(),
            payu_api_key: "test_payu_key".to_string(),
            payu_merchant_id: "500238".to_string(),
            payu_api_base: "http://localhost:9003".to_string(),
            epayco_p_cust_id: "901234".to_string(),
            epayco_p_key: "test_epayco_key".to_string(),
            epayco_api_base: "http://localhost:9004".to_string(),
            stripe_webhook_secret: "whsec_test".to_string(),
            stripe_secret_key: "sk_test".to_string(),
            stripe_api_base: "http://localhost:9005".to_string(),
        },
        smtp: SmtpSettings {
            host: "localhost".to_string(),
            port: 2525,
            username: String::new(),
            password: String::new(),
            from: "no-reply@test.local".to_string(),
            tls_disabled: true,
        },
        waitlist_offer_window_minutes: 1440,
    }
}

/// Wires every `AppState` slot to the shared in-memory mocks so route tests
/// can drive the full stack through `tower::ServiceExt::oneshot`.
pub(crate) fn build_state(
    db: Arc<MockDb>,
    catalog: Arc<MockCatalog>,
    notifier: Arc<MockNotifier>,
    providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
) -> AppState {
    let config = Arc::new(test_config());
    let offer_window = Duration::minutes(config.waitlist_offer_window_minutes);
    let jwt_keys = JwtKeys::from_secret(TEST_JWT_SECRET, "encore-identity", "encore-backend")
        .expect("test secret is valid");

    let fulfillment = Arc::new(FulfillmentService {
        orders: db.clone(),
        bookings: db.clone(),
        packs: db.clone(),
        subscriptions: db.clone(),
        entitlements: db.clone(),
        audit: db.clone(),
        notifier: notifier.clone(),
    });
    let pack_service = Arc::new(PackService {
        packs: db.clone(),
        audit: db.clone(),
    });
    let booking_service = Arc::new(BookingService {
        bookings: db.clone(),
        waitlist: db.clone(),
        audit: db.clone(),
        notifier: notifier.clone(),
        offer_window,
    });
    let waitlist_service = Arc::new(WaitlistService {
        waitlist: db.clone(),
        bookings: db.clone(),
        orders: db.clone(),
        catalog: catalog.clone(),
        audit: db.clone(),
        offer_window,
    });
    let subscription_service = Arc::new(SubscriptionService {
        subscriptions: db.clone(),
        entitlements: db.clone(),
        audit: db.clone(),
    });

    AppState {
        orders: db.clone(),
        bookings: db.clone(),
        packs: db.clone(),
        subscriptions: db.clone(),
        entitlements: db.clone(),
        waitlist: db.clone(),
        webhook_ledger: db.clone(),
        audit: db,
        providers: Arc::new(providers),
        catalog,
        notifier,
        fulfillment,
        pack_service,
        booking_service,
        waitlist_service,
        subscription_service,
        jwt_keys,
        config,
    }
}

pub(crate) fn mock_state() -> (AppState, Arc<MockDb>) {
    let db = Arc::new(MockDb::default());
    let state = build_state(
        db.clone(),
        Arc::new(MockCatalog::default()),
        Arc::new(MockNotifier::default()),
        HashMap::new(),
    );
    (state, db)
}

pub(crate) fn bearer(state: &AppState, user_id: Uuid, email: &str, role: UserRole) -> String {
    let token = state
        .jwt_keys
        .encode(user_id, email, role)
        .expect("token mint");
    format!("Bearer {token}")
}
