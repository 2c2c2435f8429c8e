mod config;
mod db;
mod errors;
mod models;
mod responses;
mod routes;
mod services;
mod state;
pub mod utils;

use std::collections::HashMap;
use std::{net::SocketAddr, sync::Arc};

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::http::Method;
use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use config::Config;
use db::audit_log_repository::AuditLogRepository;
use db::booking_repository::BookingRepository;
use db::entitlement_repository::EntitlementRepository;
use db::order_repository::OrderRepository;
use db::pack_repository::PackRepository;
use db::postgres_audit_log_repository::PostgresAuditLogRepository;
use db::postgres_booking_repository::PostgresBookingRepository;
use db::postgres_entitlement_repository::PostgresEntitlementRepository;
use db::postgres_order_repository::PostgresOrderRepository;
use db::postgres_pack_repository::PostgresPackRepository;
use db::postgres_subscription_repository::PostgresSubscriptionRepository;
use db::postgres_waitlist_repository::PostgresWaitlistRepository;
use db::postgres_webhook_ledger_repository::PostgresWebhookLedgerRepository;
use db::subscription_repository::SubscriptionRepository;
use db::waitlist_repository::WaitlistRepository;
use db::webhook_ledger_repository::WebhookLedgerRepository;
use reqwest::Client;
use responses::JsonResponse;
use routes::{bookings, orders, packs, subscriptions, waitlist, webhooks};
use services::bookings::BookingService;
use services::catalog::HttpCatalog;
use services::fulfillment::FulfillmentService;
use services::notifier::SmtpNotifier;
use services::packs::PackService;
use services::providers::{
    EpaycoProvider, MercadopagoProvider, PaymentProvider, PayuProvider, ProviderKind,
    StripeProvider, WompiProvider,
};
use services::subscriptions::SubscriptionService;
use services::waitlist::WaitlistService;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use utils::jwt::JwtKeys;

use crate::state::AppState;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        // Default: 200ms/token (~5 req/sec)
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        // Providers redeliver webhooks in bursts
        .unwrap_or(20);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .unwrap(),
    );

    // Background task to cleanup old IPs
    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let config = Config::from_env();

    let pg_pool = establish_connection(&config.database_url).await;
    let orders = Arc::new(PostgresOrderRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn OrderRepository>;
    let bookings_repo = Arc::new(PostgresBookingRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn BookingRepository>;
    let packs_repo = Arc::new(PostgresPackRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn PackRepository>;
    let subscriptions_repo = Arc::new(PostgresSubscriptionRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn SubscriptionRepository>;
    let entitlements = Arc::new(PostgresEntitlementRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn EntitlementRepository>;
    let waitlist_repo = Arc::new(PostgresWaitlistRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn WaitlistRepository>;
    let webhook_ledger = Arc::new(PostgresWebhookLedgerRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn WebhookLedgerRepository>;
    let audit = Arc::new(PostgresAuditLogRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn AuditLogRepository>;

    let http_client = Client::new();

    let p = &config.providers;
    let mut providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>> = HashMap::new();
    providers.insert(
        ProviderKind::Wompi,
        Arc::new(WompiProvider::new(
            &p.wompi_events_secret,
            &p.wompi_api_base,
            http_client.clone(),
        )),
    );
    providers.insert(
        ProviderKind::Mercadopago,
        Arc::new(MercadopagoProvider::new(
            &p.mercadopago_webhook_secret,
            &p.mercadopago_access_token,
            &p.mercadopago_api_base,
            http_client.clone(),
        )),
    );
    providers.insert(
        ProviderKind::Payu,
        Arc::new(PayuProvider::new(
            &p.payu_api_key,
            &p.payu_merchant_id,
            &p.payu_api_base,
            http_client.clone(),
        )),
    );
    providers.insert(
        ProviderKind::Epayco,
        Arc::new(EpaycoProvider::new(
            &p.epayco_p_cust_id,
            &p.epayco_p_key,
            &p.epayco_api_base,
            http_client.clone(),
        )),
    );
    providers.insert(
        ProviderKind::Stripe,
        Arc::new(StripeProvider::new(
            &p.stripe_webhook_secret,
            &p.stripe_secret_key,
            &p.stripe_api_base,
            http_client.clone(),
        )),
    );

    let notifier = Arc::new(SmtpNotifier::new(&config.smtp).expect("Failed to initialize mailer"));
    let catalog = Arc::new(HttpCatalog::new(&config.catalog_base_url, http_client));
    let jwt_keys = JwtKeys::from_env().expect("JWT_SECRET must be set and strong enough");
    let offer_window = time::Duration::minutes(config.waitlist_offer_window_minutes);

    let fulfillment = Arc::new(FulfillmentService {
        orders: orders.clone(),
        bookings: bookings_repo.clone(),
        packs: packs_repo.clone(),
        subscriptions: subscriptions_repo.clone(),
        entitlements: entitlements.clone(),
        audit: audit.clone(),
        notifier: notifier.clone(),
    });
    let pack_service = Arc::new(PackService {
        packs: packs_repo.clone(),
        audit: audit.clone(),
    });
    let booking_service = Arc::new(BookingService {
        bookings: bookings_repo.clone(),
        waitlist: waitlist_repo.clone(),
        audit: audit.clone(),
        notifier: notifier.clone(),
        offer_window,
    });
    let waitlist_service = Arc::new(WaitlistService {
        waitlist: waitlist_repo.clone(),
        bookings: bookings_repo.clone(),
        orders: orders.clone(),
        catalog: catalog.clone(),
        audit: audit.clone(),
        offer_window,
    });
    let subscription_service = Arc::new(SubscriptionService {
        subscriptions: subscriptions_repo.clone(),
        entitlements: entitlements.clone(),
        audit: audit.clone(),
    });

    let frontend_origin = config.frontend_origin.clone();
    let state = AppState {
        orders,
        bookings: bookings_repo,
        packs: packs_repo,
        subscriptions: subscriptions_repo,
        entitlements,
        waitlist: waitlist_repo,
        webhook_ledger,
        audit,
        providers: Arc::new(providers),
        catalog,
        notifier,
        fulfillment,
        pack_service,
        booking_service,
        waitlist_service,
        subscription_service,
        jwt_keys,
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(frontend_origin.parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    let app = Router::new()
        .route("/", get(root))
        .route("/api/webhooks/{provider}", post(webhooks::provider_webhook))
        .route("/api/orders", post(orders::create_order))
        .route("/api/orders/{reference}", get(orders::get_order))
        .route("/api/orders/{reference}/verify", post(orders::verify_order))
        .route("/api/packs/redeem", post(packs::redeem))
        .route("/api/packs/balance", get(packs::balance))
        .route("/api/bookings/{id}/cancel", post(bookings::cancel))
        .route("/api/bookings/{id}/reschedule", post(bookings::reschedule))
        .route("/api/waitlist/join", post(waitlist::join))
        .route("/api/waitlist/{id}/accept", post(waitlist::accept))
        .route("/api/waitlist/{id}/cancel", post(waitlist::cancel))
        .route("/api/subscriptions/{id}/cancel", post(subscriptions::cancel))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: governor_conf.clone(),
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));

    let listener = TcpListener::bind(addr).await.unwrap();
    println!("Running at http://{}", addr);
    axum::serve(listener, make_service).await.unwrap();
}

/// A simple root route.
async fn root() -> Response {
    JsonResponse::success("Hello, Encore!").into_response()
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    info!("✅ Successfully connected to the database");
    pool
}
