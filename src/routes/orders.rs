use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::ApiError;
use crate::models::order::{Order, OrderType};
use crate::models::user::Actor;
use crate::services::catalog::CatalogError;
use crate::services::providers::{ProviderError, ProviderKind};
use crate::state::AppState;
use crate::utils::identity::MaybeActor;
use crate::utils::reference;

const VERIFY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub order_type: OrderType,
    pub item_id: String,
    #[serde(default)]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub seats: Option<i32>,
    #[serde(default)]
    pub sessions: Option<i32>,
    #[serde(default)]
    pub billing_interval: Option<String>,
    /// Contact for guest checkout; ignored when a signed-in actor is present.
    #[serde(default)]
    pub guest_email: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct VerifyRequest {
    /// Needed when no webhook ever recorded which provider was used.
    #[serde(default)]
    pub provider: Option<String>,
}

/// POST /api/orders
///
/// Prices always come from the catalog, never from the client. Guest
/// checkout is limited to PRODUCT orders; everything that attaches to an
/// account (memberships, sessions, events, courses, premium content)
/// requires one.
pub async fn create_order(
    State(state): State<AppState>,
    MaybeActor(actor): MaybeActor,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (user_id, guest_email) = match &actor {
        Some(actor) => (Some(actor.id), None),
        None => {
            if req.order_type != OrderType::Product {
                return Err(ApiError::Auth(
                    "An account is required for this purchase".to_string(),
                ));
            }
            let email = req
                .guest_email
                .as_deref()
                .filter(|e| e.contains('@'))
                .ok_or_else(|| {
                    ApiError::Validation("A valid guest email is required".to_string())
                })?;
            (None, Some(email.to_string()))
        }
    };

    if let Some(seats) = req.seats {
        if seats < 1 {
            return Err(ApiError::Validation("seats must be at least 1".to_string()));
        }
    }
    if let Some(sessions) = req.sessions {
        if sessions < 1 {
            return Err(ApiError::Validation(
                "sessions must be at least 1".to_string(),
            ));
        }
    }

    let item = state
        .catalog
        .fetch_item(req.order_type, &req.item_id)
        .await
        .map_err(map_catalog_error)?;

    let quantity = match req.order_type {
        OrderType::Event => req.seats.unwrap_or(1),
        _ => 1,
    };
    let amount_cents = item.price_cents * i64::from(quantity);

    let mut metadata = serde_json::Map::new();
    if let Some(at) = &req.scheduled_at {
        metadata.insert("scheduled_at".into(), serde_json::Value::from(at.clone()));
    }
    if let Some(seats) = req.seats {
        metadata.insert("seats".into(), serde_json::Value::from(seats));
    }
    if let Some(sessions) = req.sessions.or(item.sessions) {
        metadata.insert("sessions".into(), serde_json::Value::from(sessions));
    }
    if let Some(interval) = &req.billing_interval {
        metadata.insert(
            "billing_interval".into(),
            serde_json::Value::from(interval.clone()),
        );
    }

    let order_number = reference::order_number();
    let order = state
        .orders
        .create_order(
            &order_number,
            crate::db::order_repository::NewOrder {
                order_type: req.order_type,
                item_id: item.id,
                item_name: item.name,
                amount_cents,
                currency: item.currency,
                payment_method: None,
                metadata: serde_json::Value::Object(metadata),
                user_id,
                guest_email,
            },
        )
        .await?;

    info!(
        order_number = %order.order_number,
        order_type = order.order_type.as_str(),
        "order created"
    );
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/orders/{reference}
///
/// Guest orders have no owner; the reference itself is the capability.
pub async fn get_order(
    State(state): State<AppState>,
    MaybeActor(actor): MaybeActor,
    Path(order_number): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order = find_accessible(&state, actor.as_ref(), &order_number).await?;
    Ok(Json(order))
}

/// POST /api/orders/{reference}/verify
///
/// Manual fallback for a missed webhook: polls the provider's query API and
/// applies whatever status it reports through the same transition gate the
/// webhook path uses. A provider failure or timeout leaves local state
/// untouched.
pub async fn verify_order(
    State(state): State<AppState>,
    MaybeActor(actor): MaybeActor,
    Path(order_number): Path<String>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<Order>, ApiError> {
    let order = find_accessible(&state, actor.as_ref(), &order_number).await?;

    let provider_name = order
        .payment_method
        .clone()
        .or(req.provider)
        .ok_or_else(|| {
            ApiError::Validation(
                "No payment provider recorded for this order; specify one".to_string(),
            )
        })?;
    let kind = ProviderKind::parse(&provider_name)
        .ok_or_else(|| ApiError::Validation(format!("Unknown payment provider {provider_name}")))?;
    let adapter = state
        .provider(kind)
        .ok_or_else(|| ApiError::NotFound("Payment provider not configured".to_string()))?;

    let tx = match tokio::time::timeout(
        VERIFY_TIMEOUT,
        adapter.fetch_transaction(&order.order_number),
    )
    .await
    {
        Err(_) => {
            warn!(order_number = %order.order_number, provider = kind.as_str(), "verify timed out");
            return Err(ApiError::Gateway(
                "Payment provider did not respond in time".to_string(),
            ));
        }
        Ok(Err(ProviderError::NotFound(reference))) => {
            return Err(ApiError::NotFound(format!(
                "Provider has no transaction for {reference}"
            )))
        }
        Ok(Err(err)) => return Err(ApiError::Gateway(err.to_string())),
        Ok(Ok(tx)) => tx,
    };

    if order.payment_method.is_none() {
        state
            .orders
            .set_payment_method(order.id, kind.as_str())
            .await?;
    }

    let status = adapter.normalize_status(&tx.native_status);
    let updated = state.fulfillment.apply_transition(&order, status).await?;
    info!(
        order_number = %updated.order_number,
        status = updated.status.as_str(),
        "order verified against provider"
    );
    Ok(Json(updated))
}

async fn find_accessible(
    state: &AppState,
    actor: Option<&Actor>,
    order_number: &str,
) -> Result<Order, ApiError> {
    let order = state
        .orders
        .find_by_order_number(order_number)
        .await?
        .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;

    if let Some(owner) = order.user_id {
        let actor =
            actor.ok_or_else(|| ApiError::Auth("Missing credentials".to_string()))?;
        if !actor.is_admin() && actor.id != owner {
            return Err(ApiError::Forbidden(
                "Order belongs to another account".to_string(),
            ));
        }
    }
    Ok(order)
}

fn map_catalog_error(err: CatalogError) -> ApiError {
    match err {
        CatalogError::NotFound(id) => ApiError::NotFound(format!("Catalog item {id} not found")),
        CatalogError::Api(msg) => ApiError::Gateway(msg),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::db::mock_db::MockDb;
    use crate::db::order_repository::{NewOrder, OrderRepository};
    use crate::models::order::{Order, OrderType, PaymentStatus};
    use crate::models::user::UserRole;
    use crate::routes::test_helpers::{bearer, build_state};
    use crate::services::catalog::{CatalogItem, MockCatalog};
    use crate::services::notifier::MockNotifier;
    use crate::services::providers::{
        MockProvider, PaymentProvider, ProviderKind, ProviderTransaction,
    };
    use crate::state::AppState;

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/api/orders", post(super::create_order))
            .route("/api/orders/{reference}", get(super::get_order))
            .route("/api/orders/{reference}/verify", post(super::verify_order))
            .with_state(state)
    }

    fn catalog_with_poster() -> MockCatalog {
        MockCatalog::default().with_item(CatalogItem {
            id: "poster-1".into(),
            name: "Tour Poster".into(),
            price_cents: 45_000_00,
            currency: "COP".into(),
            capacity: None,
            sessions: None,
        })
    }

    fn state_with(
        catalog: MockCatalog,
        providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
    ) -> (AppState, Arc<MockDb>) {
        let db = Arc::new(MockDb::default());
        let state = build_state(
            db.clone(),
            Arc::new(catalog),
            Arc::new(MockNotifier::default()),
            providers,
        );
        (state, db)
    }

    async fn seed_order(db: &MockDb, user_id: Option<Uuid>) -> Order {
        db.create_order(
            "ORD-SEEDED1",
            NewOrder {
                order_type: OrderType::Product,
                item_id: "poster-1".into(),
                item_name: "Tour Poster".into(),
                amount_cents: 45_000_00,
                currency: "COP".into(),
                payment_method: None,
                metadata: serde_json::json!({}),
                user_id,
                guest_email: user_id.is_none().then(|| "guest@example.com".to_string()),
            },
        )
        .await
        .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 64).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn signed_in_user_creates_order_priced_by_catalog() {
        let (state, db) = state_with(catalog_with_poster(), HashMap::new());
        let user_id = Uuid::new_v4();
        let auth = bearer(&state, user_id, "fan@example.com", UserRole::User);

        let req = Request::builder()
            .method("POST")
            .uri("/api/orders")
            .header("authorization", auth)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "order_type": "PRODUCT",
                    "item_id": "poster-1"
                })
                .to_string(),
            ))
            .unwrap();
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let json = body_json(resp).await;
        assert_eq!(json["amount_cents"], 45_000_00i64);
        assert_eq!(json["status"], "PENDING");
        assert!(json["order_number"].as_str().unwrap().starts_with("ORD-"));

        let stored = db.orders.lock().unwrap()[0].clone();
        assert_eq!(stored.user_id, Some(user_id));
        assert!(stored.guest_email.is_none());
    }

    #[tokio::test]
    async fn event_order_multiplies_price_by_seats() {
        let catalog = MockCatalog::default().with_item(CatalogItem {
            id: "show-12".into(),
            name: "Live Show".into(),
            price_cents: 80_000_00,
            currency: "COP".into(),
            capacity: Some(120),
            sessions: None,
        });
        let (state, db) = state_with(catalog, HashMap::new());
        let auth = bearer(&state, Uuid::new_v4(), "fan@example.com", UserRole::User);

        let req = Request::builder()
            .method("POST")
            .uri("/api/orders")
            .header("authorization", auth)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "order_type": "EVENT",
                    "item_id": "show-12",
                    "seats": 3
                })
                .to_string(),
            ))
            .unwrap();
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let stored = db.orders.lock().unwrap()[0].clone();
        assert_eq!(stored.amount_cents, 240_000_00);
        assert_eq!(stored.metadata["seats"], 3);
    }

    #[tokio::test]
    async fn guest_checkout_is_product_only() {
        let (state, db) = state_with(catalog_with_poster(), HashMap::new());
        let app = app(state);

        let ok = Request::builder()
            .method("POST")
            .uri("/api/orders")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "order_type": "PRODUCT",
                    "item_id": "poster-1",
                    "guest_email": "guest@example.com"
                })
                .to_string(),
            ))
            .unwrap();
        let resp = app.clone().oneshot(ok).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(
            db.orders.lock().unwrap()[0].guest_email.as_deref(),
            Some("guest@example.com")
        );

        let denied = Request::builder()
            .method("POST")
            .uri("/api/orders")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "order_type": "MEMBERSHIP",
                    "item_id": "gold-tier",
                    "guest_email": "guest@example.com"
                })
                .to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(denied).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn guest_checkout_requires_an_email() {
        let (state, _db) = state_with(catalog_with_poster(), HashMap::new());
        let req = Request::builder()
            .method("POST")
            .uri("/api/orders")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "order_type": "PRODUCT",
                    "item_id": "poster-1"
                })
                .to_string(),
            ))
            .unwrap();
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn owner_reads_order_but_strangers_cannot() {
        let (state, db) = state_with(catalog_with_poster(), HashMap::new());
        let owner = Uuid::new_v4();
        seed_order(&db, Some(owner)).await;
        let app = app(state.clone());

        let as_owner = Request::builder()
            .uri("/api/orders/ORD-SEEDED1")
            .header(
                "authorization",
                bearer(&state, owner, "owner@example.com", UserRole::User),
            )
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            app.clone().oneshot(as_owner).await.unwrap().status(),
            StatusCode::OK
        );

        let as_stranger = Request::builder()
            .uri("/api/orders/ORD-SEEDED1")
            .header(
                "authorization",
                bearer(&state, Uuid::new_v4(), "other@example.com", UserRole::User),
            )
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            app.clone().oneshot(as_stranger).await.unwrap().status(),
            StatusCode::FORBIDDEN
        );

        let anonymous = Request::builder()
            .uri("/api/orders/ORD-SEEDED1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            app.oneshot(anonymous).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn guest_order_is_readable_by_reference_alone() {
        let (state, db) = state_with(catalog_with_poster(), HashMap::new());
        seed_order(&db, None).await;

        let req = Request::builder()
            .uri("/api/orders/ORD-SEEDED1")
            .body(Body::empty())
            .unwrap();
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["guest_email"], "guest@example.com");
    }

    #[tokio::test]
    async fn verify_pulls_provider_status_and_completes_the_order() {
        let provider =
            MockProvider::new(ProviderKind::Wompi).with_transaction(ProviderTransaction {
                transaction_id: "TX-77".into(),
                order_reference: "ORD-SEEDED1".into(),
                native_status: "APPROVED".into(),
            });
        let mut providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>> = HashMap::new();
        providers.insert(ProviderKind::Wompi, Arc::new(provider));
        let (state, db) = state_with(catalog_with_poster(), providers);

        let owner = Uuid::new_v4();
        let order = seed_order(&db, Some(owner)).await;
        db.set_payment_method(order.id, "wompi").await.unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/api/orders/ORD-SEEDED1/verify")
            .header(
                "authorization",
                bearer(&state, owner, "owner@example.com", UserRole::User),
            )
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(
            db.orders.lock().unwrap()[0].status,
            PaymentStatus::Completed
        );
    }

    #[tokio::test]
    async fn verify_gateway_failure_leaves_order_untouched() {
        let provider = MockProvider::new(ProviderKind::Wompi);
        *provider.fetch_result.lock().unwrap() = Some(Err("connection reset".into()));
        let mut providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>> = HashMap::new();
        providers.insert(ProviderKind::Wompi, Arc::new(provider));
        let (state, db) = state_with(catalog_with_poster(), providers);

        let owner = Uuid::new_v4();
        let order = seed_order(&db, Some(owner)).await;
        db.set_payment_method(order.id, "wompi").await.unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/api/orders/ORD-SEEDED1/verify")
            .header(
                "authorization",
                bearer(&state, owner, "owner@example.com", UserRole::User),
            )
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(db.orders.lock().unwrap()[0].status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn verify_without_known_provider_is_rejected() {
        let (state, db) = state_with(catalog_with_poster(), HashMap::new());
        let owner = Uuid::new_v4();
        seed_order(&db, Some(owner)).await;

        let req = Request::builder()
            .method("POST")
            .uri("/api/orders/ORD-SEEDED1/verify")
            .header(
                "authorization",
                bearer(&state, owner, "owner@example.com", UserRole::User),
            )
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
