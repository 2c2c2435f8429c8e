use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::models::waitlist::WaitlistEntry;
use crate::services::waitlist::WaitlistAcceptance;
use crate::state::AppState;
use crate::utils::identity::AuthActor;

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub event_id: String,
    #[serde(default = "default_seats")]
    pub seats: i32,
}

fn default_seats() -> i32 {
    1
}

/// POST /api/waitlist/join
pub async fn join(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(req): Json<JoinRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .waitlist_service
        .join(&actor, &req.event_id, req.seats)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// POST /api/waitlist/{id}/accept
pub async fn accept(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<WaitlistAcceptance>, ApiError> {
    let acceptance = state.waitlist_service.accept_offer(&actor, entry_id).await?;
    Ok(Json(acceptance))
}

/// POST /api/waitlist/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<WaitlistEntry>, ApiError> {
    let entry = state.waitlist_service.cancel(&actor, entry_id).await?;
    Ok(Json(entry))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::db::booking_repository::{BookingInsertOutcome, BookingRepository, NewBooking};
    use crate::db::mock_db::MockDb;
    use crate::db::waitlist_repository::{JoinOutcome, WaitlistRepository};
    use crate::models::booking::{Booking, BookingStatus};
    use crate::models::order::PaymentStatus;
    use crate::models::user::UserRole;
    use crate::models::waitlist::WaitlistStatus;
    use crate::routes::test_helpers::{bearer, build_state};
    use crate::services::catalog::{CatalogItem, MockCatalog};
    use crate::services::notifier::MockNotifier;
    use crate::state::AppState;

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/api/waitlist/join", post(super::join))
            .route("/api/waitlist/{id}/accept", post(super::accept))
            .route("/api/waitlist/{id}/cancel", post(super::cancel))
            .with_state(state)
    }

    fn sold_out_event() -> CatalogItem {
        CatalogItem {
            id: "show-12".into(),
            name: "Live Show".into(),
            price_cents: 80_000_00,
            currency: "COP".into(),
            capacity: Some(1),
            sessions: None,
        }
    }

    fn state_for_event(item: CatalogItem) -> (AppState, Arc<MockDb>) {
        let db = Arc::new(MockDb::default());
        let state = build_state(
            db.clone(),
            Arc::new(MockCatalog::default().with_item(item)),
            Arc::new(MockNotifier::default()),
            std::collections::HashMap::new(),
        );
        (state, db)
    }

    /// Fills the event's single seat so joins are accepted.
    async fn fill_event(db: &MockDb) -> Booking {
        let outcome = BookingRepository::insert_booking(
            db,
            NewBooking {
                user_id: Uuid::new_v4(),
                resource_id: "show-12".into(),
                resource_name: "Live Show".into(),
                scheduled_at: Some(OffsetDateTime::now_utc() + Duration::days(10)),
                status: BookingStatus::Confirmed,
                payment_status: PaymentStatus::Completed,
                amount_cents: 80_000_00,
                currency: "COP".into(),
                seats: 1,
                order_id: None,
                sessions_total: None,
                sessions_remaining: None,
            },
        )
        .await
        .unwrap();
        match outcome {
            BookingInsertOutcome::Created(b) => b,
            BookingInsertOutcome::SlotTaken => panic!("seed slot taken"),
        }
    }

    fn join_request(auth: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/waitlist/join")
            .header("authorization", auth)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"event_id": "show-12", "seats": 1}).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn joining_requires_the_event_to_be_full() {
        let (state, db) = state_for_event(sold_out_event());
        let auth = bearer(&state, Uuid::new_v4(), "fan@example.com", UserRole::User);
        let app = app(state);

        let resp = app.clone().oneshot(join_request(&auth)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(db.waitlist.lock().unwrap().is_empty());

        fill_event(&db).await;
        let resp = app.oneshot(join_request(&auth)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let entry = db.waitlist.lock().unwrap()[0].clone();
        assert_eq!(entry.position, 1);
        assert_eq!(entry.status, WaitlistStatus::Waiting);
    }

    #[tokio::test]
    async fn accepting_a_paid_offer_creates_a_pending_order() {
        let (state, db) = state_for_event(sold_out_event());
        let filler = fill_event(&db).await;
        let user_id = Uuid::new_v4();
        let auth = bearer(&state, user_id, "fan@example.com", UserRole::User);
        let app = app(state);

        let resp = app.clone().oneshot(join_request(&auth)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let entry_id = db.waitlist.lock().unwrap()[0].id;
        // The seat frees up and the head of the queue is offered it.
        BookingRepository::cancel_booking(db.as_ref(), filler.id, "no show")
            .await
            .unwrap();
        db.promote_next("show-12", OffsetDateTime::now_utc(), Duration::days(1))
            .await
            .unwrap();

        let accept = Request::builder()
            .method("POST")
            .uri(format!("/api/waitlist/{entry_id}/accept"))
            .header("authorization", &auth)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(accept).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 64).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["entry"]["status"], "ACCEPTED");
        assert_eq!(json["booking"]["status"], "PENDING_PAYMENT");
        assert_eq!(json["order"]["amount_cents"], 80_000_00i64);
        assert_eq!(json["order"]["status"], "PENDING");
    }

    #[tokio::test]
    async fn cancelling_an_entry_promotes_the_next_in_line() {
        let (state, db) = state_for_event(sold_out_event());
        fill_event(&db).await;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        // Queue two members directly; first holds the offer.
        let JoinOutcome::Joined(head) =
            WaitlistRepository::join(db.as_ref(), "show-12", first, 1).await.unwrap()
        else {
            panic!("join refused");
        };
        db.promote_next("show-12", OffsetDateTime::now_utc(), Duration::days(1))
            .await
            .unwrap();
        let JoinOutcome::Joined(_) =
            WaitlistRepository::join(db.as_ref(), "show-12", second, 1).await.unwrap()
        else {
            panic!("join refused");
        };

        let auth = bearer(&state, first, "first@example.com", UserRole::User);
        let cancel = Request::builder()
            .method("POST")
            .uri(format!("/api/waitlist/{}/cancel", head.id))
            .header("authorization", &auth)
            .body(Body::empty())
            .unwrap();
        let resp = app(state).oneshot(cancel).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let entries = db.waitlist.lock().unwrap();
        let promoted = entries.iter().find(|e| e.user_id == second).unwrap();
        assert_eq!(promoted.status, WaitlistStatus::OfferPending);
        assert_eq!(promoted.position, 1);
    }

    #[tokio::test]
    async fn strangers_cannot_accept_an_offer() {
        let (state, db) = state_for_event(sold_out_event());
        fill_event(&db).await;
        let owner = Uuid::new_v4();
        let owner_auth = bearer(&state, owner, "fan@example.com", UserRole::User);
        let app = app(state.clone());
        app.clone().oneshot(join_request(&owner_auth)).await.unwrap();
        let entry_id = db.waitlist.lock().unwrap()[0].id;

        let stranger = bearer(&state, Uuid::new_v4(), "other@example.com", UserRole::User);
        let accept = Request::builder()
            .method("POST")
            .uri(format!("/api/waitlist/{entry_id}/accept"))
            .header("authorization", stranger)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(accept).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
