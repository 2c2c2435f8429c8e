use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::db::pack_repository::RedemptionSlot;
use crate::errors::ApiError;
use crate::services::packs::PackBalance;
use crate::state::AppState;
use crate::utils::identity::AuthActor;

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
    pub resource_id: String,
    #[serde(default)]
    pub resource_name: Option<String>,
    /// RFC 3339 timestamp of the slot being claimed.
    pub scheduled_at: String,
}

/// POST /api/packs/redeem
pub async fn redeem(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(req): Json<RedeemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let scheduled_at = OffsetDateTime::parse(&req.scheduled_at, &Rfc3339)
        .map_err(|_| ApiError::Validation("scheduled_at must be RFC 3339".to_string()))?;

    let slot = RedemptionSlot {
        resource_name: req
            .resource_name
            .unwrap_or_else(|| req.resource_id.clone()),
        resource_id: req.resource_id,
        scheduled_at,
    };
    let booking = state.pack_service.redeem(&actor, &req.code, slot).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// GET /api/packs/balance
pub async fn balance(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
) -> Result<Json<Vec<PackBalance>>, ApiError> {
    let balances = state.pack_service.balance(&actor).await?;
    Ok(Json(balances))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::db::mock_db::MockDb;
    use crate::db::pack_repository::{NewPackCode, PackRepository};
    use crate::models::user::UserRole;
    use crate::routes::test_helpers::{bearer, mock_state};
    use crate::state::AppState;

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/api/packs/redeem", post(super::redeem))
            .route("/api/packs/balance", get(super::balance))
            .with_state(state)
    }

    async fn seed_pack(db: &MockDb, user_id: Uuid) {
        db.create_pack(
            "PACK-AB12CD34",
            NewPackCode {
                user_id,
                sessions_total: 8,
                expires_at: OffsetDateTime::now_utc() + Duration::days(365),
                order_id: Uuid::new_v4(),
                origin_booking_id: None,
            },
        )
        .await
        .unwrap();
    }

    fn redeem_request(auth: &str, code: &str) -> Request<Body> {
        let in_a_week = OffsetDateTime::now_utc() + Duration::days(7);
        Request::builder()
            .method("POST")
            .uri("/api/packs/redeem")
            .header("authorization", auth)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "code": code,
                    "resource_id": "studio-a",
                    "resource_name": "Studio A",
                    "scheduled_at": in_a_week
                        .format(&time::format_description::well_known::Rfc3339)
                        .unwrap()
                })
                .to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn redeeming_creates_a_zero_amount_booking_and_decrements_balance() {
        let (state, db) = mock_state();
        let user_id = Uuid::new_v4();
        seed_pack(&db, user_id).await;
        let auth = bearer(&state, user_id, "member@example.com", UserRole::User);

        let app = app(state);
        let resp = app
            .clone()
            .oneshot(redeem_request(&auth, "PACK-AB12CD34"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 64).await.unwrap();
        let booking: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(booking["amount_cents"], 0);
        assert_eq!(booking["status"], "CONFIRMED");

        let balance_req = Request::builder()
            .uri("/api/packs/balance")
            .header("authorization", &auth)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(balance_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 64).await.unwrap();
        let balances: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(balances[0]["sessions_remaining"], 7);
        assert_eq!(balances[0]["sessions_used"], 1);
    }

    #[tokio::test]
    async fn redeeming_someone_elses_code_is_forbidden() {
        let (state, db) = mock_state();
        seed_pack(&db, Uuid::new_v4()).await;
        let auth = bearer(&state, Uuid::new_v4(), "other@example.com", UserRole::User);

        let resp = app(state)
            .oneshot(redeem_request(&auth, "PACK-AB12CD34"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(db.bookings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn anonymous_redemption_is_rejected() {
        let (state, _db) = mock_state();
        let req = Request::builder()
            .method("POST")
            .uri("/api/packs/redeem")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "code": "PACK-AB12CD34",
                    "resource_id": "studio-a",
                    "scheduled_at": "2026-09-10T10:00:00Z"
                })
                .to_string(),
            ))
            .unwrap();
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
