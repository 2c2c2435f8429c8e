use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::models::subscription::Subscription;
use crate::state::AppState;
use crate::utils::identity::AuthActor;

#[derive(Debug, Deserialize, Default)]
pub struct CancelSubscriptionRequest {
    /// True ends access now and revokes entitlements; false keeps access
    /// until the current period ends.
    #[serde(default)]
    pub immediate: bool,
}

/// POST /api/subscriptions/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(subscription_id): Path<Uuid>,
    Json(req): Json<CancelSubscriptionRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription = state
        .subscription_service
        .cancel(&actor, subscription_id, req.immediate)
        .await?;
    Ok(Json(subscription))
}
