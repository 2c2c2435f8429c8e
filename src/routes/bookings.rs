use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::models::booking::Booking;
use crate::services::bookings::CancelledBooking;
use crate::state::AppState;
use crate::utils::identity::AuthActor;

#[derive(Debug, Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    /// RFC 3339 timestamp of the new slot.
    pub new_time: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /api/bookings/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<CancelledBooking>, ApiError> {
    let cancelled = state
        .booking_service
        .cancel(&actor, booking_id, req.reason.as_deref())
        .await?;
    Ok(Json(cancelled))
}

/// POST /api/bookings/{id}/reschedule
pub async fn reschedule(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<Booking>, ApiError> {
    let new_time = OffsetDateTime::parse(&req.new_time, &Rfc3339)
        .map_err(|_| ApiError::Validation("new_time must be RFC 3339".to_string()))?;
    let booking = state
        .booking_service
        .reschedule(&actor, booking_id, new_time, req.reason.as_deref())
        .await?;
    Ok(Json(booking))
}
