use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use tracing::{error, info, warn};

use crate::errors::ApiError;
use crate::responses::JsonResponse;
use crate::services::providers::{PaymentProvider, ProviderEvent, ProviderKind};
use crate::state::AppState;

/// POST /api/webhooks/{provider}
///
/// Signature verification happens before the ledger sees anything; a
/// rejected payload leaves no row behind. Processing failures mark the
/// ledger row failed and answer 500 so the provider's retry machinery
/// redelivers; a redelivered key that already processed is acknowledged
/// without side effects.
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(kind) = ProviderKind::parse(&provider) else {
        return JsonResponse::not_found("Unknown payment provider").into_response();
    };
    let Some(adapter) = state.provider(kind) else {
        return JsonResponse::not_found("Payment provider not configured").into_response();
    };

    let signature = adapter
        .signature_header()
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok());

    let event = match adapter.verify_webhook(&body, signature) {
        Ok(event) => event,
        Err(err) => {
            warn!(provider = kind.as_str(), %err, "webhook rejected");
            return JsonResponse::bad_request("Webhook verification failed").into_response();
        }
    };

    let key = event.idempotency_key();
    let check = match state
        .webhook_ledger
        .record_and_check(kind.as_str(), &key, &event.event_type, &event.payload)
        .await
    {
        Ok(check) => check,
        Err(err) => {
            error!(provider = kind.as_str(), %key, ?err, "webhook ledger write failed");
            return JsonResponse::server_error("Failed to record webhook").into_response();
        }
    };
    if check.already_processed {
        info!(provider = kind.as_str(), %key, "duplicate webhook delivery skipped");
        return JsonResponse::success("Event already processed").into_response();
    }

    match process_event(&state, adapter, &event).await {
        Ok(()) => {
            if let Err(err) = state.webhook_ledger.mark_processed(&key).await {
                warn!(%key, ?err, "failed to mark webhook processed");
            }
            JsonResponse::success("Event processed").into_response()
        }
        Err(err) => {
            error!(provider = kind.as_str(), %key, %err, "webhook processing failed");
            if let Err(mark_err) = state.webhook_ledger.mark_failed(&key, &err.to_string()).await {
                warn!(%key, ?mark_err, "failed to mark webhook failed");
            }
            JsonResponse::server_error("Event processing failed").into_response()
        }
    }
}

async fn process_event(
    state: &AppState,
    adapter: Arc<dyn PaymentProvider>,
    event: &ProviderEvent,
) -> Result<(), ApiError> {
    let order = state
        .orders
        .find_by_order_number(&event.order_reference)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("no order matches reference {}", event.order_reference))
        })?;

    if order.payment_method.is_none() {
        state
            .orders
            .set_payment_method(order.id, event.provider.as_str())
            .await?;
    }

    let status = adapter.normalize_status(&event.native_status);
    state.fulfillment.apply_transition(&order, status).await?;
    Ok(())
}
