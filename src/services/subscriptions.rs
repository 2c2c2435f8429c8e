use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::audit_log_repository::AuditLogRepository;
use crate::db::entitlement_repository::EntitlementRepository;
use crate::db::subscription_repository::SubscriptionRepository;
use crate::errors::ApiError;
use crate::models::audit_log::NewAuditLog;
use crate::models::subscription::Subscription;
use crate::models::user::Actor;

pub struct SubscriptionService {
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub entitlements: Arc<dyn EntitlementRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
}

impl SubscriptionService {
    /// Immediate cancellation ends access now and revokes the linked
    /// MEMBERSHIP entitlements; deferred cancellation flags the period end
    /// and leaves access in place until then.
    pub async fn cancel(
        &self,
        actor: &Actor,
        subscription_id: Uuid,
        immediate: bool,
    ) -> Result<Subscription, ApiError> {
        let subscription = self
            .subscriptions
            .find_by_id(subscription_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("subscription not found".to_string()))?;
        if !actor.is_admin() && subscription.user_id != actor.id {
            return Err(ApiError::Forbidden(
                "subscription belongs to another account".to_string(),
            ));
        }

        let updated = if immediate {
            let cancelled = self
                .subscriptions
                .cancel_now(subscription_id)
                .await?
                .ok_or_else(|| {
                    ApiError::Conflict("subscription is already cancelled".to_string())
                })?;
            let revoked = self
                .entitlements
                .revoke_for_subscription(subscription_id, "subscription cancelled")
                .await?;
            info!(subscription_id = %subscription_id, revoked, "subscription cancelled immediately");
            cancelled
        } else {
            let flagged = self
                .subscriptions
                .set_cancel_at_period_end(subscription_id, true)
                .await?
                .ok_or_else(|| {
                    ApiError::Conflict("subscription is already cancelled".to_string())
                })?;
            info!(subscription_id = %subscription_id, "subscription set to cancel at period end");
            flagged
        };

        let entry = NewAuditLog::new("subscription", subscription_id, "subscription.cancelled")
            .actor(actor.id, &actor.email)
            .before(serde_json::json!({ "status": subscription.status }))
            .after(serde_json::json!({
                "status": updated.status,
                "cancel_at_period_end": updated.cancel_at_period_end,
            }))
            .reason(Some(if immediate { "immediate" } else { "period_end" }));
        if let Err(err) = self.audit.append(entry).await {
            warn!(?err, subscription_id = %subscription_id, "audit append failed");
        }

        Ok(updated)
    }
}
