use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::db::audit_log_repository::AuditLogRepository;
use crate::db::pack_repository::{PackRepository, RedeemOutcome, RedemptionSlot};
use crate::errors::ApiError;
use crate::models::audit_log::NewAuditLog;
use crate::models::booking::Booking;
use crate::models::user::Actor;

/// One pack as the balance endpoint reports it.
#[derive(Debug, Clone, Serialize)]
pub struct PackBalance {
    pub code: String,
    pub sessions_total: i32,
    pub sessions_used: i32,
    pub sessions_remaining: i32,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

pub struct PackService {
    pub packs: Arc<dyn PackRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
}

impl PackService {
    /// Exchanges one pack session for a CONFIRMED booking. All checks and
    /// writes happen in the repository's single transaction; this layer
    /// maps each typed refusal onto the error taxonomy.
    pub async fn redeem(
        &self,
        actor: &Actor,
        code: &str,
        slot: RedemptionSlot,
    ) -> Result<Booking, ApiError> {
        let now = OffsetDateTime::now_utc();
        let outcome = self.packs.redeem_session(code, actor.id, slot, now).await?;

        let (booking, pack) = match outcome {
            RedeemOutcome::Redeemed { booking, pack } => (booking, pack),
            RedeemOutcome::NotFound => {
                return Err(ApiError::NotFound("pack code not found".to_string()))
            }
            RedeemOutcome::NotOwner => {
                return Err(ApiError::Forbidden(
                    "pack code belongs to another account".to_string(),
                ))
            }
            RedeemOutcome::Inactive => {
                return Err(ApiError::Conflict("pack code is no longer active".to_string()))
            }
            RedeemOutcome::Expired => {
                return Err(ApiError::Conflict("pack code has expired".to_string()))
            }
            RedeemOutcome::Exhausted => {
                return Err(ApiError::Conflict("pack code has no sessions left".to_string()))
            }
            RedeemOutcome::SlotTaken => {
                return Err(ApiError::Conflict("slot is already booked".to_string()))
            }
        };

        info!(
            code = %pack.code,
            booking_id = %booking.id,
            remaining = pack.sessions_remaining(),
            "pack session redeemed"
        );

        let entry = NewAuditLog::new("pack_code", pack.id, "pack.redeemed")
            .actor(actor.id, &actor.email)
            .after(serde_json::json!({
                "booking_id": booking.id,
                "sessions_used": pack.sessions_used,
            }));
        if let Err(err) = self.audit.append(entry).await {
            warn!(?err, code = %pack.code, "audit append failed");
        }

        Ok(booking)
    }

    pub async fn balance(&self, actor: &Actor) -> Result<Vec<PackBalance>, ApiError> {
        let packs = self.packs.list_for_user(actor.id).await?;
        Ok(packs
            .into_iter()
            .map(|p| PackBalance {
                sessions_remaining: p.sessions_remaining(),
                code: p.code,
                sessions_total: p.sessions_total,
                sessions_used: p.sessions_used,
                active: p.active,
                expires_at: p.expires_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::db::pack_repository::NewPackCode;
    use crate::models::user::UserRole;
    use crate::utils::reference;

    fn actor(id: Uuid) -> Actor {
        Actor {
            id,
            email: "member@example.com".into(),
            role: UserRole::User,
        }
    }

    fn slot(hours_ahead: i64) -> RedemptionSlot {
        RedemptionSlot {
            resource_id: "studio-1".into(),
            resource_name: "Studio One".into(),
            scheduled_at: OffsetDateTime::now_utc() + Duration::hours(hours_ahead),
        }
    }

    async fn seeded_pack(db: &Arc<MockDb>, owner: Uuid, total: i32) -> String {
        let code = reference::pack_code();
        db.create_pack(
            &code,
            NewPackCode {
                user_id: owner,
                sessions_total: total,
                expires_at: OffsetDateTime::now_utc() + Duration::days(365),
                order_id: Uuid::new_v4(),
                origin_booking_id: None,
            },
        )
        .await
        .unwrap();
        code
    }

    #[tokio::test]
    async fn redeems_into_confirmed_zero_amount_booking() {
        let db = Arc::new(MockDb::default());
        let owner = Uuid::new_v4();
        let code = seeded_pack(&db, owner, 8).await;
        let svc = PackService {
            packs: db.clone(),
            audit: db.clone(),
        };

        let booking = svc.redeem(&actor(owner), &code, slot(48)).await.unwrap();
        assert_eq!(booking.amount_cents, 0);

        let balance = svc.balance(&actor(owner)).await.unwrap();
        assert_eq!(balance[0].sessions_remaining, 7);
    }

    #[tokio::test]
    async fn wrong_owner_is_forbidden() {
        let db = Arc::new(MockDb::default());
        let code = seeded_pack(&db, Uuid::new_v4(), 8).await;
        let svc = PackService {
            packs: db.clone(),
            audit: db.clone(),
        };

        let err = svc
            .redeem(&actor(Uuid::new_v4()), &code, slot(48))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AUTH");
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let db = Arc::new(MockDb::default());
        let svc = PackService {
            packs: db.clone(),
            audit: db.clone(),
        };

        let err = svc
            .redeem(&actor(Uuid::new_v4()), "PACK-00000000", slot(48))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn double_booking_same_slot_conflicts() {
        let db = Arc::new(MockDb::default());
        let owner = Uuid::new_v4();
        let code = seeded_pack(&db, owner, 8).await;
        let svc = PackService {
            packs: db.clone(),
            audit: db.clone(),
        };
        let when = slot(48);

        svc.redeem(&actor(owner), &code, when.clone()).await.unwrap();
        let err = svc.redeem(&actor(owner), &code, when).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }
}
