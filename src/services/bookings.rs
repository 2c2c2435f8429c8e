use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::audit_log_repository::AuditLogRepository;
use crate::db::booking_repository::{BookingRepository, CancelOutcome, RescheduleOutcome};
use crate::db::waitlist_repository::WaitlistRepository;
use crate::errors::ApiError;
use crate::models::audit_log::NewAuditLog;
use crate::models::booking::Booking;
use crate::models::user::Actor;

/// Minimum notice a non-admin must give before cancelling or rescheduling
/// a scheduled booking.
pub const CANCELLATION_LEAD: Duration = Duration::hours(24);
/// Reschedules allowed per booking for non-admins.
pub const MAX_RESCHEDULES: i32 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct CancelledBooking {
    pub booking: Booking,
    /// Pack code refunded a session by this cancellation, if the booking
    /// was pack-funded.
    pub reversed_pack_code: Option<String>,
}

pub struct BookingService {
    pub bookings: Arc<dyn BookingRepository>,
    pub waitlist: Arc<dyn WaitlistRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub notifier: Arc<dyn crate::services::notifier::Notifier>,
    pub offer_window: Duration,
}

impl BookingService {
    pub async fn cancel(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        reason: Option<&str>,
    ) -> Result<CancelledBooking, ApiError> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("booking not found".to_string()))?;

        self.enforce_policy(actor, &booking, true)?;

        let reason = reason.unwrap_or("cancelled by user");
        let outcome = self.bookings.cancel_booking(booking.id, reason).await?;
        let (cancelled, reversed_pack_code) = match outcome {
            CancelOutcome::Cancelled {
                booking,
                reversed_pack_code,
            } => (booking, reversed_pack_code),
            CancelOutcome::NotCancellable => {
                return Err(ApiError::Conflict(
                    "booking can no longer be cancelled".to_string(),
                ))
            }
        };

        info!(
            booking_id = %cancelled.id,
            actor = %actor.id,
            reversed_pack = reversed_pack_code.is_some(),
            "booking cancelled"
        );

        let entry = NewAuditLog::new("booking", cancelled.id, "booking.cancelled")
            .actor(actor.id, &actor.email)
            .before(serde_json::json!({ "status": booking.status }))
            .after(serde_json::json!({ "status": cancelled.status }))
            .reason(Some(reason));
        if let Err(err) = self.audit.append(entry).await {
            warn!(?err, booking_id = %cancelled.id, "audit append failed");
        }

        // Freed seats go to the head of the waitlist, when one exists.
        let now = OffsetDateTime::now_utc();
        if let Err(err) = self
            .waitlist
            .expire_and_promote(&cancelled.resource_id, now, self.offer_window)
            .await
        {
            warn!(?err, resource = %cancelled.resource_id, "waitlist sweep failed");
        }
        match self
            .waitlist
            .promote_next(&cancelled.resource_id, now, self.offer_window)
            .await
        {
            Ok(Some(promoted)) => {
                info!(entry_id = %promoted.id, event = %cancelled.resource_id, "waitlist entry promoted");
            }
            Ok(None) => {}
            Err(err) => {
                warn!(?err, resource = %cancelled.resource_id, "waitlist promotion failed");
            }
        }

        self.notify(
            actor,
            "Booking cancelled",
            &format!("Your booking for {} was cancelled.", cancelled.resource_name),
        )
        .await;

        Ok(CancelledBooking {
            booking: cancelled,
            reversed_pack_code,
        })
    }

    pub async fn reschedule(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        new_time: OffsetDateTime,
        reason: Option<&str>,
    ) -> Result<Booking, ApiError> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("booking not found".to_string()))?;

        if new_time <= OffsetDateTime::now_utc() {
            return Err(ApiError::Validation(
                "new time must be in the future".to_string(),
            ));
        }

        self.enforce_policy(actor, &booking, false)?;

        if !actor.is_admin() && booking.reschedule_count >= MAX_RESCHEDULES {
            return Err(ApiError::Conflict(format!(
                "booking has already been rescheduled {MAX_RESCHEDULES} times"
            )));
        }

        let outcome = self
            .bookings
            .reschedule_booking(booking.id, new_time, actor.id)
            .await?;
        let rescheduled = match outcome {
            RescheduleOutcome::Rescheduled(b) => b,
            RescheduleOutcome::SlotTaken => {
                return Err(ApiError::Conflict(
                    "requested slot is already booked".to_string(),
                ))
            }
            RescheduleOutcome::NotReschedulable => {
                return Err(ApiError::Conflict(
                    "booking can no longer be rescheduled".to_string(),
                ))
            }
        };

        info!(
            booking_id = %rescheduled.id,
            actor = %actor.id,
            reschedule_count = rescheduled.reschedule_count,
            "booking rescheduled"
        );

        let entry = NewAuditLog::new("booking", rescheduled.id, "booking.rescheduled")
            .actor(actor.id, &actor.email)
            .before(serde_json::json!({ "scheduled_at": booking.scheduled_at }))
            .after(serde_json::json!({ "scheduled_at": rescheduled.scheduled_at }))
            .reason(reason);
        if let Err(err) = self.audit.append(entry).await {
            warn!(?err, booking_id = %rescheduled.id, "audit append failed");
        }

        self.notify(
            actor,
            "Booking rescheduled",
            &format!(
                "Your booking for {} was moved to a new time.",
                rescheduled.resource_name
            ),
        )
        .await;

        Ok(rescheduled)
    }

    /// Shared cancel/reschedule policy. Admins bypass ownership and the
    /// lead-time requirement; everyone is bound by the state machine.
    fn enforce_policy(
        &self,
        actor: &Actor,
        booking: &Booking,
        cancelling: bool,
    ) -> Result<(), ApiError> {
        if !booking.status.holds_slot() {
            let verb = if cancelling { "cancelled" } else { "rescheduled" };
            return Err(ApiError::Conflict(format!(
                "booking in state {} cannot be {verb}",
                booking.status.as_str()
            )));
        }

        if actor.is_admin() {
            return Ok(());
        }

        if booking.user_id != actor.id {
            return Err(ApiError::Forbidden(
                "booking belongs to another account".to_string(),
            ));
        }

        if let Some(scheduled_at) = booking.scheduled_at {
            if scheduled_at - OffsetDateTime::now_utc() < CANCELLATION_LEAD {
                return Err(ApiError::Validation(
                    "changes require at least 24 hours notice".to_string(),
                ));
            }
        }

        Ok(())
    }

    async fn notify(&self, actor: &Actor, subject: &str, body: &str) {
        if let Err(err) = self.notifier.send(&actor.email, subject, body).await {
            warn!(?err, "notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::booking_repository::{BookingInsertOutcome, NewBooking};
    use crate::db::mock_db::MockDb;
    use crate::models::booking::BookingStatus;
    use crate::models::order::PaymentStatus;
    use crate::models::user::UserRole;
    use crate::services::notifier::MockNotifier;

    fn service(db: &Arc<MockDb>) -> BookingService {
        BookingService {
            bookings: db.clone(),
            waitlist: db.clone(),
            audit: db.clone(),
            notifier: Arc::new(MockNotifier::default()),
            offer_window: Duration::hours(24),
        }
    }

    fn user_actor(id: Uuid) -> Actor {
        Actor {
            id,
            email: "member@example.com".into(),
            role: UserRole::User,
        }
    }

    fn admin_actor() -> Actor {
        Actor {
            id: Uuid::new_v4(),
            email: "ops@example.com".into(),
            role: UserRole::Admin,
        }
    }

    async fn seeded_booking(db: &Arc<MockDb>, owner: Uuid, hours_ahead: i64) -> Booking {
        let outcome = db
            .insert_booking(NewBooking {
                user_id: owner,
                resource_id: "studio-1".into(),
                resource_name: "Studio One".into(),
                scheduled_at: Some(OffsetDateTime::now_utc() + Duration::hours(hours_ahead)),
                status: BookingStatus::Confirmed,
                payment_status: PaymentStatus::Completed,
                amount_cents: 80_000_00,
                currency: "COP".into(),
                seats: 1,
                order_id: None,
                sessions_total: None,
                sessions_remaining: None,
            })
            .await
            .unwrap();
        match outcome {
            BookingInsertOutcome::Created(b) => b,
            BookingInsertOutcome::SlotTaken => panic!("seed slot taken"),
        }
    }

    #[tokio::test]
    async fn owner_cancels_with_enough_notice() {
        let db = Arc::new(MockDb::default());
        let owner = Uuid::new_v4();
        let booking = seeded_booking(&db, owner, 48).await;

        let cancelled = service(&db)
            .cancel(&user_actor(owner), booking.id, Some("travel"))
            .await
            .unwrap();
        assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.booking.cancellation_reason.as_deref(), Some("travel"));
        assert_eq!(db.audit_logs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ten_hour_notice_rejected_for_owner_but_not_admin() {
        let db = Arc::new(MockDb::default());
        let owner = Uuid::new_v4();
        let booking = seeded_booking(&db, owner, 10).await;
        let svc = service(&db);

        let err = svc
            .cancel(&user_actor(owner), booking.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");

        let cancelled = svc
            .cancel(&admin_actor(), booking.id, Some("venue closed"))
            .await
            .unwrap();
        assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn stranger_cannot_cancel() {
        let db = Arc::new(MockDb::default());
        let booking = seeded_booking(&db, Uuid::new_v4(), 48).await;

        let err = service(&db)
            .cancel(&user_actor(Uuid::new_v4()), booking.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AUTH");
    }

    #[tokio::test]
    async fn cancelling_pack_funded_booking_restores_the_session() {
        use crate::db::pack_repository::{
            NewPackCode, PackRepository, RedeemOutcome, RedemptionSlot,
        };

        let db = Arc::new(MockDb::default());
        let owner = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        db.create_pack(
            "PACK-AB12CD34",
            NewPackCode {
                user_id: owner,
                sessions_total: 8,
                expires_at: now + Duration::days(90),
                order_id: Uuid::new_v4(),
                origin_booking_id: None,
            },
        )
        .await
        .unwrap();
        let outcome = db
            .redeem_session(
                "PACK-AB12CD34",
                owner,
                RedemptionSlot {
                    resource_id: "studio-1".into(),
                    resource_name: "Studio One".into(),
                    scheduled_at: now + Duration::hours(48),
                },
                now,
            )
            .await
            .unwrap();
        let booking = match outcome {
            RedeemOutcome::Redeemed { booking, .. } => booking,
            other => panic!("redeem refused: {other:?}"),
        };
        assert_eq!(
            db.find_by_code("PACK-AB12CD34").await.unwrap().unwrap().sessions_used,
            1
        );

        let cancelled = service(&db)
            .cancel(&user_actor(owner), booking.id, None)
            .await
            .unwrap();

        assert_eq!(cancelled.reversed_pack_code.as_deref(), Some("PACK-AB12CD34"));
        let pack = db.find_by_code("PACK-AB12CD34").await.unwrap().unwrap();
        assert_eq!(pack.sessions_used, 0);
        assert!(db.redemptions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_booking_cannot_be_cancelled_again() {
        let db = Arc::new(MockDb::default());
        let owner = Uuid::new_v4();
        let booking = seeded_booking(&db, owner, 48).await;
        let svc = service(&db);

        svc.cancel(&user_actor(owner), booking.id, None).await.unwrap();
        let err = svc
            .cancel(&user_actor(owner), booking.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn reschedule_cap_binds_owner_not_admin() {
        let db = Arc::new(MockDb::default());
        let owner = Uuid::new_v4();
        let booking = seeded_booking(&db, owner, 96).await;
        let svc = service(&db);
        let base = OffsetDateTime::now_utc();

        svc.reschedule(&user_actor(owner), booking.id, base + Duration::hours(100), None)
            .await
            .unwrap();
        svc.reschedule(&user_actor(owner), booking.id, base + Duration::hours(120), None)
            .await
            .unwrap();
        let err = svc
            .reschedule(&user_actor(owner), booking.id, base + Duration::hours(140), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        let moved = svc
            .reschedule(&admin_actor(), booking.id, base + Duration::hours(160), None)
            .await
            .unwrap();
        assert_eq!(moved.reschedule_count, 3);
    }

    #[tokio::test]
    async fn reschedule_target_must_be_future() {
        let db = Arc::new(MockDb::default());
        let owner = Uuid::new_v4();
        let booking = seeded_booking(&db, owner, 96).await;

        let err = service(&db)
            .reschedule(
                &user_actor(owner),
                booking.id,
                OffsetDateTime::now_utc() - Duration::hours(1),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[tokio::test]
    async fn reschedule_records_previous_time_and_initiator() {
        let db = Arc::new(MockDb::default());
        let owner = Uuid::new_v4();
        let booking = seeded_booking(&db, owner, 96).await;
        let original = booking.scheduled_at;

        let moved = service(&db)
            .reschedule(
                &user_actor(owner),
                booking.id,
                OffsetDateTime::now_utc() + Duration::hours(120),
                Some("conflict"),
            )
            .await
            .unwrap();
        assert_eq!(moved.previous_scheduled_at, original);
        assert_eq!(moved.rescheduled_by, Some(owner));
        assert_eq!(moved.reschedule_count, 1);
    }
}
