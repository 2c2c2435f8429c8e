use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::audit_log_repository::AuditLogRepository;
use crate::db::booking_repository::{BookingInsertOutcome, BookingRepository, NewBooking};
use crate::db::order_repository::{NewOrder, OrderRepository};
use crate::db::waitlist_repository::{JoinOutcome, WaitlistRepository};
use crate::errors::ApiError;
use crate::models::audit_log::NewAuditLog;
use crate::models::booking::{Booking, BookingStatus};
use crate::models::order::{Order, OrderType, PaymentStatus};
use crate::models::user::Actor;
use crate::models::waitlist::{WaitlistEntry, WaitlistStatus};
use crate::services::catalog::{CatalogError, CatalogService};
use crate::utils::reference;

/// Result of accepting a waitlist offer. `order` carries the PENDING order
/// when the seat still has to be paid for.
#[derive(Debug, Clone, Serialize)]
pub struct WaitlistAcceptance {
    pub entry: WaitlistEntry,
    pub booking: Booking,
    pub order: Option<Order>,
}

pub struct WaitlistService {
    pub waitlist: Arc<dyn WaitlistRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub catalog: Arc<dyn CatalogService>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub offer_window: Duration,
}

impl WaitlistService {
    /// Joining is only possible once the event is actually full; a request
    /// while seats remain is redirected to direct booking.
    pub async fn join(
        &self,
        actor: &Actor,
        event_id: &str,
        seats: i32,
    ) -> Result<WaitlistEntry, ApiError> {
        if seats < 1 {
            return Err(ApiError::Validation("seats must be at least 1".to_string()));
        }

        self.sweep(event_id).await?;

        let item = self.fetch_event(event_id).await?;
        let capacity = item.capacity.unwrap_or(0) as i64;
        let held = self.bookings.count_active_seats(event_id).await?;
        if capacity - held > 0 {
            return Err(ApiError::Conflict(
                "seats are still available; book the event directly".to_string(),
            ));
        }

        match self.waitlist.join(event_id, actor.id, seats).await? {
            JoinOutcome::Joined(entry) => {
                info!(event = event_id, position = entry.position, "joined waitlist");
                Ok(entry)
            }
            JoinOutcome::AlreadyQueued => Err(ApiError::Conflict(
                "already on the waitlist for this event".to_string(),
            )),
        }
    }

    pub async fn accept_offer(
        &self,
        actor: &Actor,
        entry_id: Uuid,
    ) -> Result<WaitlistAcceptance, ApiError> {
        let entry = self
            .waitlist
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("waitlist entry not found".to_string()))?;
        if !actor.is_admin() && entry.user_id != actor.id {
            return Err(ApiError::Forbidden(
                "waitlist entry belongs to another account".to_string(),
            ));
        }

        self.sweep(&entry.event_id).await?;

        // The sweep may have expired this very offer, so re-read before
        // doing anything with side effects. The entry is not touched until
        // the booking exists; the conditional ACCEPTED update runs last.
        let now = OffsetDateTime::now_utc();
        let entry = self
            .waitlist
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("waitlist entry not found".to_string()))?;
        let offer_open = entry.status == WaitlistStatus::OfferPending
            && entry.offer_expires_at.is_some_and(|at| at > now);
        if !offer_open {
            return Err(ApiError::Conflict(
                "offer is no longer open for this entry".to_string(),
            ));
        }

        let item = self.fetch_event(&entry.event_id).await?;

        // Promotion does not look at seat counts, so an offer can outlive
        // the capacity that prompted it. Re-check before committing a seat.
        let capacity = item.capacity.unwrap_or(0) as i64;
        let held = self.bookings.count_active_seats(&entry.event_id).await?;
        if capacity - held < entry.seats as i64 {
            return Err(ApiError::Conflict(
                "not enough seats are free for this offer".to_string(),
            ));
        }

        let owed = item.price_cents * entry.seats as i64;

        let order = if owed > 0 {
            Some(
                self.orders
                    .create_order(
                        &reference::order_number(),
                        NewOrder {
                            order_type: OrderType::Event,
                            item_id: item.id.clone(),
                            item_name: item.name.clone(),
                            amount_cents: owed,
                            currency: item.currency.clone(),
                            payment_method: None,
                            metadata: serde_json::json!({ "seats": entry.seats }),
                            user_id: Some(entry.user_id),
                            guest_email: None,
                        },
                    )
                    .await?,
            )
        } else {
            None
        };

        let (status, payment_status) = if order.is_some() {
            (BookingStatus::PendingPayment, PaymentStatus::Pending)
        } else {
            (BookingStatus::Confirmed, PaymentStatus::Completed)
        };
        let outcome = self
            .bookings
            .insert_booking(NewBooking {
                user_id: entry.user_id,
                resource_id: item.id.clone(),
                resource_name: item.name.clone(),
                scheduled_at: None,
                status,
                payment_status,
                amount_cents: owed,
                currency: item.currency.clone(),
                seats: entry.seats,
                order_id: order.as_ref().map(|o| o.id),
                sessions_total: None,
                sessions_remaining: None,
            })
            .await?;
        let booking = match outcome {
            BookingInsertOutcome::Created(b) => b,
            BookingInsertOutcome::SlotTaken => {
                return Err(ApiError::Conflict(
                    "event seat was taken before the offer was accepted".to_string(),
                ))
            }
        };

        // Conditional update; a concurrent sweep can still expire the offer
        // between our re-read and this point, in which case the booking is
        // released again.
        let accepted = match self
            .waitlist
            .accept_offer(entry_id, entry.user_id, now)
            .await?
        {
            Some(accepted) => accepted,
            None => {
                if let Err(err) = self
                    .bookings
                    .cancel_booking(booking.id, "waitlist offer lapsed")
                    .await
                {
                    warn!(?err, booking_id = %booking.id, "failed to release booking for lapsed offer");
                }
                return Err(ApiError::Conflict(
                    "offer is no longer open for this entry".to_string(),
                ));
            }
        };

        info!(
            entry_id = %accepted.id,
            booking_id = %booking.id,
            owed,
            "waitlist offer accepted"
        );

        let entry_log = NewAuditLog::new("waitlist_entry", accepted.id, "waitlist.accepted")
            .actor(actor.id, &actor.email)
            .after(serde_json::json!({ "booking_id": booking.id }));
        if let Err(err) = self.audit.append(entry_log).await {
            warn!(?err, entry_id = %accepted.id, "audit append failed");
        }

        Ok(WaitlistAcceptance {
            entry: accepted,
            booking,
            order,
        })
    }

    pub async fn cancel(&self, actor: &Actor, entry_id: Uuid) -> Result<WaitlistEntry, ApiError> {
        let entry = self
            .waitlist
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("waitlist entry not found".to_string()))?;
        if !actor.is_admin() && entry.user_id != actor.id {
            return Err(ApiError::Forbidden(
                "waitlist entry belongs to another account".to_string(),
            ));
        }

        self.sweep(&entry.event_id).await?;

        let cancelled = self
            .waitlist
            .cancel_entry(entry_id, entry.user_id)
            .await?
            .ok_or_else(|| {
                ApiError::Conflict("waitlist entry is no longer active".to_string())
            })?;

        // A cancelled offer frees its seat for the next in line.
        let now = OffsetDateTime::now_utc();
        if let Some(promoted) = self
            .waitlist
            .promote_next(&cancelled.event_id, now, self.offer_window)
            .await?
        {
            info!(entry_id = %promoted.id, event = %cancelled.event_id, "waitlist entry promoted");
        }

        let entry_log = NewAuditLog::new("waitlist_entry", cancelled.id, "waitlist.cancelled")
            .actor(actor.id, &actor.email);
        if let Err(err) = self.audit.append(entry_log).await {
            warn!(?err, entry_id = %cancelled.id, "audit append failed");
        }

        Ok(cancelled)
    }

    /// On-access cascade: every waitlist operation starts by clearing
    /// overdue offers so a lapsed invitee never blocks the queue.
    async fn sweep(&self, event_id: &str) -> Result<(), ApiError> {
        let now = OffsetDateTime::now_utc();
        if let Some(promoted) = self
            .waitlist
            .expire_and_promote(event_id, now, self.offer_window)
            .await?
        {
            info!(entry_id = %promoted.id, event = event_id, "waitlist entry promoted after expiry");
        }
        Ok(())
    }

    async fn fetch_event(
        &self,
        event_id: &str,
    ) -> Result<crate::services::catalog::CatalogItem, ApiError> {
        self.catalog
            .fetch_item(OrderType::Event, event_id)
            .await
            .map_err(|err| match err {
                CatalogError::NotFound(_) => ApiError::NotFound("event not found".to_string()),
                CatalogError::Api(msg) => ApiError::Gateway(msg),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::models::user::UserRole;
    use crate::services::catalog::{CatalogItem, MockCatalog};

    fn actor(id: Uuid) -> Actor {
        Actor {
            id,
            email: "member@example.com".into(),
            role: UserRole::User,
        }
    }

    fn full_event(capacity: i32, price_cents: i64) -> CatalogItem {
        CatalogItem {
            id: "gala".into(),
            name: "Annual Gala".into(),
            price_cents,
            currency: "COP".into(),
            capacity: Some(capacity),
            sessions: None,
        }
    }

    fn service(db: &Arc<MockDb>, item: CatalogItem) -> WaitlistService {
        WaitlistService {
            waitlist: db.clone(),
            bookings: db.clone(),
            orders: db.clone(),
            catalog: Arc::new(MockCatalog::default().with_item(item)),
            audit: db.clone(),
            offer_window: Duration::hours(24),
        }
    }

    async fn fill_event(db: &Arc<MockDb>, seats: i32) -> Booking {
        let outcome = db
            .insert_booking(NewBooking {
                user_id: Uuid::new_v4(),
                resource_id: "gala".into(),
                resource_name: "Annual Gala".into(),
                scheduled_at: None,
                status: BookingStatus::Confirmed,
                payment_status: PaymentStatus::Completed,
                amount_cents: 0,
                currency: "COP".into(),
                seats,
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

    async fn free_seats(db: &Arc<MockDb>, booking: &Booking) {
        let outcome = db.cancel_booking(booking.id, "no show").await.unwrap();
        assert!(matches!(outcome, crate::db::booking_repository::CancelOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn join_rejected_while_seats_remain() {
        let db = Arc::new(MockDb::default());
        let svc = service(&db, full_event(20, 50_000_00));
        fill_event(&db, 5).await;

        let err = svc.join(&actor(Uuid::new_v4()), "gala", 1).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn positions_stay_dense_as_members_join_and_leave() {
        let db = Arc::new(MockDb::default());
        let svc = service(&db, full_event(5, 50_000_00));
        fill_event(&db, 5).await;

        let a = actor(Uuid::new_v4());
        let b = actor(Uuid::new_v4());
        let c = actor(Uuid::new_v4());
        let first = svc.join(&a, "gala", 1).await.unwrap();
        let second = svc.join(&b, "gala", 1).await.unwrap();
        let third = svc.join(&c, "gala", 1).await.unwrap();
        assert_eq!(
            (first.position, second.position, third.position),
            (1, 2, 3)
        );

        svc.cancel(&b, second.id).await.unwrap();

        let remaining = db.active_entries("gala").await.unwrap();
        let positions: Vec<i32> = remaining.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert_eq!(remaining[1].id, third.id);
    }

    #[tokio::test]
    async fn duplicate_join_conflicts() {
        let db = Arc::new(MockDb::default());
        let svc = service(&db, full_event(5, 50_000_00));
        fill_event(&db, 5).await;

        let a = actor(Uuid::new_v4());
        svc.join(&a, "gala", 1).await.unwrap();
        let err = svc.join(&a, "gala", 1).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn accepting_paid_offer_creates_pending_order_and_booking() {
        let db = Arc::new(MockDb::default());
        let svc = service(&db, full_event(5, 50_000_00));
        fill_event(&db, 3).await;
        let filler = fill_event(&db, 2).await;

        let a = actor(Uuid::new_v4());
        let entry = svc.join(&a, "gala", 2).await.unwrap();
        free_seats(&db, &filler).await;
        db.promote_next("gala", OffsetDateTime::now_utc(), Duration::hours(24))
            .await
            .unwrap()
            .unwrap();

        let acceptance = svc.accept_offer(&a, entry.id).await.unwrap();
        assert_eq!(acceptance.entry.status, WaitlistStatus::Accepted);
        assert_eq!(acceptance.booking.status, BookingStatus::PendingPayment);
        let order = acceptance.order.unwrap();
        assert_eq!(order.amount_cents, 100_000_00);
        assert_eq!(order.status, PaymentStatus::Pending);
        assert_eq!(acceptance.booking.order_id, Some(order.id));
    }

    #[tokio::test]
    async fn accepting_free_offer_confirms_immediately() {
        let db = Arc::new(MockDb::default());
        let svc = service(&db, full_event(5, 0));
        fill_event(&db, 4).await;
        let filler = fill_event(&db, 1).await;

        let a = actor(Uuid::new_v4());
        let entry = svc.join(&a, "gala", 1).await.unwrap();
        free_seats(&db, &filler).await;
        db.promote_next("gala", OffsetDateTime::now_utc(), Duration::hours(24))
            .await
            .unwrap()
            .unwrap();

        let acceptance = svc.accept_offer(&a, entry.id).await.unwrap();
        assert!(acceptance.order.is_none());
        assert_eq!(acceptance.booking.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn catalog_failure_leaves_offer_open() {
        let db = Arc::new(MockDb::default());
        let svc = service(&db, full_event(5, 50_000_00));
        fill_event(&db, 4).await;
        let filler = fill_event(&db, 1).await;

        let a = actor(Uuid::new_v4());
        let entry = svc.join(&a, "gala", 1).await.unwrap();
        free_seats(&db, &filler).await;
        db.promote_next("gala", OffsetDateTime::now_utc(), Duration::hours(24))
            .await
            .unwrap()
            .unwrap();

        // Same queue, but the event has vanished from the catalog.
        let delisted = WaitlistService {
            waitlist: db.clone(),
            bookings: db.clone(),
            orders: db.clone(),
            catalog: Arc::new(MockCatalog::default()),
            audit: db.clone(),
            offer_window: Duration::hours(24),
        };
        let err = delisted.accept_offer(&a, entry.id).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let entry = db.find_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, WaitlistStatus::OfferPending);
        assert!(db.orders.lock().unwrap().is_empty());
        assert!(db
            .bookings
            .lock()
            .unwrap()
            .iter()
            .all(|b| b.user_id != a.id));
    }

    #[tokio::test]
    async fn acceptance_rejected_when_freed_seats_do_not_cover_entry() {
        let db = Arc::new(MockDb::default());
        let svc = service(&db, full_event(5, 50_000_00));
        fill_event(&db, 4).await;
        let filler = fill_event(&db, 1).await;

        let a = actor(Uuid::new_v4());
        let entry = svc.join(&a, "gala", 3).await.unwrap();
        free_seats(&db, &filler).await;
        db.promote_next("gala", OffsetDateTime::now_utc(), Duration::hours(24))
            .await
            .unwrap()
            .unwrap();

        // Only one seat came back; a three-seat party cannot take it.
        let err = svc.accept_offer(&a, entry.id).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        let entry = db.find_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, WaitlistStatus::OfferPending);
        assert!(db.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn waiting_entry_cannot_accept() {
        let db = Arc::new(MockDb::default());
        let svc = service(&db, full_event(5, 50_000_00));
        fill_event(&db, 5).await;

        let a = actor(Uuid::new_v4());
        let entry = svc.join(&a, "gala", 1).await.unwrap();

        let err = svc.accept_offer(&a, entry.id).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn cancelling_offer_holder_promotes_next_in_line() {
        let db = Arc::new(MockDb::default());
        let svc = service(&db, full_event(5, 50_000_00));
        fill_event(&db, 5).await;

        let a = actor(Uuid::new_v4());
        let b = actor(Uuid::new_v4());
        let first = svc.join(&a, "gala", 1).await.unwrap();
        let second = svc.join(&b, "gala", 1).await.unwrap();
        db.promote_next("gala", OffsetDateTime::now_utc(), Duration::hours(24))
            .await
            .unwrap()
            .unwrap();

        svc.cancel(&a, first.id).await.unwrap();

        let entry = db.find_entry(second.id).await.unwrap().unwrap();
        assert_eq!(entry.status, WaitlistStatus::OfferPending);
        assert_eq!(entry.position, 1);
    }
}
