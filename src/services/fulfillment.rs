use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::audit_log_repository::AuditLogRepository;
use crate::db::booking_repository::{BookingInsertOutcome, BookingRepository, NewBooking};
use crate::db::entitlement_repository::{EntitlementRepository, NewEntitlement};
use crate::db::order_repository::OrderRepository;
use crate::db::pack_repository::{NewPackCode, PackRepository};
use crate::db::subscription_repository::{NewSubscription, SubscriptionRepository};
use crate::errors::ApiError;
use crate::models::audit_log::NewAuditLog;
use crate::models::booking::BookingStatus;
use crate::models::entitlement::EntitlementType;
use crate::models::order::{Order, OrderType, PaymentStatus};
use crate::services::notifier::Notifier;
use crate::utils::reference;

const DEFAULT_PACK_VALIDITY_DAYS: i64 = 365;

/// Effect produced by fulfilling one completed order.
#[derive(Debug, Clone)]
pub enum FulfillmentOutcome {
    SubscriptionActivated {
        subscription_id: Uuid,
        entitlement_id: Uuid,
    },
    BookingConfirmed {
        booking_id: Uuid,
    },
    PackIssued {
        code: String,
        sessions_total: i32,
    },
    EntitlementGranted {
        entitlement_id: Uuid,
    },
    /// Guest purchase with no account to attach grants to; completion and
    /// the notification are the whole effect.
    GuestCompleted,
}

/// Turns a freshly completed order into its domain effects. Callers invoke
/// this only with the row `OrderRepository::complete_once` returned, so
/// concurrent webhook deliveries cannot fulfill twice; each branch is
/// additionally idempotent by looking up the effect it would create, which
/// covers redelivery after a crash between completion and fulfillment.
pub struct FulfillmentService {
    pub orders: Arc<dyn OrderRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub packs: Arc<dyn PackRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub entitlements: Arc<dyn EntitlementRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub notifier: Arc<dyn Notifier>,
}

impl FulfillmentService {
    /// Applies one normalized provider status to an order. Both inbound
    /// webhooks and the manual verify fallback converge here, so the
    /// COMPLETED gate and the refund path behave identically for either
    /// source. Returns the order as it stands afterwards.
    pub async fn apply_transition(
        &self,
        order: &Order,
        status: PaymentStatus,
    ) -> Result<Order, ApiError> {
        match status {
            PaymentStatus::Completed => {
                match self.orders.complete_once(order.id).await? {
                    Some(completed) => {
                        self.fulfill(&completed).await?;
                        Ok(completed)
                    }
                    // A concurrent delivery won the gate, or the order
                    // already reached a terminal state; nothing to do.
                    None => {
                        let current = self
                            .orders
                            .find_by_id(order.id)
                            .await?
                            .unwrap_or_else(|| order.clone());
                        Ok(current)
                    }
                }
            }
            PaymentStatus::Refunded => match self.orders.mark_refunded(order.id).await? {
                Some(refunded) => {
                    self.handle_refund(&refunded).await?;
                    Ok(refunded)
                }
                None => Ok(order.clone()),
            },
            _ => Ok(self
                .orders
                .update_status(order.id, status)
                .await?
                .unwrap_or_else(|| order.clone())),
        }
    }

    pub async fn fulfill(&self, order: &Order) -> Result<FulfillmentOutcome, ApiError> {
        let outcome = match order.order_type {
            OrderType::Membership => self.fulfill_membership(order).await?,
            OrderType::Session => self.fulfill_session(order).await?,
            OrderType::Event => self.fulfill_event(order).await?,
            OrderType::Course => {
                self.grant_entitlement(order, EntitlementType::Course).await?
            }
            OrderType::Product => {
                self.grant_entitlement(order, EntitlementType::Product).await?
            }
            OrderType::PremiumContent => {
                self.grant_entitlement(order, EntitlementType::PremiumContent)
                    .await?
            }
        };

        info!(
            order_number = %order.order_number,
            order_type = order.order_type.as_str(),
            "order fulfilled"
        );
        self.record_audit(order, &outcome).await;
        self.notify_buyer(order, &outcome).await;

        Ok(outcome)
    }

    /// Canonical REFUNDED transition: revoke what the order granted and
    /// cancel the booking it funded. Safe to call more than once.
    pub async fn handle_refund(&self, order: &Order) -> Result<(), ApiError> {
        let revoked = self
            .entitlements
            .revoke_for_order(order.id, "order refunded")
            .await?;
        if revoked > 0 {
            info!(order_number = %order.order_number, revoked, "entitlements revoked on refund");
        }

        if let Some(booking) = self.bookings.find_by_order(order.id).await? {
            if booking.status.holds_slot() {
                self.bookings
                    .cancel_booking(booking.id, "order refunded")
                    .await?;
            }
        }

        if order.order_type == OrderType::Membership {
            if let Some(owner) = order.user_id {
                if let Some(sub) = self.subscriptions.find_active_for_user(owner).await? {
                    if sub.tier_id == order.item_id {
                        self.subscriptions.cancel_now(sub.id).await?;
                        self.entitlements
                            .revoke_for_subscription(sub.id, "subscription refunded")
                            .await?;
                    }
                }
            }
        }

        let entry = NewAuditLog::new("order", order.id, "order.refunded")
            .after(serde_json::json!({ "order_number": order.order_number }));
        if let Err(err) = self.audit.append(entry).await {
            warn!(?err, order_number = %order.order_number, "audit append failed");
        }

        Ok(())
    }

    async fn fulfill_membership(&self, order: &Order) -> Result<FulfillmentOutcome, ApiError> {
        let owner = order.user_id.ok_or_else(|| {
            ApiError::Validation("membership orders require an account".to_string())
        })?;

        let interval = order
            .metadata
            .get("billing_interval")
            .and_then(|v| v.as_str())
            .unwrap_or("month")
            .to_string();
        let now = OffsetDateTime::now_utc();
        let period = if interval == "year" {
            Duration::days(365)
        } else {
            Duration::days(30)
        };

        let subscription = self
            .subscriptions
            .create_or_activate(NewSubscription {
                user_id: owner,
                tier_id: order.item_id.clone(),
                tier_name: order.item_name.clone(),
                billing_interval: interval,
                amount_cents: order.amount_cents,
                currency: order.currency.clone(),
                provider_reference: order.payment_method.clone(),
                current_period_start: Some(now),
                current_period_end: Some(now + period),
            })
            .await?;

        let entitlement = match self.entitlements.find_active_by_order(order.id).await? {
            Some(existing) => existing,
            None => {
                self.entitlements
                    .create_entitlement(NewEntitlement {
                        user_id: owner,
                        entitlement_type: EntitlementType::Membership,
                        resource_id: order.item_id.clone(),
                        resource_name: order.item_name.clone(),
                        expires_at: subscription.current_period_end,
                        subscription_id: Some(subscription.id),
                        order_id: Some(order.id),
                    })
                    .await?
            }
        };

        Ok(FulfillmentOutcome::SubscriptionActivated {
            subscription_id: subscription.id,
            entitlement_id: entitlement.id,
        })
    }

    async fn fulfill_session(&self, order: &Order) -> Result<FulfillmentOutcome, ApiError> {
        let sessions = order
            .metadata
            .get("sessions")
            .and_then(|v| v.as_i64())
            .unwrap_or(1);
        if sessions > 1 {
            self.issue_pack(order, sessions as i32).await
        } else {
            self.confirm_order_booking(order, 1).await
        }
    }

    async fn fulfill_event(&self, order: &Order) -> Result<FulfillmentOutcome, ApiError> {
        let seats = order
            .metadata
            .get("seats")
            .and_then(|v| v.as_i64())
            .unwrap_or(1) as i32;
        self.confirm_order_booking(order, seats).await
    }

    /// Confirms the PENDING_PAYMENT booking created at purchase time, or
    /// inserts a CONFIRMED one from the order's slot metadata.
    async fn confirm_order_booking(
        &self,
        order: &Order,
        seats: i32,
    ) -> Result<FulfillmentOutcome, ApiError> {
        if let Some(existing) = self.bookings.find_by_order(order.id).await? {
            if existing.status == BookingStatus::Confirmed {
                return Ok(FulfillmentOutcome::BookingConfirmed {
                    booking_id: existing.id,
                });
            }
            if let Some(confirmed) = self.bookings.confirm_booking(existing.id).await? {
                return Ok(FulfillmentOutcome::BookingConfirmed {
                    booking_id: confirmed.id,
                });
            }
            return Err(ApiError::Conflict(format!(
                "booking for order {} is no longer confirmable",
                order.order_number
            )));
        }

        let owner = order.user_id.ok_or_else(|| {
            ApiError::Validation("scheduled purchases require an account".to_string())
        })?;
        let scheduled_at = order
            .metadata
            .get("scheduled_at")
            .and_then(|v| v.as_str())
            .map(|raw| {
                OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
                    .map_err(|_| {
                        ApiError::Validation("metadata.scheduled_at is not RFC 3339".to_string())
                    })
            })
            .transpose()?;

        let outcome = self
            .bookings
            .insert_booking(NewBooking {
                user_id: owner,
                resource_id: order.item_id.clone(),
                resource_name: order.item_name.clone(),
                scheduled_at,
                status: BookingStatus::Confirmed,
                payment_status: PaymentStatus::Completed,
                amount_cents: order.amount_cents,
                currency: order.currency.clone(),
                seats,
                order_id: Some(order.id),
                sessions_total: None,
                sessions_remaining: None,
            })
            .await?;

        match outcome {
            BookingInsertOutcome::Created(booking) => Ok(FulfillmentOutcome::BookingConfirmed {
                booking_id: booking.id,
            }),
            BookingInsertOutcome::SlotTaken => Err(ApiError::Conflict(format!(
                "slot for order {} was taken before payment settled",
                order.order_number
            ))),
        }
    }

    async fn issue_pack(
        &self,
        order: &Order,
        sessions_total: i32,
    ) -> Result<FulfillmentOutcome, ApiError> {
        let owner = order.user_id.ok_or_else(|| {
            ApiError::Validation("session packs require an account".to_string())
        })?;

        let origin_booking = self.bookings.find_by_order(order.id).await?;
        if let Some(booking) = &origin_booking {
            if let Some(existing) = self.packs.find_by_origin_booking(booking.id).await? {
                return Ok(FulfillmentOutcome::PackIssued {
                    code: existing.code,
                    sessions_total: existing.sessions_total,
                });
            }
        }

        let validity_days = order
            .metadata
            .get("validity_days")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_PACK_VALIDITY_DAYS);
        let pack = self
            .packs
            .create_pack(
                &reference::pack_code(),
                NewPackCode {
                    user_id: owner,
                    sessions_total,
                    expires_at: OffsetDateTime::now_utc() + Duration::days(validity_days),
                    order_id: order.id,
                    origin_booking_id: origin_booking.as_ref().map(|b| b.id),
                },
            )
            .await?;

        if let Some(booking) = origin_booking {
            if !booking.status.is_terminal() {
                self.bookings.confirm_booking(booking.id).await?;
            }
        }

        Ok(FulfillmentOutcome::PackIssued {
            code: pack.code,
            sessions_total: pack.sessions_total,
        })
    }

    async fn grant_entitlement(
        &self,
        order: &Order,
        entitlement_type: EntitlementType,
    ) -> Result<FulfillmentOutcome, ApiError> {
        let Some(owner) = order.user_id else {
            // Guest checkout: nothing to attach a grant to.
            return Ok(FulfillmentOutcome::GuestCompleted);
        };

        let entitlement = match self.entitlements.find_active_by_order(order.id).await? {
            Some(existing) => existing,
            None => {
                self.entitlements
                    .create_entitlement(NewEntitlement {
                        user_id: owner,
                        entitlement_type,
                        resource_id: order.item_id.clone(),
                        resource_name: order.item_name.clone(),
                        expires_at: None,
                        subscription_id: None,
                        order_id: Some(order.id),
                    })
                    .await?
            }
        };

        Ok(FulfillmentOutcome::EntitlementGranted {
            entitlement_id: entitlement.id,
        })
    }

    async fn record_audit(&self, order: &Order, outcome: &FulfillmentOutcome) {
        let entry = NewAuditLog::new("order", order.id, "order.fulfilled").after(serde_json::json!({
            "order_number": order.order_number,
            "outcome": format!("{outcome:?}"),
        }));
        if let Err(err) = self.audit.append(entry).await {
            warn!(?err, order_number = %order.order_number, "audit append failed");
        }
    }

    async fn notify_buyer(&self, order: &Order, outcome: &FulfillmentOutcome) {
        let email = order
            .guest_email
            .as_deref()
            .or_else(|| order.metadata.get("customer_email").and_then(|v| v.as_str()));
        let Some(email) = email else { return };

        let body = match outcome {
            FulfillmentOutcome::PackIssued {
                code,
                sessions_total,
            } => format!(
                "Your payment for {} was received. Your pack code is {} ({} sessions).",
                order.item_name, code, sessions_total
            ),
            _ => format!("Your payment for {} was received.", order.item_name),
        };
        if let Err(err) = self
            .notifier
            .send(email, "Payment confirmed", &body)
            .await
        {
            warn!(?err, order_number = %order.order_number, "notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::db::order_repository::NewOrder;
    use crate::models::booking::Booking;
    use crate::services::notifier::MockNotifier;

    fn stored_booking(db: &MockDb, id: Uuid) -> Booking {
        db.bookings
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .unwrap()
    }

    fn service(db: &Arc<MockDb>, notifier: &Arc<MockNotifier>) -> FulfillmentService {
        FulfillmentService {
            orders: db.clone(),
            bookings: db.clone(),
            packs: db.clone(),
            subscriptions: db.clone(),
            entitlements: db.clone(),
            audit: db.clone(),
            notifier: notifier.clone(),
        }
    }

    async fn completed_order(
        db: &Arc<MockDb>,
        order_type: OrderType,
        user_id: Option<Uuid>,
        metadata: serde_json::Value,
    ) -> Order {
        let order = db
            .create_order(
                &reference::order_number(),
                NewOrder {
                    order_type,
                    item_id: "item-1".into(),
                    item_name: "Item One".into(),
                    amount_cents: 150_000_00,
                    currency: "COP".into(),
                    payment_method: Some("wompi".into()),
                    metadata,
                    user_id,
                    guest_email: user_id.is_none().then(|| "guest@example.com".into()),
                },
            )
            .await
            .unwrap();
        db.complete_once(order.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn membership_creates_subscription_and_entitlement() {
        let db = Arc::new(MockDb::default());
        let notifier = Arc::new(MockNotifier::default());
        let svc = service(&db, &notifier);
        let user = Uuid::new_v4();
        let order = completed_order(
            &db,
            OrderType::Membership,
            Some(user),
            serde_json::json!({ "billing_interval": "month" }),
        )
        .await;

        let outcome = svc.fulfill(&order).await.unwrap();
        let FulfillmentOutcome::SubscriptionActivated { subscription_id, .. } = outcome else {
            panic!("expected subscription outcome");
        };

        let sub = db.find_active_for_user(user).await.unwrap().unwrap();
        assert_eq!(sub.id, subscription_id);
        assert_eq!(db.entitlements.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeat_fulfillment_grants_nothing_new() {
        let db = Arc::new(MockDb::default());
        let notifier = Arc::new(MockNotifier::default());
        let svc = service(&db, &notifier);
        let order = completed_order(
            &db,
            OrderType::Course,
            Some(Uuid::new_v4()),
            serde_json::json!({}),
        )
        .await;

        svc.fulfill(&order).await.unwrap();
        svc.fulfill(&order).await.unwrap();

        assert_eq!(db.entitlements.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pack_order_issues_code_once() {
        let db = Arc::new(MockDb::default());
        let notifier = Arc::new(MockNotifier::default());
        let svc = service(&db, &notifier);
        let user = Uuid::new_v4();
        let order = completed_order(
            &db,
            OrderType::Session,
            Some(user),
            serde_json::json!({ "sessions": 8 }),
        )
        .await;

        // PENDING_PAYMENT booking created when the pack was purchased.
        let BookingInsertOutcome::Created(origin) = db
            .insert_booking(NewBooking {
                user_id: user,
                resource_id: "item-1".into(),
                resource_name: "Item One".into(),
                scheduled_at: None,
                status: BookingStatus::PendingPayment,
                payment_status: PaymentStatus::Pending,
                amount_cents: order.amount_cents,
                currency: "COP".into(),
                seats: 1,
                order_id: Some(order.id),
                sessions_total: Some(8),
                sessions_remaining: Some(8),
            })
            .await
            .unwrap()
        else {
            panic!("insert failed");
        };

        let FulfillmentOutcome::PackIssued { code, sessions_total } =
            svc.fulfill(&order).await.unwrap()
        else {
            panic!("expected pack outcome");
        };
        assert_eq!(sessions_total, 8);
        assert!(code.starts_with("PACK-"));

        // Redelivery after a crash between completion and fulfillment.
        let FulfillmentOutcome::PackIssued { code: again, .. } =
            svc.fulfill(&order).await.unwrap()
        else {
            panic!("expected pack outcome");
        };
        assert_eq!(again, code);
        assert_eq!(db.packs.lock().unwrap().len(), 1);

        let confirmed = stored_booking(&db, origin.id);
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn event_order_books_requested_seats() {
        let db = Arc::new(MockDb::default());
        let notifier = Arc::new(MockNotifier::default());
        let svc = service(&db, &notifier);
        let order = completed_order(
            &db,
            OrderType::Event,
            Some(Uuid::new_v4()),
            serde_json::json!({ "seats": 3 }),
        )
        .await;

        let FulfillmentOutcome::BookingConfirmed { booking_id } =
            svc.fulfill(&order).await.unwrap()
        else {
            panic!("expected booking outcome");
        };
        let booking = stored_booking(&db, booking_id);
        assert_eq!(booking.seats, 3);
        assert_eq!(booking.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn guest_product_order_completes_with_notification_only() {
        let db = Arc::new(MockDb::default());
        let notifier = Arc::new(MockNotifier::default());
        let svc = service(&db, &notifier);
        let order =
            completed_order(&db, OrderType::Product, None, serde_json::json!({})).await;

        let outcome = svc.fulfill(&order).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::GuestCompleted));
        assert!(db.entitlements.lock().unwrap().is_empty());
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "guest@example.com");
    }

    #[tokio::test]
    async fn refund_revokes_entitlement_and_cancels_booking() {
        let db = Arc::new(MockDb::default());
        let notifier = Arc::new(MockNotifier::default());
        let svc = service(&db, &notifier);
        let user = Uuid::new_v4();
        let order = completed_order(
            &db,
            OrderType::Event,
            Some(user),
            serde_json::json!({ "seats": 1 }),
        )
        .await;
        svc.fulfill(&order).await.unwrap();

        svc.handle_refund(&order).await.unwrap();

        let booking = db.find_by_order(order.id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn apply_transition_completes_and_fulfills_exactly_once() {
        let db = Arc::new(MockDb::default());
        let notifier = Arc::new(MockNotifier::default());
        let svc = service(&db, &notifier);
        let user = Uuid::new_v4();
        let order = db
            .create_order(
                &reference::order_number(),
                NewOrder {
                    order_type: OrderType::Course,
                    item_id: "course-1".into(),
                    item_name: "Course".into(),
                    amount_cents: 40_000_00,
                    currency: "COP".into(),
                    payment_method: Some("wompi".into()),
                    metadata: serde_json::json!({}),
                    user_id: Some(user),
                    guest_email: None,
                },
            )
            .await
            .unwrap();

        let first = svc
            .apply_transition(&order, PaymentStatus::Completed)
            .await
            .unwrap();
        assert_eq!(first.status, PaymentStatus::Completed);
        assert_eq!(db.entitlements.lock().unwrap().len(), 1);

        // Redelivered completion loses the gate and grants nothing new.
        let second = svc
            .apply_transition(&order, PaymentStatus::Completed)
            .await
            .unwrap();
        assert_eq!(second.status, PaymentStatus::Completed);
        assert_eq!(db.entitlements.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refund_transition_only_applies_to_completed_orders() {
        let db = Arc::new(MockDb::default());
        let notifier = Arc::new(MockNotifier::default());
        let svc = service(&db, &notifier);
        let order = completed_order(
            &db,
            OrderType::Course,
            Some(Uuid::new_v4()),
            serde_json::json!({}),
        )
        .await;
        svc.fulfill(&order).await.unwrap();

        let refunded = svc
            .apply_transition(&order, PaymentStatus::Refunded)
            .await
            .unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert!(db.entitlements.lock().unwrap()[0].revoked);

        // A second refund notification is a no-op.
        let again = svc
            .apply_transition(&refunded, PaymentStatus::Refunded)
            .await
            .unwrap();
        assert_eq!(again.status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn notifier_failure_never_fails_fulfillment() {
        let db = Arc::new(MockDb::default());
        let notifier = Arc::new(MockNotifier::default());
        *notifier.should_fail.lock().unwrap() = true;
        let svc = service(&db, &notifier);
        let order =
            completed_order(&db, OrderType::Product, None, serde_json::json!({})).await;

        assert!(svc.fulfill(&order).await.is_ok());
    }
}
