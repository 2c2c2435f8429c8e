use async_trait::async_trait;
use std::sync::Mutex;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::db::audit_log_repository::AuditLogRepository;
use crate::db::booking_repository::{
    BookingInsertOutcome, BookingRepository, CancelOutcome, NewBooking, RescheduleOutcome,
};
use crate::db::entitlement_repository::{EntitlementRepository, NewEntitlement};
use crate::db::order_repository::{NewOrder, OrderRepository};
use crate::db::pack_repository::{NewPackCode, PackRepository, RedeemOutcome, RedemptionSlot};
use crate::db::subscription_repository::{NewSubscription, SubscriptionRepository};
use crate::db::waitlist_repository::{JoinOutcome, WaitlistRepository};
use crate::db::webhook_ledger_repository::{LedgerCheck, WebhookLedgerRepository};
use crate::models::audit_log::{AuditLog, NewAuditLog};
use crate::models::booking::{Booking, BookingStatus};
use crate::models::entitlement::Entitlement;
use crate::models::order::{Order, PaymentStatus};
use crate::models::session_pack::{PackRedemption, SessionPackCode};
use crate::models::subscription::{Subscription, SubscriptionStatus};
use crate::models::waitlist::{WaitlistEntry, WaitlistStatus};
use crate::models::webhook_event::WebhookEvent;

/// In-memory stand-in for every repository, mirroring the conditional
/// transition semantics of the Postgres implementations. Tests share one
/// instance across all repository slots of `AppState`.
#[derive(Default)]
pub struct MockDb {
    pub orders: Mutex<Vec<Order>>,
    pub webhook_events: Mutex<Vec<WebhookEvent>>,
    pub bookings: Mutex<Vec<Booking>>,
    pub packs: Mutex<Vec<SessionPackCode>>,
    pub redemptions: Mutex<Vec<PackRedemption>>,
    pub subscriptions: Mutex<Vec<Subscription>>,
    pub entitlements: Mutex<Vec<Entitlement>>,
    pub waitlist: Mutex<Vec<WaitlistEntry>>,
    pub audit_logs: Mutex<Vec<AuditLog>>,
    pub should_fail: bool,
    pub complete_once_calls: Mutex<usize>,
}

impl MockDb {
    fn fail_if_configured(&self) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("mock db failure".into()));
        }
        Ok(())
    }

    fn slot_taken(&self, resource_id: &str, at: OffsetDateTime, exclude: Option<Uuid>) -> bool {
        self.bookings.lock().unwrap().iter().any(|b| {
            b.resource_id == resource_id
                && b.scheduled_at == Some(at)
                && b.status.holds_slot()
                && Some(b.id) != exclude
        })
    }

    fn build_booking(new: &NewBooking) -> Booking {
        let now = OffsetDateTime::now_utc();
        Booking {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            resource_id: new.resource_id.clone(),
            resource_name: new.resource_name.clone(),
            scheduled_at: new.scheduled_at,
            status: new.status,
            payment_status: new.payment_status,
            amount_cents: new.amount_cents,
            currency: new.currency.clone(),
            seats: new.seats,
            order_id: new.order_id,
            reschedule_count: 0,
            previous_scheduled_at: None,
            rescheduled_by: None,
            cancellation_reason: None,
            cancelled_at: None,
            sessions_total: new.sessions_total,
            sessions_remaining: new.sessions_remaining,
            created_at: now,
            updated_at: now,
        }
    }

    fn renumber_after(&self, event_id: &str, removed_position: i32) {
        let mut entries = self.waitlist.lock().unwrap();
        for e in entries.iter_mut() {
            if e.event_id == event_id && e.status.is_active() && e.position > removed_position {
                e.position -= 1;
            }
        }
    }
}

#[async_trait]
impl WebhookLedgerRepository for MockDb {
    async fn record_and_check(
        &self,
        provider: &str,
        idempotency_key: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<LedgerCheck, sqlx::Error> {
        self.fail_if_configured()?;
        let mut events = self.webhook_events.lock().unwrap();
        if let Some(existing) = events.iter().find(|e| e.idempotency_key == idempotency_key) {
            return Ok(LedgerCheck {
                already_processed: existing.processed,
            });
        }
        events.push(WebhookEvent {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            idempotency_key: idempotency_key.to_string(),
            event_type: event_type.to_string(),
            payload: payload.clone(),
            processed: false,
            failed: false,
            last_error: None,
            retry_count: 0,
            received_at: OffsetDateTime::now_utc(),
            processed_at: None,
        });
        Ok(LedgerCheck {
            already_processed: false,
        })
    }

    async fn mark_processed(&self, idempotency_key: &str) -> Result<(), sqlx::Error> {
        let mut events = self.webhook_events.lock().unwrap();
        if let Some(e) = events
            .iter_mut()
            .find(|e| e.idempotency_key == idempotency_key)
        {
            e.processed = true;
            e.failed = false;
            e.processed_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn mark_failed(&self, idempotency_key: &str, error: &str) -> Result<(), sqlx::Error> {
        let mut events = self.webhook_events.lock().unwrap();
        if let Some(e) = events
            .iter_mut()
            .find(|e| e.idempotency_key == idempotency_key)
        {
            e.failed = true;
            e.last_error = Some(error.to_string());
            e.retry_count += 1;
        }
        Ok(())
    }

    async fn find_event(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<WebhookEvent>, sqlx::Error> {
        let events = self.webhook_events.lock().unwrap();
        Ok(events
            .iter()
            .find(|e| e.idempotency_key == idempotency_key)
            .cloned())
    }
}

#[async_trait]
impl OrderRepository for MockDb {
    async fn create_order(
        &self,
        order_number: &str,
        new: NewOrder,
    ) -> Result<Order, sqlx::Error> {
        self.fail_if_configured()?;
        let now = OffsetDateTime::now_utc();
        let order = Order {
            id: Uuid::new_v4(),
            order_number: order_number.to_string(),
            order_type: new.order_type,
            item_id: new.item_id,
            item_name: new.item_name,
            amount_cents: new.amount_cents,
            currency: new.currency,
            payment_method: new.payment_method,
            status: PaymentStatus::Pending,
            metadata: new.metadata,
            user_id: new.user_id,
            guest_email: new.guest_email,
            created_at: now,
            updated_at: now,
        };
        self.orders.lock().unwrap().push(order.clone());
        Ok(order)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
        Ok(self.orders.lock().unwrap().iter().find(|o| o.id == id).cloned())
    }

    async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, sqlx::Error> {
        self.fail_if_configured()?;
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Order>, sqlx::Error> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(o) = orders.iter_mut().find(|o| o.id == id) {
            if !o.status.is_terminal() {
                o.status = status;
                o.updated_at = OffsetDateTime::now_utc();
                return Ok(Some(o.clone()));
            }
        }
        Ok(None)
    }

    async fn complete_once(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
        *self.complete_once_calls.lock().unwrap() += 1;
        self.update_status(id, PaymentStatus::Completed).await
    }

    async fn mark_refunded(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(o) = orders.iter_mut().find(|o| o.id == id) {
            if o.status == PaymentStatus::Completed {
                o.status = PaymentStatus::Refunded;
                o.updated_at = OffsetDateTime::now_utc();
                return Ok(Some(o.clone()));
            }
        }
        Ok(None)
    }

    async fn set_payment_method(&self, id: Uuid, provider: &str) -> Result<(), sqlx::Error> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(o) = orders.iter_mut().find(|o| o.id == id) {
            o.payment_method = Some(provider.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl BookingRepository for MockDb {
    async fn insert_booking(
        &self,
        new: NewBooking,
    ) -> Result<BookingInsertOutcome, sqlx::Error> {
        self.fail_if_configured()?;
        if let Some(at) = new.scheduled_at {
            if self.slot_taken(&new.resource_id, at, None) {
                return Ok(BookingInsertOutcome::SlotTaken);
            }
        }
        let booking = Self::build_booking(&new);
        self.bookings.lock().unwrap().push(booking.clone());
        Ok(BookingInsertOutcome::Created(booking))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>, sqlx::Error> {
        Ok(self
            .bookings
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.id == id)
            .cloned())
    }

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Booking>, sqlx::Error> {
        Ok(self
            .bookings
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.order_id == Some(order_id))
            .cloned())
    }

    async fn confirm_booking(&self, id: Uuid) -> Result<Option<Booking>, sqlx::Error> {
        let mut bookings = self.bookings.lock().unwrap();
        if let Some(b) = bookings.iter_mut().find(|b| b.id == id) {
            if matches!(
                b.status,
                BookingStatus::PendingPayment | BookingStatus::Pending
            ) {
                b.status = BookingStatus::Confirmed;
                b.payment_status = PaymentStatus::Completed;
                b.updated_at = OffsetDateTime::now_utc();
                return Ok(Some(b.clone()));
            }
        }
        Ok(None)
    }

    async fn cancel_booking(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<CancelOutcome, sqlx::Error> {
        self.fail_if_configured()?;
        let booking = {
            let mut bookings = self.bookings.lock().unwrap();
            let Some(b) = bookings
                .iter_mut()
                .find(|b| b.id == id && b.status.holds_slot())
            else {
                return Ok(CancelOutcome::NotCancellable);
            };
            b.status = BookingStatus::Cancelled;
            b.cancellation_reason = Some(reason.to_string());
            b.cancelled_at = Some(OffsetDateTime::now_utc());
            b.updated_at = OffsetDateTime::now_utc();
            b.clone()
        };

        let mut reversed_pack_code = None;
        let mut redemptions = self.redemptions.lock().unwrap();
        if let Some(pos) = redemptions.iter().position(|r| r.booking_id == id) {
            let redemption = redemptions.remove(pos);
            let mut packs = self.packs.lock().unwrap();
            if let Some(p) = packs
                .iter_mut()
                .find(|p| p.id == redemption.pack_code_id && p.active && p.sessions_used > 0)
            {
                p.sessions_used -= 1;
                reversed_pack_code = Some(p.code.clone());
            }
        }

        Ok(CancelOutcome::Cancelled {
            booking,
            reversed_pack_code,
        })
    }

    async fn reschedule_booking(
        &self,
        id: Uuid,
        new_time: OffsetDateTime,
        initiator: Uuid,
    ) -> Result<RescheduleOutcome, sqlx::Error> {
        self.fail_if_configured()?;
        let resource_id = {
            let bookings = self.bookings.lock().unwrap();
            match bookings.iter().find(|b| b.id == id) {
                Some(b) if b.status.holds_slot() => b.resource_id.clone(),
                _ => return Ok(RescheduleOutcome::NotReschedulable),
            }
        };
        if self.slot_taken(&resource_id, new_time, Some(id)) {
            return Ok(RescheduleOutcome::SlotTaken);
        }
        let mut bookings = self.bookings.lock().unwrap();
        let b = bookings.iter_mut().find(|b| b.id == id).unwrap();
        b.previous_scheduled_at = b.scheduled_at;
        b.scheduled_at = Some(new_time);
        b.reschedule_count += 1;
        b.rescheduled_by = Some(initiator);
        b.updated_at = OffsetDateTime::now_utc();
        Ok(RescheduleOutcome::Rescheduled(b.clone()))
    }

    async fn count_active_seats(&self, resource_id: &str) -> Result<i64, sqlx::Error> {
        Ok(self
            .bookings
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.resource_id == resource_id && b.status.holds_slot())
            .map(|b| b.seats as i64)
            .sum())
    }
}

#[async_trait]
impl PackRepository for MockDb {
    async fn create_pack(
        &self,
        code: &str,
        new: NewPackCode,
    ) -> Result<SessionPackCode, sqlx::Error> {
        self.fail_if_configured()?;
        let pack = SessionPackCode {
            id: Uuid::new_v4(),
            code: code.to_string(),
            user_id: new.user_id,
            sessions_total: new.sessions_total,
            sessions_used: 0,
            active: true,
            expires_at: new.expires_at,
            order_id: new.order_id,
            origin_booking_id: new.origin_booking_id,
            created_at: OffsetDateTime::now_utc(),
        };
        self.packs.lock().unwrap().push(pack.clone());
        Ok(pack)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<SessionPackCode>, sqlx::Error> {
        Ok(self
            .packs
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.code == code)
            .cloned())
    }

    async fn find_by_origin_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<SessionPackCode>, sqlx::Error> {
        Ok(self
            .packs
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.origin_booking_id == Some(booking_id))
            .cloned())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<SessionPackCode>, sqlx::Error> {
        Ok(self
            .packs
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn redeem_session(
        &self,
        code: &str,
        user_id: Uuid,
        slot: RedemptionSlot,
        now: OffsetDateTime,
    ) -> Result<RedeemOutcome, sqlx::Error> {
        self.fail_if_configured()?;
        let (pack_id, order_id) = {
            let packs = self.packs.lock().unwrap();
            let Some(p) = packs.iter().find(|p| p.code == code) else {
                return Ok(RedeemOutcome::NotFound);
            };
            if p.user_id != user_id {
                return Ok(RedeemOutcome::NotOwner);
            }
            if !p.active {
                return Ok(RedeemOutcome::Inactive);
            }
            if now > p.expires_at {
                return Ok(RedeemOutcome::Expired);
            }
            if p.sessions_remaining() <= 0 {
                return Ok(RedeemOutcome::Exhausted);
            }
            (p.id, p.order_id)
        };

        if self.slot_taken(&slot.resource_id, slot.scheduled_at, None) {
            return Ok(RedeemOutcome::SlotTaken);
        }

        let booking = Self::build_booking(&NewBooking {
            user_id,
            resource_id: slot.resource_id,
            resource_name: slot.resource_name,
            scheduled_at: Some(slot.scheduled_at),
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Completed,
            amount_cents: 0,
            currency: "COP".into(),
            seats: 1,
            order_id: Some(order_id),
            sessions_total: None,
            sessions_remaining: None,
        });
        self.bookings.lock().unwrap().push(booking.clone());
        self.redemptions.lock().unwrap().push(PackRedemption {
            id: Uuid::new_v4(),
            pack_code_id: pack_id,
            booking_id: booking.id,
            redeemed_at: now,
        });

        let mut packs = self.packs.lock().unwrap();
        let p = packs.iter_mut().find(|p| p.id == pack_id).unwrap();
        p.sessions_used += 1;
        Ok(RedeemOutcome::Redeemed {
            booking,
            pack: p.clone(),
        })
    }
}

#[async_trait]
impl SubscriptionRepository for MockDb {
    async fn find_active_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.user_id == user_id && !s.status.is_terminal())
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn create_or_activate(
        &self,
        new: NewSubscription,
    ) -> Result<Subscription, sqlx::Error> {
        self.fail_if_configured()?;
        let now = OffsetDateTime::now_utc();
        let mut subs = self.subscriptions.lock().unwrap();
        if let Some(s) = subs
            .iter_mut()
            .find(|s| s.user_id == new.user_id && !s.status.is_terminal())
        {
            s.status = SubscriptionStatus::Active;
            s.tier_id = new.tier_id;
            s.tier_name = new.tier_name;
            s.billing_interval = new.billing_interval;
            s.amount_cents = new.amount_cents;
            s.currency = new.currency;
            if new.provider_reference.is_some() {
                s.provider_reference = new.provider_reference;
            }
            s.current_period_start = new.current_period_start;
            s.current_period_end = new.current_period_end;
            s.cancel_at_period_end = false;
            s.updated_at = now;
            return Ok(s.clone());
        }
        let sub = Subscription {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            tier_id: new.tier_id,
            tier_name: new.tier_name,
            status: SubscriptionStatus::Active,
            billing_interval: new.billing_interval,
            amount_cents: new.amount_cents,
            currency: new.currency,
            provider_reference: new.provider_reference,
            current_period_start: new.current_period_start,
            current_period_end: new.current_period_end,
            cancel_at_period_end: false,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        subs.push(sub.clone());
        Ok(sub)
    }

    async fn set_cancel_at_period_end(
        &self,
        id: Uuid,
        cancel: bool,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let mut subs = self.subscriptions.lock().unwrap();
        if let Some(s) = subs
            .iter_mut()
            .find(|s| s.id == id && !s.status.is_terminal())
        {
            s.cancel_at_period_end = cancel;
            s.updated_at = OffsetDateTime::now_utc();
            return Ok(Some(s.clone()));
        }
        Ok(None)
    }

    async fn cancel_now(&self, id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        let mut subs = self.subscriptions.lock().unwrap();
        if let Some(s) = subs
            .iter_mut()
            .find(|s| s.id == id && !s.status.is_terminal())
        {
            s.status = SubscriptionStatus::Cancelled;
            s.cancelled_at = Some(OffsetDateTime::now_utc());
            s.updated_at = OffsetDateTime::now_utc();
            return Ok(Some(s.clone()));
        }
        Ok(None)
    }
}

#[async_trait]
impl EntitlementRepository for MockDb {
    async fn create_entitlement(
        &self,
        new: NewEntitlement,
    ) -> Result<Entitlement, sqlx::Error> {
        self.fail_if_configured()?;
        let entitlement = Entitlement {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            entitlement_type: new.entitlement_type,
            resource_id: new.resource_id,
            resource_name: new.resource_name,
            expires_at: new.expires_at,
            subscription_id: new.subscription_id,
            order_id: new.order_id,
            revoked: false,
            revoked_reason: None,
            revoked_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.entitlements.lock().unwrap().push(entitlement.clone());
        Ok(entitlement)
    }

    async fn find_active_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<Entitlement>, sqlx::Error> {
        Ok(self
            .entitlements
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.order_id == Some(order_id) && !e.revoked)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Entitlement>, sqlx::Error> {
        Ok(self
            .entitlements
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn revoke_for_subscription(
        &self,
        subscription_id: Uuid,
        reason: &str,
    ) -> Result<u64, sqlx::Error> {
        let mut entitlements = self.entitlements.lock().unwrap();
        let mut revoked = 0;
        for e in entitlements
            .iter_mut()
            .filter(|e| e.subscription_id == Some(subscription_id) && !e.revoked)
        {
            e.revoked = true;
            e.revoked_reason = Some(reason.to_string());
            e.revoked_at = Some(OffsetDateTime::now_utc());
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn revoke_for_order(&self, order_id: Uuid, reason: &str) -> Result<u64, sqlx::Error> {
        let mut entitlements = self.entitlements.lock().unwrap();
        let mut revoked = 0;
        for e in entitlements
            .iter_mut()
            .filter(|e| e.order_id == Some(order_id) && !e.revoked)
        {
            e.revoked = true;
            e.revoked_reason = Some(reason.to_string());
            e.revoked_at = Some(OffsetDateTime::now_utc());
            revoked += 1;
        }
        Ok(revoked)
    }
}

#[async_trait]
impl WaitlistRepository for MockDb {
    async fn join(
        &self,
        event_id: &str,
        user_id: Uuid,
        seats: i32,
    ) -> Result<JoinOutcome, sqlx::Error> {
        self.fail_if_configured()?;
        let mut entries = self.waitlist.lock().unwrap();
        if entries
            .iter()
            .any(|e| e.event_id == event_id && e.user_id == user_id && e.status.is_active())
        {
            return Ok(JoinOutcome::AlreadyQueued);
        }
        let position = entries
            .iter()
            .filter(|e| e.event_id == event_id && e.status.is_active())
            .count() as i32
            + 1;
        let now = OffsetDateTime::now_utc();
        let entry = WaitlistEntry {
            id: Uuid::new_v4(),
            event_id: event_id.to_string(),
            user_id,
            seats,
            position,
            status: WaitlistStatus::Waiting,
            offer_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        entries.push(entry.clone());
        Ok(JoinOutcome::Joined(entry))
    }

    async fn find_entry(&self, id: Uuid) -> Result<Option<WaitlistEntry>, sqlx::Error> {
        Ok(self
            .waitlist
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn active_entries(&self, event_id: &str) -> Result<Vec<WaitlistEntry>, sqlx::Error> {
        let mut entries: Vec<WaitlistEntry> = self
            .waitlist
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_id == event_id && e.status.is_active())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.position);
        Ok(entries)
    }

    async fn accept_offer(
        &self,
        entry_id: Uuid,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error> {
        self.fail_if_configured()?;
        let accepted = {
            let mut entries = self.waitlist.lock().unwrap();
            let Some(e) = entries.iter_mut().find(|e| {
                e.id == entry_id
                    && e.user_id == user_id
                    && e.status == WaitlistStatus::OfferPending
                    && e.offer_expires_at.map(|at| at > now).unwrap_or(false)
            }) else {
                return Ok(None);
            };
            e.status = WaitlistStatus::Accepted;
            e.updated_at = now;
            e.clone()
        };
        self.renumber_after(&accepted.event_id, accepted.position);
        Ok(Some(accepted))
    }

    async fn cancel_entry(
        &self,
        entry_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error> {
        self.fail_if_configured()?;
        let cancelled = {
            let mut entries = self.waitlist.lock().unwrap();
            let Some(e) = entries
                .iter_mut()
                .find(|e| e.id == entry_id && e.user_id == user_id && e.status.is_active())
            else {
                return Ok(None);
            };
            e.status = WaitlistStatus::Cancelled;
            e.updated_at = OffsetDateTime::now_utc();
            e.clone()
        };
        self.renumber_after(&cancelled.event_id, cancelled.position);
        Ok(Some(cancelled))
    }

    async fn promote_next(
        &self,
        event_id: &str,
        now: OffsetDateTime,
        offer_window: Duration,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error> {
        self.fail_if_configured()?;
        let mut entries = self.waitlist.lock().unwrap();
        if entries
            .iter()
            .any(|e| e.event_id == event_id && e.status == WaitlistStatus::OfferPending)
        {
            return Ok(None);
        }
        let next = entries
            .iter_mut()
            .filter(|e| e.event_id == event_id && e.status == WaitlistStatus::Waiting)
            .min_by_key(|e| e.position);
        if let Some(e) = next {
            e.status = WaitlistStatus::OfferPending;
            e.offer_expires_at = Some(now + offer_window);
            e.updated_at = now;
            return Ok(Some(e.clone()));
        }
        Ok(None)
    }

    async fn expire_and_promote(
        &self,
        event_id: &str,
        now: OffsetDateTime,
        offer_window: Duration,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error> {
        let mut expired_positions: Vec<i32> = {
            let mut entries = self.waitlist.lock().unwrap();
            let mut positions = vec![];
            for e in entries.iter_mut() {
                if e.event_id == event_id
                    && e.status == WaitlistStatus::OfferPending
                    && e.offer_expires_at.map(|at| at <= now).unwrap_or(false)
                {
                    e.status = WaitlistStatus::Expired;
                    e.updated_at = now;
                    positions.push(e.position);
                }
            }
            positions
        };
        expired_positions.sort_by_key(|p| std::cmp::Reverse(*p));
        let any_expired = !expired_positions.is_empty();
        for p in expired_positions {
            self.renumber_after(event_id, p);
        }

        if !any_expired {
            return Ok(None);
        }

        let mut entries = self.waitlist.lock().unwrap();
        if entries
            .iter()
            .any(|e| e.event_id == event_id && e.status == WaitlistStatus::OfferPending)
        {
            return Ok(None);
        }
        let next = entries
            .iter_mut()
            .filter(|e| e.event_id == event_id && e.status == WaitlistStatus::Waiting)
            .min_by_key(|e| e.position);
        if let Some(e) = next {
            e.status = WaitlistStatus::OfferPending;
            e.offer_expires_at = Some(now + offer_window);
            e.updated_at = now;
            return Ok(Some(e.clone()));
        }
        Ok(None)
    }
}

#[async_trait]
impl AuditLogRepository for MockDb {
    async fn append(&self, entry: NewAuditLog) -> Result<AuditLog, sqlx::Error> {
        self.fail_if_configured()?;
        let log = AuditLog {
            id: Uuid::new_v4(),
            actor_id: entry.actor_id,
            actor_email: entry.actor_email,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            action: entry.action,
            before: entry.before,
            after: entry.after,
            reason: entry.reason,
            metadata: entry.metadata,
            created_at: OffsetDateTime::now_utc(),
        };
        self.audit_logs.lock().unwrap().push(log.clone());
        Ok(log)
    }

    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditLog>, sqlx::Error> {
        Ok(self
            .audit_logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.entity_type == entity_type && l.entity_id == entity_id)
            .cloned()
            .collect())
    }
}
