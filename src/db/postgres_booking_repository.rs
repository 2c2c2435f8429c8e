use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::booking_repository::{
    BookingInsertOutcome, BookingRepository, CancelOutcome, NewBooking, RescheduleOutcome,
};
use crate::models::booking::Booking;

const BOOKING_COLUMNS: &str = "id, user_id, resource_id, resource_name, scheduled_at, status, \
                               payment_status, amount_cents, currency, seats, order_id, \
                               reschedule_count, previous_scheduled_at, rescheduled_by, \
                               cancellation_reason, cancelled_at, sessions_total, \
                               sessions_remaining, created_at, updated_at";

pub struct PostgresBookingRepository {
    pub pool: PgPool,
}

/// True when a {PENDING, CONFIRMED} booking already holds the slot. Runs on
/// the transaction's connection so the check and the insert see one
/// snapshot; the partial unique index is the backstop.
async fn slot_taken(
    conn: &mut PgConnection,
    resource_id: &str,
    scheduled_at: OffsetDateTime,
    exclude: Option<Uuid>,
) -> Result<bool, sqlx::Error> {
    let taken = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT 1 FROM bookings
        WHERE resource_id = $1
          AND scheduled_at = $2
          AND status IN ('PENDING', 'CONFIRMED')
          AND ($3::uuid IS NULL OR id <> $3)
        LIMIT 1
        "#,
    )
    .bind(resource_id)
    .bind(scheduled_at)
    .bind(exclude)
    .fetch_optional(conn)
    .await?
    .is_some();

    Ok(taken)
}

#[async_trait]
impl BookingRepository for PostgresBookingRepository {
    async fn insert_booking(
        &self,
        new: NewBooking,
    ) -> Result<BookingInsertOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if let Some(at) = new.scheduled_at {
            if slot_taken(&mut *tx, &new.resource_id, at, None).await? {
                tx.rollback().await?;
                return Ok(BookingInsertOutcome::SlotTaken);
            }
        }

        let insert = sqlx::query_as::<_, Booking>(&format!(
            r#"
            INSERT INTO bookings (user_id, resource_id, resource_name, scheduled_at, status,
                                  payment_status, amount_cents, currency, seats, order_id,
                                  sessions_total, sessions_remaining, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now(), now())
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(new.user_id)
        .bind(&new.resource_id)
        .bind(&new.resource_name)
        .bind(new.scheduled_at)
        .bind(new.status)
        .bind(new.payment_status)
        .bind(new.amount_cents)
        .bind(&new.currency)
        .bind(new.seats)
        .bind(new.order_id)
        .bind(new.sessions_total)
        .bind(new.sessions_remaining)
        .fetch_one(&mut *tx)
        .await;

        let booking = match insert {
            Ok(b) => b,
            // Unique-index backstop closed a check-then-insert race.
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                return Ok(BookingInsertOutcome::SlotTaken);
            }
            Err(err) => return Err(err),
        };

        tx.commit().await?;
        Ok(BookingInsertOutcome::Created(booking))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>, sqlx::Error> {
        let result = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Booking>, sqlx::Error> {
        let result = sqlx::query_as::<_, Booking>(&format!(
            r#"
            SELECT {BOOKING_COLUMNS} FROM bookings
            WHERE order_id = $1
            ORDER BY created_at
            LIMIT 1
            "#
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn confirm_booking(&self, id: Uuid) -> Result<Option<Booking>, sqlx::Error> {
        let result = sqlx::query_as::<_, Booking>(&format!(
            r#"
            UPDATE bookings
            SET status = 'CONFIRMED', payment_status = 'COMPLETED', updated_at = now()
            WHERE id = $1
              AND status IN ('PENDING_PAYMENT', 'PENDING')
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn cancel_booking(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<CancelOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let cancelled = sqlx::query_as::<_, Booking>(&format!(
            r#"
            UPDATE bookings
            SET status = 'CANCELLED',
                cancellation_reason = $2,
                cancelled_at = now(),
                updated_at = now()
            WHERE id = $1
              AND status IN ('PENDING', 'CONFIRMED')
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?;

        let booking = match cancelled {
            Some(b) => b,
            None => {
                tx.rollback().await?;
                return Ok(CancelOutcome::NotCancellable);
            }
        };

        // Pack compensation: delete the redemption link and restore the
        // session while the pack is still active, in this same transaction.
        let reversed_pack_code = sqlx::query_scalar::<_, String>(
            r#"
            WITH removed AS (
                DELETE FROM pack_redemptions
                WHERE booking_id = $1
                RETURNING pack_code_id
            )
            UPDATE session_pack_codes c
            SET sessions_used = sessions_used - 1
            FROM removed r
            WHERE c.id = r.pack_code_id
              AND c.active
              AND c.sessions_used > 0
            RETURNING c.code
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let current = match current {
            Some(b) if b.status.holds_slot() => b,
            _ => {
                tx.rollback().await?;
                return Ok(RescheduleOutcome::NotReschedulable);
            }
        };

        if slot_taken(&mut *tx, &current.resource_id, new_time, Some(id)).await? {
            tx.rollback().await?;
            return Ok(RescheduleOutcome::SlotTaken);
        }

        let updated = sqlx::query_as::<_, Booking>(&format!(
            r#"
            UPDATE bookings
            SET previous_scheduled_at = scheduled_at,
                scheduled_at = $2,
                reschedule_count = reschedule_count + 1,
                rescheduled_by = $3,
                updated_at = now()
            WHERE id = $1
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new_time)
        .bind(initiator)
        .fetch_one(&mut *tx)
        .await;

        let booking = match updated {
            Ok(b) => b,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                return Ok(RescheduleOutcome::SlotTaken);
            }
            Err(err) => return Err(err),
        };

        tx.commit().await?;
        Ok(RescheduleOutcome::Rescheduled(booking))
    }

    async fn count_active_seats(&self, resource_id: &str) -> Result<i64, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(seats), 0) FROM bookings
            WHERE resource_id = $1
              AND status IN ('PENDING', 'CONFIRMED')
            "#,
        )
        .bind(resource_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
