use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::pack_repository::{
    NewPackCode, PackRepository, RedeemOutcome, RedemptionSlot,
};
use crate::models::booking::Booking;
use crate::models::session_pack::SessionPackCode;

const PACK_COLUMNS: &str = "id, code, user_id, sessions_total, sessions_used, active, \
                            expires_at, order_id, origin_booking_id, created_at";

pub struct PostgresPackRepository {
    pub pool: PgPool,
}

#[async_trait]
impl PackRepository for PostgresPackRepository {
    async fn create_pack(
        &self,
        code: &str,
        new: NewPackCode,
    ) -> Result<SessionPackCode, sqlx::Error> {
        let result = sqlx::query_as::<_, SessionPackCode>(&format!(
            r#"
            INSERT INTO session_pack_codes (code, user_id, sessions_total, sessions_used,
                                            active, expires_at, order_id, origin_booking_id,
                                            created_at)
            VALUES ($1, $2, $3, 0, TRUE, $4, $5, $6, now())
            RETURNING {PACK_COLUMNS}
            "#
        ))
        .bind(code)
        .bind(new.user_id)
        .bind(new.sessions_total)
        .bind(new.expires_at)
        .bind(new.order_id)
        .bind(new.origin_booking_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<SessionPackCode>, sqlx::Error> {
        let result = sqlx::query_as::<_, SessionPackCode>(&format!(
            "SELECT {PACK_COLUMNS} FROM session_pack_codes WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn find_by_origin_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<SessionPackCode>, sqlx::Error> {
        let result = sqlx::query_as::<_, SessionPackCode>(&format!(
            "SELECT {PACK_COLUMNS} FROM session_pack_codes WHERE origin_booking_id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<SessionPackCode>, sqlx::Error> {
        let results = sqlx::query_as::<_, SessionPackCode>(&format!(
            r#"
            SELECT {PACK_COLUMNS} FROM session_pack_codes
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn redeem_session(
        &self,
        code: &str,
        user_id: Uuid,
        slot: RedemptionSlot,
        now: OffsetDateTime,
    ) -> Result<RedeemOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Lock the pack row so concurrent redemptions of the same code
        // serialize on the counter.
        let pack = sqlx::query_as::<_, SessionPackCode>(&format!(
            "SELECT {PACK_COLUMNS} FROM session_pack_codes WHERE code = $1 FOR UPDATE"
        ))
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?;

        let pack = match pack {
            Some(p) => p,
            None => {
                tx.rollback().await?;
                return Ok(RedeemOutcome::NotFound);
            }
        };

        // Check order mirrors the documented redemption contract; the first
        // failing check wins.
        if pack.user_id != user_id {
            tx.rollback().await?;
            return Ok(RedeemOutcome::NotOwner);
        }
        if !pack.active {
            tx.rollback().await?;
            return Ok(RedeemOutcome::Inactive);
        }
        if now > pack.expires_at {
            tx.rollback().await?;
            return Ok(RedeemOutcome::Expired);
        }
        if pack.sessions_remaining() <= 0 {
            tx.rollback().await?;
            return Ok(RedeemOutcome::Exhausted);
        }

        let taken = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT 1 FROM bookings
            WHERE resource_id = $1
              AND scheduled_at = $2
              AND status IN ('PENDING', 'CONFIRMED')
            LIMIT 1
            "#,
        )
        .bind(&slot.resource_id)
        .bind(slot.scheduled_at)
        .fetch_optional(&mut *tx)
        .await?
        .is_some();

        if taken {
            tx.rollback().await?;
            return Ok(RedeemOutcome::SlotTaken);
        }

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            INSERT INTO bookings (user_id, resource_id, resource_name, scheduled_at, status,
                                  payment_status, amount_cents, currency, seats, order_id,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'CONFIRMED', 'COMPLETED', 0, 'COP', 1, $5, now(), now())
            RETURNING id, user_id, resource_id, resource_name, scheduled_at, status,
                      payment_status, amount_cents, currency, seats, order_id,
                      reschedule_count, previous_scheduled_at, rescheduled_by,
                      cancellation_reason, cancelled_at, sessions_total,
                      sessions_remaining, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(&slot.resource_id)
        .bind(&slot.resource_name)
        .bind(slot.scheduled_at)
        .bind(pack.order_id)
        .fetch_one(&mut *tx)
        .await;

        let booking = match booking {
            Ok(b) => b,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                return Ok(RedeemOutcome::SlotTaken);
            }
            Err(err) => return Err(err),
        };

        sqlx::query(
            r#"
            INSERT INTO pack_redemptions (pack_code_id, booking_id, redeemed_at)
            VALUES ($1, $2, now())
            "#,
        )
        .bind(pack.id)
        .bind(booking.id)
        .execute(&mut *tx)
        .await?;

        let pack = sqlx::query_as::<_, SessionPackCode>(&format!(
            r#"
            UPDATE session_pack_codes
            SET sessions_used = sessions_used + 1
            WHERE id = $1
            RETURNING {PACK_COLUMNS}
            "#
        ))
        .bind(pack.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RedeemOutcome::Redeemed { booking, pack })
    }
}
