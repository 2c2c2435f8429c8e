use async_trait::async_trait;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::db::waitlist_repository::{JoinOutcome, WaitlistRepository};
use crate::models::waitlist::WaitlistEntry;

const ENTRY_COLUMNS: &str = "id, event_id, user_id, seats, position, status, \
                             offer_expires_at, created_at, updated_at";

pub struct PostgresWaitlistRepository {
    pub pool: PgPool,
}

#[async_trait]
impl WaitlistRepository for PostgresWaitlistRepository {
    async fn join(
        &self,
        event_id: &str,
        user_id: Uuid,
        seats: i32,
    ) -> Result<JoinOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT 1 FROM waitlist_entries
            WHERE event_id = $1
              AND user_id = $2
              AND status IN ('WAITING', 'OFFER_PENDING')
            LIMIT 1
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            tx.rollback().await?;
            return Ok(JoinOutcome::AlreadyQueued);
        }

        // Position assignment and the insert share one transaction so the
        // per-event sequence stays dense under concurrent joins.
        let entry = sqlx::query_as::<_, WaitlistEntry>(&format!(
            r#"
            INSERT INTO waitlist_entries (event_id, user_id, seats, position, status,
                                          created_at, updated_at)
            SELECT $1, $2, $3,
                   COALESCE((SELECT COUNT(*) FROM waitlist_entries
                             WHERE event_id = $1
                               AND status IN ('WAITING', 'OFFER_PENDING')), 0) + 1,
                   'WAITING', now(), now()
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(event_id)
        .bind(user_id)
        .bind(seats)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(JoinOutcome::Joined(entry))
    }

    async fn find_entry(&self, id: Uuid) -> Result<Option<WaitlistEntry>, sqlx::Error> {
        let result = sqlx::query_as::<_, WaitlistEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM waitlist_entries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn active_entries(&self, event_id: &str) -> Result<Vec<WaitlistEntry>, sqlx::Error> {
        let results = sqlx::query_as::<_, WaitlistEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM waitlist_entries
            WHERE event_id = $1
              AND status IN ('WAITING', 'OFFER_PENDING')
            ORDER BY position
            "#
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn accept_offer(
        &self,
        entry_id: Uuid,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let accepted = sqlx::query_as::<_, WaitlistEntry>(&format!(
            r#"
            UPDATE waitlist_entries
            SET status = 'ACCEPTED', updated_at = now()
            WHERE id = $1
              AND user_id = $2
              AND status = 'OFFER_PENDING'
              AND offer_expires_at > $3
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry_id)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let entry = match accepted {
            Some(e) => e,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        // The accepted entry leaves the active set; close its gap.
        sqlx::query(
            r#"
            UPDATE waitlist_entries
            SET position = position - 1, updated_at = now()
            WHERE event_id = $1
              AND status IN ('WAITING', 'OFFER_PENDING')
              AND position > $2
            "#,
        )
        .bind(&entry.event_id)
        .bind(entry.position)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(entry))
    }

    async fn cancel_entry(
        &self,
        entry_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let cancelled = sqlx::query_as::<_, WaitlistEntry>(&format!(
            r#"
            UPDATE waitlist_entries
            SET status = 'CANCELLED', updated_at = now()
            WHERE id = $1
              AND user_id = $2
              AND status IN ('WAITING', 'OFFER_PENDING')
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let entry = match cancelled {
            Some(e) => e,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        sqlx::query(
            r#"
            UPDATE waitlist_entries
            SET position = position - 1, updated_at = now()
            WHERE event_id = $1
              AND status IN ('WAITING', 'OFFER_PENDING')
              AND position > $2
            "#,
        )
        .bind(&entry.event_id)
        .bind(entry.position)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(entry))
    }

    async fn promote_next(
        &self,
        event_id: &str,
        now: OffsetDateTime,
        offer_window: Duration,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error> {
        let promoted = sqlx::query_as::<_, WaitlistEntry>(&format!(
            r#"
            UPDATE waitlist_entries
            SET status = 'OFFER_PENDING', offer_expires_at = $2, updated_at = now()
            WHERE id = (
                SELECT id FROM waitlist_entries
                WHERE event_id = $1
                  AND status = 'WAITING'
                ORDER BY position
                LIMIT 1
            )
            AND NOT EXISTS (
                SELECT 1 FROM waitlist_entries
                WHERE event_id = $1
                  AND status = 'OFFER_PENDING'
            )
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(event_id)
        .bind(now + offer_window)
        .fetch_optional(&self.pool)
        .await?;

        Ok(promoted)
    }

    async fn expire_and_promote(
        &self,
        event_id: &str,
        now: OffsetDateTime,
        offer_window: Duration,
    ) -> Result<Option<WaitlistEntry>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Expire overdue offers and close their gaps one at a time; expiry
        // is rare enough that the per-row renumber keeps the SQL simple.
        let expired = sqlx::query_as::<_, WaitlistEntry>(&format!(
            r#"
            UPDATE waitlist_entries
            SET status = 'EXPIRED', updated_at = now()
            WHERE event_id = $1
              AND status = 'OFFER_PENDING'
              AND offer_expires_at <= $2
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(event_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut expired = expired;
        expired.sort_by_key(|e| std::cmp::Reverse(e.position));
        for entry in &expired {
            sqlx::query(
                r#"
                UPDATE waitlist_entries
                SET position = position - 1, updated_at = now()
                WHERE event_id = $1
                  AND status IN ('WAITING', 'OFFER_PENDING')
                  AND position > $2
                "#,
            )
            .bind(event_id)
            .bind(entry.position)
            .execute(&mut *tx)
            .await?;
        }

        // Cascade: the offer moves to the head of the queue, but only when
        // something actually expired and no other offer is outstanding.
        let promoted = if expired.is_empty() {
            None
        } else {
            sqlx::query_as::<_, WaitlistEntry>(&format!(
                r#"
                UPDATE waitlist_entries
                SET status = 'OFFER_PENDING', offer_expires_at = $2, updated_at = now()
                WHERE id = (
                    SELECT id FROM waitlist_entries
                    WHERE event_id = $1
                      AND status = 'WAITING'
                    ORDER BY position
                    LIMIT 1
                )
                AND NOT EXISTS (
                    SELECT 1 FROM waitlist_entries
                    WHERE event_id = $1
                      AND status = 'OFFER_PENDING'
                )
                RETURNING {ENTRY_COLUMNS}
                "#
            ))
            .bind(event_id)
            .bind(now + offer_window)
            .fetch_optional(&mut *tx)
            .await?
        };

        tx.commit().await?;
        Ok(promoted)
    }
}
