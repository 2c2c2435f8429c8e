use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::webhook_ledger_repository::{LedgerCheck, WebhookLedgerRepository};
use crate::models::webhook_event::WebhookEvent;

pub struct PostgresWebhookLedgerRepository {
    pub pool: PgPool,
}

#[async_trait]
impl WebhookLedgerRepository for PostgresWebhookLedgerRepository {
    async fn record_and_check(
        &self,
        provider: &str,
        idempotency_key: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<LedgerCheck, sqlx::Error> {
        // One statement: insert if unseen, otherwise read the existing
        // processed flag. The unique index on idempotency_key is the gate.
        let already_processed = sqlx::query_scalar::<_, bool>(
            r#"
            WITH ins AS (
                INSERT INTO webhook_events (provider, idempotency_key, event_type, payload)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (idempotency_key) DO NOTHING
                RETURNING processed
            )
            SELECT COALESCE(
                (SELECT processed FROM ins),
                (SELECT processed FROM webhook_events WHERE idempotency_key = $2)
            )
            "#,
        )
        .bind(provider)
        .bind(idempotency_key)
        .bind(event_type)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerCheck { already_processed })
    }

    async fn mark_processed(&self, idempotency_key: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processed = TRUE,
                failed = FALSE,
                processed_at = now()
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, idempotency_key: &str, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET failed = TRUE,
                last_error = $2,
                retry_count = retry_count + 1
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_event(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<WebhookEvent>, sqlx::Error> {
        let result = sqlx::query_as::<_, WebhookEvent>(
            r#"
            SELECT id, provider, idempotency_key, event_type, payload,
                   processed, failed, last_error, retry_count,
                   received_at, processed_at
            FROM webhook_events
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }
}
