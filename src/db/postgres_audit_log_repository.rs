use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::audit_log_repository::AuditLogRepository;
use crate::models::audit_log::{AuditLog, NewAuditLog};

const AUDIT_COLUMNS: &str = "id, actor_id, actor_email, entity_type, entity_id, action, \
                             before, after, reason, metadata, created_at";

pub struct PostgresAuditLogRepository {
    pub pool: PgPool,
}

#[async_trait]
impl AuditLogRepository for PostgresAuditLogRepository {
    async fn append(&self, entry: NewAuditLog) -> Result<AuditLog, sqlx::Error> {
        let result = sqlx::query_as::<_, AuditLog>(&format!(
            r#"
            INSERT INTO audit_logs (actor_id, actor_email, entity_type, entity_id, action,
                                    before, after, reason, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            RETURNING {AUDIT_COLUMNS}
            "#
        ))
        .bind(entry.actor_id)
        .bind(entry.actor_email.as_deref())
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.action)
        .bind(entry.before)
        .bind(entry.after)
        .bind(entry.reason.as_deref())
        .bind(&entry.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditLog>, sqlx::Error> {
        let results = sqlx::query_as::<_, AuditLog>(&format!(
            r#"
            SELECT {AUDIT_COLUMNS} FROM audit_logs
            WHERE entity_type = $1
              AND entity_id = $2
            ORDER BY created_at DESC
            "#
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }
}
