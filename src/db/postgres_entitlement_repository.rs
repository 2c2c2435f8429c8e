use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::entitlement_repository::{EntitlementRepository, NewEntitlement};
use crate::models::entitlement::Entitlement;

const ENTITLEMENT_COLUMNS: &str = "id, user_id, entitlement_type, resource_id, resource_name, \
                                   expires_at, subscription_id, order_id, revoked, \
                                   revoked_reason, revoked_at, created_at";

pub struct PostgresEntitlementRepository {
    pub pool: PgPool,
}

#[async_trait]
impl EntitlementRepository for PostgresEntitlementRepository {
    async fn create_entitlement(
        &self,
        new: NewEntitlement,
    ) -> Result<Entitlement, sqlx::Error> {
        let result = sqlx::query_as::<_, Entitlement>(&format!(
            r#"
            INSERT INTO entitlements (user_id, entitlement_type, resource_id, resource_name,
                                      expires_at, subscription_id, order_id, revoked, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, now())
            RETURNING {ENTITLEMENT_COLUMNS}
            "#
        ))
        .bind(new.user_id)
        .bind(new.entitlement_type)
        .bind(&new.resource_id)
        .bind(&new.resource_name)
        .bind(new.expires_at)
        .bind(new.subscription_id)
        .bind(new.order_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    async fn find_active_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<Entitlement>, sqlx::Error> {
        let result = sqlx::query_as::<_, Entitlement>(&format!(
            r#"
            SELECT {ENTITLEMENT_COLUMNS} FROM entitlements
            WHERE order_id = $1
              AND NOT revoked
            LIMIT 1
            "#
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Entitlement>, sqlx::Error> {
        let results = sqlx::query_as::<_, Entitlement>(&format!(
            r#"
            SELECT {ENTITLEMENT_COLUMNS} FROM entitlements
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn revoke_for_subscription(
        &self,
        subscription_id: Uuid,
        reason: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE entitlements
            SET revoked = TRUE, revoked_reason = $2, revoked_at = now()
            WHERE subscription_id = $1
              AND NOT revoked
            "#,
        )
        .bind(subscription_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn revoke_for_order(&self, order_id: Uuid, reason: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE entitlements
            SET revoked = TRUE, revoked_reason = $2, revoked_at = now()
            WHERE order_id = $1
              AND NOT revoked
            "#,
        )
        .bind(order_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
