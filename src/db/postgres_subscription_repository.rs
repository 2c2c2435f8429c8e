use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::subscription_repository::{NewSubscription, SubscriptionRepository};
use crate::models::subscription::Subscription;

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, tier_id, tier_name, status, billing_interval, \
                                    amount_cents, currency, provider_reference, \
                                    current_period_start, current_period_end, \
                                    cancel_at_period_end, cancelled_at, created_at, updated_at";

pub struct PostgresSubscriptionRepository {
    pub pool: PgPool,
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn find_active_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let result = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
            WHERE user_id = $1
              AND status <> 'CANCELLED'
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        let result = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn create_or_activate(
        &self,
        new: NewSubscription,
    ) -> Result<Subscription, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Reuse the owner's non-terminal subscription if one exists; the
        // partial unique index forbids a second one anyway.
        let existing = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
            WHERE user_id = $1
              AND status <> 'CANCELLED'
            FOR UPDATE
            "#
        ))
        .bind(new.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let result = if let Some(existing) = existing {
            sqlx::query_as::<_, Subscription>(&format!(
                r#"
                UPDATE subscriptions
                SET status = 'ACTIVE',
                    tier_id = $2,
                    tier_name = $3,
                    billing_interval = $4,
                    amount_cents = $5,
                    currency = $6,
                    provider_reference = COALESCE($7, provider_reference),
                    current_period_start = $8,
                    current_period_end = $9,
                    cancel_at_period_end = FALSE,
                    updated_at = now()
                WHERE id = $1
                RETURNING {SUBSCRIPTION_COLUMNS}
                "#
            ))
            .bind(existing.id)
            .bind(&new.tier_id)
            .bind(&new.tier_name)
            .bind(&new.billing_interval)
            .bind(new.amount_cents)
            .bind(&new.currency)
            .bind(new.provider_reference.as_deref())
            .bind(new.current_period_start)
            .bind(new.current_period_end)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as::<_, Subscription>(&format!(
                r#"
                INSERT INTO subscriptions (user_id, tier_id, tier_name, status,
                                           billing_interval, amount_cents, currency,
                                           provider_reference, current_period_start,
                                           current_period_end, cancel_at_period_end,
                                           created_at, updated_at)
                VALUES ($1, $2, $3, 'ACTIVE', $4, $5, $6, $7, $8, $9, FALSE, now(), now())
                RETURNING {SUBSCRIPTION_COLUMNS}
                "#
            ))
            .bind(new.user_id)
            .bind(&new.tier_id)
            .bind(&new.tier_name)
            .bind(&new.billing_interval)
            .bind(new.amount_cents)
            .bind(&new.currency)
            .bind(new.provider_reference.as_deref())
            .bind(new.current_period_start)
            .bind(new.current_period_end)
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;
        Ok(result)
    }

    async fn set_cancel_at_period_end(
        &self,
        id: Uuid,
        cancel: bool,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let result = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET cancel_at_period_end = $2, updated_at = now()
            WHERE id = $1
              AND status <> 'CANCELLED'
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(cancel)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn cancel_now(&self, id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        let result = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'CANCELLED', cancelled_at = now(), updated_at = now()
            WHERE id = $1
              AND status <> 'CANCELLED'
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }
}
