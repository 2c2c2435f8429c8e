use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::order_repository::{NewOrder, OrderRepository};
use crate::models::order::{Order, PaymentStatus};

const ORDER_COLUMNS: &str = "id, order_number, order_type, item_id, item_name, amount_cents, \
                             currency, payment_method, status, metadata, user_id, guest_email, \
                             created_at, updated_at";

pub struct PostgresOrderRepository {
    pub pool: PgPool,
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn create_order(
        &self,
        order_number: &str,
        new: NewOrder,
    ) -> Result<Order, sqlx::Error> {
        let result = sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders (order_number, order_type, item_id, item_name, amount_cents,
                                currency, payment_method, status, metadata, user_id, guest_email,
                                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', $8, $9, $10, now(), now())
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_number)
        .bind(new.order_type)
        .bind(&new.item_id)
        .bind(&new.item_name)
        .bind(new.amount_cents)
        .bind(&new.currency)
        .bind(new.payment_method.as_deref())
        .bind(&new.metadata)
        .bind(new.user_id)
        .bind(new.guest_email.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
        let result = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, sqlx::Error> {
        let result = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1"
        ))
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Order>, sqlx::Error> {
        // Terminal statuses are not reopenable; the WHERE clause refuses the
        // transition rather than racing a concurrent completion.
        let result = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET status = $2, updated_at = now()
            WHERE id = $1
              AND status IN ('PENDING', 'PROCESSING')
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn complete_once(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
        // First completion wins: the conditional UPDATE both sets COMPLETED
        // and decides which caller runs fulfillment.
        let result = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET status = 'COMPLETED', updated_at = now()
            WHERE id = $1
              AND status IN ('PENDING', 'PROCESSING')
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn mark_refunded(&self, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
        let result = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET status = 'REFUNDED', updated_at = now()
            WHERE id = $1
              AND status = 'COMPLETED'
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn set_payment_method(&self, id: Uuid, provider: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE orders
            SET payment_method = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(provider)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
