use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::PaymentStore;
use crate::models::{NewPayment, Payment};

#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PaymentRepository {
    async fn record(&self, payment: NewPayment) -> Result<Payment> {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (user_id, amount, status)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, amount, status, created_at
            "#,
        )
        .bind(payment.user_id)
        .bind(payment.amount)
        .bind(&payment.status)
        .fetch_one(&self.pool)
        .await
        .context("Failed to record payment")
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        sqlx::query_as::<_, Payment>(
            "SELECT id, user_id, amount, status, created_at FROM payments WHERE user_id = $1 ORDER BY created_at, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch payments")
    }
}
