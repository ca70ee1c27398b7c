use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::AccountStore;
use crate::models::{Account, AccountStatus};

const ACCOUNT_COLUMNS: &str =
    "id, telegram_id, username, subscription_end, status, server_id, created_at";

#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for AccountRepository {
    async fn get_by_tg_id(&self, tg_id: i64) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM users WHERE telegram_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(tg_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account by TG ID")
    }

    async fn create(&self, tg_id: i64, username: Option<&str>) -> Result<Account> {
        sqlx::query(
            r#"
            INSERT INTO users (id, telegram_id, username, status)
            VALUES ($1, $2, $3, 'inactive')
            ON CONFLICT(telegram_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tg_id)
        .bind(username)
        .execute(&self.pool)
        .await
        .context("Failed to insert account")?;

        self.get_by_tg_id(tg_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Account {} not found after insert", tg_id))
    }

    async fn update_expiry(&self, id: Uuid, expiry: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET subscription_end = $1 WHERE id = $2")
            .bind(expiry)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update subscription end")?;
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: AccountStatus) -> Result<()> {
        sqlx::query("UPDATE users SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update account status")?;
        Ok(())
    }

    async fn update_server_assignment(&self, id: Uuid, server_id: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE users SET server_id = $1 WHERE id = $2")
            .bind(server_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update server assignment")?;
        Ok(())
    }

    async fn activate(&self, id: Uuid, server_id: &str, expiry: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE users SET status = 'active', server_id = $1, subscription_end = $2 WHERE id = $3",
        )
        .bind(server_id)
        .bind(expiry)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to activate account")?;
        Ok(())
    }
}
