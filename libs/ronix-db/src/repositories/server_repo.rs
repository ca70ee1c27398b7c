use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::ServerStore;
use crate::models::Server;

const SERVER_COLUMNS: &str = "id, server_address, server_port, server_sub, current_users, \
     max_users, login, password, api, user_api, country";

#[derive(Debug, Clone)]
pub struct ServerRepository {
    pool: PgPool,
}

impl ServerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServerStore for ServerRepository {
    async fn list_all(&self) -> Result<Vec<Server>> {
        sqlx::query_as::<_, Server>(&format!(
            "SELECT {} FROM servers ORDER BY id ASC",
            SERVER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch servers")
    }

    async fn get_by_id(&self, id: i32) -> Result<Option<Server>> {
        sqlx::query_as::<_, Server>(&format!(
            "SELECT {} FROM servers WHERE id = $1",
            SERVER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch server by ID")
    }

    async fn get_by_ids(&self, ids: &[i32]) -> Result<Vec<Server>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Server>(&format!(
            "SELECT {} FROM servers WHERE id = ANY($1) ORDER BY id ASC",
            SERVER_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch servers by IDs")
    }

    async fn set_current_users(&self, id: i32, current_users: i32) -> Result<()> {
        sqlx::query("UPDATE servers SET current_users = $1 WHERE id = $2")
            .bind(current_users)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update server user count")?;
        Ok(())
    }
}
