pub mod account_repo;
pub mod payment_repo;
pub mod server_repo;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Account, AccountStatus, NewPayment, Payment, Server};

pub use account_repo::AccountRepository;
pub use payment_repo::PaymentRepository;
pub use server_repo::ServerRepository;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_by_tg_id(&self, tg_id: i64) -> Result<Option<Account>>;

    /// Inserts an inactive account unless one already exists for `tg_id`; returns the stored row.
    async fn create(&self, tg_id: i64, username: Option<&str>) -> Result<Account>;

    async fn update_expiry(&self, id: Uuid, expiry: DateTime<Utc>) -> Result<()>;

    async fn update_status(&self, id: Uuid, status: AccountStatus) -> Result<()>;

    async fn update_server_assignment(&self, id: Uuid, server_id: Option<&str>) -> Result<()>;

    /// Status, assignment and expiry in a single write.
    async fn activate(&self, id: Uuid, server_id: &str, expiry: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Every server, ordered by id.
    async fn list_all(&self) -> Result<Vec<Server>>;

    async fn get_by_id(&self, id: i32) -> Result<Option<Server>>;

    async fn get_by_ids(&self, ids: &[i32]) -> Result<Vec<Server>>;

    async fn set_current_users(&self, id: i32, current_users: i32) -> Result<()>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn record(&self, payment: NewPayment) -> Result<Payment>;

    /// Oldest first.
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>>;
}
