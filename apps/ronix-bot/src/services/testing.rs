//! In-memory stores for service tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ronix_db::models::{Account, AccountStatus, NewPayment, Payment, Server};
use ronix_db::repositories::{AccountStore, PaymentStore, ServerStore};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

pub fn server(id: i32, current_users: i32, max_users: i32, country: &str) -> Server {
    Server {
        id,
        address: format!("https://srv{}.example.net", id),
        port: Some(2053),
        sub_path: "panel".into(),
        current_users,
        max_users,
        login: "admin".into(),
        password: "admin".into(),
        api_key: "key".into(),
        user_api: Some("sub".into()),
        country: country.into(),
    }
}

pub struct MemoryServers {
    servers: Mutex<Vec<Server>>,
}

impl MemoryServers {
    pub fn new(servers: Vec<Server>) -> Self {
        Self {
            servers: Mutex::new(servers),
        }
    }

    pub fn current_users(&self, id: i32) -> i32 {
        self.servers
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.current_users)
            .unwrap_or(-1)
    }
}

#[async_trait]
impl ServerStore for MemoryServers {
    async fn list_all(&self) -> Result<Vec<Server>> {
        let mut servers = self.servers.lock().unwrap().clone();
        servers.sort_by_key(|s| s.id);
        Ok(servers)
    }

    async fn get_by_id(&self, id: i32) -> Result<Option<Server>> {
        Ok(self.servers.lock().unwrap().iter().find(|s| s.id == id).cloned())
    }

    async fn get_by_ids(&self, ids: &[i32]) -> Result<Vec<Server>> {
        let mut found: Vec<Server> = self
            .servers
            .lock()
            .unwrap()
            .iter()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.id);
        Ok(found)
    }

    async fn set_current_users(&self, id: i32, current_users: i32) -> Result<()> {
        tokio::task::yield_now().await;
        if let Some(s) = self.servers.lock().unwrap().iter_mut().find(|s| s.id == id) {
            s.current_users = current_users;
        }
        Ok(())
    }
}

/// Counts every mutating call so tests can assert "no write happened".
#[derive(Default)]
pub struct MemoryAccounts {
    accounts: Mutex<HashMap<i64, Account>>,
    writes: AtomicUsize,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: Account) {
        self.accounts.lock().unwrap().insert(account.tg_id, account);
    }

    pub fn get(&self, tg_id: i64) -> Option<Account> {
        self.accounts.lock().unwrap().get(&tg_id).cloned()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn mutate(&self, id: Uuid, f: impl FnOnce(&mut Account)) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .values_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow::anyhow!("account {} missing", id))?;
        f(account);
        Ok(())
    }
}

pub fn account(tg_id: i64, status: AccountStatus, end: Option<DateTime<Utc>>) -> Account {
    Account {
        id: Uuid::new_v4(),
        tg_id,
        username: Some(format!("user{}", tg_id)),
        subscription_end: end,
        status,
        server_id: None,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl AccountStore for MemoryAccounts {
    async fn get_by_tg_id(&self, tg_id: i64) -> Result<Option<Account>> {
        Ok(self.get(tg_id))
    }

    async fn create(&self, tg_id: i64, username: Option<&str>) -> Result<Account> {
        let mut accounts = self.accounts.lock().unwrap();
        if let Some(existing) = accounts.get(&tg_id) {
            return Ok(existing.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut created = account(tg_id, AccountStatus::Inactive, None);
        created.username = username.map(str::to_string);
        accounts.insert(tg_id, created.clone());
        Ok(created)
    }

    async fn update_expiry(&self, id: Uuid, expiry: DateTime<Utc>) -> Result<()> {
        self.mutate(id, |a| a.subscription_end = Some(expiry))
    }

    async fn update_status(&self, id: Uuid, status: AccountStatus) -> Result<()> {
        self.mutate(id, |a| a.status = status)
    }

    async fn update_server_assignment(&self, id: Uuid, server_id: Option<&str>) -> Result<()> {
        let server_id = server_id.map(str::to_string);
        self.mutate(id, |a| a.server_id = server_id)
    }

    async fn activate(&self, id: Uuid, server_id: &str, expiry: DateTime<Utc>) -> Result<()> {
        self.mutate(id, |a| {
            a.status = AccountStatus::Active;
            a.server_id = Some(server_id.to_string());
            a.subscription_end = Some(expiry);
        })
    }
}

/// Keeps insertion order, which is the repository's oldest-first order.
#[derive(Default)]
pub struct MemoryPayments {
    payments: Mutex<Vec<Payment>>,
}

#[async_trait]
impl PaymentStore for MemoryPayments {
    async fn record(&self, payment: NewPayment) -> Result<Payment> {
        let mut payments = self.payments.lock().unwrap();
        let stored = Payment {
            id: payments.len() as i64 + 1,
            user_id: payment.user_id,
            amount: payment.amount,
            status: payment.status,
            created_at: Utc::now(),
        };
        payments.push(stored.clone());
        Ok(stored)
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        Ok(self
            .payments
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }
}
