use anyhow::Result;
use ronix_db::models::{Server, ServerRef};
use ronix_db::repositories::ServerStore;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::locks::KeyedLocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDelta {
    Increment,
    Decrement,
}

/// Servers with a free slot, least loaded first. The sort is stable, so equal
/// ratios keep their store order.
pub fn ranked(servers: &[Server]) -> Vec<&Server> {
    let mut eligible: Vec<&Server> = servers.iter().filter(|s| s.has_capacity()).collect();
    eligible.sort_by(|a, b| {
        a.load_ratio()
            .partial_cmp(&b.load_ratio())
            .unwrap_or(Ordering::Equal)
    });
    eligible
}

pub fn least_loaded(servers: &[Server]) -> Option<&Server> {
    ranked(servers).into_iter().next()
}

pub fn one_per_country(servers: &[Server]) -> Vec<&Server> {
    let mut seen = HashSet::new();
    ranked(servers)
        .into_iter()
        .filter(|s| seen.insert(s.country.as_str()))
        .collect()
}

pub struct ServerRegistry {
    store: Arc<dyn ServerStore>,
    locks: KeyedLocks<i32>,
}

impl ServerRegistry {
    pub fn new(store: Arc<dyn ServerStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn list_servers(&self) -> Result<Vec<Server>> {
        self.store.list_all().await
    }

    pub async fn select_least_loaded(&self) -> Result<Option<Server>> {
        let servers = self.store.list_all().await?;
        Ok(least_loaded(&servers).cloned())
    }

    pub async fn select_one_per_country(&self) -> Result<Vec<Server>> {
        let servers = self.store.list_all().await?;
        Ok(one_per_country(&servers).into_iter().cloned().collect())
    }

    /// Servers named by `server_ref`, in id order. Unknown ids are skipped.
    pub async fn resolve(&self, server_ref: &ServerRef) -> Result<Vec<Server>> {
        match server_ref {
            ServerRef::Single(id) => Ok(self.store.get_by_id(*id).await?.into_iter().collect()),
            ServerRef::Many(ids) => self.store.get_by_ids(ids).await,
        }
    }

    /// Moves `current_users` by one on every referenced server, keeping it within
    /// `0..=max_users`. Returns `false` if any server was unknown or out of bounds;
    /// servers already adjusted stay adjusted.
    pub async fn adjust_user_count(&self, server_ref: &ServerRef, delta: UserDelta) -> Result<bool> {
        let mut all_applied = true;
        for id in server_ref.ids() {
            let _guard = self.locks.lock(&id).await;

            let Some(server) = self.store.get_by_id(id).await? else {
                warn!(server_id = id, "Cannot adjust user count of unknown server");
                all_applied = false;
                continue;
            };

            let next = match delta {
                UserDelta::Increment if server.current_users < server.max_users => {
                    server.current_users + 1
                }
                UserDelta::Decrement if server.current_users > 0 => server.current_users - 1,
                _ => {
                    warn!(
                        server_id = id,
                        current = server.current_users,
                        max = server.max_users,
                        ?delta,
                        "User count adjustment out of bounds"
                    );
                    all_applied = false;
                    continue;
                }
            };

            self.store.set_current_users(id, next).await?;
            debug!(server_id = id, current = next, "Server user count adjusted");
        }
        Ok(all_applied)
    }
}
