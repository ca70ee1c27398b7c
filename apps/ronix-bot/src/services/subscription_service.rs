use chrono::{DateTime, Months, Utc};
use ronix_db::models::{Account, AccountStatus, NewPayment, Payment, Server, ServerRef};
use ronix_db::repositories::{AccountStore, PaymentStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::locks::KeyedLocks;
use super::server_registry::{ServerRegistry, UserDelta};
use crate::error::{PanelError, SubscriptionError};
use crate::panel::{PanelUser, VpnPanel};

pub const MIN_MONTHS: u32 = 1;
pub const MAX_MONTHS: u32 = 12;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A committed change. `Degraded` means the local write stands but the panel
/// did not accept the follow-up sync.
#[derive(Debug)]
pub enum Outcome<T> {
    Done(T),
    Degraded { value: T, warning: PanelError },
}

impl<T> Outcome<T> {
    fn after_sync(value: T, sync: Result<(), PanelError>) -> Self {
        match sync {
            Ok(()) => Outcome::Done(value),
            Err(warning) => Outcome::Degraded { value, warning },
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Done(value) | Outcome::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Done(value) | Outcome::Degraded { value, .. } => value,
        }
    }

    pub fn warning(&self) -> Option<&PanelError> {
        match self {
            Outcome::Done(_) => None,
            Outcome::Degraded { warning, .. } => Some(warning),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub active: bool,
    pub expires: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    pub account: Account,
    pub server_id: i32,
    pub subscription_url: Option<String>,
    pub connection_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub server: Server,
    pub url: String,
    pub subscription_url: Option<String>,
}

pub fn validate_months(months: u32) -> Result<u32, SubscriptionError> {
    if (MIN_MONTHS..=MAX_MONTHS).contains(&months) {
        Ok(months)
    } else {
        Err(SubscriptionError::Validation(format!(
            "months must be between {} and {}, got {}",
            MIN_MONTHS, MAX_MONTHS, months
        )))
    }
}

/// Calendar-month advance; a day that does not exist in the target month
/// clamps to that month's last day.
pub fn advance_months(from: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>, SubscriptionError> {
    from.checked_add_months(Months::new(months))
        .ok_or_else(|| SubscriptionError::Validation(format!("{} + {} months overflows", from, months)))
}

/// Active only while the expiry is strictly in the future.
pub fn is_active_at(subscription_end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    subscription_end.is_some_and(|end| end > now)
}

pub struct SubscriptionService {
    accounts: Arc<dyn AccountStore>,
    payments: Arc<dyn PaymentStore>,
    registry: Arc<ServerRegistry>,
    panel: Arc<dyn VpnPanel>,
    locks: KeyedLocks<i64>,
    clock: Clock,
    subscription_base_url: Option<String>,
}

impl SubscriptionService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        payments: Arc<dyn PaymentStore>,
        registry: Arc<ServerRegistry>,
        panel: Arc<dyn VpnPanel>,
    ) -> Self {
        Self {
            accounts,
            payments,
            registry,
            panel,
            locks: KeyedLocks::new(),
            clock: Arc::new(Utc::now),
            subscription_base_url: None,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_subscription_base_url(mut self, base: Option<String>) -> Self {
        self.subscription_base_url = base.filter(|b| !b.trim().is_empty());
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn subscription_url(&self, account: &Account) -> Option<String> {
        self.subscription_base_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), account.id))
    }

    async fn require_account(&self, tg_id: i64) -> Result<Account, SubscriptionError> {
        self.accounts
            .get_by_tg_id(tg_id)
            .await?
            .ok_or_else(|| SubscriptionError::NotFound(format!("account {}", tg_id)))
    }

    pub async fn register_if_absent(
        &self,
        tg_id: i64,
        display_name: Option<&str>,
    ) -> Result<Account, SubscriptionError> {
        let account = self.accounts.create(tg_id, display_name).await?;
        debug!(tg_id, account_id = %account.id, "Account ensured");
        Ok(account)
    }

    pub async fn get_account(&self, tg_id: i64) -> Result<Option<Account>, SubscriptionError> {
        Ok(self.accounts.get_by_tg_id(tg_id).await?)
    }

    /// Unknown accounts read as inactive with no expiry.
    pub async fn get_status(&self, tg_id: i64) -> Result<SubscriptionStatus, SubscriptionError> {
        let expires = self
            .accounts
            .get_by_tg_id(tg_id)
            .await?
            .and_then(|a| a.subscription_end);
        Ok(SubscriptionStatus {
            active: is_active_at(expires, self.now()),
            expires,
        })
    }

    /// Picks a server, makes sure the panel holds an enabled client with the new
    /// expiry, then commits. Nothing is written unless the panel accepted the client.
    pub async fn purchase(
        &self,
        tg_id: i64,
        months: u32,
    ) -> Result<Outcome<PurchaseReceipt>, SubscriptionError> {
        let months = validate_months(months)?;
        let _guard = self.locks.lock(&tg_id).await;

        let mut account = self.require_account(tg_id).await?;
        if account.is_blocked() {
            return Err(SubscriptionError::Blocked);
        }

        let server = self
            .registry
            .select_least_loaded()
            .await?
            .ok_or(SubscriptionError::Capacity)?;

        let now = self.now();
        let base = account.subscription_end.filter(|end| *end > now).unwrap_or(now);
        let expiry = advance_months(base, months)?;

        let previous = account
            .server_id
            .as_deref()
            .and_then(|raw| raw.parse::<ServerRef>().ok());
        // The panel still holds the client from an earlier purchase on this server.
        let existing_client = previous
            .as_ref()
            .is_some_and(|p| p.ids().contains(&server.id));

        let panel_user = PanelUser::from_account(&account).with_expiry(expiry);
        let client_id = if existing_client {
            self.panel
                .sync_user(&server, &panel_user)
                .await
                .inspect_err(|e| warn!(tg_id, server_id = server.id, error = %e, "Client renewal failed"))?;
            account.id.to_string()
        } else {
            self.panel
                .provision_user(&server, &panel_user)
                .await
                .inspect_err(|e| warn!(tg_id, server_id = server.id, error = %e, "Provisioning failed"))?
        };

        let assigned = ServerRef::Single(server.id);
        self.accounts
            .activate(account.id, &assigned.to_string(), expiry)
            .await?;
        account.status = AccountStatus::Active;
        account.server_id = Some(assigned.to_string());
        account.subscription_end = Some(expiry);
        info!(tg_id, server_id = server.id, %expiry, months, renewed = existing_client, "Subscription purchased");

        self.move_slot(previous, &assigned).await;

        let sync = if existing_client {
            Ok(())
        } else {
            self.panel
                .sync_user(&server, &PanelUser::from_account(&account))
                .await
                .inspect_err(|e| warn!(tg_id, server_id = server.id, error = %e, "Post-purchase sync failed"))
        };

        let connection_url = match self.panel.connection_url(&server, &client_id).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(tg_id, server_id = server.id, error = %e, "Connection URL unavailable");
                None
            }
        };

        let receipt = PurchaseReceipt {
            subscription_url: self.subscription_url(&account),
            server_id: server.id,
            connection_url,
            account,
        };
        Ok(Outcome::after_sync(receipt, sync))
    }

    /// Count the new slot and release the old one when the assignment moved.
    /// Count drift is logged, never surfaced.
    async fn move_slot(&self, previous: Option<ServerRef>, assigned: &ServerRef) {
        if previous.as_ref() == Some(assigned) {
            return;
        }

        match self.registry.adjust_user_count(assigned, UserDelta::Increment).await {
            Ok(true) => {}
            Ok(false) => warn!(server = %assigned, "Server user count not incremented"),
            Err(e) => error!(server = %assigned, error = %e, "Failed to increment server user count"),
        }
        if let Some(previous) = previous {
            match self.registry.adjust_user_count(&previous, UserDelta::Decrement).await {
                Ok(true) => {}
                Ok(false) => warn!(server = %previous, "Server user count not decremented"),
                Err(e) => error!(server = %previous, error = %e, "Failed to decrement server user count"),
            }
        }
    }

    pub async fn extend(&self, tg_id: i64, months: u32) -> Result<Outcome<Account>, SubscriptionError> {
        let months = validate_months(months)?;
        let _guard = self.locks.lock(&tg_id).await;

        let mut account = self.require_account(tg_id).await?;
        if account.is_blocked() {
            return Err(SubscriptionError::Blocked);
        }
        let current = account
            .subscription_end
            .ok_or(SubscriptionError::NoSubscription)?;
        let expiry = advance_months(current, months)?;

        self.accounts.update_expiry(account.id, expiry).await?;
        account.subscription_end = Some(expiry);
        info!(tg_id, %expiry, months, "Subscription extended");

        let sync = self.sync_remote(&account).await;
        Ok(Outcome::after_sync(account, sync))
    }

    pub async fn block(&self, tg_id: i64) -> Result<Outcome<Account>, SubscriptionError> {
        let _guard = self.locks.lock(&tg_id).await;

        let mut account = self.require_account(tg_id).await?;
        if account.is_blocked() {
            return Err(SubscriptionError::AlreadyBlocked);
        }

        self.accounts
            .update_status(account.id, AccountStatus::Blocked)
            .await?;
        account.status = AccountStatus::Blocked;
        info!(tg_id, "Account blocked");

        let sync = self.sync_remote(&account).await;
        Ok(Outcome::after_sync(account, sync))
    }

    /// Re-pushes local state to the panel. Unlike the other mutations, a sync
    /// failure here is the result.
    pub async fn resync(&self, tg_id: i64) -> Result<Account, SubscriptionError> {
        let _guard = self.locks.lock(&tg_id).await;
        let account = self.require_account(tg_id).await?;
        self.sync_remote(&account).await?;
        info!(tg_id, "Account re-synced");
        Ok(account)
    }

    pub async fn connection(&self, tg_id: i64) -> Result<Connection, SubscriptionError> {
        let account = self.require_account(tg_id).await?;
        if account.is_blocked() {
            return Err(SubscriptionError::Blocked);
        }
        let raw = account
            .server_id
            .as_deref()
            .ok_or(PanelError::NotAssigned)?;
        let server_ref: ServerRef = raw.parse()?;
        let server = self
            .registry
            .resolve(&server_ref)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SubscriptionError::NotFound(format!("server {}", server_ref)))?;

        let url = self
            .panel
            .connection_url(&server, &account.id.to_string())
            .await?;
        Ok(Connection {
            subscription_url: self.subscription_url(&account),
            server,
            url,
        })
    }

    /// Syncs the account to every server it is assigned to and reports the
    /// first failure. All servers are attempted.
    async fn sync_remote(&self, account: &Account) -> Result<(), PanelError> {
        let raw = account.server_id.as_deref().ok_or(PanelError::NotAssigned)?;
        let server_ref: ServerRef = raw
            .parse()
            .map_err(|e| PanelError::Lookup(format!("server assignment '{}': {}", raw, e)))?;
        let servers = self
            .registry
            .resolve(&server_ref)
            .await
            .map_err(|e| PanelError::Lookup(format!("{:#}", e)))?;
        if servers.is_empty() {
            return Err(PanelError::NotFound(format!("server {}", server_ref)));
        }

        let user = PanelUser::from_account(account);
        let mut first_failure = None;
        for server in &servers {
            if let Err(e) = self.panel.sync_user(server, &user).await {
                warn!(tg_id = account.tg_id, server_id = server.id, error = %e, "Panel sync failed");
                first_failure.get_or_insert(e);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    pub async fn record_payment(
        &self,
        tg_id: i64,
        amount: i32,
        status: &str,
    ) -> Result<Payment, SubscriptionError> {
        let account = self.require_account(tg_id).await?;
        let payment = self
            .payments
            .record(NewPayment {
                user_id: account.id,
                amount,
                status: status.to_string(),
            })
            .await?;
        info!(tg_id, payment_id = payment.id, amount, status, "Payment recorded");
        Ok(payment)
    }

    pub async fn payments(&self, tg_id: i64) -> Result<Vec<Payment>, SubscriptionError> {
        let account = self.require_account(tg_id).await?;
        Ok(self.payments.list_by_user(account.id).await?)
    }

    /// Whether a purchase could find a server right now.
    pub async fn has_capacity(&self) -> Result<bool, SubscriptionError> {
        Ok(self.registry.select_least_loaded().await?.is_some())
    }

    pub async fn list_servers(&self) -> Result<Vec<Server>, SubscriptionError> {
        Ok(self.registry.list_servers().await?)
    }

    /// Every server with the result of a panel health check against it.
    pub async fn check_servers(&self) -> Result<Vec<(Server, Result<(), PanelError>)>, SubscriptionError> {
        let servers = self.registry.list_servers().await?;
        let mut report = Vec::with_capacity(servers.len());
        for server in servers {
            let check = self.panel.health_check(&server).await;
            if let Err(e) = &check {
                warn!(server_id = server.id, error = %e, "Panel health check failed");
            }
            report.push((server, check));
        }
        Ok(report)
    }

    pub fn prune_locks(&self) {
        self.locks.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::MockVpnPanel;
    use crate::services::testing::{MemoryAccounts, MemoryPayments, MemoryServers, account, server};
    use chrono::{Datelike, NaiveDate, TimeZone};

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    struct Fixture {
        accounts: Arc<MemoryAccounts>,
        servers: Arc<MemoryServers>,
        service: SubscriptionService,
    }

    fn fixture(servers: Vec<Server>, panel: MockVpnPanel, now: DateTime<Utc>) -> Fixture {
        let accounts = Arc::new(MemoryAccounts::new());
        let servers = Arc::new(MemoryServers::new(servers));
        let registry = Arc::new(ServerRegistry::new(servers.clone()));
        let service = SubscriptionService::new(
            accounts.clone(),
            Arc::new(MemoryPayments::default()),
            registry,
            Arc::new(panel),
        )
        .with_clock(Arc::new(move || now))
        .with_subscription_base_url(Some("https://sub.example.net/".into()));
        Fixture {
            accounts,
            servers,
            service,
        }
    }

    fn accepting_panel() -> MockVpnPanel {
        let mut panel = MockVpnPanel::new();
        panel
            .expect_provision_user()
            .returning(|_, user| Ok(user.client_id.to_string()));
        panel.expect_sync_user().returning(|_, _| Ok(()));
        panel
            .expect_connection_url()
            .returning(|_, id| Ok(format!("vless://{}@srv", id)));
        panel
    }

    fn assigned(tg_id: i64, status: AccountStatus, end: Option<DateTime<Utc>>, server_id: &str) -> Account {
        let mut a = account(tg_id, status, end);
        a.server_id = Some(server_id.into());
        a
    }

    fn last_day_of(year: i32, month: u32) -> u32 {
        let (y, m) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        NaiveDate::from_ymd_opt(y, m, 1).unwrap().pred_opt().unwrap().day()
    }

    #[test]
    fn month_advance_clamps_to_month_end() {
        let start = at(2024, 1, 31);
        for months in MIN_MONTHS..=MAX_MONTHS {
            let end = advance_months(start, months).unwrap();
            let (year, month) = if months == 12 { (2025, 1) } else { (2024, 1 + months) };
            assert_eq!((end.year(), end.month()), (year, month), "months = {}", months);
            assert_eq!(end.day(), 31.min(last_day_of(year, month)), "months = {}", months);
            assert_eq!(end.time(), start.time());
        }
        assert_eq!(advance_months(at(2023, 1, 31), 1).unwrap(), at(2023, 2, 28));
    }

    #[test]
    fn months_outside_range_are_rejected() {
        assert!(matches!(validate_months(0), Err(SubscriptionError::Validation(_))));
        assert!(matches!(validate_months(13), Err(SubscriptionError::Validation(_))));
        assert_eq!(validate_months(1).unwrap(), 1);
        assert_eq!(validate_months(12).unwrap(), 12);
    }

    #[test]
    fn activity_is_strictly_future() {
        let now = at(2024, 5, 1);
        assert!(!is_active_at(Some(now), now));
        assert!(is_active_at(Some(now + chrono::Duration::seconds(1)), now));
        assert!(!is_active_at(Some(now - chrono::Duration::seconds(1)), now));
        assert!(!is_active_at(None, now));
    }

    #[tokio::test]
    async fn status_boundary_reads_inactive() {
        let now = at(2024, 5, 1);
        let f = fixture(vec![], MockVpnPanel::new(), now);
        f.accounts.insert(account(1, AccountStatus::Active, Some(now)));

        let status = f.service.get_status(1).await.unwrap();
        assert!(!status.active);
        assert_eq!(status.expires, Some(now));

        let unknown = f.service.get_status(2).await.unwrap();
        assert_eq!(unknown, SubscriptionStatus { active: false, expires: None });
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let f = fixture(vec![], MockVpnPanel::new(), at(2024, 5, 1));
        let first = f.service.register_if_absent(7, Some("alice")).await.unwrap();
        let second = f.service.register_if_absent(7, Some("alice")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.status, AccountStatus::Inactive);
        assert_eq!(f.accounts.writes(), 1);
    }

    #[tokio::test]
    async fn purchase_on_empty_server() {
        let now = at(2024, 3, 10);
        let f = fixture(vec![server(1, 0, 10, "NL")], accepting_panel(), now);
        f.accounts.insert(account(42, AccountStatus::Inactive, None));

        let outcome = f.service.purchase(42, 1).await.unwrap();
        assert!(outcome.warning().is_none());
        let receipt = outcome.into_value();
        assert_eq!(receipt.server_id, 1);
        assert_eq!(
            receipt.connection_url.as_deref(),
            Some(format!("vless://{}@srv", receipt.account.id).as_str())
        );
        assert_eq!(
            receipt.subscription_url,
            Some(format!("https://sub.example.net/{}", receipt.account.id))
        );

        let stored = f.accounts.get(42).unwrap();
        assert_eq!(stored.status, AccountStatus::Active);
        assert_eq!(stored.server_id.as_deref(), Some("1"));
        assert_eq!(stored.subscription_end, Some(at(2024, 4, 10)));
        assert_eq!(f.servers.current_users(1), 1);
    }

    #[tokio::test]
    async fn purchase_picks_least_loaded_server() {
        let f = fixture(
            vec![server(1, 8, 10, "NL"), server(2, 1, 10, "DE")],
            accepting_panel(),
            at(2024, 3, 10),
        );
        f.accounts.insert(account(5, AccountStatus::Inactive, None));

        let receipt = f.service.purchase(5, 3).await.unwrap().into_value();
        assert_eq!(receipt.server_id, 2);
        assert_eq!(f.servers.current_users(2), 2);
        assert_eq!(f.servers.current_users(1), 8);
    }

    #[tokio::test]
    async fn purchase_stacks_on_remaining_time() {
        let now = at(2024, 3, 10);
        let mut panel = MockVpnPanel::new();
        panel.expect_provision_user().never();
        panel
            .expect_sync_user()
            .withf(|server, user| server.id == 1 && user.expires_at == Some(at(2024, 5, 20)) && user.enabled)
            .times(1)
            .returning(|_, _| Ok(()));
        panel
            .expect_connection_url()
            .returning(|_, id| Ok(format!("vless://{}@srv", id)));
        let f = fixture(vec![server(1, 1, 10, "NL")], panel, now);
        f.accounts
            .insert(assigned(9, AccountStatus::Active, Some(at(2024, 3, 20)), "1"));

        let outcome = f.service.purchase(9, 2).await.unwrap();
        assert!(outcome.warning().is_none());
        let receipt = outcome.into_value();
        assert_eq!(receipt.account.subscription_end, Some(at(2024, 5, 20)));
        // Same server as before, so no extra slot is taken.
        assert_eq!(f.servers.current_users(1), 1);
    }

    #[tokio::test]
    async fn returning_customer_renews_existing_client() {
        let mut panel = MockVpnPanel::new();
        panel.expect_provision_user().never();
        panel
            .expect_sync_user()
            .withf(|_, user| user.expires_at == Some(at(2024, 4, 10)) && user.enabled)
            .times(1)
            .returning(|_, _| Ok(()));
        panel
            .expect_connection_url()
            .returning(|_, id| Ok(format!("vless://{}@srv", id)));
        let f = fixture(vec![server(1, 1, 10, "NL")], panel, at(2024, 3, 10));
        let expired = assigned(9, AccountStatus::Inactive, Some(at(2024, 1, 1)), "1");
        let id = expired.id;
        f.accounts.insert(expired);

        let receipt = f.service.purchase(9, 1).await.unwrap().into_value();
        assert_eq!(receipt.connection_url, Some(format!("vless://{}@srv", id)));
        let stored = f.accounts.get(9).unwrap();
        assert_eq!(stored.status, AccountStatus::Active);
        assert_eq!(stored.subscription_end, Some(at(2024, 4, 10)));
        assert_eq!(f.servers.current_users(1), 1);
    }

    #[tokio::test]
    async fn failed_renewal_changes_nothing() {
        let mut panel = MockVpnPanel::new();
        panel.expect_provision_user().never();
        panel.expect_sync_user().times(1).returning(|_, _| {
            Err(PanelError::Sync {
                status: 500,
                body: "down".into(),
            })
        });
        let f = fixture(vec![server(1, 1, 10, "NL")], panel, at(2024, 3, 10));
        f.accounts
            .insert(assigned(9, AccountStatus::Inactive, Some(at(2024, 1, 1)), "{1,2}"));

        let err = f.service.purchase(9, 1).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::Panel(PanelError::Sync { status: 500, .. })));
        assert_eq!(f.accounts.writes(), 0);
        assert_eq!(f.accounts.get(9).unwrap().subscription_end, Some(at(2024, 1, 1)));
        assert_eq!(f.servers.current_users(1), 1);
    }

    #[tokio::test]
    async fn capacity_check_follows_server_load() {
        let f = fixture(
            vec![server(1, 10, 10, "NL"), server(2, 4, 5, "DE")],
            MockVpnPanel::new(),
            at(2024, 3, 10),
        );
        assert!(f.service.has_capacity().await.unwrap());

        let full = fixture(vec![server(1, 10, 10, "NL")], MockVpnPanel::new(), at(2024, 3, 10));
        assert!(!full.service.has_capacity().await.unwrap());
        let empty = fixture(vec![], MockVpnPanel::new(), at(2024, 3, 10));
        assert!(!empty.service.has_capacity().await.unwrap());
    }

    #[tokio::test]
    async fn purchase_moves_slot_from_previous_server() {
        let f = fixture(
            vec![server(1, 10, 10, "NL"), server(2, 0, 10, "DE")],
            accepting_panel(),
            at(2024, 3, 10),
        );
        f.accounts
            .insert(assigned(9, AccountStatus::Inactive, Some(at(2024, 1, 1)), "1"));

        let receipt = f.service.purchase(9, 1).await.unwrap().into_value();
        assert_eq!(receipt.server_id, 2);
        assert_eq!(receipt.account.subscription_end, Some(at(2024, 4, 10)));
        assert_eq!(f.servers.current_users(1), 9);
        assert_eq!(f.servers.current_users(2), 1);
    }

    #[tokio::test]
    async fn purchase_without_capacity_changes_nothing() {
        let mut panel = MockVpnPanel::new();
        panel.expect_provision_user().never();
        let f = fixture(vec![server(1, 10, 10, "NL")], panel, at(2024, 3, 10));
        f.accounts.insert(account(42, AccountStatus::Inactive, None));

        let err = f.service.purchase(42, 1).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::Capacity));
        assert_eq!(f.accounts.writes(), 0);
        assert_eq!(f.servers.current_users(1), 10);
    }

    #[tokio::test]
    async fn purchase_provision_failure_changes_nothing() {
        let mut panel = MockVpnPanel::new();
        panel.expect_provision_user().times(1).returning(|_, _| {
            Err(PanelError::Provision {
                status: 400,
                body: "duplicate".into(),
            })
        });
        panel.expect_sync_user().never();
        let f = fixture(vec![server(1, 0, 10, "NL")], panel, at(2024, 3, 10));
        f.accounts.insert(account(42, AccountStatus::Inactive, None));

        let err = f.service.purchase(42, 1).await.unwrap_err();
        assert!(matches!(
            err,
            SubscriptionError::Panel(PanelError::Provision { status: 400, .. })
        ));
        assert_eq!(f.accounts.writes(), 0);
        assert_eq!(f.servers.current_users(1), 0);
        assert_eq!(f.accounts.get(42).unwrap().status, AccountStatus::Inactive);
    }

    #[tokio::test]
    async fn purchase_sync_failure_is_degraded() {
        let mut panel = MockVpnPanel::new();
        panel
            .expect_provision_user()
            .returning(|_, user| Ok(user.client_id.to_string()));
        panel.expect_sync_user().returning(|_, _| {
            Err(PanelError::Sync {
                status: 502,
                body: "bad gateway".into(),
            })
        });
        panel
            .expect_connection_url()
            .returning(|_, _| Err(PanelError::NotFound("inbound".into())));
        let f = fixture(vec![server(1, 0, 10, "NL")], panel, at(2024, 3, 10));
        f.accounts.insert(account(42, AccountStatus::Inactive, None));

        let outcome = f.service.purchase(42, 1).await.unwrap();
        assert!(matches!(outcome.warning(), Some(PanelError::Sync { status: 502, .. })));
        assert!(outcome.value().connection_url.is_none());
        assert_eq!(f.accounts.get(42).unwrap().status, AccountStatus::Active);
        assert_eq!(f.servers.current_users(1), 1);
    }

    #[tokio::test]
    async fn purchase_rejects_blocked_and_unknown_accounts() {
        let mut panel = MockVpnPanel::new();
        panel.expect_provision_user().never();
        let f = fixture(vec![server(1, 0, 10, "NL")], panel, at(2024, 3, 10));
        f.accounts.insert(account(3, AccountStatus::Blocked, None));

        assert!(matches!(f.service.purchase(3, 1).await, Err(SubscriptionError::Blocked)));
        assert!(matches!(f.service.purchase(4, 1).await, Err(SubscriptionError::NotFound(_))));
        assert!(matches!(f.service.purchase(3, 0).await, Err(SubscriptionError::Validation(_))));
        assert_eq!(f.accounts.writes(), 0);
    }

    #[tokio::test]
    async fn extend_end_of_january_lands_on_leap_day() {
        let mut panel = MockVpnPanel::new();
        panel
            .expect_sync_user()
            .withf(|server, user| server.id == 1 && user.expires_at == Some(at(2024, 2, 29)) && user.enabled)
            .times(1)
            .returning(|_, _| Ok(()));
        let f = fixture(vec![server(1, 1, 10, "NL")], panel, at(2024, 1, 15));
        f.accounts
            .insert(assigned(8, AccountStatus::Active, Some(at(2024, 1, 31)), "1"));

        let outcome = f.service.extend(8, 1).await.unwrap();
        assert!(matches!(outcome, Outcome::Done(_)));
        assert_eq!(f.accounts.get(8).unwrap().subscription_end, Some(at(2024, 2, 29)));
    }

    #[tokio::test]
    async fn extend_sync_failure_keeps_the_commit() {
        let mut panel = MockVpnPanel::new();
        panel.expect_sync_user().returning(|_, _| {
            Err(PanelError::Sync {
                status: 500,
                body: "boom".into(),
            })
        });
        let f = fixture(vec![server(1, 1, 10, "NL")], panel, at(2024, 1, 15));
        f.accounts
            .insert(assigned(8, AccountStatus::Active, Some(at(2024, 2, 10)), "1"));

        let outcome = f.service.extend(8, 2).await.unwrap();
        let Outcome::Degraded { value, warning } = outcome else {
            panic!("expected degraded outcome");
        };
        assert!(matches!(warning, PanelError::Sync { status: 500, .. }));
        assert_eq!(value.subscription_end, Some(at(2024, 4, 10)));
        assert_eq!(f.accounts.get(8).unwrap().subscription_end, Some(at(2024, 4, 10)));
    }

    #[tokio::test]
    async fn extend_without_assignment_is_degraded() {
        let mut panel = MockVpnPanel::new();
        panel.expect_sync_user().never();
        let f = fixture(vec![], panel, at(2024, 1, 15));
        f.accounts
            .insert(account(8, AccountStatus::Active, Some(at(2024, 2, 10))));

        let outcome = f.service.extend(8, 1).await.unwrap();
        assert!(matches!(outcome.warning(), Some(PanelError::NotAssigned)));
        assert_eq!(f.accounts.get(8).unwrap().subscription_end, Some(at(2024, 3, 10)));
    }

    #[tokio::test]
    async fn extend_preconditions() {
        let mut panel = MockVpnPanel::new();
        panel.expect_sync_user().never();
        let f = fixture(vec![], panel, at(2024, 1, 15));
        f.accounts.insert(account(1, AccountStatus::Inactive, None));
        f.accounts
            .insert(account(2, AccountStatus::Blocked, Some(at(2024, 2, 1))));

        assert!(matches!(f.service.extend(1, 1).await, Err(SubscriptionError::NoSubscription)));
        assert!(matches!(f.service.extend(2, 1).await, Err(SubscriptionError::Blocked)));
        assert!(matches!(f.service.extend(3, 1).await, Err(SubscriptionError::NotFound(_))));
        assert!(matches!(f.service.extend(1, 13).await, Err(SubscriptionError::Validation(_))));
        assert_eq!(f.accounts.writes(), 0);
    }

    #[tokio::test]
    async fn concurrent_extends_are_not_lost() {
        let mut panel = MockVpnPanel::new();
        panel.expect_sync_user().returning(|_, _| Ok(()));
        let f = fixture(vec![server(1, 1, 10, "NL")], panel, at(2024, 1, 15));
        f.accounts
            .insert(assigned(8, AccountStatus::Active, Some(at(2024, 1, 31)), "1"));
        let service = Arc::new(f.service);

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.extend(8, 1).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(f.accounts.get(8).unwrap().subscription_end, Some(at(2024, 3, 29)));
    }

    #[tokio::test]
    async fn block_twice_writes_once() {
        let mut panel = MockVpnPanel::new();
        panel
            .expect_sync_user()
            .withf(|_, user| !user.enabled)
            .times(1)
            .returning(|_, _| Ok(()));
        let f = fixture(vec![server(1, 1, 10, "NL")], panel, at(2024, 1, 15));
        f.accounts
            .insert(assigned(6, AccountStatus::Active, Some(at(2024, 2, 1)), "1"));

        let first = f.service.block(6).await.unwrap();
        assert!(matches!(first, Outcome::Done(ref a) if a.status == AccountStatus::Blocked));
        assert_eq!(f.accounts.writes(), 1);

        let again = f.service.block(6).await.unwrap_err();
        assert!(matches!(again, SubscriptionError::AlreadyBlocked));
        assert_eq!(f.accounts.writes(), 1);
        assert_eq!(f.accounts.get(6).unwrap().status, AccountStatus::Blocked);
    }

    #[tokio::test]
    async fn block_sync_failure_is_degraded() {
        let mut panel = MockVpnPanel::new();
        panel.expect_sync_user().returning(|_, _| {
            Err(PanelError::Auth {
                status: 200,
                body: "wrong password".into(),
            })
        });
        let f = fixture(vec![server(1, 1, 10, "NL")], panel, at(2024, 1, 15));
        f.accounts
            .insert(assigned(6, AccountStatus::Active, Some(at(2024, 2, 1)), "1"));

        let outcome = f.service.block(6).await.unwrap();
        assert!(matches!(outcome.warning(), Some(PanelError::Auth { .. })));
        assert_eq!(f.accounts.get(6).unwrap().status, AccountStatus::Blocked);
        assert!(matches!(f.service.block(7).await, Err(SubscriptionError::NotFound(_))));
    }

    #[tokio::test]
    async fn sync_reaches_every_listed_server() {
        let mut panel = MockVpnPanel::new();
        panel
            .expect_sync_user()
            .withf(|server, _| server.id == 1)
            .times(1)
            .returning(|_, _| Err(PanelError::Sync { status: 503, body: String::new() }));
        panel
            .expect_sync_user()
            .withf(|server, _| server.id == 2)
            .times(1)
            .returning(|_, _| Ok(()));
        let f = fixture(
            vec![server(1, 1, 10, "NL"), server(2, 1, 10, "DE")],
            panel,
            at(2024, 1, 15),
        );
        f.accounts
            .insert(assigned(6, AccountStatus::Active, Some(at(2024, 2, 1)), "{1,2}"));

        let err = f.service.resync(6).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::Panel(PanelError::Sync { status: 503, .. })));
    }

    #[tokio::test]
    async fn connection_uses_assigned_server() {
        let mut panel = MockVpnPanel::new();
        panel
            .expect_connection_url()
            .withf(|server, _| server.id == 2)
            .returning(|_, id| Ok(format!("vless://{}@de", id)));
        let f = fixture(
            vec![server(1, 1, 10, "NL"), server(2, 1, 10, "DE")],
            panel,
            at(2024, 1, 15),
        );
        let a = assigned(6, AccountStatus::Active, Some(at(2024, 2, 1)), "2");
        let id = a.id;
        f.accounts.insert(a);
        f.accounts.insert(account(7, AccountStatus::Inactive, None));

        let conn = f.service.connection(6).await.unwrap();
        assert_eq!(conn.server.id, 2);
        assert_eq!(conn.url, format!("vless://{}@de", id));

        assert!(matches!(
            f.service.connection(7).await,
            Err(SubscriptionError::Panel(PanelError::NotAssigned))
        ));
    }

    #[tokio::test]
    async fn payments_are_recorded_per_account() {
        let f = fixture(vec![], MockVpnPanel::new(), at(2024, 1, 15));
        f.accounts.insert(account(6, AccountStatus::Active, None));
        f.accounts.insert(account(7, AccountStatus::Active, None));

        f.service.record_payment(6, 150, "paid").await.unwrap();
        f.service.record_payment(6, 300, "paid").await.unwrap();
        f.service.record_payment(7, 150, "pending").await.unwrap();

        let amounts: Vec<i32> = f.service.payments(6).await.unwrap().iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![150, 300]);
        assert!(matches!(
            f.service.record_payment(99, 1, "paid").await,
            Err(SubscriptionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn health_report_covers_all_servers() {
        let mut panel = MockVpnPanel::new();
        panel.expect_health_check().returning(|server| {
            if server.id == 1 {
                Ok(())
            } else {
                Err(PanelError::Auth { status: 401, body: String::new() })
            }
        });
        let f = fixture(
            vec![server(1, 0, 10, "NL"), server(2, 0, 10, "DE")],
            panel,
            at(2024, 1, 15),
        );

        let report = f.service.check_servers().await.unwrap();
        assert_eq!(report.len(), 2);
        assert!(report[0].1.is_ok());
        assert!(report[1].1.is_err());
    }
}
