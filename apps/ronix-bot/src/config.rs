use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::panel::PanelKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("database is not configured: set DATABASE_URL or DB_HOST/DB_PORT/DB_NAME/DB_USER/DB_PASSWORD")]
    MissingDatabase,
    #[error("TOKEN must not be empty")]
    EmptyToken,
}

/// Process-wide settings, read once at startup and shared behind an `Arc`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub token: String,

    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub db_host: Option<String>,
    #[serde(default)]
    pub db_port: Option<u16>,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub db_user: Option<String>,
    #[serde(default)]
    pub db_password: Option<String>,

    #[serde(default)]
    pub vpn_type: PanelKind,
    #[serde(default)]
    pub admin_ids: Vec<i64>,

    #[serde(default = "default_panel_timeout_secs")]
    pub panel_timeout_secs: u64,
    #[serde(default = "default_accept_invalid_certs")]
    pub panel_accept_invalid_certs: bool,
    #[serde(default = "default_inbound_id")]
    pub panel_inbound_id: i64,
    #[serde(default = "default_connection_remark")]
    pub connection_remark: String,

    #[serde(default = "default_payment_url")]
    pub payment_url: String,
    #[serde(default)]
    pub subscription_base_url: Option<String>,
    #[serde(default = "default_monthly_price")]
    pub monthly_price: i32,
}

fn default_panel_timeout_secs() -> u64 {
    30
}

fn default_accept_invalid_certs() -> bool {
    true
}

fn default_inbound_id() -> i64 {
    1
}

fn default_connection_remark() -> String {
    "RONIX-VPN".to_string()
}

fn default_payment_url() -> String {
    "https://example.com/payment_link".to_string()
}

fn default_monthly_price() -> i32 {
    150
}

impl BotConfig {
    /// `.env` has already been applied by the caller; this layers `ronix.toml` (optional)
    /// and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let source = config::Config::builder()
            .add_source(config::File::with_name("ronix").required(false))
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("admin_ids"),
            )
            .build()?;
        Self::from_source(source)
    }

    pub fn from_source(source: config::Config) -> Result<Self, ConfigError> {
        let config: BotConfig = source.try_deserialize()?;
        if config.token.trim().is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        Ok(config)
    }

    pub fn database_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = self.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.to_string());
        }
        match (
            self.db_host.as_deref(),
            self.db_port,
            self.db_name.as_deref(),
            self.db_user.as_deref(),
            self.db_password.as_deref(),
        ) {
            (Some(host), Some(port), Some(name), Some(user), Some(password)) => Ok(
                ronix_db::db::database_url(user, password, host, port, name),
            ),
            _ => Err(ConfigError::MissingDatabase),
        }
    }

    pub fn is_admin(&self, tg_id: i64) -> bool {
        self.admin_ids.contains(&tg_id)
    }

    pub fn panel_timeout(&self) -> Duration {
        Duration::from_secs(self.panel_timeout_secs.max(1))
    }
}
