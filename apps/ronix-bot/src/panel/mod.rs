//! Adapters for the VPN panels that host client entries.
//!
//! Both panels sit behind [`VpnPanel`]; the wire formats stay separate per module.

pub mod hiddify;
pub mod xui;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use ronix_db::models::{Account, Server};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::config::BotConfig;
use crate::error::PanelError;

pub use hiddify::HiddifyPanel;
pub use xui::XuiPanel;

/// Which panel protocol the deployment talks to (`VPN_TYPE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum PanelKind {
    /// Protocol A: 3x-ui, cookie session per call.
    Xui,
    /// Protocol B: Hiddify, static API key.
    #[default]
    Hiddify,
}

impl FromStr for PanelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" | "x" | "3x-ui" | "xui" => Ok(PanelKind::Xui),
            "b" | "h" | "hiddify" => Ok(PanelKind::Hiddify),
            other => Err(format!("unknown VPN_TYPE '{}'", other)),
        }
    }
}

impl TryFrom<String> for PanelKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for PanelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelKind::Xui => f.write_str("3x-ui"),
            PanelKind::Hiddify => f.write_str("hiddify"),
        }
    }
}

/// The slice of an account a panel needs to know about.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelUser {
    pub client_id: Uuid,
    pub name: String,
    pub tg_id: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl PanelUser {
    pub fn from_account(account: &Account) -> Self {
        Self {
            client_id: account.id,
            name: account.display_name(),
            tg_id: account.tg_id,
            expires_at: account.subscription_end,
            enabled: !account.is_blocked(),
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VpnPanel: Send + Sync {
    /// Opens a session where the protocol has one. Protocol B returns `None`.
    async fn authenticate(&self, server: &Server) -> Result<Option<String>, PanelError>;

    /// Creates the remote client and returns the id the panel knows it by.
    async fn provision_user(&self, server: &Server, user: &PanelUser) -> Result<String, PanelError>;

    /// Pushes expiry, enable flag and identity so the remote record matches local state.
    async fn sync_user(&self, server: &Server, user: &PanelUser) -> Result<(), PanelError>;

    async fn connection_url(&self, server: &Server, client_id: &str) -> Result<String, PanelError>;

    /// Cheap reachability and credential check.
    async fn health_check(&self, server: &Server) -> Result<(), PanelError>;
}

pub fn http_client(timeout: Duration, accept_invalid_certs: bool) -> Result<Client, PanelError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(PanelError::from)
}

pub fn build_panel(config: &BotConfig) -> Result<Arc<dyn VpnPanel>, PanelError> {
    if config.panel_accept_invalid_certs {
        warn!("TLS certificate verification towards VPN panels is disabled");
    }
    let http = http_client(config.panel_timeout(), config.panel_accept_invalid_certs)?;
    let panel: Arc<dyn VpnPanel> = match config.vpn_type {
        PanelKind::Xui => Arc::new(XuiPanel::new(
            http,
            config.panel_inbound_id,
            config.connection_remark.clone(),
        )),
        PanelKind::Hiddify => Arc::new(HiddifyPanel::new(http, config.connection_remark.clone())),
    };
    Ok(panel)
}

const MAX_ERROR_BODY: usize = 512;

/// Caps a response body before it is carried in an error.
pub(crate) fn bounded(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// Status and a bounded copy of the body, for error reporting.
pub(crate) async fn failure_parts(resp: reqwest::Response) -> (u16, String) {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    (status, bounded(body))
}
