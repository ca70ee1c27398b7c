use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder};
use ronix_db::models::Server;
use serde::Serialize;
use tracing::{debug, info};

use super::{PanelUser, VpnPanel, failure_parts};
use crate::error::PanelError;

const API_KEY_HEADER: &str = "Hiddify-API-Key";
const USAGE_LIMIT_GB: u32 = 200;

/// Hiddify panel, authenticated by the per-server admin API key.
#[derive(Clone)]
pub struct HiddifyPanel {
    http: Client,
    remark: String,
}

#[derive(Debug, Serialize)]
struct HiddifyUser<'a> {
    name: &'a str,
    telegram_id: i64,
    #[serde(rename = "usage_limit_GB")]
    usage_limit_gb: u32,
    package_days: i64,
    start_date: String,
    uuid: String,
    enable: bool,
    is_active: bool,
    mode: &'static str,
    lang: &'static str,
}

impl<'a> HiddifyUser<'a> {
    fn new(user: &'a PanelUser, today: NaiveDate) -> Self {
        Self {
            name: &user.name,
            telegram_id: user.tg_id,
            usage_limit_gb: USAGE_LIMIT_GB,
            package_days: package_days(user.expires_at, today),
            start_date: today.format("%Y-%m-%d").to_string(),
            uuid: user.client_id.to_string(),
            enable: user.enabled,
            is_active: user.enabled,
            mode: "monthly",
            lang: "en",
        }
    }
}

/// Whole days from `today` until the expiry date; never negative.
pub(crate) fn package_days(expires_at: Option<DateTime<Utc>>, today: NaiveDate) -> i64 {
    expires_at
        .map(|end| (end.date_naive() - today).num_days().max(0))
        .unwrap_or(0)
}

fn admin_base(server: &Server) -> String {
    let address = server.address.trim_end_matches('/');
    let sub = server.sub_path.trim_matches('/');
    if sub.is_empty() {
        format!("{}/api/v2/admin", address)
    } else {
        format!("{}/{}/api/v2/admin", address, sub)
    }
}

impl HiddifyPanel {
    pub fn new(http: Client, remark: String) -> Self {
        Self { http, remark }
    }

    fn authorized(&self, server: &Server, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(ACCEPT, "application/json")
            .header(API_KEY_HEADER, &server.api_key)
    }
}

#[async_trait]
impl VpnPanel for HiddifyPanel {
    async fn authenticate(&self, _server: &Server) -> Result<Option<String>, PanelError> {
        Ok(None)
    }

    async fn provision_user(&self, server: &Server, user: &PanelUser) -> Result<String, PanelError> {
        let payload = HiddifyUser::new(user, Utc::now().date_naive());
        let resp = self
            .authorized(server, self.http.post(format!("{}/user/", admin_base(server))))
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let (status, body) = failure_parts(resp).await;
            return Err(PanelError::Provision { status, body });
        }
        info!(server_id = server.id, client = %user.client_id, days = payload.package_days, "hiddify user added");
        Ok(user.client_id.to_string())
    }

    async fn sync_user(&self, server: &Server, user: &PanelUser) -> Result<(), PanelError> {
        let payload = HiddifyUser::new(user, Utc::now().date_naive());
        let url = format!("{}/user/{}/", admin_base(server), user.client_id);
        let resp = self
            .authorized(server, self.http.patch(url))
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let (status, body) = failure_parts(resp).await;
            return Err(PanelError::Sync { status, body });
        }
        debug!(server_id = server.id, client = %user.client_id, enabled = user.enabled, "hiddify user synced");
        Ok(())
    }

    async fn connection_url(&self, server: &Server, client_id: &str) -> Result<String, PanelError> {
        let user_path = server
            .user_api
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| PanelError::NotFound(format!("user path of server {}", server.id)))?;
        Ok(format!(
            "{}/{}/{}/#{}",
            server.address.trim_end_matches('/'),
            user_path,
            client_id,
            self.remark
        ))
    }

    async fn health_check(&self, server: &Server) -> Result<(), PanelError> {
        let resp = self
            .authorized(server, self.http.get(format!("{}/system/", admin_base(server))))
            .send()
            .await?;
        if !resp.status().is_success() {
            let (status, body) = failure_parts(resp).await;
            return Err(PanelError::Auth { status, body });
        }
        Ok(())
    }
}
