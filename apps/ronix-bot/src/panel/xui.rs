use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE, SET_COOKIE};
use reqwest::{Client, Response};
use ronix_db::models::Server;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{PanelUser, VpnPanel, bounded, failure_parts};
use crate::error::PanelError;

const SESSION_COOKIE: &str = "3x-ui";
const CLIENT_FLOW: &str = "xtls-rprx-vision";

/// 3x-ui panel. Every operation logs in first; sessions are not cached.
#[derive(Clone)]
pub struct XuiPanel {
    http: Client,
    inbound_id: i64,
    remark: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct XuiClient<'a> {
    id: String,
    flow: &'a str,
    email: &'a str,
    limit_ip: u32,
    #[serde(rename = "totalGB")]
    total_gb: u64,
    expiry_time: i64,
    enable: bool,
    tg_id: i64,
}

#[derive(Serialize)]
struct XuiSettings<'a> {
    clients: Vec<XuiClient<'a>>,
}

#[derive(Deserialize)]
struct XuiResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    obj: Option<serde_json::Value>,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub(crate) struct InboundObj {
    settings: String,
    #[serde(rename = "streamSettings")]
    stream_settings: String,
}

#[derive(Deserialize)]
struct InboundSettings {
    #[serde(default)]
    clients: Vec<InboundClient>,
}

#[derive(Deserialize)]
struct InboundClient {
    id: String,
    #[serde(default)]
    flow: Option<String>,
    #[serde(default)]
    remark: Option<String>,
}

#[derive(Deserialize)]
struct StreamSettings {
    #[serde(rename = "realitySettings")]
    reality: RealitySettings,
}

#[derive(Deserialize)]
struct RealitySettings {
    settings: RealityKeys,
    #[serde(rename = "serverNames", default)]
    server_names: Vec<String>,
    #[serde(rename = "shortIds", default)]
    short_ids: Vec<String>,
}

#[derive(Deserialize)]
struct RealityKeys {
    #[serde(rename = "publicKey")]
    public_key: String,
}

/// `{address}:{port}/{sub}` with stray slashes removed.
pub(crate) fn base_url(server: &Server) -> String {
    let address = server.address.trim_end_matches('/');
    let origin = match server.port {
        Some(port) => format!("{}:{}", address, port),
        None => address.to_string(),
    };
    let sub = server.sub_path.trim_matches('/');
    if sub.is_empty() {
        origin
    } else {
        format!("{}/{}", origin, sub)
    }
}

fn session_cookie(resp: &Response) -> Option<String> {
    resp.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn client_settings(user: &PanelUser) -> Result<String, PanelError> {
    let client = XuiClient {
        id: user.client_id.to_string(),
        flow: CLIENT_FLOW,
        email: &user.name,
        limit_ip: 0,
        total_gb: 0,
        expiry_time: user.expires_at.map(|t| t.timestamp_millis()).unwrap_or(0),
        enable: user.enabled,
        tg_id: user.tg_id,
    };
    serde_json::to_string(&XuiSettings {
        clients: vec![client],
    })
    .map_err(|e| PanelError::Decode(e.to_string()))
}

/// Builds the VLESS/Reality link for `client_id` out of an inbound as the panel returns it.
pub(crate) fn render_vless_url(
    inbound: &InboundObj,
    client_id: &str,
    host: &str,
    default_remark: &str,
) -> Result<String, PanelError> {
    let settings: InboundSettings = serde_json::from_str(&inbound.settings)
        .map_err(|e| PanelError::Decode(format!("inbound settings: {}", e)))?;
    let stream: StreamSettings = serde_json::from_str(&inbound.stream_settings)
        .map_err(|e| PanelError::Decode(format!("stream settings: {}", e)))?;

    let client = settings
        .clients
        .iter()
        .find(|c| c.id == client_id)
        .ok_or_else(|| PanelError::NotFound(format!("client {}", client_id)))?;

    let reality = stream.reality;
    let sni = reality
        .server_names
        .first()
        .ok_or_else(|| PanelError::Decode("reality settings carry no server name".into()))?;
    let short_id = reality
        .short_ids
        .first()
        .ok_or_else(|| PanelError::Decode("reality settings carry no short id".into()))?;
    let flow = client.flow.as_deref().filter(|f| !f.is_empty()).unwrap_or(CLIENT_FLOW);
    let remark = client.remark.as_deref().unwrap_or(default_remark);

    Ok(format!(
        "vless://{}@{}:443?type=tcp&security=reality&pbk={}&fp=chrome&sni={}&sid={}&spx=%2F&flow={}#{}",
        client_id,
        host,
        urlencoding::encode(&reality.settings.public_key),
        urlencoding::encode(sni),
        short_id,
        flow,
        urlencoding::encode(remark),
    ))
}

impl XuiPanel {
    pub fn new(http: Client, inbound_id: i64, remark: String) -> Self {
        Self {
            http,
            inbound_id,
            remark,
        }
    }

    async fn login(&self, server: &Server) -> Result<String, PanelError> {
        let url = format!("{}/login", base_url(server));
        let resp = self
            .http
            .post(&url)
            .json(&json!({ "username": server.login, "password": server.password }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let (status, body) = failure_parts(resp).await;
            return Err(PanelError::Auth { status, body });
        }
        match session_cookie(&resp) {
            Some(token) => Ok(token),
            None => {
                let (status, body) = failure_parts(resp).await;
                Err(PanelError::Auth {
                    status,
                    body: if body.is_empty() {
                        "session cookie missing".to_string()
                    } else {
                        body
                    },
                })
            }
        }
    }

    /// Posts client settings to `path`; a 200 carrying `success: false` still counts as rejected.
    async fn post_client(
        &self,
        server: &Server,
        path: &str,
        user: &PanelUser,
        rejected: fn(u16, String) -> PanelError,
    ) -> Result<(), PanelError> {
        let token = self.login(server).await?;
        let settings = client_settings(user)?;
        let resp = self
            .http
            .post(format!("{}{}", base_url(server), path))
            .header(ACCEPT, "application/json")
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, token))
            .json(&json!({ "id": self.inbound_id, "settings": settings }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if !(200..300).contains(&status) {
            return Err(rejected(status, bounded(body)));
        }
        // Judge the full body; only the copy carried in the error is capped.
        match serde_json::from_str::<XuiResponse>(&body) {
            Ok(parsed) if parsed.success => Ok(()),
            Ok(parsed) => Err(rejected(status, bounded(parsed.msg.unwrap_or(body)))),
            Err(e) => Err(PanelError::Decode(format!(
                "client response ({}): {}: {}",
                status,
                e,
                bounded(body)
            ))),
        }
    }
}

#[async_trait]
impl VpnPanel for XuiPanel {
    async fn authenticate(&self, server: &Server) -> Result<Option<String>, PanelError> {
        self.login(server).await.map(Some)
    }

    async fn provision_user(&self, server: &Server, user: &PanelUser) -> Result<String, PanelError> {
        self.post_client(server, "/panel/api/inbounds/addClient", user, |status, body| {
            PanelError::Provision { status, body }
        })
        .await?;
        info!(server_id = server.id, client = %user.client_id, "3x-ui client added");
        Ok(user.client_id.to_string())
    }

    async fn sync_user(&self, server: &Server, user: &PanelUser) -> Result<(), PanelError> {
        let path = format!("/panel/api/inbounds/updateClient/{}", user.client_id);
        self.post_client(server, &path, user, |status, body| PanelError::Sync { status, body })
            .await?;
        debug!(server_id = server.id, client = %user.client_id, enabled = user.enabled, "3x-ui client synced");
        Ok(())
    }

    async fn connection_url(&self, server: &Server, client_id: &str) -> Result<String, PanelError> {
        let token = self.login(server).await?;
        let url = format!(
            "{}/panel/api/inbounds/get/{}",
            base_url(server),
            self.inbound_id
        );
        let resp = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, token))
            .send()
            .await?;
        if !resp.status().is_success() {
            let (status, body) = failure_parts(resp).await;
            return Err(PanelError::Decode(format!(
                "inbound {} fetch returned {}: {}",
                self.inbound_id, status, body
            )));
        }

        let parsed: XuiResponse = resp.json().await?;
        let success = parsed.success;
        let obj = parsed
            .obj
            .filter(|_| success)
            .ok_or_else(|| PanelError::NotFound(format!("inbound {}", self.inbound_id)))?;
        let inbound: InboundObj =
            serde_json::from_value(obj).map_err(|e| PanelError::Decode(e.to_string()))?;

        render_vless_url(&inbound, client_id, server.host(), &self.remark)
    }

    async fn health_check(&self, server: &Server) -> Result<(), PanelError> {
        self.login(server).await.map(|_| ())
    }
}
