use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Server {
    pub id: i32,
    #[sqlx(rename = "server_address")]
    pub address: String,
    #[sqlx(rename = "server_port")]
    pub port: Option<i32>,
    #[sqlx(rename = "server_sub")]
    pub sub_path: String,
    pub current_users: i32,
    pub max_users: i32,
    pub login: String,
    pub password: String,
    #[sqlx(rename = "api")]
    pub api_key: String,
    pub user_api: Option<String>,
    pub country: String,
}

impl Server {
    pub fn has_capacity(&self) -> bool {
        self.current_users < self.max_users
    }

    /// `current_users / max_users`; a server without slots counts as full.
    pub fn load_ratio(&self) -> f64 {
        if self.max_users <= 0 {
            return 1.0;
        }
        self.current_users as f64 / self.max_users as f64
    }

    /// Address without the scheme, as clients dial it.
    pub fn host(&self) -> &str {
        self.address
            .strip_prefix("https://")
            .or_else(|| self.address.strip_prefix("http://"))
            .unwrap_or(&self.address)
            .trim_end_matches('/')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerRefError {
    #[error("empty server id")]
    Empty,
    #[error("malformed server id '{0}'")]
    Malformed(String),
}

/// A server assignment: one id, or the list form some accounts carry (`{1,2,3}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRef {
    Single(i32),
    Many(Vec<i32>),
}

impl ServerRef {
    pub fn ids(&self) -> Vec<i32> {
        match self {
            ServerRef::Single(id) => vec![*id],
            ServerRef::Many(ids) => ids.clone(),
        }
    }
}

impl fmt::Display for ServerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRef::Single(id) => write!(f, "{}", id),
            ServerRef::Many(ids) => {
                let joined: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "{{{}}}", joined.join(","))
            }
        }
    }
}

fn parse_id(token: &str) -> Result<i32, ServerRefError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ServerRefError::Malformed(token.to_string()));
    }
    token
        .parse::<i32>()
        .map_err(|_| ServerRefError::Malformed(token.to_string()))
}

impl FromStr for ServerRef {
    type Err = ServerRefError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let cleaned = raw
            .trim()
            .trim_start_matches('{')
            .trim_end_matches('}')
            .trim();
        if cleaned.is_empty() {
            return Err(ServerRefError::Empty);
        }
        if !cleaned.contains(',') {
            return parse_id(cleaned).map(ServerRef::Single);
        }

        let ids = cleaned
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(parse_id)
            .collect::<Result<Vec<_>, _>>()?;
        if ids.is_empty() {
            return Err(ServerRefError::Empty);
        }
        Ok(ServerRef::Many(ids))
    }
}
