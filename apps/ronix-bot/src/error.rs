use ronix_db::models::ServerRefError;
use thiserror::Error;

/// Failures talking to a VPN panel. None of these are retried.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("panel authentication failed ({status}): {body}")]
    Auth { status: u16, body: String },
    #[error("panel rejected the new client ({status}): {body}")]
    Provision { status: u16, body: String },
    #[error("panel sync failed ({status}): {body}")]
    Sync { status: u16, body: String },
    #[error("{0} not found on panel")]
    NotFound(String),
    #[error("account has no server assigned")]
    NotAssigned,
    #[error("server lookup failed: {0}")]
    Lookup(String),
    #[error("panel request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected panel response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("no server has free capacity")]
    Capacity,
    #[error("account is already blocked")]
    AlreadyBlocked,
    #[error("account is blocked")]
    Blocked,
    #[error("account has no subscription to extend")]
    NoSubscription,
    #[error(transparent)]
    Panel(#[from] PanelError),
    #[error("storage failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl From<ServerRefError> for SubscriptionError {
    fn from(err: ServerRefError) -> Self {
        SubscriptionError::Validation(err.to_string())
    }
}
