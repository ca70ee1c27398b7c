use chrono::Utc;
use tracing::{error, info, warn};

use crate::bot::utils::{account_summary, escape_html, format_date, payment_line, server_line};
use crate::error::SubscriptionError;
use crate::services::subscription_service::Outcome;
use crate::state::AppState;

pub const PROMPT_USER: &str = "👤 Reply with the Telegram ID of the user to look up.";
pub const PROMPT_EXTEND: &str =
    "➕ Reply with the Telegram ID and the number of months, e.g. 123456789 1";
pub const PROMPT_BLOCK: &str = "🚫 Reply with the Telegram ID of the user to block.";

pub const USAGE: &str = "Admin commands:\n/user &lt;id&gt;\n/extend &lt;id&gt; &lt;months&gt;\n/block &lt;id&gt;\n/sync &lt;id&gt;\n/servers\n/payments &lt;id&gt;";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    User(i64),
    Extend { tg_id: i64, months: u32 },
    Block(i64),
    Sync(i64),
    Servers,
    Payments(i64),
}

fn tg_id_arg(arg: Option<&str>) -> Result<i64, String> {
    let raw = arg.ok_or_else(|| "Telegram ID is missing".to_string())?;
    raw.parse()
        .map_err(|_| format!("'{}' is not a Telegram ID", raw))
}

impl AdminCommand {
    /// `None` when `text` is not an admin command at all.
    pub fn parse(text: &str) -> Option<Result<Self, String>> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head);
        let first = parts.next();

        let parsed = match name {
            "user" => tg_id_arg(first).map(AdminCommand::User),
            "block" => tg_id_arg(first).map(AdminCommand::Block),
            "sync" => tg_id_arg(first).map(AdminCommand::Sync),
            "payments" => tg_id_arg(first).map(AdminCommand::Payments),
            "servers" => Ok(AdminCommand::Servers),
            "extend" => tg_id_arg(first).and_then(|tg_id| {
                let raw = parts.next().ok_or_else(|| "number of months is missing".to_string())?;
                let months = raw
                    .parse()
                    .map_err(|_| format!("'{}' is not a number of months", raw))?;
                Ok(AdminCommand::Extend { tg_id, months })
            }),
            _ => return None,
        };
        Some(parsed)
    }

    /// Reads an answer to one of the ForceReply prompts.
    pub fn from_reply(prompt: &str, answer: &str) -> Option<Result<Self, String>> {
        let command = if prompt == PROMPT_USER {
            "/user"
        } else if prompt == PROMPT_EXTEND {
            "/extend"
        } else if prompt == PROMPT_BLOCK {
            "/block"
        } else {
            return None;
        };
        Self::parse(&format!("{} {}", command, answer.trim()))
    }
}

fn failure(action: &str, tg_id: i64, err: &SubscriptionError) -> String {
    error!(tg_id, error = %err, "Admin {} failed", action);
    format!("❌ {} failed: {}", action, escape_html(&err.to_string()))
}

fn sync_note<T>(outcome: &Outcome<T>) -> String {
    match outcome.warning() {
        Some(w) => format!("\n⚠️ Panel not updated: {}", escape_html(&w.to_string())),
        None => String::new(),
    }
}

/// Runs an admin command and renders the reply as HTML.
pub async fn execute(state: &AppState, command: AdminCommand) -> String {
    info!(?command, "Admin command");
    let subs = &state.subscriptions;
    match command {
        AdminCommand::User(tg_id) => match subs.get_account(tg_id).await {
            Ok(Some(account)) => account_summary(&account, Utc::now()),
            Ok(None) => format!("User <code>{}</code> not found.", tg_id),
            Err(e) => failure("lookup", tg_id, &e),
        },
        AdminCommand::Extend { tg_id, months } => match subs.extend(tg_id, months).await {
            Ok(outcome) => {
                let expires = outcome.value().subscription_end;
                if let Err(e) = subs
                    .record_payment(tg_id, 0, "admin_grant")
                    .await
                {
                    warn!(tg_id, error = %e, "Failed to record admin grant");
                }
                format!(
                    "✅ <code>{}</code> extended by {} month(s), valid until {}.{}",
                    tg_id,
                    months,
                    format_date(expires),
                    sync_note(&outcome)
                )
            }
            Err(e) => failure("extend", tg_id, &e),
        },
        AdminCommand::Block(tg_id) => match subs.block(tg_id).await {
            Ok(outcome) => format!("🚫 <code>{}</code> blocked.{}", tg_id, sync_note(&outcome)),
            Err(SubscriptionError::AlreadyBlocked) => {
                format!("<code>{}</code> is already blocked.", tg_id)
            }
            Err(e) => failure("block", tg_id, &e),
        },
        AdminCommand::Sync(tg_id) => match subs.resync(tg_id).await {
            Ok(_) => format!("✅ <code>{}</code> synced to the panel.", tg_id),
            Err(e) => failure("sync", tg_id, &e),
        },
        AdminCommand::Servers => match subs.check_servers().await {
            Ok(report) if report.is_empty() => "No servers configured.".to_string(),
            Ok(report) => {
                let lines: Vec<String> = report
                    .iter()
                    .map(|(server, check)| server_line(server, check))
                    .collect();
                format!("🖥 <b>Servers</b>\n\n{}", lines.join("\n"))
            }
            Err(e) => failure("server listing", 0, &e),
        },
        AdminCommand::Payments(tg_id) => match subs.payments(tg_id).await {
            Ok(payments) if payments.is_empty() => {
                format!("No payments for <code>{}</code>.", tg_id)
            }
            Ok(payments) => {
                let lines: Vec<String> = payments.iter().map(payment_line).collect();
                format!("💳 <b>Payments of {}</b>\n\n{}", tg_id, lines.join("\n"))
            }
            Err(e) => failure("payment listing", tg_id, &e),
        },
    }
}
