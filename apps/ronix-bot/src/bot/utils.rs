use chrono::{DateTime, Utc};
use ronix_db::models::{Account, AccountStatus, Payment, Server};

use crate::error::{PanelError, SubscriptionError};
use crate::services::subscription_service::{PurchaseReceipt, SubscriptionStatus, is_active_at};

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%d.%m.%Y %H:%M UTC").to_string())
        .unwrap_or_else(|| "no subscription".to_string())
}

/// What the end user sees when an operation fails. Details stay in the log.
pub fn user_message(err: &SubscriptionError) -> &'static str {
    match err {
        SubscriptionError::Capacity => {
            "😔 There are no free servers right now. We are adding more, please try again later."
        }
        SubscriptionError::Blocked | SubscriptionError::AlreadyBlocked => {
            "🚫 Access denied. Your account is blocked."
        }
        SubscriptionError::NoSubscription => {
            "⚠️ You have no subscription yet. Buy one first."
        }
        SubscriptionError::NotFound(_) => "⚠️ Please register first with /start.",
        SubscriptionError::Validation(_) => "⚠️ Invalid request.",
        SubscriptionError::Panel(PanelError::NotAssigned) => {
            "⚠️ You have no active subscription. Buy one to get a configuration."
        }
        SubscriptionError::Panel(_) | SubscriptionError::Store(_) => {
            "❌ Something went wrong while processing your request. Please contact support."
        }
    }
}

pub fn status_card(
    account: &Account,
    status: &SubscriptionStatus,
    subscription_url: Option<&str>,
) -> String {
    let name = escape_html(&account.display_name());
    if account.status == AccountStatus::Blocked {
        return format!("👋 <b>Hi, {}!</b>\n\n🚫 Your account is blocked.", name);
    }
    if !status.active {
        return format!(
            "👋 <b>Hi, {}!</b>\n\n<b>Your subscription is not active</b> 😔\n\n\
             You can buy one to start using the service.",
            name
        );
    }

    let mut text = format!(
        "👋 <b>Hi, {}!</b> 🚀\n\n📌 <b>Account</b>\n🔹 Subscription: <b>Active 🟢</b>\n🔹 Valid until: <b>{}</b> 📅\n",
        name,
        format_date(status.expires)
    );
    if let Some(url) = subscription_url {
        text.push_str(&format!(
            "\n🔑 <b>Access</b>\nOpen your personal page:\n➡️ {}\n",
            escape_html(url)
        ));
    }
    text
}

pub fn payment_prompt(payment_url: &str) -> String {
    format!(
        "<b>To pay, please use this link:</b>\n\n<a href=\"{0}\">{0}</a>\n\nIf you have any questions, we are happy to help!",
        escape_html(payment_url)
    )
}

pub fn receipt_text(receipt: &PurchaseReceipt) -> String {
    let mut text = format!(
        "✅ <b>Subscription activated</b>\n\n🔹 Valid until: <b>{}</b>\n🔹 Server: #{}\n",
        format_date(receipt.account.subscription_end),
        receipt.server_id
    );
    if let Some(url) = &receipt.connection_url {
        text.push_str(&format!("\n🔑 Configuration:\n<code>{}</code>\n", escape_html(url)));
    }
    if let Some(url) = &receipt.subscription_url {
        text.push_str(&format!("\n➡️ {}\n", escape_html(url)));
    }
    text
}

pub fn account_summary(account: &Account, now: DateTime<Utc>) -> String {
    let active = is_active_at(account.subscription_end, now);
    format!(
        "👤 <b>{}</b> (<code>{}</code>)\n🔹 Status: <b>{}</b>{}\n🔹 Valid until: {}\n🔹 Server: {}\n🔹 Registered: {}",
        escape_html(&account.display_name()),
        account.tg_id,
        account.status,
        if active { "" } else { " (expired)" },
        format_date(account.subscription_end),
        account.server_id.as_deref().unwrap_or("none"),
        account.created_at.format("%d.%m.%Y"),
    )
}

pub fn server_line(server: &Server, check: &Result<(), PanelError>) -> String {
    let health = match check {
        Ok(()) => "🟢".to_string(),
        Err(e) => format!("🔴 {}", escape_html(&e.to_string())),
    };
    format!(
        "#{} {} <code>{}</code> {}/{} {}",
        server.id,
        escape_html(&server.country),
        escape_html(server.host()),
        server.current_users,
        server.max_users,
        health
    )
}

pub fn payment_line(payment: &Payment) -> String {
    format!(
        "#{} {} {} ({})",
        payment.id,
        payment.created_at.format("%d.%m.%Y"),
        payment.amount,
        escape_html(&payment.status)
    )
}
