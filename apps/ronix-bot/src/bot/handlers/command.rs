use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{error, info};

use super::admin::{self, AdminCommand, USAGE};
use crate::bot::keyboards::status_keyboard;
use crate::bot::utils::{escape_html, status_card, user_message};
use crate::state::AppState;

/// Registers the user if needed and sends the status card.
pub async fn send_status(
    bot: &Bot,
    chat_id: ChatId,
    tg_id: i64,
    username: Option<&str>,
    state: &AppState,
) -> Result<(), teloxide::RequestError> {
    let subs = &state.subscriptions;
    let account = match subs.register_if_absent(tg_id, username).await {
        Ok(account) => account,
        Err(e) => {
            error!(tg_id, error = %e, "Failed to register user");
            bot.send_message(chat_id, user_message(&e)).await?;
            return Ok(());
        }
    };
    let status = match subs.get_status(tg_id).await {
        Ok(status) => status,
        Err(e) => {
            error!(tg_id, error = %e, "Failed to read subscription status");
            bot.send_message(chat_id, user_message(&e)).await?;
            return Ok(());
        }
    };

    let subscription_url = subs.subscription_url(&account);
    let text = status_card(&account, &status, subscription_url.as_deref());
    let active = status.active && !account.is_blocked();
    bot.send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(status_keyboard(active, state.config.is_admin(tg_id)))
        .await?;
    Ok(())
}

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let tg_id = from.id.0 as i64;
    info!(tg_id, "Received message: {}", text);

    if text.starts_with("/start") {
        return send_status(&bot, msg.chat.id, tg_id, from.username.as_deref(), &state).await;
    }

    let command = match msg.reply_to_message().and_then(|r| r.text()) {
        Some(prompt) => AdminCommand::from_reply(prompt, text),
        None => AdminCommand::parse(text),
    };
    let Some(command) = command else {
        if text.starts_with('/') && state.config.is_admin(tg_id) {
            bot.send_message(msg.chat.id, USAGE)
                .parse_mode(ParseMode::Html)
                .await?;
        }
        return Ok(());
    };

    if !state.config.is_admin(tg_id) {
        info!(tg_id, "Non-admin tried an admin command");
        bot.send_message(msg.chat.id, "You are not allowed to do this.")
            .await?;
        return Ok(());
    }

    let reply = match command {
        Ok(command) => admin::execute(&state, command).await,
        Err(problem) => format!("⚠️ {}\n\n{}", escape_html(&problem), USAGE),
    };
    bot.send_message(msg.chat.id, reply)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}
