use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ForceReply, ParseMode};
use tracing::{error, info, warn};

use super::admin::{self, AdminCommand, PROMPT_BLOCK, PROMPT_EXTEND, PROMPT_USER};
use super::command::send_status;
use crate::bot::keyboards::{back_keyboard, months_keyboard};
use crate::bot::utils::{escape_html, format_date, payment_prompt, receipt_text, user_message};
use crate::error::SubscriptionError;
use crate::state::AppState;

fn months_from(data: &str, prefix: &str) -> Option<u32> {
    data.strip_prefix(prefix)?.strip_prefix('_')?.parse().ok()
}

async fn record_payment(state: &AppState, tg_id: i64, months: u32) {
    let amount = state
        .config
        .monthly_price
        .saturating_mul(i32::try_from(months).unwrap_or(i32::MAX));
    if let Err(e) = state
        .subscriptions
        .record_payment(tg_id, amount, "completed")
        .await
    {
        warn!(tg_id, error = %e, "Failed to record payment");
    }
}

/// Tells the user when no server has room. Returns whether a purchase can go ahead.
async fn capacity_available(
    bot: &Bot,
    chat_id: ChatId,
    tg_id: i64,
    state: &AppState,
) -> Result<bool, teloxide::RequestError> {
    let err = match state.subscriptions.has_capacity().await {
        Ok(true) => return Ok(true),
        Ok(false) => SubscriptionError::Capacity,
        Err(e) => {
            error!(tg_id, error = %e, "Capacity check failed");
            e
        }
    };
    bot.send_message(chat_id, user_message(&err))
        .reply_markup(back_keyboard())
        .await?;
    Ok(false)
}

pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    info!("Received callback: {:?}", q.data);
    let tg_id = q.from.id.0 as i64;
    bot.answer_callback_query(q.id.clone()).await?;

    let (Some(data), Some(msg)) = (q.data.as_deref(), q.message.as_ref()) else {
        return Ok(());
    };
    let chat_id = msg.chat().id;
    let subs = &state.subscriptions;

    match data {
        "start" => {
            send_status(&bot, chat_id, tg_id, q.from.username.as_deref(), &state).await?;
        }

        "buy" | "extend" => {
            if data == "buy" && !capacity_available(&bot, chat_id, tg_id, &state).await? {
                return Ok(());
            }
            let title = if data == "buy" {
                "💳 <b>Choose a subscription period:</b>"
            } else {
                "🔄 <b>Extend your subscription by:</b>"
            };
            bot.edit_message_text(chat_id, msg.id(), title)
                .parse_mode(ParseMode::Html)
                .reply_markup(months_keyboard(data))
                .await?;
        }

        buy if months_from(buy, "buy").is_some() => {
            let months = months_from(buy, "buy").unwrap_or(1);
            if !capacity_available(&bot, chat_id, tg_id, &state).await? {
                return Ok(());
            }
            bot.send_message(chat_id, payment_prompt(&state.config.payment_url))
                .parse_mode(ParseMode::Html)
                .await?;

            let text = match subs.purchase(tg_id, months).await {
                Ok(outcome) => {
                    if let Some(w) = outcome.warning() {
                        warn!(tg_id, warning = %w, "Purchase committed without panel sync");
                    }
                    record_payment(&state, tg_id, months).await;
                    receipt_text(outcome.value())
                }
                Err(e) => {
                    error!(tg_id, months, error = %e, "Purchase failed");
                    user_message(&e).to_string()
                }
            };
            bot.send_message(chat_id, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(back_keyboard())
                .await?;
        }

        extend if months_from(extend, "extend").is_some() => {
            let months = months_from(extend, "extend").unwrap_or(1);
            bot.send_message(chat_id, payment_prompt(&state.config.payment_url))
                .parse_mode(ParseMode::Html)
                .await?;

            let text = match subs.extend(tg_id, months).await {
                Ok(outcome) => {
                    if let Some(w) = outcome.warning() {
                        warn!(tg_id, warning = %w, "Extension committed without panel sync");
                    }
                    record_payment(&state, tg_id, months).await;
                    format!(
                        "✅ <b>Subscription extended</b>\n\n🔹 Valid until: <b>{}</b>",
                        format_date(outcome.value().subscription_end)
                    )
                }
                Err(e) => {
                    error!(tg_id, months, error = %e, "Extension failed");
                    user_message(&e).to_string()
                }
            };
            bot.send_message(chat_id, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(back_keyboard())
                .await?;
        }

        "config" => {
            let text = match subs.connection(tg_id).await {
                Ok(conn) => {
                    let mut text = format!(
                        "🔑 <b>Your configuration</b>\n\n<code>{}</code>",
                        escape_html(&conn.url)
                    );
                    if let Some(url) = conn.subscription_url {
                        text.push_str(&format!("\n\n➡️ {}", escape_html(&url)));
                    }
                    text
                }
                Err(e) => {
                    error!(tg_id, error = %e, "Failed to build configuration");
                    user_message(&e).to_string()
                }
            };
            bot.send_message(chat_id, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(back_keyboard())
                .await?;
        }

        "admin_user" | "admin_extend" | "admin_block" | "admin_servers" => {
            if !state.config.is_admin(tg_id) {
                warn!(tg_id, data, "Non-admin pressed an admin button");
                return Ok(());
            }
            let prompt = match data {
                "admin_user" => PROMPT_USER,
                "admin_extend" => PROMPT_EXTEND,
                "admin_block" => PROMPT_BLOCK,
                _ => {
                    let reply = admin::execute(&state, AdminCommand::Servers).await;
                    bot.send_message(chat_id, reply)
                        .parse_mode(ParseMode::Html)
                        .await?;
                    return Ok(());
                }
            };
            bot.send_message(chat_id, prompt)
                .reply_markup(ForceReply::new().selective())
                .await?;
        }

        other => {
            warn!(tg_id, data = other, "Unknown callback");
        }
    }
    Ok(())
}
