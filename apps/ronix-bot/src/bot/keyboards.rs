use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

pub const MONTH_CHOICES: [u32; 4] = [1, 3, 6, 12];

pub fn status_keyboard(active: bool, admin: bool) -> InlineKeyboardMarkup {
    let mut rows = if active {
        vec![
            vec![InlineKeyboardButton::callback("🔄 Extend subscription", "extend")],
            vec![InlineKeyboardButton::callback("🔑 Get configuration", "config")],
        ]
    } else {
        vec![vec![InlineKeyboardButton::callback("💳 Buy subscription", "buy")]]
    };

    if admin {
        rows.push(vec![InlineKeyboardButton::callback("👤 User info", "admin_user")]);
        rows.push(vec![InlineKeyboardButton::callback("➕ Extend user", "admin_extend")]);
        rows.push(vec![InlineKeyboardButton::callback("🚫 Block user", "admin_block")]);
        rows.push(vec![InlineKeyboardButton::callback("🖥 Servers", "admin_servers")]);
    }
    InlineKeyboardMarkup::new(rows)
}

/// Period picker; callbacks are `{prefix}_{months}`.
pub fn months_keyboard(prefix: &str) -> InlineKeyboardMarkup {
    let row = MONTH_CHOICES
        .iter()
        .map(|m| InlineKeyboardButton::callback(format!("{} mo", m), format!("{}_{}", prefix, m)))
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(vec![
        row,
        vec![InlineKeyboardButton::callback("« Back", "start")],
    ])
}

pub fn back_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "« Back to menu",
        "start",
    )]])
}
