use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ronix_db::repositories::{AccountRepository, PaymentRepository, ServerRepository};

mod bot;
mod config;
mod error;
mod panel;
mod services;
mod state;

use crate::config::BotConfig;
use crate::services::server_registry::ServerRegistry;
use crate::services::subscription_service::SubscriptionService;
use crate::state::AppState;

const LOCK_PRUNE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let file_appender = tracing_appender::rolling::never(".", "bot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ronix_bot=debug,ronix_db=info,sqlx=warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    info!("Starting Ronix bot...");

    let config = Arc::new(BotConfig::load().context("Failed to load configuration")?);
    info!(
        panel = %config.vpn_type,
        admins = config.admin_ids.len(),
        "Configuration loaded"
    );

    let pool = ronix_db::init_db(&config.database_url()?).await?;

    let accounts = Arc::new(AccountRepository::new(pool.clone()));
    let servers = Arc::new(ServerRepository::new(pool.clone()));
    let payments = Arc::new(PaymentRepository::new(pool));

    let panel = panel::build_panel(&config).context("Failed to build panel client")?;
    let registry = Arc::new(ServerRegistry::new(servers));
    let subscriptions = Arc::new(
        SubscriptionService::new(accounts, payments, registry, panel)
            .with_subscription_base_url(config.subscription_base_url.clone()),
    );

    {
        let subscriptions = subscriptions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LOCK_PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                subscriptions.prune_locks();
            }
        });
    }

    let state = AppState {
        config: config.clone(),
        subscriptions,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = shutdown_tx.send(());
        } else {
            warn!("Could not listen for Ctrl-C");
        }
    });

    let bot = Bot::new(config.token.clone());
    bot::run_bot(bot, shutdown_rx, state).await;

    info!("Ronix bot stopped");
    Ok(())
}
