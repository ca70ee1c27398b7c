use std::sync::Arc;

use crate::config::BotConfig;
use crate::services::subscription_service::SubscriptionService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BotConfig>,
    pub subscriptions: Arc<SubscriptionService>,
}
