use std::sync::Arc;

use alphaark_feed::BroadcastHandle;
use alphaark_okx::{AccountService, OkxConfig, OkxServices, PriceService};

/// Shared application state accessible by all route handlers.
pub struct AppState {
    pub account: Arc<AccountService>,
    pub prices: Arc<PriceService>,
    /// Non-secret parts are exposed by the config route.
    pub config: Arc<OkxConfig>,
    pub feed: BroadcastHandle,
}

impl AppState {
    pub fn new(services: &OkxServices, feed: BroadcastHandle) -> Self {
        Self {
            account: services.account.clone(),
            prices: services.prices.clone(),
            config: services.config.clone(),
            feed,
        }
    }
}
