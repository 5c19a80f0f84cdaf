use std::sync::Arc;

use crate::config::Config;
use crate::gateway::hub::HubHandle;

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(hub: HubHandle, config: Config) -> Self {
        Self {
            hub,
            config: Arc::new(config),
        }
    }
}
