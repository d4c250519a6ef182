use crate::config::Config;
use crate::services::SettlementService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub settlement: Arc<SettlementService>,
}

impl AppState {
    pub fn new(config: Config, settlement: SettlementService) -> Self {
        Self {
            config: Arc::new(config),
            settlement: Arc::new(settlement),
        }
    }
}
