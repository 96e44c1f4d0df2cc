use std::sync::Arc;

use crate::{config::Config, infrastructure::chain_client::ChainClient, service::RelayService};

/// 应用状态
/// 所有 handler 共享的只读配置与中继服务
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: Arc<RelayService>,
}

impl AppState {
    pub fn new(config: Arc<Config>, client: Arc<dyn ChainClient>) -> Self {
        let relay = Arc::new(RelayService::new(config.clone(), client));
        Self { config, relay }
    }
}
