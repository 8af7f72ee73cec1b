use crate::api::ApiClient;
use crate::broker::Broker;
use crate::config::GatewayConfig;
use crate::registry::SessionRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<SessionRegistry>,
    pub api: Arc<ApiClient>,
    pub broker: Arc<dyn Broker>,
}

impl AppState {
    pub fn new(config: GatewayConfig, api: ApiClient, broker: Arc<dyn Broker>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            api: Arc::new(api),
            broker,
        }
    }
}
