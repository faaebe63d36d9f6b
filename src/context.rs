use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::DeviceProvider;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub provider: Arc<dyn DeviceProvider>,
}

impl AppContext {
    pub fn new(config: AppConfig, provider: Arc<dyn DeviceProvider>) -> Self {
        Self {
            config: Arc::new(config),
            provider,
        }
    }
}
