//! Application state provider for dependency injection.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    app_context::AppState, config::ConfigManager, event::EventBus,
    providers::traits::AsyncProvider,
};

/// Provider for creating and initializing application state.
///
/// Loads the remembered names and selects the monitor backend.
pub struct AppStateProvider {
    config_manager: ConfigManager,
    event_bus: EventBus,
}

impl AppStateProvider {
    pub const fn new(config_manager: ConfigManager, event_bus: EventBus) -> Self {
        Self {
            config_manager,
            event_bus,
        }
    }
}

#[async_trait]
impl AsyncProvider<Arc<AppState>> for AppStateProvider {
    async fn provide(&self) -> Result<Arc<AppState>> {
        let app_state = AppState::new(self.config_manager.clone(), self.event_bus.clone()).await?;
        Ok(Arc::new(app_state))
    }
}
