//! Application state shared by every service.

use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::{
    config::{Config, ConfigManager, Limits},
    controller::MonitorController,
    drivers,
    event::EventBus,
    name_cache::{JsonNameStore, NameStore, load_cache},
};

/// Shared application state.
///
/// Built once at startup; the limits are fixed for the lifetime of the
/// process.
pub struct AppState {
    /// Configuration manager for centralized config handling
    pub config_manager: Arc<ConfigManager>,
    pub limits: Limits,
    /// Registry owner, driven by triggers and the D-Bus surface
    pub controller: Arc<MonitorController>,
    /// Where remembered names go at shutdown
    pub name_store: Arc<dyn NameStore>,
}

impl AppState {
    /// Creates the state from configuration: loads remembered names and
    /// builds the configured backend. No hardware is touched yet.
    pub async fn new(config_manager: ConfigManager, event_bus: EventBus) -> Result<Self> {
        let config = config_manager.get();
        let limits = config.limits();
        info!(
            "Tracking up to {} monitors, remembering up to {} names",
            limits.max_monitor_count, limits.max_name_count
        );

        let name_store: Arc<dyn NameStore> = Arc::new(JsonNameStore::new(config.names_path()));
        let names = load_cache(name_store.as_ref(), limits.max_name_count).await;

        let enumerator = drivers::build_enumerator(&config.backend);
        info!("Using {} backend", enumerator.name());

        let controller = Arc::new(MonitorController::new(
            enumerator,
            names,
            limits,
            config.device_timeout(),
            event_bus,
        ));

        Ok(Self::from_parts(config_manager, controller, name_store))
    }

    /// Assembles the state from prebuilt parts.
    pub fn from_parts(
        config_manager: ConfigManager,
        controller: Arc<MonitorController>,
        name_store: Arc<dyn NameStore>,
    ) -> Self {
        Self {
            limits: controller.limits(),
            config_manager: Arc::new(config_manager),
            controller,
            name_store,
        }
    }

    pub fn config(&self) -> &Config {
        self.config_manager.get()
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }
}
