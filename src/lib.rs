//! # dimmerd
//!
//! A Linux daemon that keeps a registry of attached monitors and their
//! brightness.
//!
//! ## Features
//!
//! - **Single-flight scans**: overlapping scan requests collapse into one
//!   enumeration; refreshes are deferred while a scan runs
//! - **Bounded targets**: at most `max_monitor_count` monitors are refreshed
//!   periodically
//! - **Name memory**: user-given names survive unplugging and restarts, in a
//!   cache bounded to four times the monitor cap
//! - **Backends**: sysfs backlight devices or DDC/CI through `ddcutil`
//! - **Triggers**: display hotplug, resume from sleep, periodic refresh
//! - **D-Bus Interface**: scan, refresh, rename and brightness control
//!
//! ## Architecture
//!
//! The daemon uses a provider-based dependency injection system with:
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - Main lifecycle manager
//! - [`MonitorController`](controller::MonitorController) - Registry owner
//! - [`EventBus`](event::EventBus) - Inter-service communication
//! - [`AppState`](app_context::AppState) - Shared application state
//! - Service providers for modular functionality
//!
//! ## Example
//!
//! ```no_run
//! use dimmerd::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod cli;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod device;
pub mod drivers;
pub mod event;
pub mod interface;
pub mod monitor;
pub mod name_cache;
pub mod providers;
pub mod registry;
pub mod single_flight;
pub mod task_manager;
