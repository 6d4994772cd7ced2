//! Dependency injection providers for service management.
//!
//! Each long-running concern of the daemon (periodic refresh, hotplug and
//! resume watchers, the D-Bus surface and its signal relay) is started
//! through a [`ServiceProvider`] by the system coordinator.

pub mod app_state;
pub mod broadcast;
pub mod dbus;
pub mod display_watcher;
pub mod power_watcher;
pub mod refresh;
pub mod traits;

// Re-export core types for convenience
pub use app_state::AppStateProvider;
pub use broadcast::BroadcastServiceProvider;
pub use dbus::DBusServiceProvider;
pub use display_watcher::DisplayWatcherServiceProvider;
pub use power_watcher::PowerWatcherServiceProvider;
pub use refresh::RefreshServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
