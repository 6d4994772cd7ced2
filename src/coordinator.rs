//! System coordinator for managing service lifecycle and dependency injection.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{debug, error, info, warn};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    app_context::AppState,
    config::ConfigManager,
    controller::{RefreshOutcome, ScanOutcome},
    event::{Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, BroadcastServiceProvider, DBusServiceProvider,
        DisplayWatcherServiceProvider, PowerWatcherServiceProvider, RefreshServiceProvider,
        ServiceProvider,
    },
    task_manager::TaskManager,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Owns the service lifecycle and bridges trigger events to the
/// monitor controller.
///
/// Scan and refresh requests run on their own tasks so the event loop never
/// waits on hardware; the controller coalesces requests that overlap.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    events: Option<broadcast::Receiver<Event>>,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        let event_bus = EventBus::new();
        // subscribed up front so triggers fired during startup are queued
        let events = Some(event_bus.subscribe());

        Self {
            task_manager: TaskManager::new(),
            event_bus,
            events,
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Builds the application state, runs the startup scan and registers
    /// the services.
    ///
    /// A failed startup scan is not fatal; the next trigger retries it.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let state = AppStateProvider::new(config_manager, self.event_bus.clone())
            .provide()
            .await
            .context("Failed to initialize application state")?;
        self.shared_state = Some(state.clone());

        if state.controller.scan().await.is_err() {
            warn!("Startup scan failed, waiting for the next trigger");
        }

        self.register_service_providers(state).await;

        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    fn local_providers(
        state: &Arc<AppState>,
        event_bus: &EventBus,
    ) -> Vec<Box<dyn ServiceProvider>> {
        vec![
            Box::new(RefreshServiceProvider::new(state.clone())),
            Box::new(DisplayWatcherServiceProvider::new(
                state.clone(),
                event_bus.clone(),
            )),
            Box::new(PowerWatcherServiceProvider::new(
                state.clone(),
                event_bus.clone(),
            )),
        ]
    }

    /// Registers all service providers with prioritization.
    ///
    /// Without a session bus the daemon still runs; only the D-Bus surface
    /// and its signal relay are left out.
    async fn register_service_providers(&mut self, state: Arc<AppState>) {
        let mut providers = Self::local_providers(&state, &self.event_bus);

        match DBusServiceProvider::new(state, self.event_bus.clone()).await {
            Ok(provider) => {
                providers.push(Box::new(BroadcastServiceProvider::new(
                    provider.connection().clone(),
                    self.event_bus.clone(),
                )));
                providers.push(Box::new(provider));
            }
            Err(e) => {
                warn!("Failed to create D-Bus service provider: {e:#}, skipping D-Bus service");
            }
        }

        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {e:#}",
                        provider.name()
                    );
                }
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Dispatches events until Ctrl+C, SIGTERM or a shutdown request.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = match self.events.take() {
            Some(receiver) => receiver,
            None => self.event_bus.subscribe(),
        };
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for Ctrl+C")?;
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    self.shutdown().await;
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    self.shutdown().await;
                    break;
                }
                event = event_rx.recv() => {
                    if self.handle_event(event).await? == Flow::Stop {
                        break;
                    }
                }
            }
        }

        info!("Main event loop terminated");
        Ok(())
    }

    async fn handle_event(&mut self, event: Result<Event, RecvError>) -> Result<Flow> {
        let Some(state) = self.shared_state.clone() else {
            debug!("Event before initialization ignored: {event:?}");
            return Ok(Flow::Continue);
        };

        match event {
            Ok(Event::DisplaysChanged) => {
                info!("Display set changed, scanning");
                spawn_scan(state);
            }
            Ok(Event::PowerResumed) => {
                info!("Resumed from sleep, scanning");
                spawn_scan(state);
            }
            Ok(Event::RefreshRequested) => spawn_refresh(state),
            Ok(Event::BrightnessReported {
                instance_name,
                brightness,
            }) => {
                state
                    .controller
                    .report_brightness(&instance_name, brightness)
                    .await;
            }
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                self.shutdown().await;
                return Ok(Flow::Stop);
            }
            Ok(event) => debug!("Event: {event:?}"),
            Err(RecvError::Lagged(n)) => {
                // a dropped trigger would leave the registry stale
                warn!("Event bus lagged by {n} messages, rescanning");
                spawn_scan(state);
            }
            Err(RecvError::Closed) => bail!("Event bus channel closed unexpectedly"),
        }
        Ok(Flow::Continue)
    }

    /// Stops every service, then releases the monitors and saves names.
    /// Runs at most once.
    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            error!("Error during task shutdown: {e:#}");
        }

        if let Some(state) = self.shared_state.take() {
            state.controller.shutdown(state.name_store.as_ref()).await;
        }

        info!("Shutdown complete");
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}

fn spawn_scan(state: Arc<AppState>) {
    tokio::spawn(async move {
        if let Ok(ScanOutcome::Skipped) = state.controller.scan().await {
            debug!("Scan trigger coalesced with a running scan");
        }
    });
}

fn spawn_refresh(state: Arc<AppState>) {
    tokio::spawn(async move {
        if let RefreshOutcome::Refreshed(n) = state.controller.refresh_targets().await {
            debug!("Requested refresh read {n} monitors");
        }
    });
}
