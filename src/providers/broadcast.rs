use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use zbus::Connection;

use crate::{
    event::{Event, EventBus},
    interface::{DBusInterface, OBJECT_PATH},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Relays controller events to D-Bus signals.
///
/// `ScanningChanged` goes out as is; every registry change collapses into
/// `MonitorsChanged`. The matching property change notifications are sent
/// along so property caches on the client side stay fresh.
///
/// # Priority and Criticality
///
/// - **Priority**: 3 (low)
/// - **Critical**: No (optional service)
pub struct BroadcastServiceProvider {
    connection: Connection,
    event_bus: EventBus,
}

impl BroadcastServiceProvider {
    pub fn new(connection: Connection, event_bus: EventBus) -> Self {
        Self {
            connection,
            event_bus,
        }
    }
}

#[async_trait]
impl ServiceProvider for BroadcastServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let connection = self.connection.clone();
        // subscribe before spawning so nothing published after start is lost
        let events = self.event_bus.subscribe();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_broadcast_service(connection, events, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "BroadcastService"
    }

    fn priority(&self) -> i32 {
        3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Scanning(bool),
    Monitors,
}

fn signal_for(event: &Event) -> Option<Signal> {
    match event {
        Event::ScanningChanged(scanning) => Some(Signal::Scanning(*scanning)),
        event if event.changes_monitors() => Some(Signal::Monitors),
        _ => None,
    }
}

async fn run_broadcast_service(
    connection: Connection,
    mut events: tokio::sync::broadcast::Receiver<Event>,
    cancel_token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Broadcast service cancelled");
                break;
            }
            event = events.recv() => {
                let signal = match event {
                    Ok(event) => signal_for(&event),
                    // something was missed; let clients re-read everything
                    Err(RecvError::Lagged(n)) => {
                        warn!("Signal relay lagged by {n} events");
                        Some(Signal::Monitors)
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Some(signal) = signal {
                    if let Err(e) = emit(&connection, signal).await {
                        warn!("Failed to emit {signal:?}: {e}");
                    }
                }
            }
        }
    }
    Ok(())
}

async fn emit(connection: &Connection, signal: Signal) -> zbus::Result<()> {
    let iface = connection
        .object_server()
        .interface::<_, DBusInterface>(OBJECT_PATH)
        .await?;
    let emitter = iface.signal_emitter();
    debug!("Emitting {signal:?}");

    match signal {
        Signal::Scanning(scanning) => {
            DBusInterface::scanning_changed_signal(emitter, scanning).await?;
            iface.get().await.scanning_changed(emitter).await
        }
        Signal::Monitors => {
            DBusInterface::monitors_changed_signal(emitter).await?;
            iface.get().await.monitors_changed(emitter).await
        }
    }
}
