//! Event-driven communication between the controller, triggers and services.

use anyhow::Result;
use tokio::sync::broadcast;

/// Application events for inter-service communication.
///
/// Trigger sources publish the request variants; the controller publishes
/// the state-change variants, which the D-Bus relay turns into signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A scan pass started (`true`) or finished (`false`).
    ScanningChanged(bool),
    MonitorAdded(String),
    MonitorRemoved(String),
    /// A record's brightness changed through a fetch, a write or a report.
    BrightnessUpdated { device_id: String, brightness: i32 },
    /// A record was renamed over D-Bus.
    NameChanged { device_id: String },
    /// The display set may have changed; requests a scan.
    DisplaysChanged,
    /// The system resumed from sleep; requests a scan.
    PowerResumed,
    /// Out-of-band brightness value from the host.
    BrightnessReported { instance_name: String, brightness: i32 },
    /// Requests a refresh of the target monitors.
    RefreshRequested,
    SystemShutdown,
}

impl Event {
    /// True for events that change what `Monitors` reports.
    pub fn changes_monitors(&self) -> bool {
        matches!(
            self,
            Event::MonitorAdded(_)
                | Event::MonitorRemoved(_)
                | Event::BrightnessUpdated { .. }
                | Event::NameChanged { .. }
        )
    }
}

/// Event bus for publish-subscribe messaging between services.
///
/// # Example
///
/// ```no_run
/// use dimmerd::event::{Event, EventBus};
///
/// let event_bus = EventBus::new();
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus.publish(Event::DisplaysChanged).unwrap();
///
/// // In async context, receive events:
/// // let event = subscriber.recv().await;
/// ```
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new EventBus with default capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    #[cfg(test)]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Publishes a notification nobody is required to hear.
    pub fn notify(&self, event: Event) {
        if self.sender.send(event).is_err() {
            log::trace!("No subscribers for event");
        }
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each subscriber receives all events published after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::{Duration, sleep};

    #[test]
    fn event_bus_clone_creates_shared_channel() {
        let event_bus1 = EventBus::new();
        let event_bus2 = event_bus1.clone();

        let _receiver1 = event_bus1.subscribe();
        let _receiver2 = event_bus2.subscribe();

        assert_eq!(event_bus1.sender.receiver_count(), 2);
        assert_eq!(event_bus2.sender.receiver_count(), 2);
    }

    #[test]
    fn monitor_changes_are_classified() {
        assert!(Event::MonitorAdded("D1".into()).changes_monitors());
        assert!(
            Event::BrightnessUpdated {
                device_id: "D1".into(),
                brightness: 10,
            }
            .changes_monitors()
        );
        assert!(!Event::ScanningChanged(true).changes_monitors());
        assert!(!Event::DisplaysChanged.changes_monitors());
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let event_bus = EventBus::new();
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        event_bus.publish(Event::PowerResumed).unwrap();

        assert_eq!(receiver1.recv().await.unwrap(), Event::PowerResumed);
        assert_eq!(receiver2.recv().await.unwrap(), Event::PowerResumed);
    }

    #[tokio::test]
    async fn publish_without_subscribers_returns_error() {
        let event_bus = EventBus::new();

        assert!(event_bus.publish(Event::DisplaysChanged).is_err());
    }

    #[tokio::test]
    async fn notify_without_subscribers_is_silent() {
        let event_bus = EventBus::new();
        event_bus.notify(Event::ScanningChanged(true));

        let mut receiver = event_bus.subscribe();
        event_bus.notify(Event::ScanningChanged(false));
        assert_eq!(receiver.recv().await.unwrap(), Event::ScanningChanged(false));
    }

    #[tokio::test]
    async fn sequential_events_received_in_order() {
        let event_bus = EventBus::new();
        let mut receiver = event_bus.subscribe();

        event_bus.publish(Event::ScanningChanged(true)).unwrap();
        event_bus.publish(Event::MonitorAdded("D1".into())).unwrap();
        event_bus.publish(Event::ScanningChanged(false)).unwrap();

        assert_eq!(receiver.recv().await.unwrap(), Event::ScanningChanged(true));
        assert_eq!(
            receiver.recv().await.unwrap(),
            Event::MonitorAdded("D1".into())
        );
        assert_eq!(receiver.recv().await.unwrap(), Event::ScanningChanged(false));
    }

    #[tokio::test]
    async fn event_bus_works_across_async_tasks() {
        let event_bus = EventBus::new();
        let mut receiver = event_bus.subscribe();
        let publisher_bus = event_bus.clone();

        let publisher_handle = tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            publisher_bus
                .publish(Event::BrightnessReported {
                    instance_name: "D1_0".into(),
                    brightness: 40,
                })
                .unwrap();
        });

        let receiver_handle = tokio::spawn(async move { receiver.recv().await.unwrap() });

        publisher_handle.await.unwrap();
        let received_event = receiver_handle.await.unwrap();

        assert_eq!(
            received_event,
            Event::BrightnessReported {
                instance_name: "D1_0".into(),
                brightness: 40,
            }
        );
    }

    #[tokio::test]
    async fn lagging_receiver_reports_skipped_events() {
        let event_bus = EventBus::with_capacity(4);
        let mut receiver = event_bus.subscribe();

        for _ in 0..10 {
            event_bus.publish(Event::RefreshRequested).unwrap();
        }

        match receiver.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert_eq!(skipped, 6),
            other => panic!("expected lag, got {other:?}"),
        }
    }
}
