//! Process-wide status event bus.
//!
//! A single broadcast channel carrying the events the embedding layer
//! needs for its status indicator: Tor transitions, circuit renewals,
//! and panic lifecycle. Lossy by design; a slow subscriber misses old
//! events rather than backpressuring the supervisor.

use std::net::SocketAddr;

use tokio::sync::broadcast;

use crate::tor::TorStatus;

const CHANNEL_CAPACITY: usize = 64;

/// Events observable by the embedding layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Tor circuit state changed; mirrors the watch channel for
    /// subscribers that want edges rather than levels.
    TorStatusChanged {
        status: TorStatus,
        endpoint: Option<SocketAddr>,
    },
    /// A NEWNYM succeeded and fresh circuits are in use.
    CircuitRenewed { endpoint: SocketAddr },
    /// Panic teardown began.
    PanicStarted,
    /// Panic teardown finished; `clean` is false when any collaborator
    /// failed or timed out and was abandoned.
    PanicFinished { clean: bool },
    /// Terminal state reached; the process should exit.
    ExitRequested,
}

/// Broadcast fan-out for [`StatusEvent`].
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns the number of subscribers that will
    /// see it; zero subscribers is not an error.
    pub fn publish(&self, event: StatusEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
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

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let delivered = bus.publish(StatusEvent::PanicStarted);
        assert_eq!(delivered, 2);
        assert_eq!(first.recv().await.unwrap(), StatusEvent::PanicStarted);
        assert_eq!(second.recv().await.unwrap(), StatusEvent::PanicStarted);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(StatusEvent::ExitRequested), 0);
    }

    #[tokio::test]
    async fn test_subscriber_sees_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(StatusEvent::TorStatusChanged {
            status: TorStatus::Starting,
            endpoint: None,
        });
        let endpoint = "127.0.0.1:9050".parse().unwrap();
        bus.publish(StatusEvent::TorStatusChanged {
            status: TorStatus::Connected,
            endpoint: Some(endpoint),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            StatusEvent::TorStatusChanged {
                status: TorStatus::Starting,
                endpoint: None,
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            StatusEvent::TorStatusChanged {
                status: TorStatus::Connected,
                endpoint: Some(endpoint),
            }
        );
    }
}
