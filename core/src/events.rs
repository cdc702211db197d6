//! Engine notifications.
//!
//! A broadcast channel the GUI/CLI layers subscribe to instead of
//! polling. Emitting with no subscribers is a no-op, not an error.

use tokio::sync::broadcast;

use sever_common::network::device::DeviceKey;

use crate::disrupt::methods::DisruptMethod;
use crate::health::HealthStatus;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum Event {
    DeviceAppeared { key: DeviceKey },
    DeviceDisappeared { key: DeviceKey },
    HealthChanged { key: DeviceKey, status: HealthStatus },
    SessionStarted { key: DeviceKey, methods: Vec<DisruptMethod> },
    SessionStopped { key: DeviceKey },
    SessionAutoStopped { key: DeviceKey, reason: String },
    ScanCompleted { found: usize, partial: bool },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let key = DeviceKey::from_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));

        bus.emit(Event::DeviceAppeared { key });
        bus.emit(Event::SessionStopped { key });

        assert!(matches!(rx.recv().await.unwrap(), Event::DeviceAppeared { .. }));
        assert!(matches!(rx.recv().await.unwrap(), Event::SessionStopped { .. }));
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(Event::ScanCompleted { found: 0, partial: false });
    }
}
