//! Event Bus implementation.
//!
//! One bus is owned per engine and shared with its consumers through an `Arc`.

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::events::{EventCategory, PrinterEvent};

/// Capacity of the broadcast channel behind [`EventBus::receiver`].
const CHANNEL_CAPACITY: usize = 1024;

/// Which events a synchronous handler is called for
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Receive all events.
    #[default]
    All,
    /// Receive events matching any of these categories.
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Check if an event matches this filter
    pub fn matches(&self, event: &PrinterEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

type EventHandler = Box<dyn Fn(PrinterEvent) + Send + Sync>;

/// Event bus carrying engine notifications to any number of consumers
///
/// Synchronous handlers run on the publishing task and must return quickly.
/// Async consumers use [`EventBus::receiver`]. Handlers live as long as the
/// bus does.
pub struct EventBus {
    sender: broadcast::Sender<PrinterEvent>,
    handlers: RwLock<Vec<(EventFilter, EventHandler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Deliver `event` to every matching handler, then to the async receivers
    ///
    /// Returns the number of async receivers that will see the event.
    pub fn publish(&self, event: PrinterEvent) -> usize {
        for (filter, handler) in self.handlers.read().iter() {
            if filter.matches(&event) {
                handler(event.clone());
            }
        }
        // No receivers is not an error; the event is simply dropped.
        self.sender.send(event).unwrap_or(0)
    }

    /// Register a synchronous handler for the events `filter` lets through
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F)
    where
        F: Fn(PrinterEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write();
        handlers.push((filter, Box::new(handler)));
        tracing::debug!("Event handler {} registered", handlers.len());
    }

    /// Get a receiver for consuming events in a tokio task
    pub fn receiver(&self) -> broadcast::Receiver<PrinterEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.read().len())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::events::{CommunicationEvent, ConnectionEvent, SdEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn log_event(line: &str) -> PrinterEvent {
        PrinterEvent::Communication(CommunicationEvent::Log {
            line: line.to_string(),
        })
    }

    #[test]
    fn test_publish_without_listeners() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(log_event("Send: M105")), 0);
    }

    #[test]
    fn test_event_filtering() {
        let bus = EventBus::new();
        let sd_count = Arc::new(AtomicUsize::new(0));
        let log_count = Arc::new(AtomicUsize::new(0));

        let sc = sd_count.clone();
        bus.subscribe(EventFilter::Categories(vec![EventCategory::Sd]), move |_| {
            sc.fetch_add(1, Ordering::SeqCst);
        });
        let lc = log_count.clone();
        bus.subscribe(
            EventFilter::Categories(vec![EventCategory::Communication]),
            move |_| {
                lc.fetch_add(1, Ordering::SeqCst);
            },
        );

        bus.publish(PrinterEvent::Sd(SdEvent::StateChanged { available: true }));
        bus.publish(log_event("Recv: ok"));
        bus.publish(log_event("Send: M105"));

        assert_eq!(sd_count.load(Ordering::SeqCst), 1);
        assert_eq!(log_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_receiver() {
        let bus = EventBus::new();
        let mut receiver = bus.receiver();

        let delivered = bus.publish(PrinterEvent::Connection(ConnectionEvent::PrinterReset {
            idle: true,
        }));
        assert_eq!(delivered, 1);

        match receiver.recv().await {
            Ok(PrinterEvent::Connection(ConnectionEvent::PrinterReset { idle })) => assert!(idle),
            other => panic!("Wrong event received: {:?}", other),
        }
    }
}
