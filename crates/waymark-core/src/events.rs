//! Observer event system for location and viewing-state notifications.

use tokio::sync::broadcast;

use waymark_types::wire::ViewingState;
use waymark_types::TrackedLocation;

/// Events surfaced to SDK observers.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event
/// types in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SdkEvent {
    /// This device captured a new location.
    LocationUpdated { location: TrackedLocation },
    /// Another tracked user's location was resolved (subscribe seeding
    /// or a server-pushed update).
    UserLocationUpdated { location: TrackedLocation },
    /// A subscriber started or stopped viewing this device.
    ViewingStateChanged { state: ViewingState },
}

/// Sender for SDK events.
pub type EventSender = broadcast::Sender<SdkEvent>;

/// Receiver for SDK events.
pub type EventReceiver = broadcast::Receiver<SdkEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SdkEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
