//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Central event bus for the engine using tokio's broadcast channel. Services publish after a
// unit of work commits; handlers subscribe through the dispatcher.
//
// | Component     | Description                                                 |
// |---------------|-------------------------------------------------------------|
// | EventBus      | Central event bus for publishing and subscribing to events  |
//
//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                   | Key Methods                   |
// |---------------|-----------------------------------------------|-------------------------------|
// | EventBus      | Central event publishing component           | publish, subscribe            |
//
//--------------------------------------------------------------------------------------------------

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::event_types::{EngineEvent, EventError, EventResult};

/// Central event bus for publishing and subscribing to events throughout the system.
///
/// Events are distributed to all active subscribers when published. A slow subscriber
/// that falls more than `capacity` events behind loses the oldest ones.
#[derive(Debug, Clone)]
pub struct EventBus {
    /// Channel for broadcasting events to all subscribers
    sender: broadcast::Sender<EngineEvent>,
    /// Capacity of the event channel
    capacity: usize,
}

impl EventBus {
    /// Creates a new event bus with the specified capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The maximum number of events that can be queued before
    ///   older events are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        info!("Created new EventBus with capacity: {}", capacity);
        Self { sender, capacity }
    }

    /// Publishes an event to all subscribers.
    ///
    /// If there are no subscribers, the event is simply dropped and
    /// the method returns successfully.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the event was published or there were no subscribers.
    /// * `Err(EventError)` - If the channel rejected the event.
    pub fn publish(&self, event: EngineEvent) -> EventResult<()> {
        debug!("Publishing event: {}", event.event_type());

        if self.sender.receiver_count() == 0 {
            debug!("No subscribers for event: {}", event.event_type());
            return Ok(());
        }

        match self.sender.send(event) {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Failed to publish event: {}", e);
                Err(EventError::PublishError(e.to_string()))
            }
        }
    }

    /// Publishes a batch in order, logging failures instead of returning them. Committed state
    /// is never rolled back because of a publication failure.
    pub fn publish_all(&self, events: Vec<EngineEvent>) {
        for event in events {
            let event_type = event.event_type();
            if let Err(e) = self.publish(event) {
                error!("Dropping {} event after commit: {}", event_type, e);
            }
        }
    }

    /// Creates a new subscription to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        debug!("New subscriber added to EventBus (total: {})", self.sender.receiver_count() + 1);
        self.sender.subscribe()
    }

    /// Returns the current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Returns the capacity of the event channel.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
