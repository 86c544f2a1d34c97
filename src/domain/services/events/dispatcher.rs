//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Key Methods       |
// |-------------------------|---------------------------------------------------|-------------------|
// | EventDispatcher         | Routes events to registered handlers             | register, start   |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::event_bus::EventBus;
use super::handlers::EventHandler;

/// Dispatches events from the bus to the handlers registered for their type.
pub struct EventDispatcher {
    /// Event bus for receiving events
    event_bus: EventBus,
    /// Map of event types to handlers
    handlers: Arc<RwLock<HashMap<&'static str, Vec<Arc<dyn EventHandler>>>>>,
    /// Buffer size for event processing
    buffer_size: usize,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("buffer_size", &self.buffer_size)
            .field("event_bus", &self.event_bus)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Creates a new event dispatcher with default buffer size.
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            buffer_size: 100,
        }
    }

    /// Registers a handler for the event types it declares in `event_types()`.
    pub async fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;

        for event_type in handler.event_types() {
            handlers.entry(event_type).or_insert_with(Vec::new).push(Arc::clone(&handler));
        }

        debug!("Registered handler for event types: {:?}", handler.event_types());
    }

    /// Starts the dispatcher to process events in the background.
    ///
    /// The subscription is taken before this returns, so events published after `start`
    /// completes are never missed.
    ///
    /// # Returns
    /// A JoinHandle that completes once the bus is dropped
    pub async fn start(self) -> tokio::task::JoinHandle<()> {
        let handlers = Arc::clone(&self.handlers);
        let mut receiver = self.event_bus.subscribe();
        let buffer_size = self.buffer_size;

        tokio::spawn(async move {
            info!("Event dispatcher started");

            let (tx, mut rx) = mpsc::channel(buffer_size);

            let receiver_task = tokio::spawn(async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if let Err(e) = tx.send(event).await {
                                error!("Failed to send event to processing buffer: {}", e);
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Event dispatcher lagged, skipped {} events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            while let Some(event) = rx.recv().await {
                let event_type = event.event_type();

                let handlers_lock = handlers.read().await;
                if let Some(event_handlers) = handlers_lock.get(event_type) {
                    for handler in event_handlers {
                        if let Err(e) = handler.handle_event(event.clone()).await {
                            error!("Handler failed to process {} event: {}", event_type, e);
                        }
                    }
                } else {
                    debug!("No handlers registered for event type: {}", event_type);
                }
            }

            if let Err(e) = receiver_task.await {
                error!("Receiver task failed: {}", e);
            }

            info!("Event dispatcher stopped");
        })
    }

    /// Sets the buffer size for event processing.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }
}
