//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Event-driven fan-out of committed engine state changes.
//
// | Component                | Description                                                |
// |--------------------------|------------------------------------------------------------|
// | EngineEvent              | Enum representing all events the engine emits              |
// | EventBus                 | Central hub for publishing and subscribing to events       |
// | EventHandler             | Trait for components that can handle events                |
// | EventDispatcher          | Component that routes events to registered handlers        |
//--------------------------------------------------------------------------------------------------

mod dispatcher;
mod event_bus;
mod event_types;
mod handlers;


pub use dispatcher::EventDispatcher;
pub use event_bus::EventBus;
pub use event_types::{ALL_EVENT_TYPES, EngineEvent, EventError, EventResult};
pub use handlers::{EventHandler, EventLogger, PersistenceEventHandler, SettlementForwarder};
