//! Payment events.
//!
//! The engine publishes an event whenever it applies a status transition to a payment: completion, failure (the
//! customer notification trigger point) and cancellation. Idempotent no-ops never publish anything.
mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
