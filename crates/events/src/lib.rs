//! Domain events and their distribution mechanics.
//!
//! Ledger rows are the durable record; the events here are the notifications
//! derived from them after commit, carried over an [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
