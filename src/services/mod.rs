//! Supporting services shared by the application layer.

pub mod backoff;
pub mod event_bus;

pub use self::backoff::BackoffPolicy;
pub use event_bus::{EventBus, EventBusConfig};
