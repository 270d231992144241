//! Event distribution inside the service

pub mod bus;

pub use bus::{EventBus, DEFAULT_EVENT_CAPACITY};
