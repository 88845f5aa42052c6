//! # Event Bus Module
//!
//! Publish/subscribe delivery of engine notifications:
//! - The engine publishes typed [`PrinterEvent`]s without knowing who listens
//! - Subscribers filter by [`EventCategory`]
//! - Synchronous handlers and async broadcast receivers are both supported
//!
//! ## Usage
//!
//! ```rust,ignore
//! use printlink_core::event_bus::{EventBus, EventCategory, EventFilter, PrinterEvent};
//!
//! let bus = EventBus::new();
//! bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Connection]),
//!     |event| println!("{}", event.description()),
//! );
//! let mut receiver = bus.receiver();
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
