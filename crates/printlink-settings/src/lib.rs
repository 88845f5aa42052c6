//! printlink Settings Crate
//!
//! The immutable configuration handed to a printer connection: port and baud
//! rate, timeouts, checksum policy, command lists, capability support and
//! firmware workarounds.

pub mod config;
pub mod error;

pub use config::{
    CapabilitySupport, CommConfig, ConsecutiveTimeouts, ResendOkPolicy, Timeouts,
};
pub use error::{SettingsError, SettingsResult};
