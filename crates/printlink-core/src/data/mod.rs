//! Data model shared between the engine and its consumers
//!
//! - [`ConnectionState`]: connection and print lifecycle
//! - [`PositionRecord`]: last reported position
//! - [`TemperatureRecord`]: last reported heater temperatures
//! - [`FirmwareCapabilities`] and [`SdFileEntry`]: what the firmware told us about itself

mod firmware;
mod position;
mod state;
mod temperature;

pub use firmware::{
    FirmwareCapabilities, SdFileEntry, CAPABILITY_AUTOREPORT_SD_STATUS,
    CAPABILITY_AUTOREPORT_TEMP, CAPABILITY_BUSY_PROTOCOL, CAPABILITY_CHAMBER_TEMP,
    CAPABILITY_EMERGENCY_PARSER,
};
pub use position::PositionRecord;
pub use state::{ConnectionState, JobOrigin};
pub use temperature::{TemperatureReading, TemperatureRecord};
