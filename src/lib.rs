//! # printlink
//!
//! Host-side communication with RepRap style 3D printer firmware over a
//! serial line, in the manner of a print server's printer connection.
//!
//! ## Architecture
//!
//! printlink is organized as a workspace with multiple crates:
//!
//! 1. **printlink-core** - Connection states, records, errors, event bus
//! 2. **printlink-settings** - Communication settings loaded from TOML or JSON
//! 3. **printlink-communication** - Transports, line protocol, send pipeline, jobs and the engine
//! 4. **printlink** - Upload command line tool built on the crates above
//!
//! ## Features
//!
//! - **Handshake**: fixed port or port/baud rate autodetection
//! - **Line Protocol**: line numbers, checksums, resend recovery, flow control
//! - **Monitoring**: temperatures, positions, firmware info and capabilities
//! - **Jobs**: host file prints, SD card prints and host to SD transfers
//! - **Extensibility**: command phase hooks and lifecycle scripts

pub mod upload;

pub use printlink_communication::{
    PrinterComm, PrinterCommBuilder, StaticCandidates, VirtualPrinter, VirtualTransportFactory,
};
pub use printlink_core::{ConnectionState, EventBus, PrinterEvent};
pub use printlink_settings::CommConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
