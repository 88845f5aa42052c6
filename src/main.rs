use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use printlink::upload::{upload, SETTLE_DELAY};
use printlink::{init_logging, CommConfig, PrinterComm, BUILD_DATE, VERSION};

/// Upload a G-code file to a 3D printer's SD card over a serial line
#[derive(Parser, Debug)]
#[command(name = "printlink", version, about)]
struct Cli {
    /// Serial port the printer is attached to
    port: String,

    /// Baud rate of the serial port
    baudrate: u32,

    /// Host file to upload
    local: PathBuf,

    /// File name on the SD card
    remote: String,

    /// Communication settings file (.toml or .json)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    tracing::info!("printlink {} (built {})", VERSION, BUILD_DATE);

    let mut config = match &cli.config {
        Some(path) => CommConfig::load_from_file(path)
            .with_context(|| format!("Could not load settings from {}", path.display()))?,
        None => CommConfig::default(),
    };
    config.port = Some(cli.port.clone());
    config.baudrate = Some(cli.baudrate);
    config.validate()?;

    let comm = PrinterComm::builder(config).build();
    let result = upload(&comm, &cli.local, &cli.remote, SETTLE_DELAY).await;
    comm.close(true).await;

    let elapsed = result?;
    tracing::info!(
        "Uploaded {} to {} in {:.1}s",
        cli.local.display(),
        cli.remote,
        elapsed
    );
    Ok(())
}
