//! Copy a host file onto the printer's SD card.
//!
//! The upload connects, waits for the printer to become operational, streams
//! the file and reports once the firmware has closed it again.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;

use printlink_communication::PrinterComm;
use printlink_core::{ConnectionState, PrinterEvent, TransferEvent};

/// Pause between reaching `Operational` and starting the transfer, so the
/// connect-time commands are answered first.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Open `comm`, upload `local` as `remote` and return the transfer time in
/// seconds.
///
/// The connection is left open; the caller closes it.
pub async fn upload(
    comm: &PrinterComm,
    local: &Path,
    remote: &str,
    settle: Duration,
) -> anyhow::Result<f64> {
    let mut states = comm.watch_state();
    let mut events = comm.events().receiver();

    comm.open().context("Could not open the printer connection")?;

    let reached = *states
        .wait_for(|state| {
            *state == ConnectionState::Operational || state.is_error() || state.is_closed()
        })
        .await
        .context("Printer connection went away")?;
    if reached != ConnectionState::Operational {
        bail!("Could not connect to the printer: {}", comm.error_text());
    }

    tokio::time::sleep(settle).await;

    tracing::info!("Uploading {} as {}", local.display(), remote);
    comm.start_file_transfer(local, remote, false)
        .with_context(|| format!("Could not start the transfer of {}", local.display()))?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PrinterEvent::Transfer(TransferEvent::Done { elapsed_secs, .. })) => {
                    return Ok(elapsed_secs);
                }
                Ok(PrinterEvent::Transfer(TransferEvent::Failed { .. })) => {
                    bail!("Transfer of {} was aborted", local.display());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Upload monitor skipped {} events", skipped);
                }
                Err(RecvError::Closed) => bail!("Event bus closed during the transfer"),
            },
            changed = states.changed() => {
                changed.context("Printer connection went away")?;
                let state = *states.borrow_and_update();
                if state.is_error() || state.is_closed() {
                    bail!("Connection lost during the transfer: {}", comm.error_text());
                }
            }
        }
    }
}
