//! Printer communication engine
//!
//! [`PrinterComm`] drives a single printer connection from opening the
//! transport to closing it. Two tasks share the engine state:
//! - the monitor reads firmware lines, parses them and advances the state
//!   machine
//! - the sender waits for flow-control credit and writes queued commands
//!
//! The public API never blocks: it only enqueues work. Writes that jump the
//! queues (emergency commands) and teardown run on spawned tasks.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let comm = PrinterComm::builder(CommConfig::for_port("/dev/ttyUSB0", 115200)).build();
//! comm.open()?;
//! comm.send_command("M105");
//! comm.close(true).await;
//! ```

mod connection;
mod handlers;
mod jobs;
mod monitor;
mod sender;
mod state;
mod telemetry;
mod timers;

pub use jobs::JobHold;

use self::state::Runtime;
use self::timers::ResettableTimer;
use crate::hooks::Hooks;
use crate::job::Job;
use crate::pipeline::{
    ClearToSend, HistoryEntry, JobQueue, LineTracker, OutgoingCommand, SendQueue, TypedQueue,
};
use crate::protocol::TemperatureOffsets;
use crate::scripts::{NoScripts, ScriptContext, ScriptProvider};
use crate::transport::{
    CandidateSource, SerialCandidates, SerialTransportFactory, Transport, TransportFactory,
};
use parking_lot::{Mutex, RwLock};
use printlink_core::{
    ConnectionState, EventBus, FirmwareCapabilities, JobOrigin, PositionRecord, ProtocolError,
    Result, SdFileEntry, TemperatureRecord,
};
use printlink_settings::CommConfig;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Background tasks owned by a connection.
#[derive(Default)]
struct Timers {
    temperature_poller: Option<JoinHandle<()>>,
    sd_status_poller: Option<JoinHandle<()>>,
    resend_ok: Option<JoinHandle<()>>,
    pause_position: Option<ResettableTimer>,
    cancel_position: Option<ResettableTimer>,
}

/// Shared engine state.
///
/// Lock order is job, runtime, then everything else. No guard is held
/// across an `.await` and events are published after guards are released.
struct Inner {
    config: CommConfig,
    events: Arc<EventBus>,
    hooks: Arc<Hooks>,
    scripts: Arc<dyn ScriptProvider>,
    factory: Arc<dyn TransportFactory>,
    candidates: Arc<dyn CandidateSource>,

    state: watch::Sender<ConnectionState>,
    error_text: Mutex<String>,
    runtime: Mutex<Runtime>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    shutdown: watch::Sender<bool>,

    clear_to_send: ClearToSend,
    command_queue: TypedQueue,
    job_queue: JobQueue,
    send_queue: SendQueue,
    lines: Mutex<LineTracker>,
    /// Serializes writes so framed lines hit the wire in line number order.
    write_lock: tokio::sync::Mutex<()>,

    job: Mutex<Option<Job>>,
    job_hold: Mutex<usize>,

    temperatures: RwLock<TemperatureRecord>,
    position: RwLock<PositionRecord>,
    pause_position: RwLock<PositionRecord>,
    pause_temperatures: RwLock<TemperatureRecord>,
    cancel_position: RwLock<PositionRecord>,
    cancel_temperatures: RwLock<TemperatureRecord>,
    capabilities: RwLock<FirmwareCapabilities>,
    offsets: RwLock<TemperatureOffsets>,

    timers: Mutex<Timers>,
}

impl Inner {
    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    fn current_tool(&self) -> u32 {
        self.runtime.lock().current_tool
    }

    /// Enabled in the configuration and reported by the firmware.
    fn capability_supported(&self, name: &str) -> bool {
        self.config.capabilities.supports(name) && self.capabilities.read().is_enabled(name)
    }

    fn job_on_hold(&self) -> bool {
        *self.job_hold.lock() > 0
    }
}

/// Snapshot of the active job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    /// File name.
    pub name: String,
    /// Where the file lives.
    pub origin: JobOrigin,
    /// Size in bytes, if known.
    pub size: Option<u64>,
    /// Current byte position.
    pub position: u64,
    /// Fraction completed, if the size is known.
    pub progress: Option<f64>,
    /// True once the job ran to its end or was aborted.
    pub done: bool,
}

/// Builder for [`PrinterComm`].
///
/// Everything but the configuration has a default: serial ports, no scripts,
/// no hooks and a private event bus.
pub struct PrinterCommBuilder {
    config: CommConfig,
    events: Option<Arc<EventBus>>,
    hooks: Option<Arc<Hooks>>,
    scripts: Option<Arc<dyn ScriptProvider>>,
    factory: Option<Arc<dyn TransportFactory>>,
    candidates: Option<Arc<dyn CandidateSource>>,
}

impl PrinterCommBuilder {
    /// Start from `config`.
    pub fn new(config: CommConfig) -> Self {
        Self {
            config,
            events: None,
            hooks: None,
            scripts: None,
            factory: None,
            candidates: None,
        }
    }

    /// Publish on a shared event bus.
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Use a shared hook registry.
    pub fn hooks(mut self, hooks: Arc<Hooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Render scripts with `scripts`.
    pub fn scripts(mut self, scripts: impl ScriptProvider + 'static) -> Self {
        self.scripts = Some(Arc::new(scripts));
        self
    }

    /// Open transports with `factory`.
    pub fn transport_factory(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Take autodetection candidates from `candidates`.
    pub fn candidates(mut self, candidates: impl CandidateSource + 'static) -> Self {
        self.candidates = Some(Arc::new(candidates));
        self
    }

    /// Create the engine in state `None`.
    pub fn build(self) -> PrinterComm {
        let config = self.config;
        let candidates = self.candidates.unwrap_or_else(|| {
            Arc::new(SerialCandidates::new(config.baudrate_candidates.clone()))
        });
        let (state, _) = watch::channel(ConnectionState::None);
        let (shutdown, _) = watch::channel(false);

        let inner = Inner {
            events: self.events.unwrap_or_else(|| Arc::new(EventBus::new())),
            hooks: self.hooks.unwrap_or_default(),
            scripts: self.scripts.unwrap_or_else(|| Arc::new(NoScripts)),
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(SerialTransportFactory)),
            candidates,
            state,
            error_text: Mutex::new(String::new()),
            runtime: Mutex::new(Runtime::new(&config)),
            transport: RwLock::new(None),
            shutdown,
            clear_to_send: ClearToSend::new(config.ack_max),
            command_queue: TypedQueue::new(),
            job_queue: JobQueue::new(),
            send_queue: SendQueue::new(),
            lines: Mutex::new(LineTracker::new(config.line_history_size)),
            write_lock: tokio::sync::Mutex::new(()),
            job: Mutex::new(None),
            job_hold: Mutex::new(0),
            temperatures: RwLock::new(TemperatureRecord::new()),
            position: RwLock::new(PositionRecord::new()),
            pause_position: RwLock::new(PositionRecord::new()),
            pause_temperatures: RwLock::new(TemperatureRecord::new()),
            cancel_position: RwLock::new(PositionRecord::new()),
            cancel_temperatures: RwLock::new(TemperatureRecord::new()),
            capabilities: RwLock::new(FirmwareCapabilities::new()),
            offsets: RwLock::new(TemperatureOffsets::new()),
            timers: Mutex::new(Timers::default()),
            config,
        };

        PrinterComm {
            inner: Arc::new(inner),
        }
    }
}

/// A connection to one 3D printer.
///
/// Cloning yields another handle to the same connection. A connection is
/// single use: once closed, build a new one to reconnect.
#[derive(Clone)]
pub struct PrinterComm {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PrinterComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrinterComm")
            .field("state", &self.inner.state())
            .field("port", &self.port())
            .finish()
    }
}

impl PrinterComm {
    /// Start building an engine for `config`.
    pub fn builder(config: CommConfig) -> PrinterCommBuilder {
        PrinterCommBuilder::new(config)
    }

    /// Open the transport (or start autodetection) and spawn the monitor
    /// and sender tasks. Must be called from within a tokio runtime.
    pub fn open(&self) -> Result<()> {
        let state = self.inner.state();
        if state != ConnectionState::None {
            return Err(invalid_state("open", state));
        }
        self.inner.runtime.lock().active = true;
        connection::spawn_tasks(&self.inner);
        Ok(())
    }

    /// Close the connection.
    ///
    /// With `wait`, an operational connection first sends the
    /// `beforePrinterDisconnected` script and waits a bounded time for the
    /// queues to drain.
    pub async fn close(&self, wait: bool) {
        self.inner.close(false, wait).await;
    }

    /// Send a command.
    ///
    /// While a host file prints, interactive commands wait in the command
    /// queue; a command whose type is already queued there is rejected.
    /// Returns false if the command was dropped or rejected.
    pub fn send_command(&self, command: impl Into<OutgoingCommand>) -> bool {
        self.inner.send_command(command.into())
    }

    /// Render and send the script `name`. Returns false if it rendered to
    /// nothing.
    pub fn send_script(&self, name: &str, context: ScriptContext, part_of_job: bool) -> bool {
        self.inner.send_script(name, context, part_of_job)
    }

    /// Restart line numbering at `line_number` with `M110`.
    pub fn reset_line_numbers(&self, line_number: u64) {
        self.inner.reset_line_numbers(line_number, false);
    }

    /// Force-send `M112` and switch off all heaters, then close.
    pub fn emergency_stop(&self) {
        self.inner.spawn_emergency_stop(true);
    }

    /// Start printing the selected file, optionally from byte `position`.
    pub fn start_print(&self, position: Option<u64>) -> Result<()> {
        self.inner.start_print(position)
    }

    /// Pause (`true`) or resume (`false`) the active print.
    pub fn set_pause(&self, pause: bool) {
        self.inner.set_pause(pause, true, None);
    }

    /// Cancel the active print or file transfer.
    pub fn cancel_print(&self) {
        self.inner.cancel_print(None, false, false);
    }

    /// Select a host file, or a file on the SD card if `sd` is set.
    pub fn select_file(&self, name: &str, sd: bool) -> Result<()> {
        self.inner.select_file(name, sd)
    }

    /// Clear the selected file.
    pub fn unselect_file(&self) {
        self.inner.unselect_file();
    }

    /// Copy the host file `local` onto the SD card as `remote`.
    ///
    /// A `special` transfer sends lines unchanged apart from trailing
    /// whitespace and without checksums.
    pub fn start_file_transfer(
        &self,
        local: impl Into<PathBuf>,
        remote: &str,
        special: bool,
    ) -> Result<()> {
        self.inner.start_file_transfer(local.into(), remote, special)
    }

    /// Abort the running file transfer.
    pub fn cancel_file_transfer(&self) {
        self.inner.cancel_file_transfer();
    }

    /// Initialize the SD card (`M21`).
    pub fn init_sd_card(&self) {
        self.inner.init_sd_card();
    }

    /// Release the SD card (`M22`).
    pub fn release_sd_card(&self) {
        self.inner.release_sd_card();
    }

    /// Ask for the SD card's file list (`M20`).
    pub fn refresh_sd_files(&self) {
        self.inner.refresh_sd_files();
    }

    /// Delete `name` from the SD card (`M30`).
    pub fn delete_sd_file(&self, name: &str) {
        self.inner.delete_sd_file(name);
    }

    /// Hold job lines back until the returned guard is dropped.
    ///
    /// Interactive commands keep flowing. Holds nest.
    pub fn job_put_on_hold(&self) -> JobHold {
        JobHold::new(&self.inner)
    }

    /// Hold or release job lines without a guard.
    pub fn set_job_on_hold(&self, hold: bool) {
        self.inner.set_job_on_hold(hold);
    }

    /// True while job lines are held back.
    pub fn is_job_on_hold(&self) -> bool {
        self.inner.job_on_hold()
    }

    /// Offsets added to temperatures of job lines, keyed `tool<n>` or `bed`.
    pub fn set_temperature_offsets(&self, offsets: TemperatureOffsets) {
        *self.inner.offsets.write() = offsets;
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Human-readable label of the current state.
    pub fn state_label(&self) -> String {
        self.inner.label()
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Text of the last fatal error.
    pub fn error_text(&self) -> String {
        self.inner.error_text()
    }

    /// Event bus the engine publishes on.
    pub fn events(&self) -> Arc<EventBus> {
        self.inner.events.clone()
    }

    /// Hook registry.
    pub fn hooks(&self) -> Arc<Hooks> {
        self.inner.hooks.clone()
    }

    /// Configuration in use.
    pub fn config(&self) -> &CommConfig {
        &self.inner.config
    }

    /// Port in use, once known.
    pub fn port(&self) -> Option<String> {
        self.inner.runtime.lock().port.clone()
    }

    /// Baud rate in use, once known.
    pub fn baudrate(&self) -> Option<u32> {
        self.inner.runtime.lock().baudrate
    }

    /// Last reported temperatures.
    pub fn temperatures(&self) -> TemperatureRecord {
        self.inner.temperatures.read().clone()
    }

    /// Last reported position.
    pub fn position(&self) -> PositionRecord {
        self.inner.position.read().clone()
    }

    /// Position recorded by the last pause.
    pub fn pause_position(&self) -> PositionRecord {
        self.inner.pause_position.read().clone()
    }

    /// Temperatures recorded by the last pause.
    pub fn pause_temperatures(&self) -> TemperatureRecord {
        self.inner.pause_temperatures.read().clone()
    }

    /// Position recorded by the last cancel.
    pub fn cancel_position(&self) -> PositionRecord {
        self.inner.cancel_position.read().clone()
    }

    /// Temperatures recorded by the last cancel.
    pub fn cancel_temperatures(&self) -> TemperatureRecord {
        self.inner.cancel_temperatures.read().clone()
    }

    /// Capabilities reported by the firmware.
    pub fn capabilities(&self) -> FirmwareCapabilities {
        self.inner.capabilities.read().clone()
    }

    /// Firmware name, once reported.
    pub fn firmware_name(&self) -> Option<String> {
        self.inner.runtime.lock().firmware_name.clone()
    }

    /// Full firmware info report.
    pub fn firmware_info(&self) -> BTreeMap<String, String> {
        self.inner.runtime.lock().firmware_info.clone()
    }

    /// Active tool.
    pub fn current_tool(&self) -> u32 {
        self.inner.current_tool()
    }

    /// True if the SD card is ready.
    pub fn is_sd_ready(&self) -> bool {
        self.inner.runtime.lock().sd.available
    }

    /// Files of the last SD card listing.
    pub fn sd_files(&self) -> Vec<SdFileEntry> {
        self.inner.runtime.lock().sd.files.clone()
    }

    /// True while an SD card print runs.
    pub fn is_sd_printing(&self) -> bool {
        self.inner.is_sd_printing()
    }

    /// True while a file is copied to the SD card.
    pub fn is_streaming(&self) -> bool {
        self.inner.is_streaming()
    }

    /// The active job, if any.
    pub fn job(&self) -> Option<JobStatus> {
        self.inner.job.lock().as_ref().map(|job| {
            let source = job.source();
            JobStatus {
                name: source.filename().to_string(),
                origin: source.origin(),
                size: source.size(),
                position: source.pos(),
                progress: source.progress(),
                done: source.is_done(),
            }
        })
    }

    /// Next line number to be assigned.
    pub fn current_line(&self) -> u64 {
        self.inner.lines.lock().current_line()
    }

    /// Recently sent checksummed lines, oldest first.
    pub fn sent_history(&self) -> Vec<HistoryEntry> {
        self.inner.lines.lock().history().iter().cloned().collect()
    }

    /// Unused flow-control credit.
    pub fn clear_to_send(&self) -> usize {
        self.inner.clear_to_send.available()
    }

    /// Time spent in blocking heatups during the current job.
    pub fn heatup_time_lost(&self) -> Duration {
        self.inner.runtime.lock().heatup_time_lost
    }
}

fn invalid_state(operation: &str, state: ConnectionState) -> printlink_core::Error {
    ProtocolError::InvalidState {
        operation: operation.to_string(),
        state: state.label(None, None),
    }
    .into()
}
