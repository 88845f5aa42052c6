//! Connection lifecycle: opening or autodetecting the transport, the
//! connected handshake, the pollers, fatal errors and teardown.

use super::{monitor, sender, Inner};
use crate::pipeline::OutgoingCommand;
use crate::scripts::{ScriptContext, AFTER_PRINTER_CONNECTED, BEFORE_PRINTER_DISCONNECTED};
use printlink_core::{ConnectionEvent, ConnectionState, ErrorEvent, ErrorReason, PrinterEvent};
use printlink_settings::Timeouts;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Handshake attempts per port/baud candidate.
const DETECTION_RETRIES: u32 = 3;

/// Baud rates tried on every port when several ports are candidates.
const LIKELY_BAUDRATES: [u32; 2] = [115200, 250000];

const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Spawn the monitor and the sender. A panic in either one is a fatal
/// `crash` error.
pub(super) fn spawn_tasks(inner: &Arc<Inner>) {
    supervise(inner, "monitor", monitor::run(Arc::clone(inner)));
    supervise(inner, "sender", sender::send_loop(Arc::clone(inner)));
}

fn supervise<F>(inner: &Arc<Inner>, name: &'static str, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(task);
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        if let Err(err) = handle.await {
            if err.is_panic() {
                tracing::error!("The {} task panicked: {}", name, err);
                inner.on_crash().await;
            }
        }
    });
}

fn spawn_poller(
    inner: &Arc<Inner>,
    interval: fn(&Inner) -> Duration,
    poll: fn(&Arc<Inner>),
) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        loop {
            poll(&inner);
            let delay = interval(&inner);
            tokio::time::sleep(delay).await;
        }
    })
}

impl Inner {
    /// Open the configured port, or autodetect when port or baud rate is
    /// missing. Returns false if the connection attempt already failed.
    pub(super) async fn establish(self: &Arc<Self>) -> bool {
        let (port, baudrate) = {
            let rt = self.runtime.lock();
            (
                rt.port.clone().filter(|port| port != "AUTO"),
                rt.baudrate.filter(|&baudrate| baudrate != 0),
            )
        };
        match (port, baudrate) {
            (Some(port), Some(baudrate)) => self.open_fixed(&port, baudrate).await,
            (port, baudrate) => {
                self.change_state(ConnectionState::DetectingTransport);
                self.init_detection(port, baudrate);
                self.perform_detection_step().await;
            }
        }
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::DetectingTransport
        )
    }

    async fn open_fixed(self: &Arc<Self>, port: &str, baudrate: u32) {
        self.change_state(ConnectionState::OpeningTransport);
        tracing::info!("Connecting to port {}, baudrate {}", port, baudrate);

        let timeout = Timeouts::duration(self.config.timeouts.connection);
        match self.factory.open(port, baudrate, timeout).await {
            Ok(transport) => {
                *self.transport.write() = Some(transport);
                self.clear_to_send.reset();
                self.change_state(ConnectionState::Connecting);
                let deadline = self.new_communication_deadline();
                let mut rt = self.runtime.lock();
                rt.timeout = deadline;
                rt.ok_timeout = deadline;
            }
            Err(err) => {
                let message = format!(
                    "Unexpected error while connecting to serial port {}, baudrate {}: {}",
                    port, baudrate, err
                );
                tracing::error!("{}", message);
                self.log_comm(message);
                self.trigger_error("Connection error, see the communication log", ErrorReason::Connection);
            }
        }
    }

    fn detection_log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("Serial detection: {}", message);
        self.log_comm(message);
    }

    fn init_detection(&self, port: Option<String>, baudrate: Option<u32>) {
        let ports = match port {
            Some(port) => vec![port],
            None => self.candidates.candidate_ports().unwrap_or_else(|err| {
                tracing::error!("Could not list candidate ports: {}", err);
                Vec::new()
            }),
        };
        let baudrates = match baudrate {
            Some(baudrate) => vec![baudrate],
            None if ports.len() == 1 => self.candidates.candidate_baudrates(),
            None => {
                let mut likely = LIKELY_BAUDRATES.to_vec();
                for baudrate in &self.config.baudrate_candidates {
                    if !likely.contains(baudrate) {
                        likely.push(*baudrate);
                    }
                }
                likely
            }
        };

        let candidates: Vec<(String, u32)> = ports
            .iter()
            .flat_map(|port| baudrates.iter().map(move |&baudrate| (port.clone(), baudrate)))
            .collect();
        let listed = candidates
            .iter()
            .map(|(port, baudrate)| format!("{}@{}", port, baudrate))
            .collect::<Vec<_>>()
            .join(", ");
        self.detection_log(format!(
            "Performing autodetection with {} port/baudrate candidates: {}",
            candidates.len(),
            listed
        ));

        let mut rt = self.runtime.lock();
        rt.detection.candidates = candidates.into();
        rt.detection.retry = DETECTION_RETRIES;
    }

    /// Retry the handshake on the current candidate, or move on to the next
    /// one. Runs out of candidates with a fatal `autodetect` error.
    pub(super) async fn perform_detection_step(self: &Arc<Self>) {
        loop {
            if self.state() != ConnectionState::DetectingTransport {
                return;
            }

            let retrying = self.runtime.lock().detection.retry < DETECTION_RETRIES;
            if retrying {
                if self.transport().is_none() {
                    self.runtime.lock().detection.retry = DETECTION_RETRIES;
                    continue;
                }
                self.attempt_handshake().await;
                return;
            }

            let next = self.runtime.lock().detection.candidates.pop_front();
            let Some((port, baudrate)) = next else {
                break;
            };

            self.detection_log(format!("Trying port {}, baudrate {}", port, baudrate));
            let previous = self.transport.write().take();
            if let Some(previous) = previous {
                if let Err(err) = previous.close().await {
                    tracing::debug!("Error while closing {}: {}", previous.name(), err);
                }
            }

            let timeout = Timeouts::duration(self.config.timeouts.connection);
            match self.factory.open(&port, baudrate, timeout).await {
                Ok(transport) => *self.transport.write() = Some(transport),
                Err(err) => {
                    tracing::debug!("Opening {} failed: {}", port, err);
                    self.detection_log(format!(
                        "Could not open port {}, baudrate {}, skipping",
                        port, baudrate
                    ));
                    continue;
                }
            }

            {
                let mut rt = self.runtime.lock();
                rt.detection.retry = 0;
                rt.port = Some(port);
                rt.baudrate = Some(baudrate);
            }
            self.attempt_handshake().await;
            return;
        }

        self.trigger_error(
            "No more candidates to test, and no working port/baudrate combination detected.",
            ErrorReason::Autodetect,
        );
    }

    async fn attempt_handshake(self: &Arc<Self>) {
        let timeout = self.communication_interval();
        let attempt = {
            let mut rt = self.runtime.lock();
            rt.detection.retry += 1;
            rt.read_timeout = timeout;
            let deadline = Instant::now() + timeout;
            rt.timeout = deadline;
            rt.ok_timeout = deadline;
            rt.detection.retry
        };
        self.detection_log(format!(
            "Handshake attempt #{} with timeout {}s",
            attempt,
            timeout.as_secs_f64()
        ));

        // A bare newline flushes whatever garbage the firmware buffered.
        if let Some(transport) = self.transport() {
            let _guard = self.write_lock.lock().await;
            if let Err(err) = transport.write(b"\n").await {
                tracing::debug!("Could not write line reset: {}", err);
            }
        }
        self.say_hello("trigger:detection");
    }

    /// The firmware answered: start the pollers, go operational and run the
    /// connect sequence.
    pub(super) fn on_connected(self: &Arc<Self>) {
        let interval = self.communication_interval();
        self.runtime.lock().read_timeout = interval;
        self.start_pollers();

        self.change_state(ConnectionState::Operational);

        self.reset_line_numbers_tagged(0, false, "trigger:comm.on_connected");
        self.send_command(OutgoingCommand::new("M115").with_tag("trigger:comm.on_connected"));

        if self.runtime.lock().sd.available {
            self.refresh_sd_files_tagged(["trigger:comm.on_connected"]);
        } else {
            self.init_sd_card();
        }

        let (port, baudrate) = match self.transport() {
            Some(transport) => (transport.name().to_string(), transport.baudrate()),
            None => {
                let rt = self.runtime.lock();
                (rt.port.clone().unwrap_or_default(), rt.baudrate.unwrap_or(0))
            }
        };
        {
            let mut rt = self.runtime.lock();
            rt.port = Some(port.clone());
            rt.baudrate = Some(baudrate);
        }
        tracing::info!("Connected to {} at {} baud", port, baudrate);
        self.emit(PrinterEvent::Connection(ConnectionEvent::Connected {
            port: port.clone(),
            baudrate,
        }));
        let context = ScriptContext::new()
            .with("port", port)
            .with("baudrate", baudrate);
        self.send_script(AFTER_PRINTER_CONNECTED, context, false);
    }

    /// The firmware restarted underneath us: forget all flow-control and
    /// line accounting and renegotiate.
    pub(super) fn on_external_reset(self: &Arc<Self>) {
        self.clear_to_send.reset();
        self.command_queue.clear();
        self.send_queue.clear();
        self.lines.lock().reset(0);

        self.say_hello("trigger:comm.on_external_reset");
        self.reset_line_numbers_tagged(0, false, "trigger:comm.on_external_reset");

        let (temperature, sd_status, busy) = {
            let mut rt = self.runtime.lock();
            rt.consecutive_not_sd_printing = 0;
            (
                rt.temperature_autoreporting,
                rt.sd_status_autoreporting,
                rt.busy_protocol_support,
            )
        };
        if temperature {
            self.set_autoreport_temperature_interval();
        }
        if sd_status {
            self.set_autoreport_sd_status_interval();
        }
        if busy {
            self.set_busy_protocol_interval();
        }
    }

    fn start_pollers(self: &Arc<Self>) {
        let temperature = spawn_poller(self, Inner::temperature_interval, Inner::poll_temperature);
        let sd_status = spawn_poller(self, Inner::sd_status_interval, Inner::poll_sd_status);
        let mut timers = self.timers.lock();
        if let Some(old) = timers.temperature_poller.replace(temperature) {
            old.abort();
        }
        if let Some(old) = timers.sd_status_poller.replace(sd_status) {
            old.abort();
        }
    }

    fn stop_timers(&self) {
        let mut timers = self.timers.lock();
        for handle in [
            timers.temperature_poller.take(),
            timers.sd_status_poller.take(),
            timers.resend_ok.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
        timers.pause_position = None;
        timers.cancel_position = None;
    }

    fn sd_status_interval(&self) -> Duration {
        Timeouts::duration(self.config.timeouts.sd_status)
    }

    /// Whether the pollers must stay quiet.
    fn polling_blocked(&self) -> bool {
        let rt = self.runtime.lock();
        rt.closing || rt.long_running || rt.heating || rt.dwelling_until.is_some()
    }

    fn poll_temperature(self: &Arc<Self>) {
        if !self.state().is_operational() || self.is_streaming() || self.polling_blocked() {
            return;
        }
        {
            let rt = self.runtime.lock();
            if rt.temperature_autoreporting || rt.manual_streaming {
                return;
            }
        }
        self.send_command(
            OutgoingCommand::new("M105")
                .with_type("temperature_poll")
                .with_tag("trigger:comm.poll_temperature"),
        );
    }

    fn poll_sd_status(self: &Arc<Self>) {
        if !self.state().is_operational() || self.polling_blocked() {
            return;
        }
        let selected = self.is_sd_file_selected();
        let printing = self.is_sd_printing();
        {
            let rt = self.runtime.lock();
            if rt.sd_status_autoreporting
                || !((selected && !rt.disable_sd_printing_detection) || printing)
            {
                return;
            }
        }
        self.send_command(
            OutgoingCommand::new("M27")
                .with_type("sd_status_poll")
                .with_tag("trigger:comm.poll_sd_status"),
        );
    }

    /// Report a fatal error and close the connection.
    ///
    /// With `send_m112_on_error`, heaters are switched off first unless the
    /// printer runs an SD print or the connection never came up.
    pub(super) fn trigger_error(self: &Arc<Self>, text: impl Into<String>, reason: ErrorReason) {
        let text = text.into();
        let emergency = self.config.send_m112_on_error
            && !self.is_sd_printing()
            && !matches!(reason, ErrorReason::Connection | ErrorReason::Autodetect);

        self.set_error_text(text.clone());
        self.change_state(ConnectionState::Error);
        tracing::error!("Fatal communication error ({}): {}", reason, text);
        self.emit(PrinterEvent::Error(ErrorEvent::Fatal {
            error: text,
            reason,
        }));

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if emergency {
                inner.emergency_stop(false).await;
            }
            inner.close(true, false).await;
        });
    }

    /// A task panicked.
    async fn on_crash(self: &Arc<Self>) {
        let message = "Something crashed inside the serial connection loop, see log for details";
        self.log_comm(message);
        self.set_error_text("See log for details");
        self.change_state(ConnectionState::Error);
        self.emit(PrinterEvent::Error(ErrorEvent::Fatal {
            error: message.to_string(),
            reason: ErrorReason::Crash,
        }));
        self.close(true, false).await;
    }

    pub(super) fn spawn_emergency_stop(self: &Arc<Self>, close: bool) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.emergency_stop(close).await });
    }

    /// Write `M112` unframed and framed, then switch off every heater.
    async fn emergency_stop(self: &Arc<Self>, close: bool) {
        if self.transport().is_none() {
            return;
        }

        // Firmware with an emergency parser acts on the raw line at once.
        self.write_line("M112".to_string()).await;
        self.send_with_next_line_number("M112").await;
        for tool in 0..self.config.extruder_count {
            self.send_with_next_line_number(&format!("M104 T{} S0", tool))
                .await;
        }
        if self.config.heated_bed {
            self.send_with_next_line_number("M140 S0").await;
        }

        if close {
            let message = "Closing serial port due to emergency stop M112.";
            tracing::info!("{}", message);
            self.log_comm(message);
            self.set_error_text(message);
            self.close(true, false).await;
        }
    }

    /// Close on a separate task, for callers that must not wait.
    pub(super) fn close_detached(self: &Arc<Self>, is_error: bool) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.close(is_error, false).await });
    }

    /// Tear the connection down. Runs at most once.
    pub(super) async fn close(self: &Arc<Self>, is_error: bool, wait: bool) {
        {
            let mut rt = self.runtime.lock();
            if rt.closing {
                return;
            }
            rt.closing = true;
        }
        self.stop_timers();

        let mut is_error = is_error;
        let transport = self.transport();
        if transport.is_some() && !is_error && self.state().is_operational() {
            self.send_script(BEFORE_PRINTER_DISCONNECTED, ScriptContext::new(), false);
            if wait {
                self.wait_for_queues_to_drain().await;
            }
        }

        self.deactivate();

        if let Some(transport) = transport {
            transport.cancel_pending_reads();
            transport.cancel_pending_writes();
            if let Err(err) = transport.close().await {
                tracing::error!("Error while trying to close serial port: {}", err);
                self.log_comm(format!("Error while trying to close serial port: {}", err));
                is_error = true;
            }
        }
        *self.transport.write() = None;

        self.change_state(if is_error {
            ConnectionState::ClosedWithError
        } else {
            ConnectionState::Closed
        });
    }

    async fn wait_for_queues_to_drain(&self) {
        let deadline = Instant::now() + Timeouts::duration(self.config.timeouts.close_wait);
        while !(self.command_queue.is_empty() && self.send_queue.is_empty())
            && Instant::now() < deadline
        {
            tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
        }
    }

    fn deactivate(&self) {
        self.runtime.lock().active = false;
        self.shutdown.send_replace(true);
        self.clear_to_send.wake();
        self.send_queue.wake();
    }
}
