//! Receiving side: the monitor loop reads firmware lines, acknowledges
//! sent commands, recovers from resend requests and timeouts and drives the
//! handshake states.

use super::jobs::JobHold;
use super::sender::shutdown_requested;
use super::Inner;
use crate::job::{Job, JobSource};
use crate::pipeline::{OutgoingCommand, QueueItem, ResendDecision, Tags};
use crate::protocol::errors::{
    error_continuation, is_error_line, join_error_lines, normalize_error_line, stripped_error,
    Continuation,
};
use crate::protocol::parser::{
    is_resend_line, is_temperature_line, parse_action_command, parse_resend_line,
    parse_sd_file_entry, parse_sd_file_opened, parse_sd_printing_byte,
};
use crate::protocol::{classify_error, is_fatal_error, ErrorClass};
use printlink_core::{
    ConnectionEvent, ConnectionState, ErrorEvent, ErrorReason, PrinterEvent, SdEvent,
    SdFileEntry,
};
use printlink_settings::{ResendOkPolicy, Timeouts};
use std::sync::Arc;
use tokio::time::Instant;

/// Fields that turn an `ok` line into a content line.
const CONTENT_MARKERS: [&str; 6] = ["T:", "T0:", "B:", "C:", "X:", "NAME:"];

const MAX_HELLO_ATTEMPTS: u32 = 3;

const TIMEOUT_ADVICE: &str = "Configure long running commands or increase communication timeout if that happens regularly on specific commands or long moves.";

/// The monitor task.
pub(super) async fn run(inner: Arc<Inner>) {
    if !inner.establish().await {
        return;
    }
    if let Some(transport) = inner.transport() {
        inner.log_comm(format!("Connected to: {}, starting monitor", transport.name()));
    }

    let try_hello = inner.runtime.lock().try_hello;
    if inner.state() == ConnectionState::Connecting && try_hello {
        // The second hello survives garbage left on the line by the port open.
        inner.say_hello("trigger:comm.monitor");
        inner.say_hello("trigger:comm.monitor");
    }

    let mut shutdown = inner.shutdown.subscribe();
    while inner.is_active() {
        let line = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            line = inner.read_line() => line,
        };
        let Some(line) = line else {
            break;
        };
        inner.process_line(line).await;
    }

    tracing::info!("Connection closed, closing down monitor");
    inner.log_comm("Connection closed, closing down monitor");
}

impl Inner {
    /// Read one line. An empty string means the read timed out, `None`
    /// that the transport is gone.
    async fn read_line(self: &Arc<Self>) -> Option<String> {
        let transport = self.transport()?;
        let timeout = self.runtime.lock().read_timeout;

        let bytes = match transport.read_line(timeout).await {
            Ok(bytes) => bytes,
            Err(err) => {
                if !self.is_closing() {
                    tracing::error!("Unexpected error while reading from serial port: {}", err);
                    self.log_comm(format!(
                        "Unexpected error while reading serial port, please consult the log for details: {}",
                        err
                    ));
                    self.set_error_text(err.to_string());
                    self.close_detached(true);
                }
                return None;
            }
        };

        let null_position = bytes.iter().position(|&byte| byte == 0);
        let line = match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(err) => err.into_bytes().iter().map(|&byte| char::from(byte)).collect(),
        };

        if !line.is_empty() {
            let shown = line.trim_end_matches(['\r', '\n']);
            tracing::debug!("Recv: {}", shown);
            self.log_comm(format!("Recv: {}", shown));
            if let Some(position) = null_position {
                tracing::warn!("Received line: | {}", shown.replace('\0', "\\x00"));
                self.log_comm(format!(
                    "WARN: The received line contains at least one null byte character at position {}, this hints at some data corruption going on",
                    position
                ));
            }
        }

        Some(self.hooks.process_received(line))
    }

    async fn process_line(self: &Arc<Self>, line: String) {
        let now = Instant::now();

        if !line.trim().is_empty() {
            let deadline = self.new_communication_deadline();
            let mut rt = self.runtime.lock();
            rt.consecutive_timeouts = 0;
            rt.timeout = deadline;
            if rt.dwelling_until.is_some_and(|until| now > until) {
                rt.dwelling_until = None;
            }
        }

        if !line.is_empty() && !line.starts_with("ok") {
            // Anything but an ok after a resend request: the ok is not coming.
            let pending = self.timers.lock().resend_ok.take();
            if let Some(timer) = pending {
                timer.abort();
                self.resend_simulate_ok();
            }
        }

        let handshaking = matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::DetectingTransport
        );

        if line.starts_with("echo:busy:") || line.starts_with("busy:") {
            self.on_busy_line();
            if !handshaking {
                return;
            }
        } else if line.starts_with("//") {
            self.process_debug_line(&line);
            if !handshaking {
                return;
            }
        }

        let line = self.handle_errors(line).await;
        let line = line
            .trim_matches(|c: char| c.is_whitespace() || c == '\0')
            .to_string();
        let lower = line.to_lowercase();

        let listing = self.runtime.lock().sd.listing;
        if listing && !line.contains("End file list") {
            if let Some((name, size)) = parse_sd_file_entry(&line) {
                if name.is_ascii() {
                    self.runtime.lock().sd.files.push(SdFileEntry { name, size });
                } else {
                    tracing::warn!(
                        "Got a file from printer's SD that has a non-ascii filename ({}), that shouldn't happen according to the protocol",
                        name
                    );
                }
                return;
            }
        }

        let state = self.state();
        let mut handled = false;
        if line.starts_with("ok")
            || (state.is_printing() && self.config.support_wait && line == "wait")
        {
            self.handle_ok();
            handled = line == "wait"
                || line == "ok"
                || !CONTENT_MARKERS.iter().any(|marker| line.contains(marker));
        } else if is_resend_line(&line) {
            self.handle_resend_request(&line);
            handled = true;
        } else if self.is_communication_timeout(&line, state, now) {
            self.handle_timeout();
            let deadline = self.new_communication_deadline();
            self.runtime.lock().ok_timeout = deadline;
            handled = state.is_printing() && line.is_empty();
        }
        if handled && !handshaking {
            return;
        }

        self.process_content_line(&line, &lower);

        match self.state() {
            ConnectionState::DetectingTransport => {
                let ok_timeout = self.runtime.lock().ok_timeout;
                if line.is_empty() || now > ok_timeout {
                    self.perform_detection_step().await;
                } else if line.contains("start") || line.starts_with("ok") {
                    self.on_connected();
                    if line.contains("start") {
                        self.clear_to_send.release();
                    }
                }
            }
            ConnectionState::Connecting => self.process_connecting_line(&line, now).await,
            ConnectionState::Operational
            | ConnectionState::Starting
            | ConnectionState::Printing
            | ConnectionState::Paused
            | ConnectionState::TransferringFile
                if line == "start" =>
            {
                self.on_unsolicited_start();
            }
            _ => {}
        }
    }

    fn is_communication_timeout(&self, line: &str, state: ConnectionState, now: Instant) -> bool {
        if state == ConnectionState::DetectingTransport {
            return false;
        }
        let sd_printing = self.is_sd_printing();
        let job_on_hold = self.job_on_hold();
        let resend_active = self.lines.lock().resend_active();

        let rt = self.runtime.lock();
        let silent = line.is_empty() && now >= rt.timeout;
        let ack_missing = state.is_printing()
            && !sd_printing
            && (!job_on_hold || resend_active)
            && !rt.long_running
            && !rt.heating
            && now >= rt.ok_timeout;
        let dwelling = rt.block_while_dwelling && rt.is_dwelling(now);
        (silent || ack_missing) && !dwelling
    }

    async fn process_connecting_line(self: &Arc<Self>, line: &str, now: Instant) {
        let (start_seen, timeout, try_hello, hello_sent) = {
            let rt = self.runtime.lock();
            (rt.start_seen, rt.timeout, rt.try_hello, rt.hello_sent)
        };

        if line.contains("start") && !start_seen {
            self.runtime.lock().start_seen = true;
            self.say_hello("trigger:comm.start_seen");
        } else if line.starts_with("ok") || (self.config.support_wait && line == "wait") {
            if line == "wait" {
                self.handle_ok();
            }
            self.on_connected();
        } else if now > timeout {
            if try_hello && hello_sent < MAX_HELLO_ATTEMPTS {
                self.log_comm(
                    "No answer from the printer within the connection timeout, trying another hello",
                );
                self.say_hello("trigger:comm.connect_timeout");
            } else {
                let message = "There was a timeout while trying to connect to the printer";
                tracing::info!("{}", message);
                self.log_comm(message);
                self.set_error_text(message);
                self.close(true, false).await;
            }
        }
    }

    /// `start` while connected: the firmware was reset behind our back.
    fn on_unsolicited_start(self: &Arc<Self>) {
        let _hold = JobHold::new(self);
        let idle = self.state() == ConnectionState::Operational;
        if idle {
            let message = "Printer sent 'start' while already operational. External reset? Resetting line numbers to be on the safe side";
            tracing::warn!("{}", message);
            self.log_comm(message);
            self.on_external_reset();
        } else {
            let activity = if self.is_streaming() {
                "streaming to SD"
            } else {
                "printing"
            };
            let message = format!(
                "Printer sent 'start' while {}. External reset? Aborting job since printer lost state.",
                activity
            );
            tracing::warn!("{}", message);
            self.log_comm(message);
            self.on_external_reset();
            self.cancel_print(None, true, false);
        }
        self.emit(PrinterEvent::Connection(ConnectionEvent::PrinterReset { idle }));
    }

    fn on_busy_line(self: &Arc<Self>) {
        let deadline = self.new_communication_deadline();
        let detected = {
            let mut rt = self.runtime.lock();
            rt.ok_timeout = deadline;
            let detected = !rt.busy_detected && self.config.capabilities.busy_protocol;
            if detected {
                rt.busy_detected = true;
            }
            detected
        };
        if detected {
            let message = "Printer seems to support the busy protocol, will adjust timeouts and set busy interval accordingly";
            tracing::info!("{}", message);
            self.log_comm(message);
            self.set_busy_protocol_interval();
        }
    }

    /// Ask for busy lines often enough to stay within the busy timeout.
    pub(super) fn set_busy_protocol_interval(self: &Arc<Self>) {
        let interval = (self.config.timeouts.communication_busy as i64 - 1).max(1);
        let inner = Arc::clone(self);
        self.send_command(
            OutgoingCommand::new(format!("M113 S{}", interval))
                .with_tag("trigger:comm.set_busy_protocol_interval")
                .on_sent(move || {
                    inner.runtime.lock().busy_protocol_support = true;
                    let read_timeout = inner.communication_interval();
                    inner.runtime.lock().read_timeout = read_timeout;
                }),
        );
    }

    fn process_debug_line(self: &Arc<Self>, line: &str) {
        let Some(action) = parse_action_command(line) else {
            return;
        };
        match action {
            "cancel" => {
                self.log_comm("Cancelling on request of the printer...");
                self.cancel_print(None, false, false);
            }
            "pause" => {
                self.log_comm("Pausing on request of the printer...");
                self.set_pause(true, true, None);
            }
            "paused" => {
                self.log_comm("Printer signalled that it paused, switching state...");
                self.set_pause(true, false, None);
            }
            "resume" => {
                self.log_comm("Resuming on request of the printer...");
                self.set_pause(false, true, None);
            }
            "resumed" => {
                self.log_comm("Printer signalled that it resumed, switching state...");
                self.set_pause(false, false, None);
            }
            "disconnect" => {
                self.log_comm("Disconnecting on request of the printer...");
                self.emit(PrinterEvent::Connection(ConnectionEvent::ForceDisconnect));
            }
            other => self.hooks.process_action(line, other),
        }
    }

    /// Classify and react to `Error:`/`!!` lines. Returns the line, joined
    /// with its continuation if the error spans two lines.
    async fn handle_errors(self: &Arc<Self>, line: String) -> String {
        let mut line = normalize_error_line(&line);
        if !is_error_line(&line) {
            return line;
        }

        let continuation = error_continuation(&line);
        if continuation != Continuation::None {
            if let Some(next) = self.read_line().await {
                line = join_error_lines(&line, &next, continuation);
            }
        }

        let lower = line.to_lowercase();
        let stripped = stripped_error(&line);
        match classify_error(&lower) {
            ErrorClass::RecoverableWithoutResend => self.handle_ok(),
            ErrorClass::ResendImplied => self.lines.lock().set_last_comm_error(stripped),
            ErrorClass::SdCard | ErrorClass::UnknownCommand => {}
            ErrorClass::Other => {
                if !self.state().is_error() {
                    self.process_firmware_error(&stripped, is_fatal_error(&lower));
                }
            }
        }
        line
    }

    fn process_firmware_error(self: &Arc<Self>, error: &str, fatal: bool) {
        if self.hooks.process_error(error) {
            tracing::info!("Firmware error \"{}\" was handled by a hook", error);
            return;
        }

        let message = format!("Received an error from the printer's firmware: {}", error);
        tracing::warn!("{}", message);
        self.log_comm(message);

        if self.config.ignore_errors {
            self.log_comm(format!(
                "WARNING! Received an error from the printer's firmware, ignoring that as configured but you might want to investigate what happened here! Error: {}",
                error
            ));
            self.clear_to_send.release();
        } else if self.config.disconnect_on_errors || fatal {
            self.trigger_error(error, ErrorReason::Firmware);
        } else if self.state().is_printing() {
            self.cancel_print(Some(error.to_string()), false, false);
            self.clear_to_send.release();
        }
    }

    /// An acknowledgement: release credit and send what comes next.
    pub(super) fn handle_ok(self: &Arc<Self>) {
        let pending = self.timers.lock().resend_ok.take();
        if let Some(timer) = pending {
            timer.abort();
        }

        let deadline = self.new_communication_deadline();
        self.runtime.lock().ok_timeout = deadline;
        self.clear_to_send.release();

        {
            let mut rt = self.runtime.lock();
            rt.long_running = false;
            if let Some(tool) = rt.tool_before_heatup.take() {
                rt.current_tool = tool;
            }
            rt.finish_heatup();
        }

        if !self.state().is_operational() {
            return;
        }

        let resending = self.lines.lock().resend_delta().is_some();
        if resending && self.resend_next_command(false) {
            return;
        }
        self.lines.lock().set_resend_active(false);
        self.continue_sending();
    }

    /// Put the next line of the resend session (or, with `again`, the last
    /// one once more) into the send queue.
    fn resend_next_command(self: &Arc<Self>, again: bool) -> bool {
        let next = self.lines.lock().next_resend(again);
        let Some(resend) = next else {
            self.send_queue.set_resend_active(false);
            return false;
        };

        let mut item = QueueItem::command(resend.command);
        item.line_number = Some(resend.line_number);
        let enqueued = self.enqueue_for_sending(item, true);
        if resend.finished {
            self.send_queue.set_resend_active(false);
        }
        enqueued
    }

    fn handle_resend_request(self: &Arc<Self>, line: &str) {
        if !self.process_resend_request(line) {
            return;
        }
        match self.config.trigger_ok_after_resend {
            ResendOkPolicy::Always => self.handle_ok(),
            ResendOkPolicy::Detect => self.start_resend_ok_timer(),
            ResendOkPolicy::Never => {}
        }
    }

    /// Returns false if the request ended the connection.
    fn process_resend_request(self: &Arc<Self>, line: &str) -> bool {
        let Some(requested) = parse_resend_line(line) else {
            tracing::info!("Got a resend request without a line number: {}", line);
            return true;
        };

        let (decision, current) = {
            let mut lines = self.lines.lock();
            let decision =
                lines.handle_resend_request(requested, self.config.max_consecutive_resends);
            (decision, lines.current_line())
        };

        match decision {
            ResendDecision::Ignored => {
                self.send_queue.set_resend_active(false);
                tracing::info!(
                    "Ignoring resend request for line {} == current line, we haven't sent that yet",
                    requested
                );
            }
            ResendDecision::Stale => {
                tracing::info!(
                    "Ignoring resend request for line {}, that still originates from lines we sent before we got the first resend request",
                    requested
                );
            }
            ResendDecision::Loop { line } => {
                let message = format!(
                    "Printer keeps requesting line {} again and again, communication stuck",
                    line
                );
                self.log_comm(message.clone());
                self.send_queue.set_resend_active(false);
                self.trigger_error(message, ErrorReason::ResendLoop);
                return false;
            }
            ResendDecision::InsufficientHistory {
                line,
                current,
                available,
            } => {
                let message = format!(
                    "Printer requested line {} but no sufficient history is available, can't resend",
                    line
                );
                tracing::warn!("{} (current line {}, {} lines in history)", message, current, available);
                self.log_comm(message.clone());
                self.send_queue.set_resend_active(false);
                if self.state().is_printing() {
                    self.trigger_error(message, ErrorReason::Resend);
                    return false;
                }
                self.emit(PrinterEvent::Error(ErrorEvent::ResendFailed {
                    line,
                    current_line: current,
                    available,
                }));
            }
            ResendDecision::Started { delta } => {
                let message = format!(
                    "Got a resend request from the printer: requested line = {}, current line = {}",
                    requested, current
                );
                tracing::info!("{} ({} lines to resend)", message, delta);
                self.log_comm(message);
                self.send_queue.set_resend_active(true);
            }
        }
        true
    }

    fn start_resend_ok_timer(self: &Arc<Self>) {
        let wait = Timeouts::duration(self.config.timeouts.resend_ok);
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            // Detach our own handle; aborting it would cancel this task.
            drop(inner.timers.lock().resend_ok.take());
            inner.resend_simulate_ok();
        });
        let previous = self.timers.lock().resend_ok.replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn resend_simulate_ok(self: &Arc<Self>) {
        let message = "Firmware didn't send an 'ok' with their resend request. That's a known bug with some firmware variants out there. Simulating an ok to continue...";
        tracing::info!("{}", message);
        self.log_comm(message);
        self.handle_ok();
    }

    fn handle_timeout(self: &Arc<Self>) {
        let state = self.state();
        if !state.is_operational() {
            return;
        }

        let (count, max, long_running, heating) = {
            let mut rt = self.runtime.lock();
            rt.consecutive_timeouts += 1;
            let limits = &self.config.max_consecutive_timeouts;
            let max = if rt.long_running {
                limits.long
            } else if state.is_printing() {
                limits.printing
            } else {
                limits.idle
            };
            (rt.consecutive_timeouts, max, rt.long_running, rt.heating)
        };
        let resend_active = self.lines.lock().resend_active();

        if max > 0 && count > max {
            let message = format!(
                "No response from printer after {} consecutive communication timeouts, considering it dead.",
                max + 1
            );
            tracing::info!("{}", message);
            self.log_comm(format!("{} {}", message, TIMEOUT_ADVICE));
            let error = "Too many consecutive timeouts, printer still connected and alive?";
            self.set_error_text(error);
            self.emit(PrinterEvent::Error(ErrorEvent::Fatal {
                error: error.to_string(),
                reason: ErrorReason::Timeout,
            }));
            self.close_detached(true);
        } else if resend_active {
            let message = "Communication timeout during an active resend, resending same line again to trigger response from printer.";
            tracing::info!("{}", message);
            self.log_comm(format!("{} {}", message, TIMEOUT_ADVICE));
            if self.resend_next_command(true) {
                self.clear_to_send.release();
            }
        } else if heating {
            tracing::info!("Timeout while in an active heatup, considering heatup to be over.");
            self.runtime.lock().finish_heatup();
        } else if long_running {
            tracing::info!(
                "Ran into a communication timeout, but a command known to be a long runner is currently active"
            );
        } else if matches!(state, ConnectionState::Printing | ConnectionState::Paused) {
            let message =
                "Communication timeout while printing, trying to trigger response from printer.";
            tracing::info!("{}", message);
            self.log_comm(format!("{} {}", message, TIMEOUT_ADVICE));
            let poll = OutgoingCommand::new("M105")
                .with_type("temperature")
                .with_tag("trigger:comm.handle_timeout");
            if self.send_command(poll) {
                self.clear_to_send.release();
            }
        } else if self.clear_to_send.is_blocked() {
            let message =
                "Communication timeout while idle, trying to trigger response from printer.";
            tracing::info!("{}", message);
            self.log_comm(format!("{} {}", message, TIMEOUT_ADVICE));
            self.clear_to_send.release();
        }
    }

    /// Telemetry, firmware reports and SD card messages.
    fn process_content_line(self: &Arc<Self>, line: &str, lower: &str) {
        let repetier_targets = self.runtime.lock().repetier_targets;

        if line.contains("X:") && line.contains("Y:") && line.contains("Z:") {
            self.process_position_line(line);
        } else if is_temperature_line(line) {
            self.process_temperature_line(line);
        } else if repetier_targets && (line.contains("TargetExtr") || line.contains("TargetBed")) {
            self.process_repetier_target(line);
        } else if line.contains("NAME:") || line.starts_with("NAME.") {
            self.process_firmware_line(line);
        } else if lower.starts_with("cap:") {
            self.process_capability_line(line);
        } else if lower.contains("invalid extruder") {
            self.process_invalid_extruder(line);
        } else {
            self.process_sd_line(line);
        }
    }

    fn process_sd_line(self: &Arc<Self>, line: &str) {
        if line.contains("SD init fail")
            || line.contains("volume.init failed")
            || line.contains("openRoot failed")
        {
            {
                let mut rt = self.runtime.lock();
                rt.sd.available = false;
                rt.sd.files.clear();
            }
            self.emit(PrinterEvent::Sd(SdEvent::StateChanged { available: false }));
        } else if line.contains("SD card ok") && !self.runtime.lock().sd.available {
            self.runtime.lock().sd.available = true;
            self.refresh_sd_files_tagged(["trigger:comm.sd_card_ok"]);
            self.emit(PrinterEvent::Sd(SdEvent::StateChanged { available: true }));
        } else if line.contains("Begin file list") {
            let mut rt = self.runtime.lock();
            rt.sd.files.clear();
            rt.sd.listing = true;
        } else if line.contains("End file list") {
            let files = {
                let mut rt = self.runtime.lock();
                rt.sd.listing = false;
                rt.sd.files.clone()
            };
            self.emit(PrinterEvent::Sd(SdEvent::FilesListed { files }));
        } else if line.contains("SD printing byte") {
            self.process_sd_printing_byte(line);
        } else if line.contains("Not SD printing") {
            if self.is_sd_printing() && !self.is_starting_or_finishing() {
                self.count_not_sd_printing();
            }
        } else if line.contains("File opened") {
            if self.runtime.lock().sd.ignore_select {
                return;
            }
            let (name, size) =
                parse_sd_file_opened(line).unwrap_or_else(|| ("Unknown".to_string(), 0));
            self.sd_file_opened(&name, Some(size));
        } else if line.contains("File selected") {
            self.sd_file_selected();
        } else if line.contains("Writing to file") && self.is_streaming() {
            self.change_state(ConnectionState::Printing);
        } else if line.contains("Done printing file") && self.is_sd_printing() {
            if let Some(job) = self.job.lock().as_mut().and_then(Job::as_sd_mut) {
                job.set_pos(0);
            }
            self.finish_print();
            self.continue_sending();
        } else if line.contains("Done saving file") {
            if self.config.trigger_ok_for_m29 {
                self.handle_ok();
            }
        } else if line.contains("File deleted") && line.ends_with("ok") {
            self.handle_ok();
        }
    }

    fn is_starting_or_finishing(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Starting | ConnectionState::Finishing
        )
    }

    fn process_sd_printing_byte(self: &Arc<Self>, line: &str) {
        let Some((current, total)) = parse_sd_printing_byte(line) else {
            return;
        };

        if current == 0 && total == 0 && self.is_sd_printing() && !self.is_starting_or_finishing() {
            // Some Marlin versions report 0/0 instead of "Not SD printing".
            self.count_not_sd_printing();
            return;
        }

        self.runtime.lock().consecutive_not_sd_printing = 0;
        if !self.is_sd_file_selected() {
            return;
        }

        let previous = self
            .job
            .lock()
            .as_ref()
            .map(|job| job.source().pos())
            .unwrap_or(0);
        if !self.is_sd_printing() && current != total && current > 0 && current > previous {
            // The printer started an SD print on its own.
            if let Err(err) = self.start_print_tagged(None, true, Tags::new()) {
                tracing::warn!("Could not follow externally started SD print: {}", err);
            }
        }

        let done = self
            .job
            .lock()
            .as_mut()
            .and_then(Job::as_sd_mut)
            .map(|job| {
                job.set_pos(current);
                if job.size().unwrap_or(0) == 0 {
                    job.set_size(Some(total));
                }
                job.is_done()
            });
        if done == Some(false) {
            self.emit_progress();
        }
    }

    fn count_not_sd_printing(self: &Arc<Self>) {
        let exceeded = {
            let mut rt = self.runtime.lock();
            rt.consecutive_not_sd_printing += 1;
            rt.consecutive_not_sd_printing > self.config.max_not_sd_printing
        };
        if exceeded {
            self.cancel_print(None, false, true);
        }
    }
}
