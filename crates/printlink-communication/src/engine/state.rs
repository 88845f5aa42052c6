//! Runtime flags, the state transition function and timeout intervals.

use super::Inner;
use crate::job::Job;
use printlink_core::{
    CommunicationEvent, ConnectionEvent, ConnectionState, JobEvent, JobOrigin, PrinterEvent,
    SdEvent, SdFileEntry,
};
use printlink_settings::{CommConfig, Timeouts};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// SD card bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct SdState {
    pub available: bool,
    pub listing: bool,
    pub files: Vec<SdFileEntry>,
    pub file_to_select: Option<String>,
    pub ignore_select: bool,
}

/// Port/baud candidates left to try during autodetection.
#[derive(Debug, Default)]
pub(crate) struct DetectionState {
    pub candidates: VecDeque<(String, u32)>,
    pub retry: u32,
}

/// Mutable per-connection flags.
///
/// Starts from the configuration; firmware detection may override some of
/// them for the lifetime of the connection.
#[derive(Debug)]
pub(crate) struct Runtime {
    pub active: bool,
    pub closing: bool,

    pub always_send_checksum: bool,
    pub block_while_dwelling: bool,
    pub repetier_targets: bool,
    pub external_heatup_detection: bool,
    pub sd_always_available: bool,
    pub sd_relative_path: bool,
    pub unknown_commands_need_ack: bool,
    pub disable_sd_printing_detection: bool,

    pub firmware_info_received: bool,
    pub firmware_name: Option<String>,
    pub firmware_info: BTreeMap<String, String>,

    pub port: Option<String>,
    pub baudrate: Option<u32>,
    pub read_timeout: Duration,
    pub timeout: Instant,
    pub ok_timeout: Instant,
    pub consecutive_timeouts: u32,
    pub hello_sent: u32,
    pub try_hello: bool,
    pub start_seen: bool,

    pub heating: bool,
    pub heatup_start: Option<Instant>,
    pub heatup_time_lost: Duration,
    pub long_running: bool,
    pub dwelling_until: Option<Instant>,
    pub temperature_autoreporting: bool,
    pub sd_status_autoreporting: bool,
    pub busy_detected: bool,
    pub busy_protocol_support: bool,
    pub manual_streaming: bool,

    pub current_tool: u32,
    pub former_tool: Option<u32>,
    pub tool_before_heatup: Option<u32>,
    pub invalid_tools: BTreeSet<u32>,
    pub current_z: Option<f64>,
    pub current_f: Option<f64>,

    pub record_pause_data: bool,
    pub record_cancel_data: bool,
    pub consecutive_not_sd_printing: u32,

    pub sd: SdState,
    pub detection: DetectionState,
}

impl Runtime {
    pub(crate) fn new(config: &CommConfig) -> Self {
        let now = Instant::now();
        Self {
            active: false,
            closing: false,
            always_send_checksum: config.always_send_checksum,
            block_while_dwelling: config.block_while_dwelling,
            repetier_targets: config.repetier_target_temp,
            external_heatup_detection: config.external_heatup_detection,
            sd_always_available: config.sd_always_available,
            sd_relative_path: config.sd_relative_path,
            unknown_commands_need_ack: config.unknown_commands_need_ack,
            disable_sd_printing_detection: false,
            firmware_info_received: false,
            firmware_name: None,
            firmware_info: BTreeMap::new(),
            port: config.port.clone(),
            baudrate: config.baudrate,
            read_timeout: Timeouts::duration(config.timeouts.connection),
            timeout: now,
            ok_timeout: now,
            consecutive_timeouts: 0,
            hello_sent: 0,
            try_hello: !config.wait_for_start_on_connect,
            start_seen: false,
            heating: false,
            heatup_start: None,
            heatup_time_lost: Duration::ZERO,
            long_running: false,
            dwelling_until: None,
            temperature_autoreporting: false,
            sd_status_autoreporting: false,
            busy_detected: false,
            busy_protocol_support: false,
            manual_streaming: false,
            current_tool: 0,
            former_tool: None,
            tool_before_heatup: None,
            invalid_tools: BTreeSet::new(),
            current_z: None,
            current_f: None,
            record_pause_data: false,
            record_cancel_data: false,
            consecutive_not_sd_printing: 0,
            sd: SdState::default(),
            detection: DetectionState::default(),
        }
    }

    /// True while a `G4` dwell is still running.
    pub(crate) fn is_dwelling(&self, now: Instant) -> bool {
        self.dwelling_until.is_some_and(|until| now <= until)
    }

    /// Close out a blocking heatup, accounting the time spent in it.
    pub(crate) fn finish_heatup(&mut self) {
        if !self.heating {
            return;
        }
        if let Some(start) = self.heatup_start.take() {
            self.heatup_time_lost += start.elapsed();
        }
        self.heating = false;
    }
}

impl Inner {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn error_text(&self) -> String {
        self.error_text.lock().clone()
    }

    pub(crate) fn set_error_text(&self, text: impl Into<String>) {
        *self.error_text.lock() = text.into();
    }

    pub(crate) fn emit(&self, event: PrinterEvent) {
        // Nobody listening is not an error.
        self.events.publish(event);
    }

    /// Terminal-style log line.
    pub(crate) fn log_comm(&self, line: impl Into<String>) {
        self.emit(PrinterEvent::Communication(CommunicationEvent::Log { line: line.into() }));
    }

    pub(crate) fn job_origin(&self) -> Option<JobOrigin> {
        self.job.lock().as_ref().map(|job| job.source().origin())
    }

    pub(crate) fn is_sd_file_selected(&self) -> bool {
        self.job.lock().as_ref().is_some_and(Job::is_sd)
    }

    pub(crate) fn is_sd_printing(&self) -> bool {
        self.is_sd_file_selected() && self.state().is_printing()
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.job
            .lock()
            .as_ref()
            .is_some_and(|job| job.is_streaming() && !job.source().is_done())
    }

    pub(crate) fn is_active(&self) -> bool {
        self.runtime.lock().active
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.runtime.lock().closing
    }

    pub(crate) fn label(&self) -> String {
        let error = self.error_text();
        self.state().label(self.job_origin(), Some(&error))
    }

    /// Switch to `new`, running the exit and entry side effects.
    ///
    /// A closed connection keeps its final state.
    pub(crate) fn change_state(&self, new: ConnectionState) {
        let old = self.state();
        if old == new {
            return;
        }
        if old.is_closed() {
            tracing::debug!("Connection is {}, not changing state to {}", old, new);
            return;
        }

        if new.is_closed() || new == ConnectionState::Error {
            self.on_leaving_connection(old, new);
        }

        let changed = self.state.send_if_modified(|state| {
            if *state == new {
                false
            } else {
                *state = new;
                true
            }
        });
        if !changed {
            return;
        }

        let label = self.label();
        tracing::info!("Changing monitoring state from \"{}\" to \"{}\"", old, new);
        self.log_comm(format!(
            "Changing monitoring state from \"{}\" to \"{}\"",
            old.label(self.job_origin(), None),
            label
        ));
        self.emit(PrinterEvent::Connection(ConnectionEvent::StateChanged {
            from: old,
            to: new,
            label,
        }));
    }

    fn on_leaving_connection(&self, old: ConnectionState, new: ConnectionState) {
        let failed = {
            let job = self.job.lock();
            job.as_ref().filter(|_| old.is_busy()).map(|job| {
                let source = job.source();
                (source.filename().to_string(), source.origin())
            })
        };
        if let Some((name, origin)) = failed {
            let error = self.error_text();
            let reason = if error.is_empty() {
                "Connection closed".to_string()
            } else {
                error
            };
            self.emit(PrinterEvent::Job(JobEvent::PrintFailed {
                name,
                origin,
                reason,
            }));
        }

        if !new.is_closed() {
            return;
        }

        if self.config.sd_support {
            {
                let mut rt = self.runtime.lock();
                rt.sd.listing = false;
                rt.sd.files.clear();
            }
            self.emit(PrinterEvent::Sd(SdEvent::FilesListed { files: Vec::new() }));
        }

        if old.is_busy() {
            self.record_file_position();
        }
        if let Some(job) = self.job.lock().as_mut() {
            job.source_mut().close();
        }
    }

    /// Report where the active job stopped.
    pub(crate) fn record_file_position(&self) {
        let recorded = self.job.lock().as_ref().map(|job| {
            let source = job.source();
            (source.filename().to_string(), source.origin(), source.pos())
        });
        if let Some((name, origin, position)) = recorded {
            tracing::info!("Recording file position {} of {}", position, name);
            self.emit(PrinterEvent::Job(JobEvent::FilePositionRecorded {
                name,
                origin,
                position,
            }));
        }
    }

    /// Interval after which silence counts as a communication timeout.
    pub(crate) fn communication_interval(&self) -> Duration {
        let state = self.state();
        let rt = self.runtime.lock();
        let timeouts = &self.config.timeouts;
        if state == ConnectionState::DetectingTransport {
            return Timeouts::duration(if rt.detection.retry == 0 {
                timeouts.detection_first
            } else {
                timeouts.detection_consecutive
            });
        }

        let communication = if rt.busy_protocol_support {
            timeouts.communication_busy
        } else {
            timeouts.communication
        };
        let poll = if rt.temperature_autoreporting {
            timeouts.temperature_autoreport
        } else {
            self.temperature_interval_secs(&rt)
        };
        Timeouts::duration(communication.max(poll + 1.0))
    }

    /// A fresh deadline one communication interval from now.
    pub(crate) fn new_communication_deadline(&self) -> Instant {
        Instant::now() + self.communication_interval()
    }

    fn temperature_interval_secs(&self, rt: &Runtime) -> f64 {
        let timeouts = &self.config.timeouts;
        if self.state().is_busy() {
            return timeouts.temperature;
        }
        let target_set = self
            .temperatures
            .read()
            .any_target_above(self.config.temperature_target_threshold);
        if target_set && !rt.temperature_autoreporting {
            timeouts.temperature_target_set
        } else {
            timeouts.temperature
        }
    }

    /// Delay until the next temperature poll.
    pub(crate) fn temperature_interval(&self) -> Duration {
        let rt = self.runtime.lock();
        Timeouts::duration(self.temperature_interval_secs(&rt))
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::PrinterComm;
    use printlink_core::ConnectionState;
    use printlink_settings::CommConfig;

    fn engine_in(state: ConnectionState) -> PrinterComm {
        let comm = PrinterComm::builder(CommConfig::default()).build();
        comm.inner.change_state(state);
        assert_eq!(comm.state(), state);
        comm
    }

    #[test]
    fn test_every_state_can_close() {
        for state in ConnectionState::ALL {
            for closed in [ConnectionState::Closed, ConnectionState::ClosedWithError] {
                let comm = engine_in(state);
                comm.inner.change_state(closed);
                assert_eq!(comm.state(), closed, "{} -> {}", state, closed);
            }
        }
    }

    #[test]
    fn test_closed_states_are_final() {
        for closed in [ConnectionState::Closed, ConnectionState::ClosedWithError] {
            let comm = engine_in(closed);
            for state in ConnectionState::ALL {
                comm.inner.change_state(state);
                assert_eq!(comm.state(), closed, "{} -> {}", closed, state);
            }
        }
    }
}
