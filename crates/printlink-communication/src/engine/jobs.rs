//! Print jobs, file transfers and SD card management.

use super::timers::ResettableTimer;
use super::{invalid_state, Inner};
use crate::job::{Job, JobSource, LocalFileJob, SdCardJob, StreamingJob};
use crate::pipeline::{tags, Marker, OutgoingCommand, QueueItem, Tags};
use crate::protocol::process_gcode_line;
use crate::scripts::{
    ScriptContext, AFTER_PRINT_CANCELLED, AFTER_PRINT_DONE, AFTER_PRINT_PAUSED,
    BEFORE_PRINT_RESUMED, BEFORE_PRINT_STARTED,
};
use printlink_core::{
    ConnectionState, ErrorReason, JobEvent, JobOrigin, PositionRecord, PrinterEvent,
    ProtocolError, Result, SdEvent, TemperatureRecord, TransferEvent,
};
use printlink_settings::Timeouts;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Keeps job lines from being sent while alive.
///
/// Returned by [`PrinterComm::job_put_on_hold`](super::PrinterComm::job_put_on_hold).
/// Dropping the last hold resumes sending.
#[must_use = "the hold is released when dropped"]
pub struct JobHold {
    inner: Arc<Inner>,
}

impl JobHold {
    pub(super) fn new(inner: &Arc<Inner>) -> Self {
        *inner.job_hold.lock() += 1;
        Self {
            inner: Arc::clone(inner),
        }
    }
}

impl Drop for JobHold {
    fn drop(&mut self) {
        self.inner.set_job_on_hold(false);
    }
}

impl std::fmt::Debug for JobHold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHold").finish_non_exhaustive()
    }
}

fn with_position(context: ScriptContext, prefix: &str, position: &PositionRecord) -> ScriptContext {
    let mut context = context;
    let axes = [
        ("x", position.x),
        ("y", position.y),
        ("z", position.z),
        ("e", position.e),
        ("f", position.f),
    ];
    for (axis, value) in axes {
        if let Some(value) = value {
            context = context.with(format!("{}.{}", prefix, axis), value);
        }
    }
    if let Some(tool) = position.t {
        context = context.with(format!("{}.t", prefix), tool);
    }
    context
}

fn with_temperatures(
    context: ScriptContext,
    prefix: &str,
    temperatures: &TemperatureRecord,
) -> ScriptContext {
    let mut context = context;
    let mut readings: Vec<(String, printlink_core::TemperatureReading)> = temperatures
        .tools()
        .iter()
        .map(|(tool, reading)| (format!("tool{}", tool), *reading))
        .collect();
    readings.push(("bed".to_string(), temperatures.bed()));
    readings.push(("chamber".to_string(), temperatures.chamber()));

    for (heater, reading) in readings {
        if let Some(actual) = reading.actual {
            context = context.with(format!("{}.{}.actual", prefix, heater), actual);
        }
        if let Some(target) = reading.target {
            context = context.with(format!("{}.{}.target", prefix, heater), target);
        }
    }
    context
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

impl Inner {
    /// Name and origin of the active job.
    fn job_identity(&self) -> Option<(String, JobOrigin)> {
        self.job.lock().as_ref().map(|job| {
            let source = job.source();
            (source.filename().to_string(), source.origin())
        })
    }

    /// Render script `name` into processed lines with their extra tags.
    ///
    /// The context is extended with the last known position and
    /// temperatures, plus the pause or cancel snapshots for the scripts
    /// that follow those.
    pub(super) fn render_script(
        &self,
        name: &str,
        context: ScriptContext,
    ) -> Vec<(String, Tags)> {
        let mut context = with_position(context, "last_position", &self.position.read());
        context = with_temperatures(context, "last_temperature", &self.temperatures.read());
        match name {
            AFTER_PRINT_PAUSED | BEFORE_PRINT_RESUMED => {
                context = with_position(context, "pause_position", &self.pause_position.read());
                context = with_temperatures(
                    context,
                    "pause_temperature",
                    &self.pause_temperatures.read(),
                );
            }
            AFTER_PRINT_CANCELLED => {
                context =
                    with_position(context, "cancel_position", &self.cancel_position.read());
                context = with_temperatures(
                    context,
                    "cancel_temperature",
                    &self.cancel_temperatures.read(),
                );
            }
            _ => {}
        }

        self.scripts
            .render(name, &context)
            .into_iter()
            .filter_map(|line| {
                process_gcode_line(&line.line, None, None)
                    .filter(|text| !text.trim().is_empty())
                    .map(|text| (text, line.tags))
            })
            .collect()
    }

    fn job_command(&self, text: impl Into<String>, labels: &Tags) -> OutgoingCommand {
        OutgoingCommand::new(text)
            .with_tags(labels.iter().cloned())
            .part_of_job()
    }

    pub(super) fn start_print(self: &Arc<Self>, position: Option<u64>) -> Result<()> {
        self.start_print_tagged(position, false, Tags::new())
    }

    /// Start the selected job. `external_sd` is set when the firmware
    /// started an SD print on its own.
    pub(super) fn start_print_tagged(
        self: &Arc<Self>,
        position: Option<u64>,
        external_sd: bool,
        extra: Tags,
    ) -> Result<()> {
        let state = self.state();
        if !state.is_operational() || state.is_printing() {
            return Err(invalid_state("start_print", state));
        }
        if self.job.lock().is_none() {
            return Err(ProtocolError::NoFileSelected.into());
        }

        {
            let mut rt = self.runtime.lock();
            rt.heatup_start = rt.heating.then(tokio::time::Instant::now);
            rt.heatup_time_lost = std::time::Duration::ZERO;
            rt.consecutive_not_sd_printing = 0;
        }

        let started = self
            .job
            .lock()
            .as_mut()
            .map(|job| job.source_mut().start())
            .unwrap_or(Ok(()));
        if let Err(err) = started {
            tracing::error!("Error while trying to start printing: {}", err);
            self.trigger_error(err.to_string(), ErrorReason::StartPrint);
            return Err(err);
        }

        self.change_state(ConnectionState::Starting);

        let sd = self.is_sd_file_selected();
        if !sd {
            self.reset_line_numbers_tagged(0, true, "trigger:comm.start_print");
        }

        if let Some((name, origin)) = self.job_identity() {
            self.emit(PrinterEvent::Job(JobEvent::PrintStarted { name, origin }));
        }
        self.send_script(BEFORE_PRINT_STARTED, ScriptContext::new(), true);

        let mut labels = extra;
        labels.insert("trigger:comm.start_print".to_string());
        if sd {
            if !external_sd {
                self.runtime.lock().sd.ignore_select = true;
                let name = self.job_identity().map(|(name, _)| name).unwrap_or_default();
                self.send_command(self.job_command(format!("M23 {}", name), &labels));

                let position = position.filter(|&pos| pos > 0);
                if let Some(job) = self.job.lock().as_mut().and_then(Job::as_sd_mut) {
                    job.set_pos(position.unwrap_or(0));
                }
                if let Some(position) = position {
                    self.send_command(self.job_command(format!("M26 S{}", position), &labels));
                }
                self.send_command(self.job_command("M24", &labels));
            }
        } else if let Some(position) = position.filter(|&pos| pos > 0) {
            let seeked = self
                .job
                .lock()
                .as_mut()
                .map(|job| job.source_mut().seek(position))
                .unwrap_or(Ok(()));
            if let Err(err) = seeked {
                tracing::error!("Error while trying to start printing: {}", err);
                self.trigger_error(err.to_string(), ErrorReason::StartPrint);
                return Err(err);
            }
        }

        self.send_marker(
            Marker::SetState {
                to: ConnectionState::Printing,
                only_from: Some(ConnectionState::Starting),
            },
            true,
        );
        self.continue_sending();
        Ok(())
    }

    /// Pause or resume the active print. Without `local_handling` the
    /// firmware already paused or resumed on its own, so no SD commands
    /// and no scripts are sent.
    pub(super) fn set_pause(self: &Arc<Self>, pause: bool, local_handling: bool, extra: Option<Tags>) {
        if self.is_streaming() || self.job.lock().is_none() {
            return;
        }
        let state = self.state();
        let paused = matches!(state, ConnectionState::Paused | ConnectionState::Pausing);
        let running = matches!(
            state,
            ConnectionState::Printing | ConnectionState::Starting | ConnectionState::Resuming
        );
        let extra = extra.unwrap_or_default();

        if !pause && paused {
            self.resume(local_handling, extra);
        } else if pause && running {
            self.pause(local_handling, extra);
        }
    }

    fn resume(self: &Arc<Self>, local_handling: bool, extra: Tags) {
        self.change_state(ConnectionState::Resuming);
        if let Some((name, origin)) = self.job_identity() {
            self.emit(PrinterEvent::Job(JobEvent::PrintResumed { name, origin }));
        }
        if local_handling {
            self.send_script(BEFORE_PRINT_RESUMED, ScriptContext::new(), true);
        }

        let mut labels = extra;
        labels.extend(tags(["trigger:comm.set_pause", "trigger:resume"]));
        if self.is_sd_file_selected() {
            if local_handling {
                self.send_command(self.job_command("M24", &labels));
            }
            self.send_command(self.job_command("M27", &labels));
        }

        self.send_marker(
            Marker::SetState {
                to: ConnectionState::Printing,
                only_from: Some(ConnectionState::Resuming),
            },
            true,
        );
        self.continue_sending();
    }

    fn pause(self: &Arc<Self>, local_handling: bool, extra: Tags) {
        self.change_state(ConnectionState::Pausing);

        let mut labels = extra;
        labels.extend(tags(["trigger:comm.set_pause", "trigger:pause"]));
        if self.is_sd_file_selected() && local_handling {
            self.send_command(self.job_command("M25", &labels));
        }

        if self.config.log_position_on_pause && local_handling {
            labels.insert("trigger:record_position".to_string());
            let inner = Arc::clone(self);
            let on_sent_labels = labels.clone();
            let command = self
                .job_command("M400", &labels)
                .on_sent(move || inner.start_pause_position_log(on_sent_labels));
            self.send_command(command);
            self.continue_sending();
        } else {
            self.pause_preparation_done(false, !local_handling);
        }
    }

    fn start_pause_position_log(self: &Arc<Self>, labels: Tags) {
        self.runtime.lock().record_pause_data = true;
        let wait = Timeouts::duration(self.config.timeouts.position_log_wait);
        let inner = Arc::clone(self);
        let timer = ResettableTimer::start(wait, move || inner.pause_preparation_failed());
        self.timers.lock().pause_position = Some(timer);
        self.send_command(self.job_command("M114", &labels));
    }

    fn pause_preparation_failed(self: &Arc<Self>) {
        self.log_comm(format!(
            "Did not receive parseable position data from printer within {}s, continuing without it",
            self.config.timeouts.position_log_wait
        ));
        self.pause_preparation_done(true, false);
    }

    /// Finish pausing once the position was recorded (or the wait timed
    /// out). With `check_timer`, only runs if a position log is pending.
    pub(super) fn pause_preparation_done(self: &Arc<Self>, check_timer: bool, suppress_script: bool) {
        let pending = self.timers.lock().pause_position.take();
        if pending.is_none() && check_timer {
            return;
        }
        drop(pending);

        if let Some((name, origin)) = self.job_identity() {
            self.emit(PrinterEvent::Job(JobEvent::PrintPaused { name, origin }));
        }
        if !suppress_script {
            self.send_script(AFTER_PRINT_PAUSED, ScriptContext::new(), true);
        }
        self.send_marker(
            Marker::SetState {
                to: ConnectionState::Paused,
                only_from: Some(ConnectionState::Pausing),
            },
            true,
        );
        self.continue_sending();
    }

    pub(super) fn cancel_print(
        self: &Arc<Self>,
        firmware_error: Option<String>,
        disable_log_position: bool,
        external_sd: bool,
    ) {
        self.cancel_print_tagged(firmware_error, disable_log_position, external_sd, Tags::new());
    }

    /// Cancel the active print; a running file transfer is aborted instead.
    pub(super) fn cancel_print_tagged(
        self: &Arc<Self>,
        firmware_error: Option<String>,
        disable_log_position: bool,
        external_sd: bool,
        extra: Tags,
    ) {
        let state = self.state();
        if !state.is_operational() || !state.is_busy() {
            return;
        }
        let Some((name, _)) = self.job_identity() else {
            return;
        };
        if self.is_streaming() {
            self.cancel_file_transfer();
            return;
        }

        self.emit(PrinterEvent::Job(JobEvent::PrintCancelling {
            name,
            firmware_error,
        }));
        self.change_state(ConnectionState::Cancelling);

        let mut labels = extra;
        labels.extend(tags(["trigger:comm.cancel", "trigger:cancel"]));

        if self.config.abort_heatup_on_cancel {
            self.send_command(
                OutgoingCommand::new("M108")
                    .with_tags(labels.iter().cloned())
                    .with_tag("trigger:abort_heatup")
                    .force(),
            );
        }

        if self.is_sd_file_selected() && !external_sd {
            self.send_command(self.job_command("M25", &labels));
            self.send_command(self.job_command("M27", &labels));
            self.send_command(self.job_command("M26 S0", &labels));
        }

        if self.config.log_position_on_cancel && !disable_log_position {
            labels.insert("trigger:record_position".to_string());
            let inner = Arc::clone(self);
            let on_sent_labels = labels.clone();
            let command = self
                .job_command("M400", &labels)
                .on_sent(move || inner.start_cancel_position_log(on_sent_labels));
            self.send_command(command);
            self.continue_sending();
        } else {
            self.cancel_preparation_done(false);
        }
    }

    fn start_cancel_position_log(self: &Arc<Self>, labels: Tags) {
        self.runtime.lock().record_cancel_data = true;
        let wait = Timeouts::duration(self.config.timeouts.position_log_wait);
        let inner = Arc::clone(self);
        let timer = ResettableTimer::start(wait, move || inner.cancel_preparation_failed());
        self.timers.lock().cancel_position = Some(timer);
        self.send_command(self.job_command("M114", &labels));
    }

    fn cancel_preparation_failed(self: &Arc<Self>) {
        self.log_comm(format!(
            "Did not receive parseable position data from printer within {}s, continuing without it",
            self.config.timeouts.position_log_wait
        ));
        self.cancel_preparation_done(true);
    }

    /// Finish cancelling once the position was recorded (or the wait timed
    /// out). With `check_timer`, only runs if a position log is pending.
    pub(super) fn cancel_preparation_done(self: &Arc<Self>, check_timer: bool) {
        let pending = self.timers.lock().cancel_position.take();
        if pending.is_none() && check_timer {
            return;
        }
        drop(pending);

        let cancelled = self.job.lock().as_mut().map(|job| {
            let source = job.source_mut();
            source.set_done(true);
            (source.filename().to_string(), source.origin(), source.pos())
        });
        self.record_file_position();
        if let Some((name, origin, position)) = cancelled {
            self.emit(PrinterEvent::Job(JobEvent::PrintCancelled {
                name,
                origin,
                position,
            }));
        }
        self.send_script(AFTER_PRINT_CANCELLED, ScriptContext::new(), true);
        self.send_marker(
            Marker::SetState {
                to: ConnectionState::Operational,
                only_from: None,
            },
            true,
        );
        self.continue_sending();
    }

    /// The job ran out of lines, or the firmware finished the SD print.
    pub(super) fn finish_print(self: &Arc<Self>) {
        self.change_state(ConnectionState::Finishing);

        let finished = self.job.lock().as_mut().map(|job| {
            let source = job.source_mut();
            source.set_done(true);
            let elapsed = source.elapsed().map(|d| d.as_secs_f64()).unwrap_or(0.0);
            (source.filename().to_string(), source.origin(), elapsed)
        });

        self.send_command(
            OutgoingCommand::new("M400")
                .with_tag("trigger:comm.finish_print")
                .part_of_job(),
        );
        if let Some((name, origin, elapsed_secs)) = finished {
            self.emit(PrinterEvent::Job(JobEvent::PrintDone {
                name,
                origin,
                elapsed_secs,
            }));
        }
        self.send_script(AFTER_PRINT_DONE, ScriptContext::new(), true);
        self.send_marker(
            Marker::SetState {
                to: ConnectionState::Operational,
                only_from: None,
            },
            true,
        );
    }

    pub(super) fn select_file(self: &Arc<Self>, name: &str, sd: bool) -> Result<()> {
        let state = self.state();
        if state.is_busy() {
            return Err(invalid_state("select_file", state));
        }

        if sd {
            if !state.is_operational() {
                return Err(invalid_state("select_file", state));
            }
            let name = {
                let mut rt = self.runtime.lock();
                let name = if rt.sd_relative_path {
                    name.strip_prefix('/').unwrap_or(name)
                } else {
                    name
                };
                rt.sd.file_to_select = Some(name.to_string());
                name.to_string()
            };
            self.send_command(
                OutgoingCommand::new(format!("M23 {}", name)).with_tag("trigger:comm.select_file"),
            );
            return Ok(());
        }

        let job = LocalFileJob::new(name)?;
        let (filename, size) = (job.filename().to_string(), job.size());
        *self.job.lock() = Some(Job::Local(job));
        self.emit(PrinterEvent::Job(JobEvent::FileSelected {
            name: Some(filename),
            size,
            origin: Some(JobOrigin::Local),
        }));
        Ok(())
    }

    /// Make `name` on the SD card the active job, as reported by the
    /// firmware after `M23`.
    pub(super) fn sd_file_opened(&self, name: &str, size: Option<u64>) {
        let name = {
            let mut rt = self.runtime.lock();
            if rt.sd.ignore_select {
                return;
            }
            rt.sd.file_to_select.take().unwrap_or_else(|| name.to_string())
        };
        *self.job.lock() = Some(Job::Sd(SdCardJob::new(name, size)));
    }

    /// The firmware confirmed the selection. Selections made by
    /// `start_print` stay silent.
    pub(super) fn sd_file_selected(&self) {
        if std::mem::take(&mut self.runtime.lock().sd.ignore_select) {
            return;
        }
        let selected = self.job.lock().as_ref().filter(|job| job.is_sd()).map(|job| {
            let source = job.source();
            (source.filename().to_string(), source.size())
        });
        if let Some((name, size)) = selected {
            self.emit(PrinterEvent::Job(JobEvent::FileSelected {
                name: Some(name),
                size,
                origin: Some(JobOrigin::SdCard),
            }));
        }
    }

    pub(super) fn unselect_file(&self) {
        if self.state().is_busy() {
            return;
        }
        *self.job.lock() = None;
        self.emit(PrinterEvent::Job(JobEvent::FileSelected {
            name: None,
            size: None,
            origin: None,
        }));
    }

    pub(super) fn start_file_transfer(
        self: &Arc<Self>,
        path: PathBuf,
        remote: &str,
        special: bool,
    ) -> Result<()> {
        let state = self.state();
        if !state.is_operational() || state.is_busy() {
            tracing::info!("Printer is not operational or busy");
            return Err(invalid_state("start_file_transfer", state));
        }

        self.reset_line_numbers_tagged(0, false, "trigger:comm.start_file_transfer");

        let local = file_name(&path);
        let mut job = if special {
            StreamingJob::special(&path, local.clone(), remote)?
        } else {
            StreamingJob::new(&path, local.clone(), remote)?
        };
        job.start()?;
        let size = job.size();
        *self.job.lock() = Some(Job::Streaming(job));

        self.send_command(
            OutgoingCommand::new(format!("M28 {}", remote))
                .with_tag("trigger:comm.start_file_transfer"),
        );
        self.emit(PrinterEvent::Transfer(TransferEvent::Started {
            local,
            remote: remote.to_string(),
            size,
        }));
        Ok(())
    }

    pub(super) fn cancel_file_transfer(self: &Arc<Self>) {
        if !self.state().is_operational() || !self.is_streaming() {
            tracing::info!("Printer is not operational or not streaming");
            return;
        }
        self.finish_file_transfer(true);
    }

    /// Close the file on the card with `M29`; a marker then ends the
    /// transfer.
    pub(super) fn finish_file_transfer(self: &Arc<Self>, failed: bool) {
        let transfer = self.job.lock().as_mut().and_then(|job| {
            job.source_mut().set_done(true);
            let elapsed_secs = job
                .source()
                .elapsed()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            job.as_streaming().map(|streaming| {
                (
                    streaming.local_name().to_string(),
                    streaming.remote_name().to_string(),
                    elapsed_secs,
                )
            })
        });
        let Some((local, remote, elapsed_secs)) = transfer else {
            return;
        };

        self.enqueue_command(
            QueueItem::command("M29").with_tags(tags(["trigger:comm.finish_file_transfer"])),
        );
        if failed {
            self.delete_sd_file(&remote);
        }
        self.enqueue_command(QueueItem::marker(Marker::FinishTransfer {
            local,
            remote,
            elapsed_secs,
            failed,
        }));
    }

    pub(super) fn init_sd_card(self: &Arc<Self>) {
        if !self.config.sd_support || !self.state().is_operational() {
            return;
        }
        self.send_command(OutgoingCommand::new("M21").with_tag("trigger:comm.init_sd_card"));

        let always_available = {
            let mut rt = self.runtime.lock();
            if rt.sd_always_available {
                rt.sd.available = true;
            }
            rt.sd_always_available
        };
        if always_available {
            self.refresh_sd_files();
            self.emit(PrinterEvent::Sd(SdEvent::StateChanged { available: true }));
        }
    }

    pub(super) fn release_sd_card(self: &Arc<Self>) {
        let state = self.state();
        if !self.config.sd_support
            || !state.is_operational()
            || (state.is_busy() && self.is_sd_file_selected())
        {
            return;
        }
        self.send_command(OutgoingCommand::new("M22").with_tag("trigger:comm.release_sd_card"));
        {
            let mut rt = self.runtime.lock();
            rt.sd.available = false;
            rt.sd.files.clear();
        }
        self.emit(PrinterEvent::Sd(SdEvent::StateChanged { available: false }));
        self.emit(PrinterEvent::Sd(SdEvent::FilesListed { files: Vec::new() }));
    }

    pub(super) fn refresh_sd_files(self: &Arc<Self>) {
        self.refresh_sd_files_tagged([]);
    }

    pub(super) fn refresh_sd_files_tagged<const N: usize>(self: &Arc<Self>, extra: [&str; N]) {
        let state = self.state();
        if !self.config.sd_support || !state.is_operational() || state.is_busy() {
            return;
        }
        self.send_command(
            OutgoingCommand::new("M20")
                .with_tag("trigger:comm.refresh_sd_files")
                .with_tags(extra),
        );
    }

    pub(super) fn delete_sd_file(self: &Arc<Self>, name: &str) {
        if !self.config.sd_support {
            return;
        }
        let state = self.state();
        let printing_it = state.is_busy()
            && self
                .job
                .lock()
                .as_ref()
                .is_some_and(|job| job.is_sd() && job.source().filename() == name);
        if !state.is_operational() || printing_it {
            return;
        }
        self.send_command(
            OutgoingCommand::new(format!("M30 {}", name.to_lowercase()))
                .with_tag("trigger:comm.delete_sd_file"),
        );
        self.refresh_sd_files();
    }

    pub(super) fn set_job_on_hold(self: &Arc<Self>, hold: bool) {
        let released = {
            let mut holds = self.job_hold.lock();
            if hold {
                *holds += 1;
                false
            } else {
                *holds = holds.saturating_sub(1);
                *holds == 0
            }
        };
        if released {
            self.continue_sending();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_context_position() {
        let mut position = PositionRecord::new();
        position.x = Some(10.0);
        position.z = Some(0.2);
        position.t = Some(1);

        let context = with_position(ScriptContext::new(), "pause_position", &position);
        assert_eq!(context.get("pause_position.x"), Some("10"));
        assert_eq!(context.get("pause_position.z"), Some("0.2"));
        assert_eq!(context.get("pause_position.t"), Some("1"));
        assert_eq!(context.get("pause_position.y"), None);
    }

    #[test]
    fn test_script_context_temperatures() {
        let mut temperatures = TemperatureRecord::new();
        temperatures.set_tool(0, Some(210.0), Some(215.0));
        temperatures.set_bed(Some(60.0), None);

        let context = with_temperatures(ScriptContext::new(), "last_temperature", &temperatures);
        assert_eq!(context.get("last_temperature.tool0.actual"), Some("210"));
        assert_eq!(context.get("last_temperature.tool0.target"), Some("215"));
        assert_eq!(context.get("last_temperature.bed.actual"), Some("60"));
        assert_eq!(context.get("last_temperature.bed.target"), None);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name(Path::new("/tmp/jobs/cube.gcode")), "cube.gcode");
    }
}
