//! Outgoing side: routing commands into the queues, draining the pipeline
//! and writing lines to the transport.

use super::Inner;
use crate::hooks::{CommandPhase, PhaseCommand};
use crate::job::JobLine;
use crate::pipeline::{Marker, OutgoingCommand, Payload, QueueItem, Tags};
use crate::protocol::{command_code, encode_line, frame_line, process_gcode_line};
use crate::scripts::{script_tags, ScriptContext};
use printlink_core::{ConnectionState, JobEvent, PrinterEvent, TransferEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Resolve once `shutdown` flips to true or its sender is gone.
pub(super) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// The sending loop: wait for credit, take the next item, write it.
pub(super) async fn send_loop(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        let item = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            item = async {
                inner.clear_to_send.wait().await;
                inner.send_queue.get().await
            } => item,
        };

        if !inner.is_active() {
            break;
        }
        inner.wait_while_dwelling().await;
        inner.send_item(item).await;
    }
    inner.log_comm("Closing down send loop");
}

enum NextJobLine {
    Line(JobLine),
    Nothing,
    Finished,
}

impl Inner {
    /// Route a command into the command queue, the job queue or straight
    /// into the send queue.
    pub(super) fn send_command(self: &Arc<Self>, command: OutgoingCommand) -> bool {
        let OutgoingCommand {
            text,
            command_type,
            tags,
            on_sent,
            force,
            part_of_job,
        } = command;

        let Some(text) = process_gcode_line(&text, None, None) else {
            return false;
        };
        let emergency = command_code(&text, self.config.support_f_as_command)
            .is_some_and(|code| self.config.is_emergency(&code.gcode));

        let item = QueueItem {
            payload: Payload::Command(text),
            command_type,
            tags,
            on_sent,
            line_number: None,
        };
        self.route(item, part_of_job, force || emergency)
    }

    /// Put a marker into the pipeline.
    pub(super) fn send_marker(self: &Arc<Self>, marker: Marker, part_of_job: bool) -> bool {
        self.route(QueueItem::marker(marker), part_of_job, false)
    }

    fn route(self: &Arc<Self>, mut item: QueueItem, part_of_job: bool, force: bool) -> bool {
        if part_of_job {
            item.tags.insert("source:job".to_string());
            self.job_queue.put(item);
            return true;
        }

        let state = self.state();
        if state.is_printing() && !self.is_sd_file_selected() && !self.job_on_hold() && !force {
            return match self.command_queue.put(item) {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!("Type already in command queue: {}", err.command_type);
                    false
                }
            };
        }

        if state.is_operational() || force {
            return self.enqueue_command(item);
        }
        false
    }

    /// Render script `name` and send its lines.
    pub(super) fn send_script(
        self: &Arc<Self>,
        name: &str,
        context: ScriptContext,
        part_of_job: bool,
    ) -> bool {
        let lines = self.render_script(name, context);
        if lines.is_empty() {
            return false;
        }

        let mut base = script_tags(name);
        base.insert("trigger:comm.send_gcode_script".to_string());
        for (text, tags) in lines {
            let mut command = OutgoingCommand::new(text)
                .with_tags(base.iter().cloned())
                .with_tags(tags);
            command.part_of_job = part_of_job;
            self.send_command(command);
        }
        true
    }

    /// Run an item through the queuing phase and into the send queue.
    pub(super) fn enqueue_command(self: &Arc<Self>, item: QueueItem) -> bool {
        if self.transport().is_none() {
            return false;
        }

        let QueueItem {
            payload,
            command_type,
            tags,
            on_sent,
            ..
        } = item;
        let text = match payload {
            Payload::Marker(marker) => {
                return self.enqueue_for_sending(QueueItem::marker(marker), false);
            }
            Payload::Command(text) => text,
        };

        let support_f = self.config.support_f_as_command;
        let command = PhaseCommand::new(text, command_type, tags, support_f);
        let streaming = self.is_streaming();
        let results = if streaming {
            vec![command]
        } else {
            self.process_phase(CommandPhase::Queuing, command)
        };
        if results.is_empty() {
            return false;
        }

        let last = results.len() - 1;
        let mut on_sent = on_sent;
        let mut enqueued = false;
        for (index, command) in results.into_iter().enumerate() {
            if command.gcode.is_none() && command.command.starts_with('@') {
                self.process_at_command_phase(CommandPhase::Queuing, &command.command, &command.tags);
            }

            let item = QueueItem {
                payload: Payload::Command(command.command.clone()),
                command_type: command.command_type.clone(),
                tags: command.tags.clone(),
                on_sent: if index == last { on_sent.take() } else { None },
                line_number: None,
            };
            if self.enqueue_for_sending(item, false) {
                if !streaming {
                    self.process_phase(CommandPhase::Queued, command);
                }
                enqueued = true;
            }
        }
        enqueued
    }

    pub(super) fn enqueue_for_sending(&self, item: QueueItem, resend: bool) -> bool {
        match self.send_queue.put(item, resend) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!("Type already in send queue: {}", err.command_type);
                false
            }
        }
    }

    async fn wait_while_dwelling(&self) {
        let until = {
            let rt = self.runtime.lock();
            if !rt.block_while_dwelling {
                return;
            }
            rt.dwelling_until
        };
        if let Some(until) = until {
            if Instant::now() < until {
                tokio::time::sleep_until(until).await;
            }
            self.runtime.lock().dwelling_until = None;
        }
    }

    async fn send_item(self: &Arc<Self>, item: QueueItem) {
        let QueueItem {
            payload,
            command_type,
            tags,
            on_sent,
            line_number,
        } = item;

        let text = match payload {
            Payload::Marker(marker) => {
                self.run_marker(marker);
                self.continue_sending();
                return;
            }
            Payload::Command(text) => text,
        };

        let support_f = self.config.support_f_as_command;
        let command = PhaseCommand::new(text, command_type, tags, support_f);

        if let Some(line_number) = line_number {
            // Resent lines were processed on their first trip.
            self.use_up_clear(command.gcode.as_deref());
            self.write_line(frame_line(line_number, &command.command))
                .await;
            return;
        }

        let mut results = self.process_phase(CommandPhase::Sending, command);
        if results.is_empty() {
            self.continue_sending();
            return;
        }
        let command = results.swap_remove(0);

        if command.command.trim().is_empty() {
            tracing::info!("Refusing to send an empty line to the printer");
            self.continue_sending();
            return;
        }

        if command.gcode.is_none() && command.command.starts_with('@') {
            self.process_at_command_phase(CommandPhase::Sending, &command.command, &command.tags);
            self.continue_sending();
            return;
        }

        let used_up_clear = self.use_up_clear(command.gcode.as_deref());
        self.do_send(&command.command, command.gcode.as_deref()).await;
        if !used_up_clear {
            self.continue_sending();
        }

        if let Some(callback) = on_sent {
            callback.run();
        }
        self.process_phase(CommandPhase::Sent, command);
    }

    fn run_marker(self: &Arc<Self>, marker: Marker) {
        match marker {
            Marker::SetState { to, only_from } => {
                if only_from.is_none_or(|from| self.state() == from) {
                    self.change_state(to);
                }
            }
            Marker::FinishTransfer {
                local,
                remote,
                elapsed_secs,
                failed,
            } => {
                *self.job.lock() = None;
                self.change_state(ConnectionState::Operational);
                let event = if failed {
                    TransferEvent::Failed {
                        local,
                        remote,
                        elapsed_secs,
                    }
                } else {
                    TransferEvent::Done {
                        local,
                        remote,
                        elapsed_secs,
                    }
                };
                self.emit(PrinterEvent::Transfer(event));
                self.refresh_sd_files_tagged(["trigger:comm.finish_file_transfer"]);
            }
            Marker::Callback(callback) => callback.run(),
        }
    }

    /// Take one unit of credit if the command will be acknowledged.
    pub(super) fn use_up_clear(&self, gcode: Option<&str>) -> bool {
        let eats_clear = gcode.is_some() || self.runtime.lock().unknown_commands_need_ack;
        if eats_clear {
            self.clear_to_send.consume();
        }
        eats_clear
    }

    fn checksum_enabled(&self) -> bool {
        if self.config.never_send_checksum {
            return false;
        }
        let job_wants_checksum = self.state().is_printing()
            && self
                .job
                .lock()
                .as_ref()
                .is_some_and(|job| job.source().wants_checksum());
        let rt = self.runtime.lock();
        job_wants_checksum || rt.always_send_checksum || !rt.firmware_info_received
    }

    fn needs_checksum(&self, gcode: Option<&str>) -> bool {
        let requiring = gcode.is_some_and(|gcode| self.config.requires_checksum(gcode));
        let allowing = gcode.is_some() || self.config.send_checksum_with_unknown_commands;
        requiring || (allowing && self.checksum_enabled())
    }

    /// Write `command`, framed with the next line number if required.
    pub(super) async fn do_send(self: &Arc<Self>, command: &str, gcode: Option<&str>) {
        let command: String = command
            .chars()
            .map(|c| if c.is_ascii() { c } else { '?' })
            .collect();

        if self.needs_checksum(gcode) {
            self.send_with_next_line_number(&command).await;
        } else {
            let _guard = self.write_lock.lock().await;
            self.write_unlocked(&command).await;
        }
    }

    /// Assign the next line number and write the framed line.
    pub(super) async fn send_with_next_line_number(self: &Arc<Self>, command: &str) {
        let _guard = self.write_lock.lock().await;
        let line_number = self.lines.lock().assign(command);
        self.write_unlocked(&frame_line(line_number, command)).await;
    }

    /// Write a line under the write lock.
    pub(super) async fn write_line(self: &Arc<Self>, line: String) {
        let _guard = self.write_lock.lock().await;
        self.write_unlocked(&line).await;
    }

    /// Write a line; the caller holds the write lock.
    async fn write_unlocked(self: &Arc<Self>, line: &str) {
        let Some(transport) = self.transport() else {
            return;
        };

        tracing::debug!("Send: {}", line);
        self.log_comm(format!("Send: {}", line));

        let data = encode_line(line);
        let mut written = 0;
        let mut passes = 0u32;
        while written < data.len() {
            match transport.write(&data[written..]).await {
                Ok(0) => {
                    passes += 1;
                    if passes > self.config.max_write_passes {
                        let message = format!(
                            "Could not write anything to the serial port in {} tries, something appears to be wrong with the printer communication",
                            self.config.max_write_passes
                        );
                        tracing::error!("{}", message);
                        self.log_comm(message);
                        self.set_error_text("Could not write to serial port");
                        self.close_detached(true);
                        return;
                    }
                    if passes > 1 {
                        tokio::time::sleep(Duration::from_millis(u64::from(passes - 1) * 100))
                            .await;
                    }
                }
                Ok(count) => written += count,
                Err(err) => {
                    if !self.is_closing() {
                        tracing::error!("Unexpected error while writing to serial port: {}", err);
                        self.log_comm(format!(
                            "Unexpected error while writing to serial port: {}",
                            err
                        ));
                        self.set_error_text(err.to_string());
                        self.close_detached(true);
                    }
                    return;
                }
            }
        }
    }

    /// Refill the send queue from the command queue, the job queue or the
    /// job, in that order.
    pub(super) fn continue_sending(self: &Arc<Self>) -> bool {
        while self.is_active() {
            let job_active = matches!(
                self.state(),
                ConnectionState::Starting | ConnectionState::Printing
            ) && self
                .job
                .lock()
                .as_ref()
                .is_some_and(|job| !job.source().is_done() && !job.is_sd());

            if self.send_from_command_queue() {
                return true;
            }
            if self.job_on_hold() {
                return false;
            }
            if self.send_from_job_queue() {
                return true;
            }
            if job_active && self.send_from_job() {
                return true;
            }
            if !job_active {
                return false;
            }
            tracing::debug!("No command sent on ok while printing, doing another iteration");
        }
        false
    }

    fn send_from_command_queue(self: &Arc<Self>) -> bool {
        loop {
            if self.is_streaming() {
                return false;
            }
            let Some(item) = self.command_queue.get() else {
                return false;
            };
            if self.enqueue_command(item) {
                return true;
            }
        }
    }

    fn send_from_job_queue(self: &Arc<Self>) -> bool {
        self.job_queue
            .get()
            .is_some_and(|item| self.enqueue_command(item))
    }

    fn send_from_job(self: &Arc<Self>) -> bool {
        while self.is_active() {
            if !matches!(
                self.state(),
                ConnectionState::Starting | ConnectionState::Printing
            ) || self.job_on_hold()
            {
                return false;
            }

            match self.next_job_line() {
                NextJobLine::Line(line) => {
                    let tags: Tags = [
                        "source:file".to_string(),
                        format!("filepos:{}", line.pos),
                        format!("fileline:{}", line.line_number),
                    ]
                    .into_iter()
                    .collect();
                    let text = line.line;
                    let sent = self.enqueue_command(QueueItem::command(text.clone()).with_tags(tags));
                    self.emit_progress();
                    if sent {
                        return true;
                    }
                    tracing::debug!(
                        "Command \"{}\" from file not enqueued, doing another iteration",
                        text
                    );
                }
                NextJobLine::Finished => {
                    self.emit_progress();
                    return false;
                }
                NextJobLine::Nothing => return false,
            }
        }
        false
    }

    fn next_job_line(self: &Arc<Self>) -> NextJobLine {
        let offsets = self.offsets.read().clone();
        let tool = self.current_tool();
        let (result, streaming) = {
            let mut job = self.job.lock();
            let Some(job) = job.as_mut() else {
                return NextJobLine::Nothing;
            };
            let streaming = job.is_streaming();
            (job.source_mut().next_line(Some(&offsets), Some(tool)), streaming)
        };

        match result {
            Ok(Some(line)) => NextJobLine::Line(line),
            Ok(None) if streaming => {
                self.finish_file_transfer(false);
                NextJobLine::Nothing
            }
            Ok(None) => {
                self.finish_print();
                NextJobLine::Finished
            }
            Err(err) => {
                tracing::error!("Error reading from the printed file: {}", err);
                self.log_comm(
                    "There was an error reading from the file that's being printed, cancelling the print. Please consult the log for details on the error.",
                );
                self.cancel_print(None, false, false);
                NextJobLine::Nothing
            }
        }
    }

    /// Report job progress.
    pub(super) fn emit_progress(&self) {
        let progress = self
            .job
            .lock()
            .as_ref()
            .map(|job| (job.source().progress(), job.source().pos()));
        if let Some((progress, position)) = progress {
            self.emit(PrinterEvent::Job(JobEvent::Progress { progress, position }));
        }
    }

    /// Restart line numbering with `M110`.
    pub(super) fn reset_line_numbers(self: &Arc<Self>, line_number: u64, part_of_job: bool) {
        self.reset_line_numbers_tagged(line_number, part_of_job, "trigger:comm.reset_line_numbers");
    }

    pub(super) fn reset_line_numbers_tagged(
        self: &Arc<Self>,
        line_number: u64,
        part_of_job: bool,
        trigger: &str,
    ) {
        if !self.state().is_operational() {
            return;
        }
        let mut command = OutgoingCommand::new(format!("M110 N{}", line_number))
            .with_tag("trigger:comm.reset_line_numbers")
            .with_tag(trigger);
        command.part_of_job = part_of_job;
        self.send_command(command);
    }

    /// Send the hello command, bypassing the queues' state checks.
    pub(super) fn say_hello(self: &Arc<Self>, trigger: &str) {
        let command = OutgoingCommand::new(self.config.hello_command.clone())
            .with_tag("trigger:comm.say_hello")
            .with_tag(trigger)
            .force();
        self.send_command(command);
        self.clear_to_send.release();
        self.runtime.lock().hello_sent += 1;
    }
}
