//! Command phase processing.
//!
//! Every command passes the queuing, queued, sending and sent phases. In each
//! phase it runs through the registered command hooks, then through the
//! handler for its G/M/T code (see [`code_handler`]), then through the
//! generic handler of the phase.

use super::Inner;
use crate::hooks::{CommandPhase, HookOutcome, PhaseCommand, Rewrite};
use crate::pipeline::{tags, Tags};
use crate::protocol::{float_parameter, int_parameter};
use crate::scripts::{ScriptContext, AFTER_TOOL_CHANGE, BEFORE_TOOL_CHANGE};
use printlink_core::data::CAPABILITY_EMERGENCY_PARSER;
use printlink_core::{PrinterEvent, TelemetryEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type CodeHandler = fn(&Arc<Inner>, &PhaseCommand) -> HookOutcome;

/// Handler for `gcode` in `phase`, if there is one.
fn code_handler(gcode: &str, phase: CommandPhase) -> Option<CodeHandler> {
    use CommandPhase::*;
    let handler: CodeHandler = match (gcode, phase) {
        ("T", Queuing) => tool_queuing,
        ("T", Sending) => tool_sending,
        ("T", Sent) => tool_sent,
        ("G0" | "G1", Sent) => move_sent,
        ("G28", Sent) => home_sent,
        ("G4", Sent) => dwell_sent,
        ("M28", Sent) => begin_write_sent,
        ("M29", Sent) => end_write_sent,
        ("M140" | "M190", Queuing) => bed_queuing,
        ("M141" | "M191", Queuing) => chamber_queuing,
        ("M104", Sent) => |inner, cmd| tool_target_sent(inner, cmd, false),
        ("M109", Sent) => |inner, cmd| {
            inner.start_heatup();
            tool_target_sent(inner, cmd, true)
        },
        ("M140", Sent) => |inner, cmd| bed_target_sent(inner, cmd, false),
        ("M190", Sent) => |inner, cmd| {
            inner.start_heatup();
            bed_target_sent(inner, cmd, true)
        },
        ("M141", Sent) => |inner, cmd| chamber_target_sent(inner, cmd, false),
        ("M191", Sent) => |inner, cmd| {
            inner.start_heatup();
            chamber_target_sent(inner, cmd, true)
        },
        ("M116", Sent) => |inner, _| {
            inner.start_heatup();
            HookOutcome::Unchanged
        },
        ("M155", Sending) => autoreport_temperature_sending,
        ("M27", Sending) => autoreport_sd_status_sending,
        ("M110", Sending) => line_number_sending,
        ("M112", Queuing) => emergency_stop_queuing,
        ("M114", Queued | Sent) => |inner, _| {
            inner.reset_position_timers();
            HookOutcome::Unchanged
        },
        _ => return None,
    };
    Some(handler)
}

fn tool_parameter(cmd: &PhaseCommand) -> Option<u32> {
    int_parameter(&cmd.command, 'T').and_then(|tool| u32::try_from(tool).ok())
}

fn tool_queuing(inner: &Arc<Inner>, cmd: &PhaseCommand) -> HookOutcome {
    let Some(new_tool) = tool_parameter(cmd) else {
        return HookOutcome::Unchanged;
    };
    if !inner.validate_tool(new_tool) {
        inner.log_comm(format!(
            "Not queuing T{}, that tool doesn't exist according to the printer profile or was reported as invalid by the firmware",
            new_tool
        ));
        return HookOutcome::Suppress;
    }

    let context = ScriptContext::new()
        .with("tool.old", inner.current_tool())
        .with("tool.new", new_tool);
    let before = inner.render_script(BEFORE_TOOL_CHANGE, context.clone());
    let after = inner.render_script(AFTER_TOOL_CHANGE, context);
    if before.is_empty() && after.is_empty() {
        return HookOutcome::Unchanged;
    }

    let script_line = |(line, tags): (String, Tags)| Rewrite::new(line).with_tags(tags);
    let mut rewrites: Vec<Rewrite> = before.into_iter().map(script_line).collect();
    rewrites.push(Rewrite::new(cmd.command.clone()));
    rewrites.extend(after.into_iter().map(script_line));
    HookOutcome::Replace(rewrites)
}

fn tool_sending(inner: &Arc<Inner>, cmd: &PhaseCommand) -> HookOutcome {
    match tool_parameter(cmd) {
        Some(new_tool) if !inner.validate_tool(new_tool) => {
            inner.log_comm(format!(
                "Not sending T{}, that tool doesn't exist according to the printer profile or was reported as invalid by the firmware",
                new_tool
            ));
            HookOutcome::Suppress
        }
        _ => HookOutcome::Unchanged,
    }
}

fn tool_sent(inner: &Arc<Inner>, cmd: &PhaseCommand) -> HookOutcome {
    if let Some(new_tool) = tool_parameter(cmd) {
        let old = {
            let mut rt = inner.runtime.lock();
            let old = rt.current_tool;
            rt.former_tool = Some(old);
            rt.current_tool = new_tool;
            old
        };
        inner.emit(PrinterEvent::Telemetry(TelemetryEvent::ToolChange {
            old,
            new: new_tool,
        }));
    }
    HookOutcome::Unchanged
}

fn move_sent(inner: &Arc<Inner>, cmd: &PhaseCommand) -> HookOutcome {
    let z = float_parameter(&cmd.command, 'Z');
    let f = float_parameter(&cmd.command, 'F');
    let z_change = {
        let mut rt = inner.runtime.lock();
        if f.is_some() {
            rt.current_f = f;
        }
        match z {
            Some(z) if rt.current_z != Some(z) => {
                let old = rt.current_z.replace(z);
                Some((z, old))
            }
            _ => None,
        }
    };
    if let Some((z, old)) = z_change {
        inner.emit(PrinterEvent::Telemetry(TelemetryEvent::ZChange { z, old }));
    }
    HookOutcome::Unchanged
}

fn home_sent(inner: &Arc<Inner>, cmd: &PhaseCommand) -> HookOutcome {
    if let Some(f) = float_parameter(&cmd.command, 'F') {
        inner.runtime.lock().current_f = Some(f);
    }
    HookOutcome::Unchanged
}

fn dwell_sent(inner: &Arc<Inner>, cmd: &PhaseCommand) -> HookOutcome {
    let seconds = float_parameter(&cmd.command, 'P')
        .map(|millis| millis / 1000.0)
        .or_else(|| float_parameter(&cmd.command, 'S'))
        .unwrap_or(0.0);
    let dwell = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);

    let deadline = inner.new_communication_deadline() + dwell;
    let mut rt = inner.runtime.lock();
    rt.timeout = deadline;
    rt.dwelling_until = Some(Instant::now() + dwell);
    HookOutcome::Unchanged
}

fn begin_write_sent(inner: &Arc<Inner>, _cmd: &PhaseCommand) -> HookOutcome {
    if !inner.is_streaming() {
        inner.log_comm("Detected manual streaming. Disabling temperature polling. Finish writing with M29. Do NOT attempt to print while manually streaming!");
        inner.runtime.lock().manual_streaming = true;
    }
    HookOutcome::Unchanged
}

fn end_write_sent(inner: &Arc<Inner>, _cmd: &PhaseCommand) -> HookOutcome {
    let was_streaming = std::mem::take(&mut inner.runtime.lock().manual_streaming);
    if was_streaming {
        inner.log_comm("Manual streaming done. Re-enabling temperature polling. All is well.");
    }
    HookOutcome::Unchanged
}

fn bed_queuing(inner: &Arc<Inner>, cmd: &PhaseCommand) -> HookOutcome {
    if inner.config.heated_bed {
        return HookOutcome::Unchanged;
    }
    inner.log_comm(format!(
        "Warn: Not sending \"{}\", printer profile has no heated bed",
        cmd.command
    ));
    HookOutcome::Suppress
}

fn chamber_queuing(inner: &Arc<Inner>, cmd: &PhaseCommand) -> HookOutcome {
    if inner.config.heated_chamber {
        return HookOutcome::Unchanged;
    }
    inner.log_comm(format!(
        "Warn: Not sending \"{}\", printer profile has no heated chamber",
        cmd.command
    ));
    HookOutcome::Suppress
}

/// `S`, or `R` for the waiting variants.
fn target_parameter(cmd: &PhaseCommand, wait: bool) -> Option<f64> {
    float_parameter(&cmd.command, 'S')
        .or_else(|| wait.then(|| float_parameter(&cmd.command, 'R')).flatten())
}

fn tool_target_sent(inner: &Arc<Inner>, cmd: &PhaseCommand, wait: bool) -> HookOutcome {
    let tool = {
        let mut rt = inner.runtime.lock();
        match tool_parameter(cmd) {
            Some(tool) => {
                if wait {
                    rt.tool_before_heatup = Some(rt.current_tool);
                    rt.current_tool = tool;
                }
                tool
            }
            None => rt.current_tool,
        }
    };

    if let Some(target) = target_parameter(cmd, wait) {
        let record = {
            let mut temperatures = inner.temperatures.write();
            temperatures.tool(tool).is_some().then(|| {
                temperatures.set_tool(tool, None, Some(target));
                temperatures.clone()
            })
        };
        if let Some(record) = record {
            inner.emit(PrinterEvent::Telemetry(TelemetryEvent::Temperature(record)));
        }
    }
    HookOutcome::Unchanged
}

fn bed_target_sent(inner: &Arc<Inner>, cmd: &PhaseCommand, wait: bool) -> HookOutcome {
    if let Some(target) = target_parameter(cmd, wait) {
        let record = {
            let mut temperatures = inner.temperatures.write();
            temperatures.set_bed(None, Some(target));
            temperatures.clone()
        };
        inner.emit(PrinterEvent::Telemetry(TelemetryEvent::Temperature(record)));
    }
    HookOutcome::Unchanged
}

fn chamber_target_sent(inner: &Arc<Inner>, cmd: &PhaseCommand, wait: bool) -> HookOutcome {
    if let Some(target) = target_parameter(cmd, wait) {
        let record = {
            let mut temperatures = inner.temperatures.write();
            temperatures.set_chamber(None, Some(target));
            temperatures.clone()
        };
        inner.emit(PrinterEvent::Telemetry(TelemetryEvent::Temperature(record)));
    }
    HookOutcome::Unchanged
}

fn autoreport_temperature_sending(inner: &Arc<Inner>, cmd: &PhaseCommand) -> HookOutcome {
    if let Some(interval) = int_parameter(&cmd.command, 'S') {
        let enabled = inner
            .capabilities
            .read()
            .is_enabled(printlink_core::data::CAPABILITY_AUTOREPORT_TEMP);
        inner.runtime.lock().temperature_autoreporting = enabled && interval > 0;
    }
    HookOutcome::Unchanged
}

fn autoreport_sd_status_sending(inner: &Arc<Inner>, cmd: &PhaseCommand) -> HookOutcome {
    if let Some(interval) = int_parameter(&cmd.command, 'S') {
        let enabled = inner
            .capabilities
            .read()
            .is_enabled(printlink_core::data::CAPABILITY_AUTOREPORT_SD_STATUS);
        inner.runtime.lock().sd_status_autoreporting = enabled && interval > 0;
    }
    HookOutcome::Unchanged
}

fn line_number_sending(inner: &Arc<Inner>, cmd: &PhaseCommand) -> HookOutcome {
    let line_number = int_parameter(&cmd.command, 'N').unwrap_or(0);
    tracing::info!("M110 detected, setting current line number to {}", line_number);
    inner.lines.lock().reset(line_number);
    HookOutcome::Unchanged
}

fn emergency_stop_queuing(inner: &Arc<Inner>, _cmd: &PhaseCommand) -> HookOutcome {
    inner.spawn_emergency_stop(true);
    HookOutcome::Suppress
}

impl Inner {
    /// Run `command` through `phase`.
    ///
    /// Returns the commands to continue with; an empty list drops the
    /// command. Only the queuing phase may return more than one.
    pub(super) fn process_phase(
        self: &Arc<Self>,
        phase: CommandPhase,
        command: PhaseCommand,
    ) -> Vec<PhaseCommand> {
        tracing::debug!(
            "phase: {} | command: {} | command_type: {:?} | gcode: {:?} | tags: [ {} ]",
            phase,
            command.command,
            command.command_type,
            command.gcode,
            command.tags.iter().cloned().collect::<Vec<_>>().join(", ")
        );

        if self.is_streaming() && self.state().is_printing() {
            return vec![command];
        }

        let support_f = self.config.support_f_as_command;
        let results = self.hooks.process_command(phase, command, support_f);
        if results.is_empty() {
            return results;
        }

        let mut handled = false;
        let mut next = Vec::with_capacity(results.len());
        for command in results {
            let handler = command
                .gcode
                .as_deref()
                .and_then(|gcode| code_handler(gcode, phase));
            match handler {
                Some(handler) => {
                    handled = true;
                    let outcome = handler(self, &command);
                    next.extend(outcome.apply(phase, &command, &Tags::new(), support_f));
                }
                None => next.push(command),
            }
        }
        if handled && next.is_empty() {
            return next;
        }

        match phase {
            CommandPhase::Queuing => next
                .into_iter()
                .flat_map(|command| {
                    self.queuing_phase(&command)
                        .apply(phase, &command, &Tags::new(), support_f)
                })
                .collect(),
            CommandPhase::Sending => {
                for command in &next {
                    self.sending_phase(command);
                }
                next
            }
            CommandPhase::Queued | CommandPhase::Sent => next,
        }
    }

    fn queuing_phase(self: &Arc<Self>, command: &PhaseCommand) -> HookOutcome {
        let Some(gcode) = command.gcode.as_deref() else {
            return HookOutcome::Unchanged;
        };

        if self.config.is_emergency(gcode)
            && gcode != "M112"
            && self.capability_supported(CAPABILITY_EMERGENCY_PARSER)
        {
            tracing::info!("Force-sending {} to the printer", gcode);
            let used_up_clear = self.use_up_clear(Some(gcode));
            let inner = Arc::clone(self);
            let text = command.command.clone();
            let gcode = gcode.to_string();
            tokio::spawn(async move {
                inner.do_send(&text, Some(&gcode)).await;
                if !used_up_clear {
                    inner.continue_sending();
                }
            });
            return HookOutcome::Suppress;
        }

        if self.state().is_printing()
            && self.config.is_pausing(gcode)
            && !command.has_tag("trigger:cancel")
            && !command.has_tag("trigger:pause")
        {
            tracing::info!("Pausing print job due to command {}", gcode);
            self.set_pause(true, true, None);
        }

        if self.config.is_blocked(gcode) {
            tracing::info!(
                "Not sending {} to printer, it's configured as a blocked command",
                gcode
            );
            return HookOutcome::Suppress;
        }
        HookOutcome::Unchanged
    }

    fn sending_phase(&self, command: &PhaseCommand) {
        if command
            .gcode
            .as_deref()
            .is_some_and(|gcode| self.config.is_long_running(gcode))
        {
            self.runtime.lock().long_running = true;
        }
    }

    /// Handle an `@command` line in `phase`.
    pub(super) fn process_at_command_phase(
        self: &Arc<Self>,
        phase: CommandPhase,
        command: &str,
        command_tags: &Tags,
    ) {
        if self.is_streaming() && self.state().is_printing() {
            return;
        }
        if !matches!(phase, CommandPhase::Queuing | CommandPhase::Sending) {
            return;
        }

        let command = command.trim();
        let (name, parameters) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, parameters)| (name, parameters.trim()));
        let name = name.strip_prefix('@').unwrap_or(name);

        self.hooks
            .process_at_command(phase, name, parameters, command_tags);

        if phase != CommandPhase::Queuing {
            return;
        }
        match name {
            "pause" if !command_tags.contains("script:afterPrintPaused") => {
                self.set_pause(true, true, Some(tags(["trigger:atcommand_pause"])));
            }
            "cancel" | "abort" if !command_tags.contains("script:afterPrintCancelled") => {
                self.cancel_print_tagged(None, false, false, tags(["trigger:atcommand_cancel"]));
            }
            "resume" if !command_tags.contains("script:beforePrintResumed") => {
                self.set_pause(false, true, Some(tags(["trigger:atcommand_resume"])));
            }
            _ => {}
        }
    }

    /// True if `tool` exists and was not rejected by the firmware.
    pub(super) fn validate_tool(&self, tool: u32) -> bool {
        !self.config.sanity_check_tools
            || (tool < self.config.extruder_count
                && !self.runtime.lock().invalid_tools.contains(&tool))
    }

    fn start_heatup(&self) {
        let mut rt = self.runtime.lock();
        rt.heatup_start = Some(Instant::now());
        rt.long_running = true;
        rt.heating = true;
    }

    /// Restart the pause and cancel position timers.
    pub(super) fn reset_position_timers(&self) {
        let timers = self.timers.lock();
        if let Some(timer) = &timers.pause_position {
            timer.reset();
        }
        if let Some(timer) = &timers.cancel_position {
            timer.reset();
        }
    }
}
