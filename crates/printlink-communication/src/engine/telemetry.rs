//! Temperature, position and firmware reports.

use super::Inner;
use crate::pipeline::OutgoingCommand;
use crate::protocol::parser::{parse_repetier_target, RepetierTarget};
use crate::protocol::{
    int_parameter, parse_capability_line, parse_firmware_line, parse_position_line,
    parse_temperature_line, Heater, ParsedTemperatures,
};
use printlink_core::data::{
    CAPABILITY_AUTOREPORT_SD_STATUS, CAPABILITY_AUTOREPORT_TEMP, CAPABILITY_CHAMBER_TEMP,
    CAPABILITY_EMERGENCY_PARSER,
};
use printlink_core::{
    FirmwareEvent, PositionReason, PrinterEvent, TelemetryEvent, TemperatureRecord,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Fold parsed readings into `record`.
///
/// Tools up to `max_tool` are filled from the shared reading when
/// `shared_nozzle` is set. Chamber readings are kept only if `chamber`.
fn apply_temperatures(
    record: &mut TemperatureRecord,
    mut parsed: ParsedTemperatures,
    max_tool: u32,
    current_tool: u32,
    shared_nozzle: bool,
    chamber: bool,
) {
    let shared = parsed
        .get(&Heater::Tool(current_tool))
        .or_else(|| parsed.get(&Heater::Tool(0)))
        .copied();
    if let Some(shared) = shared {
        for tool in 0..=max_tool {
            match parsed.remove(&Heater::Tool(tool)) {
                Some(reading) => record.set_tool(tool, Some(reading.actual), reading.target),
                None if shared_nozzle => {
                    record.set_tool(tool, Some(shared.actual), shared.target);
                }
                None => {}
            }
        }
    }

    if let Some(reading) = parsed.remove(&Heater::Bed) {
        record.set_bed(Some(reading.actual), reading.target);
    }
    if chamber {
        if let Some(reading) = parsed.remove(&Heater::Chamber) {
            record.set_chamber(Some(reading.actual), reading.target);
        }
    }

    for (heater, reading) in parsed {
        let identifier = match heater {
            Heater::Custom(name) => name,
            Heater::Tool(tool) => format!("T{}", tool),
            Heater::Chamber => "C".to_string(),
            Heater::Bed => "B".to_string(),
            Heater::CurrentTool => "T".to_string(),
        };
        if let Err(err) = record.set_custom(&identifier, Some(reading.actual), reading.target) {
            tracing::debug!("Skipping temperature reading {}: {}", identifier, err);
        }
    }
}

/// Firmware-specific adjustments, keyed on the reported name.
fn firmware_quirks(name: &str) -> Option<(&'static str, Quirks)> {
    let lower = name.to_lowercase();
    let quirks = if lower.contains("repetier") || lower.contains("anet_a8") {
        (
            "Repetier",
            Quirks {
                always_send_checksum: true,
                block_while_dwelling: true,
                repetier_targets: true,
                disable_external_heatup_detection: true,
                sd_always_available: true,
                ..Quirks::default()
            },
        )
    } else if lower.contains("reprapfirmware") {
        (
            "RepRapFirmware",
            Quirks {
                sd_relative_path: true,
                ..Quirks::default()
            },
        )
    } else if lower.contains("malyan") {
        (
            "Malyan",
            Quirks {
                always_send_checksum: true,
                block_while_dwelling: true,
                sd_always_available: true,
                ..Quirks::default()
            },
        )
    } else if lower.contains("teacup") {
        (
            "Teacup",
            Quirks {
                disable_external_heatup_detection: true,
                ..Quirks::default()
            },
        )
    } else if lower.contains("klipper") {
        (
            "Klipper",
            Quirks {
                unknown_commands_need_ack: true,
                ..Quirks::default()
            },
        )
    } else if lower.contains("ultimaker2") {
        (
            "Ultimaker2",
            Quirks {
                disable_sd_printing_detection: true,
                ..Quirks::default()
            },
        )
    } else {
        return None;
    };
    Some(quirks)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Quirks {
    always_send_checksum: bool,
    block_while_dwelling: bool,
    repetier_targets: bool,
    disable_external_heatup_detection: bool,
    sd_always_available: bool,
    sd_relative_path: bool,
    unknown_commands_need_ack: bool,
    disable_sd_printing_detection: bool,
}

/// Firmware name from an `M115` report. Malyan only reports `NAME` and
/// `VER`.
fn firmware_name(data: &BTreeMap<String, String>) -> Option<String> {
    if let Some(name) = data.get("FIRMWARE_NAME") {
        return Some(name.trim().to_string());
    }
    match (data.get("NAME"), data.get("VER")) {
        (Some(name), Some(version)) if name.to_lowercase().contains("malyan") => {
            Some(format!("{} {}", name.trim(), version.trim()))
        }
        _ => None,
    }
}

impl Inner {
    /// Handle a temperature report.
    pub(super) fn process_temperature_line(&self, line: &str) {
        let (external_heatup, current_tool) = {
            let rt = self.runtime.lock();
            let external = rt.external_heatup_detection
                && !rt.temperature_autoreporting
                && !line.trim().starts_with("ok")
                && !rt.heating
                && rt.firmware_info_received;
            (external, rt.current_tool)
        };
        if external_heatup {
            tracing::info!("Externally triggered heatup detected");
            let mut rt = self.runtime.lock();
            rt.heating = true;
            rt.heatup_start = Some(Instant::now());
        }

        let (max_tool, parsed) = parse_temperature_line(line, current_tool);
        let max_tool = max_tool.max(self.config.extruder_count.saturating_sub(1));
        let parsed = self.hooks.process_temperatures(parsed);
        if parsed.is_empty() {
            return;
        }

        let chamber = self.capability_supported(CAPABILITY_CHAMBER_TEMP) || self.config.heated_chamber;
        let record = {
            let mut temperatures = self.temperatures.write();
            apply_temperatures(
                &mut temperatures,
                parsed,
                max_tool,
                current_tool,
                self.config.shared_nozzle,
                chamber,
            );
            temperatures.clone()
        };
        self.emit(PrinterEvent::Telemetry(TelemetryEvent::Temperature(record)));
    }

    /// Handle a Repetier `TargetExtr`/`TargetBed` line. Returns false if the
    /// line was not one.
    pub(super) fn process_repetier_target(&self, line: &str) -> bool {
        let Some(target) = parse_repetier_target(line) else {
            return false;
        };
        let record = {
            let mut temperatures = self.temperatures.write();
            match target {
                RepetierTarget::Tool(tool, target) => temperatures.set_tool(tool, None, Some(target)),
                RepetierTarget::Bed(target) => temperatures.set_bed(None, Some(target)),
            }
            temperatures.clone()
        };
        self.emit(PrinterEvent::Telemetry(TelemetryEvent::Temperature(record)));
        true
    }

    /// Handle a position report, completing a pending pause or cancel
    /// snapshot.
    pub(super) fn process_position_line(self: &Arc<Self>, line: &str) {
        let Some(report) = parse_position_line(line) else {
            return;
        };
        let sd_selected = self.is_sd_file_selected();
        let (current_tool, current_f) = {
            let rt = self.runtime.lock();
            (rt.current_tool, rt.current_f)
        };

        let position = {
            let mut position = self.position.write();
            position.x = Some(report.x);
            position.y = Some(report.y);
            position.z = Some(report.z);
            position.e = match report.e {
                Some(e) => Some(e),
                None if !sd_selected => report.extruders.get(&current_tool).copied(),
                None => None,
            };
            for (&index, &value) in &report.extruders {
                position.set_extruder(index, value);
            }
            position.t = (!sd_selected).then_some(current_tool);
            position.f = if sd_selected { None } else { current_f };
            position.clone()
        };

        let (record_pause, record_cancel) = {
            let mut rt = self.runtime.lock();
            (
                std::mem::take(&mut rt.record_pause_data),
                std::mem::take(&mut rt.record_cancel_data),
            )
        };

        let mut reason = None;
        if record_pause {
            reason = Some(PositionReason::Pause);
            self.pause_position.write().copy_from(&position);
            let temperatures = self.temperatures.read().clone();
            self.pause_temperatures.write().copy_from(&temperatures);
            self.pause_preparation_done(true, false);
        }
        if record_cancel {
            reason = Some(PositionReason::Cancel);
            self.cancel_position.write().copy_from(&position);
            let temperatures = self.temperatures.read().clone();
            self.cancel_temperatures.write().copy_from(&temperatures);
            self.cancel_preparation_done(true);
        }

        self.emit(PrinterEvent::Telemetry(TelemetryEvent::Position { position, reason }));
    }

    /// Handle an `M115` report.
    pub(super) fn process_firmware_line(self: &Arc<Self>, line: &str) {
        let data = parse_firmware_line(line);
        let name = firmware_name(&data);
        self.emit(PrinterEvent::Firmware(FirmwareEvent::Info {
            name: name.clone().unwrap_or_default(),
            data: data.clone(),
        }));

        let Some(name) = name.filter(|name| !name.is_empty()) else {
            return;
        };
        if self.runtime.lock().firmware_info_received {
            return;
        }
        tracing::info!("Printer reports firmware name \"{}\"", name);

        let quirks = if self.config.firmware_detection {
            firmware_quirks(&name)
        } else {
            None
        };
        let init_sd = {
            let mut rt = self.runtime.lock();
            let mut init_sd = false;
            if let Some((family, quirks)) = quirks {
                tracing::info!(
                    "Detected {} firmware, enabling relevant features for issue free communication",
                    family
                );
                rt.always_send_checksum |= quirks.always_send_checksum;
                rt.block_while_dwelling |= quirks.block_while_dwelling;
                rt.repetier_targets |= quirks.repetier_targets;
                rt.sd_relative_path |= quirks.sd_relative_path;
                rt.unknown_commands_need_ack |= quirks.unknown_commands_need_ack;
                rt.disable_sd_printing_detection |= quirks.disable_sd_printing_detection;
                if quirks.disable_external_heatup_detection {
                    rt.external_heatup_detection = false;
                }
                if quirks.sd_always_available {
                    init_sd = !rt.sd_always_available && !rt.sd.available;
                    rt.sd_always_available = true;
                }
            }
            rt.firmware_info_received = true;
            rt.firmware_info = data.clone();
            rt.firmware_name = Some(name.clone());
            init_sd
        };
        if init_sd {
            self.init_sd_card();
        }

        self.hooks.process_firmware_info(&name, &data);
    }

    /// Handle a `Cap:` line.
    pub(super) fn process_capability_line(self: &Arc<Self>, line: &str) {
        let Some((name, enabled)) = parse_capability_line(line) else {
            return;
        };
        let all = {
            let mut capabilities = self.capabilities.write();
            capabilities.set(name.clone(), enabled);
            capabilities.clone()
        };

        if enabled && self.config.capabilities.supports(&name) {
            match name.as_str() {
                CAPABILITY_AUTOREPORT_TEMP => {
                    tracing::info!("Firmware states that it supports temperature autoreporting");
                    self.set_autoreport_temperature_interval();
                }
                CAPABILITY_AUTOREPORT_SD_STATUS => {
                    tracing::info!("Firmware states that it supports sd status autoreporting");
                    self.set_autoreport_sd_status_interval();
                }
                CAPABILITY_EMERGENCY_PARSER => {
                    tracing::info!("Firmware states that it supports emergency GCODEs to be sent without waiting for an acknowledgement first");
                }
                _ => {}
            }
        }

        self.emit(PrinterEvent::Firmware(FirmwareEvent::Capability {
            name: name.clone(),
            enabled,
        }));
        self.hooks.process_capability(&name, enabled, &all);
    }

    /// Ask the firmware to report temperatures on its own.
    pub(super) fn set_autoreport_temperature_interval(self: &Arc<Self>) {
        let interval = self.config.timeouts.temperature_autoreport as u64;
        self.send_command(
            OutgoingCommand::new(format!("M155 S{}", interval))
                .with_tag("trigger:comm.set_autoreport_temperature_interval"),
        );
    }

    /// Ask the firmware to report SD progress on its own.
    pub(super) fn set_autoreport_sd_status_interval(self: &Arc<Self>) {
        let interval = self.config.timeouts.sd_status_autoreport as u64;
        self.send_command(
            OutgoingCommand::new(format!("M27 S{}", interval))
                .with_tag("trigger:comm.set_autoreport_sdstatus_interval"),
        );
    }

    /// The firmware rejected the active tool: revert to the previous one.
    pub(super) fn process_invalid_extruder(self: &Arc<Self>, line: &str) {
        let reported = int_parameter(line, 'T').and_then(|tool| u32::try_from(tool).ok());
        let (invalid, fallback) = {
            let rt = self.runtime.lock();
            if reported.is_some_and(|tool| tool != rt.current_tool) {
                return;
            }
            (rt.current_tool, rt.former_tool.unwrap_or(0))
        };

        if !self.config.sanity_check_tools {
            self.log_comm(format!(
                "T{} reported as invalid by the firmware, but you've disabled tool sanity checking, ignoring",
                invalid
            ));
            return;
        }

        self.log_comm(format!("T{} reported as invalid, reverting to T{}", invalid, fallback));
        self.runtime.lock().invalid_tools.insert(invalid);
        self.send_command(
            OutgoingCommand::new(format!("T{}", fallback)).with_tag("trigger:revert_invalid_tool"),
        );
    }
}
