//! Extension points of the engine
//!
//! Hooks are registered by name and run in registration order:
//! - command hooks see every command in each [`CommandPhase`] and may keep,
//!   drop or rewrite it
//! - at-command hooks receive `@command` lines
//! - received-line hooks rewrite or swallow firmware output before parsing
//! - error hooks may claim a firmware error so it is not acted upon
//! - firmware info, capability, action and temperature hooks observe parsed
//!   reports
//!
//! Only the queuing phase may expand one command into several. A hook that
//! returns several commands in a later phase is ignored for that command.

use crate::pipeline::Tags;
use crate::protocol::{command_code, ParsedTemperatures};
use parking_lot::RwLock;
use printlink_core::FirmwareCapabilities;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Stage of a command on its way to the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPhase {
    /// Before the command enters the send queue.
    Queuing,
    /// Right after it entered the send queue.
    Queued,
    /// Right before it is written.
    Sending,
    /// Right after it was written.
    Sent,
}

impl CommandPhase {
    /// Name used in tags and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandPhase::Queuing => "queuing",
            CommandPhase::Queued => "queued",
            CommandPhase::Sending => "sending",
            CommandPhase::Sent => "sent",
        }
    }

    /// True if commands may be expanded into several in this phase.
    pub fn allows_expansion(&self) -> bool {
        matches!(self, CommandPhase::Queuing)
    }
}

impl std::fmt::Display for CommandPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command as seen by phase handlers and hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCommand {
    /// Command text.
    pub command: String,
    /// Deduplication key.
    pub command_type: Option<String>,
    /// G/M/T code, if the command has one.
    pub gcode: Option<String>,
    /// Subcode after the dot.
    pub subcode: Option<String>,
    /// Provenance labels.
    pub tags: Tags,
}

impl PhaseCommand {
    /// Build a command, extracting its code.
    pub fn new(
        command: impl Into<String>,
        command_type: Option<String>,
        tags: Tags,
        support_f_as_command: bool,
    ) -> Self {
        let command = command.into();
        let code = command_code(&command, support_f_as_command);
        Self {
            gcode: code.as_ref().map(|c| c.gcode.clone()),
            subcode: code.and_then(|c| c.subcode),
            command,
            command_type,
            tags,
        }
    }

    /// True if the command carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Replacement produced by a hook or handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// New command text.
    pub command: String,
    /// New type; the original type is kept when `None`.
    pub command_type: Option<String>,
    /// Tags added to the original ones.
    pub tags: Tags,
}

impl Rewrite {
    /// Replace the command text only.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            command_type: None,
            tags: Tags::new(),
        }
    }

    /// Set the type of the replacement.
    pub fn with_type(mut self, command_type: impl Into<String>) -> Self {
        self.command_type = Some(command_type.into());
        self
    }

    /// Add tags to the replacement.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags.extend(tags);
        self
    }
}

/// What a hook or handler decided about a command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HookOutcome {
    /// Keep the command.
    #[default]
    Unchanged,
    /// Drop the command.
    Suppress,
    /// Replace it with these commands.
    Replace(Vec<Rewrite>),
}

impl HookOutcome {
    /// Replace the command with a single new text.
    pub fn replace(command: impl Into<String>) -> Self {
        HookOutcome::Replace(vec![Rewrite::new(command)])
    }

    /// Apply the outcome to `original`.
    ///
    /// Replacements inherit the original tags plus `extra_tags`. Expansions
    /// outside the queuing phase keep the original command.
    pub fn apply(
        self,
        phase: CommandPhase,
        original: &PhaseCommand,
        extra_tags: &Tags,
        support_f_as_command: bool,
    ) -> Vec<PhaseCommand> {
        match self {
            HookOutcome::Unchanged => vec![original.clone()],
            HookOutcome::Suppress => Vec::new(),
            HookOutcome::Replace(rewrites) => {
                if rewrites.len() > 1 && !phase.allows_expansion() {
                    tracing::error!(
                        "Expanding {} into {} commands is only allowed while queuing, ignoring the rewrite in phase {}",
                        original.command,
                        rewrites.len(),
                        phase
                    );
                    return vec![original.clone()];
                }
                rewrites
                    .into_iter()
                    .map(|rewrite| {
                        let mut tags = original.tags.clone();
                        tags.extend(rewrite.tags);
                        tags.extend(extra_tags.iter().cloned());
                        PhaseCommand::new(
                            rewrite.command,
                            rewrite.command_type.or_else(|| original.command_type.clone()),
                            tags,
                            support_f_as_command,
                        )
                    })
                    .collect()
            }
        }
    }
}

/// Hook run for each command in each phase.
pub type CommandHook = Arc<dyn Fn(CommandPhase, &PhaseCommand) -> HookOutcome + Send + Sync>;
/// Hook receiving `@command` lines: phase, command name, parameters and tags.
pub type AtCommandHook = Arc<dyn Fn(CommandPhase, &str, &str, &Tags) + Send + Sync>;
/// Hook rewriting received lines; `None` swallows the line.
pub type ReceivedHook = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;
/// Hook seeing firmware errors; returning true claims the error.
pub type ErrorHook = Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// Hook seeing parsed `M115` reports.
pub type FirmwareInfoHook = Arc<dyn Fn(&str, &BTreeMap<String, String>) + Send + Sync>;
/// Hook seeing capability reports and the capabilities known so far.
pub type CapabilityHook = Arc<dyn Fn(&str, bool, &FirmwareCapabilities) + Send + Sync>;
/// Hook seeing `//action:` lines: the full line and the action.
pub type ActionHook = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Hook adjusting parsed temperatures; an empty result skips the report.
pub type TemperatureHook = Arc<dyn Fn(ParsedTemperatures) -> ParsedTemperatures + Send + Sync>;

type Named<T> = RwLock<Vec<(String, T)>>;

/// Registry of named hooks.
///
/// Registration is allowed at any time; a hook added while commands are in
/// flight sees only commands entering a phase after its registration.
#[derive(Default)]
pub struct Hooks {
    command: Named<CommandHook>,
    at_command: Named<AtCommandHook>,
    received: Named<ReceivedHook>,
    error: Named<ErrorHook>,
    firmware_info: Named<FirmwareInfoHook>,
    capability: Named<CapabilityHook>,
    action: Named<ActionHook>,
    temperature: Named<TemperatureHook>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("command", &self.command.read().len())
            .field("at_command", &self.at_command.read().len())
            .field("received", &self.received.read().len())
            .field("error", &self.error.read().len())
            .finish_non_exhaustive()
    }
}

fn snapshot<T: Clone>(hooks: &Named<T>) -> Vec<(String, T)> {
    hooks.read().clone()
}

impl Hooks {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command hook.
    pub fn register_command<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(CommandPhase, &PhaseCommand) -> HookOutcome + Send + Sync + 'static,
    {
        self.command.write().push((name.into(), Arc::new(hook)));
    }

    /// Register an `@command` hook.
    pub fn register_at_command<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(CommandPhase, &str, &str, &Tags) + Send + Sync + 'static,
    {
        self.at_command.write().push((name.into(), Arc::new(hook)));
    }

    /// Register a received-line hook.
    pub fn register_received<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.received.write().push((name.into(), Arc::new(hook)));
    }

    /// Register a firmware error hook.
    pub fn register_error<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.error.write().push((name.into(), Arc::new(hook)));
    }

    /// Register a firmware info hook.
    pub fn register_firmware_info<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(&str, &BTreeMap<String, String>) + Send + Sync + 'static,
    {
        self.firmware_info.write().push((name.into(), Arc::new(hook)));
    }

    /// Register a capability hook.
    pub fn register_capability<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(&str, bool, &FirmwareCapabilities) + Send + Sync + 'static,
    {
        self.capability.write().push((name.into(), Arc::new(hook)));
    }

    /// Register an action hook.
    pub fn register_action<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.action.write().push((name.into(), Arc::new(hook)));
    }

    /// Register a temperature hook.
    pub fn register_temperature<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(ParsedTemperatures) -> ParsedTemperatures + Send + Sync + 'static,
    {
        self.temperature.write().push((name.into(), Arc::new(hook)));
    }

    /// Remove every hook registered under `name`.
    pub fn unregister(&self, name: &str) {
        self.command.write().retain(|(n, _)| n != name);
        self.at_command.write().retain(|(n, _)| n != name);
        self.received.write().retain(|(n, _)| n != name);
        self.error.write().retain(|(n, _)| n != name);
        self.firmware_info.write().retain(|(n, _)| n != name);
        self.capability.write().retain(|(n, _)| n != name);
        self.action.write().retain(|(n, _)| n != name);
        self.temperature.write().retain(|(n, _)| n != name);
    }

    /// Run the command hooks over `command`.
    ///
    /// Returns an empty list if the command was dropped.
    pub fn process_command(
        &self,
        phase: CommandPhase,
        command: PhaseCommand,
        support_f_as_command: bool,
    ) -> Vec<PhaseCommand> {
        let mut results = vec![command];
        for (name, hook) in snapshot(&self.command) {
            let extra = [
                "source:rewrite".to_string(),
                format!("phase:{}", phase),
                format!("plugin:{}", name),
            ]
            .into_iter()
            .collect::<Tags>();

            let mut next = Vec::with_capacity(results.len());
            for result in &results {
                let outcome = hook(phase, result);
                next.extend(outcome.apply(phase, result, &extra, support_f_as_command));
            }
            if next.is_empty() {
                return next;
            }
            results = next;
        }
        results
    }

    /// Run the `@command` hooks.
    pub fn process_at_command(&self, phase: CommandPhase, command: &str, parameters: &str, tags: &Tags) {
        for (_, hook) in snapshot(&self.at_command) {
            hook(phase, command, parameters, tags);
        }
    }

    /// Run the received-line hooks; an empty string means the line was swallowed.
    pub fn process_received(&self, line: String) -> String {
        let mut line = line;
        for (name, hook) in snapshot(&self.received) {
            match hook(&line) {
                Some(rewritten) => line = rewritten,
                None => {
                    tracing::debug!("Received line dropped by hook {}", name);
                    return String::new();
                }
            }
        }
        line
    }

    /// True if an error hook claimed `error`.
    pub fn process_error(&self, error: &str) -> bool {
        for (name, hook) in snapshot(&self.error) {
            if hook(error) {
                tracing::info!("Firmware error \"{}\" handled by hook {}", error, name);
                return true;
            }
        }
        false
    }

    /// Run the firmware info hooks.
    pub fn process_firmware_info(&self, name: &str, data: &BTreeMap<String, String>) {
        for (_, hook) in snapshot(&self.firmware_info) {
            hook(name, data);
        }
    }

    /// Run the capability hooks.
    pub fn process_capability(&self, name: &str, enabled: bool, all: &FirmwareCapabilities) {
        for (_, hook) in snapshot(&self.capability) {
            hook(name, enabled, all);
        }
    }

    /// Run the action hooks.
    pub fn process_action(&self, line: &str, action: &str) {
        for (_, hook) in snapshot(&self.action) {
            hook(line, action);
        }
    }

    /// Run the temperature hooks; an empty map means the report is skipped.
    pub fn process_temperatures(&self, parsed: ParsedTemperatures) -> ParsedTemperatures {
        let mut parsed = parsed;
        for (_, hook) in snapshot(&self.temperature) {
            parsed = hook(parsed);
            if parsed.is_empty() {
                break;
            }
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tags;

    fn command(text: &str) -> PhaseCommand {
        PhaseCommand::new(text, None, tags(["source:api"]), false)
    }

    #[test]
    fn test_rewrite_adds_tags() {
        let hooks = Hooks::new();
        hooks.register_command("doubler", |_, cmd| {
            if cmd.gcode.as_deref() == Some("M117") {
                HookOutcome::replace("M118 hello")
            } else {
                HookOutcome::Unchanged
            }
        });

        let results = hooks.process_command(CommandPhase::Sending, command("M117 hi"), false);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].command, "M118 hello");
        assert_eq!(results[0].gcode.as_deref(), Some("M118"));
        assert!(results[0].has_tag("source:api"));
        assert!(results[0].has_tag("source:rewrite"));
        assert!(results[0].has_tag("phase:sending"));
        assert!(results[0].has_tag("plugin:doubler"));
    }

    #[test]
    fn test_expansion_only_while_queuing() {
        let hooks = Hooks::new();
        hooks.register_command("expand", |_, _| {
            HookOutcome::Replace(vec![Rewrite::new("G28"), Rewrite::new("G29")])
        });

        let queuing = hooks.process_command(CommandPhase::Queuing, command("G28"), false);
        assert_eq!(queuing.len(), 2);

        let sending = hooks.process_command(CommandPhase::Sending, command("G28"), false);
        assert_eq!(sending.len(), 1);
        assert_eq!(sending[0], command("G28"));
    }

    #[test]
    fn test_suppress_drops_command() {
        let hooks = Hooks::new();
        hooks.register_command("block", |_, _| HookOutcome::Suppress);
        assert!(hooks
            .process_command(CommandPhase::Queuing, command("M104 S200"), false)
            .is_empty());

        hooks.unregister("block");
        assert_eq!(
            hooks
                .process_command(CommandPhase::Queuing, command("M104 S200"), false)
                .len(),
            1
        );
    }

    #[test]
    fn test_received_and_error_hooks() {
        let hooks = Hooks::new();
        hooks.register_received("quiet", |line| {
            (!line.starts_with("echo:")).then(|| line.replace("TT:", "T:"))
        });
        hooks.register_error("claim", |error| error.contains("probe"));

        assert_eq!(hooks.process_received("echo:busy".to_string()), "");
        assert_eq!(hooks.process_received("TT:20".to_string()), "T:20");
        assert!(hooks.process_error("probe failed"));
        assert!(!hooks.process_error("thermal runaway"));
    }
}
