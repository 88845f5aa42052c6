//! G-code scripts injected by the engine
//!
//! The engine asks a [`ScriptProvider`] for named scripts at fixed points
//! (after connecting, around tool changes, around pauses and cancels, before
//! disconnecting). Rendering and storage belong to the provider.

use crate::pipeline::Tags;
use std::collections::{BTreeMap, HashMap};

/// Sent after the firmware handshake.
pub const AFTER_PRINTER_CONNECTED: &str = "afterPrinterConnected";
/// Sent before a graceful disconnect.
pub const BEFORE_PRINTER_DISCONNECTED: &str = "beforePrinterDisconnected";
/// Sent before a print starts.
pub const BEFORE_PRINT_STARTED: &str = "beforePrintStarted";
/// Sent after a print finished.
pub const AFTER_PRINT_DONE: &str = "afterPrintDone";
/// Sent after a print was paused.
pub const AFTER_PRINT_PAUSED: &str = "afterPrintPaused";
/// Sent before a print resumes.
pub const BEFORE_PRINT_RESUMED: &str = "beforePrintResumed";
/// Sent after a print was cancelled.
pub const AFTER_PRINT_CANCELLED: &str = "afterPrintCancelled";
/// Sent before a tool change.
pub const BEFORE_TOOL_CHANGE: &str = "beforeToolChange";
/// Sent after a tool change.
pub const AFTER_TOOL_CHANGE: &str = "afterToolChange";

/// Variables available to a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptContext {
    variables: BTreeMap<String, String>,
}

impl ScriptContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.variables.insert(key.into(), value.to_string());
        self
    }

    /// Value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }

    /// All variables.
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }
}

/// A rendered script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    /// Command text.
    pub line: String,
    /// Extra provenance tags.
    pub tags: Tags,
}

impl ScriptLine {
    /// A line without extra tags.
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            tags: Tags::new(),
        }
    }
}

/// Source of named G-code scripts.
pub trait ScriptProvider: Send + Sync {
    /// Render script `name`; unknown scripts render to nothing.
    fn render(&self, name: &str, context: &ScriptContext) -> Vec<ScriptLine>;
}

/// Provider without any scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScripts;

impl ScriptProvider for NoScripts {
    fn render(&self, _name: &str, _context: &ScriptContext) -> Vec<ScriptLine> {
        Vec::new()
    }
}

/// Scripts held in memory.
///
/// `{key}` placeholders are replaced with context variables; unknown
/// placeholders are left as they are.
#[derive(Debug, Clone, Default)]
pub struct StaticScripts {
    scripts: HashMap<String, Vec<String>>,
}

impl StaticScripts {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace script `name`.
    pub fn insert<I, S>(&mut self, name: impl Into<String>, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripts
            .insert(name.into(), lines.into_iter().map(Into::into).collect());
    }

    /// Builder form of [`StaticScripts::insert`].
    pub fn with<I, S>(mut self, name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(name, lines);
        self
    }
}

fn substitute(line: &str, context: &ScriptContext) -> String {
    context
        .variables()
        .iter()
        .fold(line.to_string(), |line, (key, value)| {
            line.replace(&format!("{{{}}}", key), value)
        })
}

impl ScriptProvider for StaticScripts {
    fn render(&self, name: &str, context: &ScriptContext) -> Vec<ScriptLine> {
        self.scripts
            .get(name)
            .map(|lines| {
                lines
                    .iter()
                    .map(|line| substitute(line, context))
                    .filter(|line| !line.trim().is_empty())
                    .map(ScriptLine::new)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Tags every line of script `name` carries.
pub fn script_tags(name: &str) -> Tags {
    ["source:script".to_string(), format!("script:{}", name)]
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_scripts_substitute() {
        let scripts = StaticScripts::new().with(
            BEFORE_TOOL_CHANGE,
            ["M117 T{tool.old} -> T{tool.new}", "", "G91"],
        );
        let context = ScriptContext::new().with("tool.old", 0).with("tool.new", 1);

        let lines = scripts.render(BEFORE_TOOL_CHANGE, &context);
        assert_eq!(
            lines,
            vec![ScriptLine::new("M117 T0 -> T1"), ScriptLine::new("G91")]
        );
        assert!(scripts.render(AFTER_TOOL_CHANGE, &context).is_empty());
        assert!(NoScripts.render(BEFORE_TOOL_CHANGE, &context).is_empty());
    }

    #[test]
    fn test_script_tags() {
        let tags = script_tags(AFTER_PRINT_PAUSED);
        assert!(tags.contains("source:script"));
        assert!(tags.contains("script:afterPrintPaused"));
    }
}
