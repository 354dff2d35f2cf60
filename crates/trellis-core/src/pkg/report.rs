//! Report sink for user-facing install messages.
//!
//! The engine never writes to stdout itself. Everything a user should see
//! goes through a [`Report`]; diagnostics for developers go through `tracing`.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Mutex;

/// Stable identifiers for report messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageName {
    Unnamed,
    DisabledBuildScripts,
    BuildDisabled,
    SoftLinkBuild,
    MustBuild,
    MustUnplug,
    UnpluggedCleanup,
    UnmetPeerDependency,
    FetchFailed,
    ResolutionFailed,
    IntegrityError,
}

impl MessageName {
    /// Numeric code shown to users (`TR0004`).
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Unnamed => 0,
            Self::ResolutionFailed => 1,
            Self::FetchFailed => 2,
            Self::IntegrityError => 3,
            Self::DisabledBuildScripts => 4,
            Self::BuildDisabled => 5,
            Self::SoftLinkBuild => 6,
            Self::MustBuild => 7,
            Self::MustUnplug => 8,
            Self::UnpluggedCleanup => 9,
            Self::UnmetPeerDependency => 10,
        }
    }
}

impl fmt::Display for MessageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TR{:04}", self.code())
    }
}

/// Severity of a report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Sink for user-facing messages. Shared across concurrent install steps.
pub trait Report: Send + Sync {
    fn report_info(&self, name: MessageName, text: &str);
    fn report_warning(&self, name: MessageName, text: &str);
    fn report_error(&self, name: MessageName, text: &str);
    /// Machine-readable record.
    fn report_json(&self, data: Value);
    fn exit_code(&self) -> i32;
}

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub severity: Severity,
    pub name: MessageName,
    pub text: String,
}

/// Report that keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemoryReport {
    entries: Mutex<Vec<ReportEntry>>,
    json: Mutex<Vec<Value>>,
}

impl MemoryReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, severity: Severity, name: MessageName, text: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(ReportEntry {
                severity,
                name,
                text: text.to_string(),
            });
        }
    }

    /// Snapshot of all recorded messages.
    #[must_use]
    pub fn entries(&self) -> Vec<ReportEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Snapshot of all JSON records.
    #[must_use]
    pub fn json_records(&self) -> Vec<Value> {
        self.json.lock().map(|j| j.clone()).unwrap_or_default()
    }

    /// Recorded messages with the given name.
    #[must_use]
    pub fn entries_named(&self, name: MessageName) -> Vec<ReportEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.name == name)
            .collect()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.entries()
            .iter()
            .any(|entry| entry.severity == Severity::Error)
    }
}

impl Report for MemoryReport {
    fn report_info(&self, name: MessageName, text: &str) {
        self.push(Severity::Info, name, text);
    }

    fn report_warning(&self, name: MessageName, text: &str) {
        self.push(Severity::Warning, name, text);
    }

    fn report_error(&self, name: MessageName, text: &str) {
        self.push(Severity::Error, name, text);
    }

    fn report_json(&self, data: Value) {
        if let Ok(mut json) = self.json.lock() {
            json.push(data);
        }
    }

    fn exit_code(&self) -> i32 {
        i32::from(self.has_errors())
    }
}
