//! Terminal and JSON-lines rendering of install reports.

use serde_json::{json, Value};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use trellis_core::pkg::{MessageName, Report, Severity};

/// Writes each report message as it arrives.
///
/// Human output goes to stderr so stdout stays reserved for command results;
/// JSON records go to stdout, one per line.
pub struct StreamReport<W: Write + Send> {
    json: bool,
    out: Mutex<W>,
    failed: AtomicBool,
}

impl StreamReport<io::Stdout> {
    pub fn stdout(json: bool) -> Self {
        Self::new(io::stdout(), json)
    }
}

impl<W: Write + Send> StreamReport<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self {
            json,
            out: Mutex::new(out),
            failed: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_line(&self, line: &str) {
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{line}");
        }
    }

    fn message(&self, severity: Severity, name: MessageName, text: &str) {
        if severity == Severity::Error {
            self.failed.store(true, Ordering::Relaxed);
        }

        if self.json {
            self.report_json(json!({
                "type": severity,
                "name": name,
                "displayName": name.to_string(),
                "data": text,
            }));
            return;
        }

        let marker = match severity {
            Severity::Info => "\u{27a4}",
            Severity::Warning => "!",
            Severity::Error => "\u{2718}",
        };
        eprintln!("{marker} {name}: {text}");
    }
}

impl<W: Write + Send> Report for StreamReport<W> {
    fn report_info(&self, name: MessageName, text: &str) {
        self.message(Severity::Info, name, text);
    }

    fn report_warning(&self, name: MessageName, text: &str) {
        self.message(Severity::Warning, name, text);
    }

    fn report_error(&self, name: MessageName, text: &str) {
        self.message(Severity::Error, name, text);
    }

    fn report_json(&self, data: Value) {
        if self.json {
            self.write_line(&data.to_string());
        }
    }

    fn exit_code(&self) -> i32 {
        i32::from(self.failed.load(Ordering::Relaxed))
    }
}
