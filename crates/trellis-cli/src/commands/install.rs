//! `trellis install` command implementation.

use super::{load_configuration, runtime};
use crate::report::StreamReport;
use miette::Result;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use trellis_core::pkg::Report;
use trellis_core::{InstallOutcome, PkgError, Project};

pub fn run(cwd: &Path, enable_scripts: bool, json: bool) -> Result<()> {
    let mut configuration = load_configuration(cwd)?;
    if !enable_scripts {
        configuration = configuration.with_enable_scripts(false);
    }
    info!(cwd = %configuration.project_cwd.display(), "Installing");

    let report = Arc::new(StreamReport::stdout(json));
    let sink: Arc<dyn Report> = report.clone();
    let result = runtime()?.block_on(async move {
        let mut project = Project::load(configuration)?;
        project.install(sink).await
    });

    match result {
        Ok(outcome) => {
            print_outcome(&report, &outcome, json);
            if report.exit_code() != 0 {
                std::process::exit(report.exit_code());
            }
            Ok(())
        }
        Err(e) => {
            print_error(&report, &e, json);
            std::process::exit(if e.is_user_actionable() { 1 } else { 2 });
        }
    }
}

fn print_outcome(report: &StreamReport<std::io::Stdout>, outcome: &InstallOutcome, json: bool) {
    if json {
        report.report_json(json!({
            "type": "summary",
            "resolved": outcome.resolved_count,
            "fetched": outcome.fetched_count,
            "buildDirectives": outcome
                .build_directives
                .iter()
                .map(|(locator, directive)| json!({
                    "locator": locator.to_string(),
                    "scripts": directive.scripts,
                }))
                .collect::<Vec<_>>(),
        }));
        return;
    }

    println!(
        "Resolved {} packages, fetched {}",
        outcome.resolved_count, outcome.fetched_count
    );
    for (locator, directive) in &outcome.build_directives {
        println!("  must build {locator}: {}", directive.scripts.join(", "));
    }
}

fn print_error(report: &StreamReport<std::io::Stdout>, e: &PkgError, json: bool) {
    if json {
        report.report_json(json!({
            "type": "failure",
            "code": e.code(),
            "message": e.message(),
        }));
    } else {
        eprintln!("error: {}: {}", e.code(), e.message());
    }
}
