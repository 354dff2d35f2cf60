//! `trellis where` command implementation.

use super::load_configuration;
use miette::{IntoDiagnostic, Result};
use serde_json::json;
use std::path::Path;
use trellis_core::pkg::Locator;
use trellis_core::Project;

pub fn run(cwd: &Path, locator: &str, json: bool) -> Result<()> {
    let locator = Locator::parse(locator).into_diagnostic()?;
    let project = Project::load(load_configuration(cwd)?).into_diagnostic()?;

    match project.find_package_location(&locator) {
        Ok(location) if json => {
            println!(
                "{}",
                json!({"locator": locator.to_string(), "location": location})
            );
        }
        Ok(location) => println!("{}", location.display()),
        Err(e) => {
            if json {
                println!(
                    "{}",
                    json!({"locator": locator.to_string(), "code": e.code(), "message": e.message()})
                );
            } else {
                eprintln!("error: {}: {}", e.code(), e.message());
            }
            std::process::exit(1);
        }
    }
    Ok(())
}
