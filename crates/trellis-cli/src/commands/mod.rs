pub mod install;
pub mod lookup;

use miette::{IntoDiagnostic, Result};
use std::path::Path;
use trellis_core::{paths, Configuration, Error};

/// Settings for the project that owns `cwd`.
pub fn load_configuration(cwd: &Path) -> Result<Configuration> {
    let root = paths::project_root(cwd)
        .ok_or_else(|| Error::ProjectNotFound {
            start: cwd.to_path_buf(),
        })
        .into_diagnostic()?;
    Configuration::find(&root).into_diagnostic()
}

/// Runtime for the async engine.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()
}
