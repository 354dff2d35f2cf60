use std::path::PathBuf;
use thiserror::Error;

/// Core error type for trellis configuration and project discovery.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for setting '{key}': {message}")]
    ConfigValue { key: String, message: String },

    #[error("Project root not found from {start}")]
    ProjectNotFound { start: PathBuf },

    #[error(transparent)]
    Pkg(#[from] crate::pkg::PkgError),
}
