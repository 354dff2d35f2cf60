#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod error;
pub mod paths;
pub mod pkg;

pub use config::{Configuration, DependencyMeta, CONFIG_FILENAME};
pub use error::Error;
pub use pkg::{InstallOutcome, PkgError, Project};

/// Crate version, sent as part of the registry user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
