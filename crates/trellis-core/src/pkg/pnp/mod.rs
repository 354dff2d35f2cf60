//! Plug'n'Play linking: packages stay in the cache and a generated map tells
//! the runtime where each one lives.

mod installer;
mod map;
mod script;
mod store;

pub use installer::{normalize_directory_path, PnpInstaller, PnpLinker};
pub use map::PnpMap;
pub use script::{
    extract_runtime_state, generate_runtime_script, LocatorRef, RuntimeState,
    RUNTIME_STATE_VERSION, STATE_MARKER,
};
pub use store::{PackageInformation, PackageInformationStore, RegistryData, StoreKey, DISK_STORE};
