//! Package management engine.
//!
//! Provides:
//! - Package identity: idents, descriptors, locators
//! - Resolvers turning descriptors into packages (npm, tarball, link, workspace)
//! - Fetchers and the locator-keyed content cache
//! - The linker protocol and its Plug'n'Play implementation
//! - The project install pipeline (resolve, fetch, link)

pub mod cache;
pub mod error;
pub mod fetcher;
pub mod ident;
pub mod linker;
pub mod package;
pub mod pnp;
pub mod project;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod tarball;
pub mod version;

pub use cache::{Cache, FetchResult};
pub use error::{codes as pkg_codes, PkgError};
pub use fetcher::{FetchOptions, Fetcher, MultiFetcher};
pub use ident::{Descriptor, DescriptorHash, Ident, IdentHash, Locator, LocatorHash};
pub use linker::{BuildDirective, InstallResult, InstallSession, Installer, LinkOptions, Linker};
pub use package::{LinkType, Manifest, Package};
pub use pnp::{PnpInstaller, PnpLinker, PnpMap};
pub use project::{InstallOutcome, Project, Workspace};
pub use registry::{MemoryRegistry, PackumentSource, RegistryClient};
pub use report::{MemoryReport, MessageName, Report, Severity};
pub use resolver::{MultiResolver, ResolveOptions, Resolver};
