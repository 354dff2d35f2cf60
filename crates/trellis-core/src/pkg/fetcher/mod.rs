//! Fetchers: turn a locator into package files on disk.
//!
//! Each variant claims locators by reference syntax. [`MultiFetcher`] holds
//! them in priority order and dispatches to the first one that accepts.

mod link;
mod npm;
mod tarball;
mod virtuals;
mod workspace;

pub use link::LinkFetcher;
pub use npm::NpmFetcher;
pub use tarball::TarballFileFetcher;
pub use virtuals::VirtualFetcher;
pub use workspace::WorkspaceFetcher;

use super::cache::{Cache, FetchResult};
use super::error::PkgError;
use super::ident::{Locator, LocatorHash};
use super::registry::PackumentSource;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Everything a fetcher may need besides the locator.
#[derive(Clone)]
pub struct FetchOptions {
    pub project_cwd: PathBuf,
    pub cache: Arc<Cache>,
    pub registry: Arc<dyn PackumentSource>,
    /// Dispatcher for fetchers that depend on another locator's files.
    pub fetcher: Arc<MultiFetcher>,
    /// Known archive checksums, checked by the cache.
    pub checksums: Arc<BTreeMap<LocatorHash, String>>,
}

impl FetchOptions {
    #[must_use]
    pub fn expected_checksum(&self, locator: &Locator) -> Option<&str> {
        self.checksums.get(locator.locator_hash()).map(String::as_str)
    }
}

/// One way of obtaining package files.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn supports(&self, locator: &Locator, opts: &FetchOptions) -> bool;

    /// Produce the files for `locator`.
    async fn fetch(&self, locator: &Locator, opts: &FetchOptions) -> Result<FetchResult, PkgError>;
}

/// Ordered set of fetchers; the first that supports a locator wins.
pub struct MultiFetcher {
    fetchers: Vec<Box<dyn Fetcher>>,
}

impl MultiFetcher {
    #[must_use]
    pub fn new(fetchers: Vec<Box<dyn Fetcher>>) -> Self {
        Self { fetchers }
    }

    fn for_locator(&self, locator: &Locator, opts: &FetchOptions) -> Result<&dyn Fetcher, PkgError> {
        self.fetchers
            .iter()
            .find(|fetcher| fetcher.supports(locator, opts))
            .map(AsRef::as_ref)
            .ok_or_else(|| PkgError::unsupported_locator(&locator.to_string()))
    }
}

impl Default for MultiFetcher {
    fn default() -> Self {
        Self::new(vec![
            Box::new(VirtualFetcher),
            Box::new(WorkspaceFetcher),
            Box::new(LinkFetcher),
            Box::new(TarballFileFetcher),
            Box::new(NpmFetcher),
        ])
    }
}

#[async_trait]
impl Fetcher for MultiFetcher {
    fn supports(&self, locator: &Locator, opts: &FetchOptions) -> bool {
        self.fetchers.iter().any(|fetcher| fetcher.supports(locator, opts))
    }

    async fn fetch(&self, locator: &Locator, opts: &FetchOptions) -> Result<FetchResult, PkgError> {
        debug!(locator = %locator, "Fetching package");
        self.for_locator(locator, opts)?.fetch(locator, opts).await
    }
}

/// Fetch the package that declared a bound range, for fetchers that read
/// files relative to it.
async fn fetch_parent(
    locator: &Locator,
    parent: Option<Locator>,
    opts: &FetchOptions,
) -> Result<FetchResult, PkgError> {
    let parent = parent.ok_or_else(|| {
        PkgError::fetch_failed(format!(
            "{locator}: the reference is missing its declaring locator"
        ))
    })?;
    opts.fetcher.fetch(&parent, opts).await
}
