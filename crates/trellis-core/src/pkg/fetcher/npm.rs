use super::{FetchOptions, Fetcher};
use crate::pkg::cache::{ArchiveLoader, FetchResult};
use crate::pkg::error::PkgError;
use crate::pkg::ident::Locator;
use crate::pkg::registry::get_tarball_url;
use crate::pkg::resolver::NPM_PROTOCOL;
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;

/// Registry packages, downloaded into the cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpmFetcher;

#[async_trait]
impl Fetcher for NpmFetcher {
    fn supports(&self, locator: &Locator, _opts: &FetchOptions) -> bool {
        locator
            .reference()
            .strip_prefix(NPM_PROTOCOL)
            .is_some_and(|version| semver::Version::parse(version).is_ok())
    }

    async fn fetch(&self, locator: &Locator, opts: &FetchOptions) -> Result<FetchResult, PkgError> {
        let registry = Arc::clone(&opts.registry);
        let name = locator.ident().requirable_name();
        let version = locator
            .reference()
            .strip_prefix(NPM_PROTOCOL)
            .ok_or_else(|| PkgError::unsupported_locator(&locator.to_string()))?
            .to_string();
        let display = locator.to_string();

        // The registry is only consulted on a cache miss
        let loader: ArchiveLoader = Box::new(move || {
            async move {
                let packument = registry.fetch_packument(&name).await?;
                let url = get_tarball_url(&packument, &version).ok_or_else(|| {
                    PkgError::fetch_failed(format!("{display}: no tarball URL in the registry metadata"))
                })?;
                registry.fetch_tarball(url).await
            }
            .boxed()
        });

        opts.cache
            .fetch_package_from_cache(locator, opts.expected_checksum(locator), loader)
            .await
    }
}
