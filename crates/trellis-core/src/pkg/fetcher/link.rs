use super::{fetch_parent, FetchOptions, Fetcher};
use crate::pkg::cache::FetchResult;
use crate::pkg::error::PkgError;
use crate::pkg::ident::Locator;
use crate::pkg::resolver::{parse_bound_range, LINK_PROTOCOL};
use async_trait::async_trait;

/// `link:` packages point at a directory relative to the package that declared them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkFetcher;

#[async_trait]
impl Fetcher for LinkFetcher {
    fn supports(&self, locator: &Locator, _opts: &FetchOptions) -> bool {
        locator.reference().starts_with(LINK_PROTOCOL)
    }

    async fn fetch(&self, locator: &Locator, opts: &FetchOptions) -> Result<FetchResult, PkgError> {
        let (path, parent) = parse_bound_range(&locator.reference()[LINK_PROTOCOL.len()..])?;
        let parent_root = fetch_parent(locator, parent, opts).await?.package_root();

        Ok(FetchResult::from_directory(&parent_root.join(path)))
    }
}
