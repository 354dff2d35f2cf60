use super::{FetchOptions, Fetcher};
use crate::pkg::cache::FetchResult;
use crate::pkg::error::PkgError;
use crate::pkg::ident::Locator;
use async_trait::async_trait;

/// Virtual packages share the files of the package they wrap.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualFetcher;

#[async_trait]
impl Fetcher for VirtualFetcher {
    fn supports(&self, locator: &Locator, _opts: &FetchOptions) -> bool {
        locator.is_virtual()
    }

    async fn fetch(&self, locator: &Locator, opts: &FetchOptions) -> Result<FetchResult, PkgError> {
        opts.fetcher.fetch(&locator.devirtualize(), opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::fetcher::test_support::options;
    use crate::pkg::registry::MemoryRegistry;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_virtual_fetches_original() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        let opts = options(dir.path(), MemoryRegistry::new());

        let original = Locator::parse("lib@workspace:lib").unwrap();
        let virtual_locator = original.virtualize("abc");

        assert!(VirtualFetcher.supports(&virtual_locator, &opts));
        assert!(!VirtualFetcher.supports(&original, &opts));

        let via_virtual = VirtualFetcher.fetch(&virtual_locator, &opts).await.unwrap();
        let direct = opts.fetcher.fetch(&original, &opts).await.unwrap();
        assert_eq!(via_virtual, direct);
    }
}
