use super::{fetch_parent, FetchOptions, Fetcher};
use crate::pkg::cache::{ArchiveLoader, FetchResult};
use crate::pkg::error::PkgError;
use crate::pkg::ident::Locator;
use crate::pkg::resolver::{is_tarball_reference, parse_bound_range, FILE_PROTOCOL};
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;

/// Local `.tgz` archives, unpacked into the cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarballFileFetcher;

#[async_trait]
impl Fetcher for TarballFileFetcher {
    fn supports(&self, locator: &Locator, _opts: &FetchOptions) -> bool {
        is_tarball_reference(locator.reference())
    }

    async fn fetch(&self, locator: &Locator, opts: &FetchOptions) -> Result<FetchResult, PkgError> {
        let reference = locator.reference();
        let reference = reference.strip_prefix(FILE_PROTOCOL).unwrap_or(reference);
        let (path, parent) = parse_bound_range(reference)?;

        let archive = fetch_parent(locator, parent, opts).await?.package_root().join(path);

        let loader: ArchiveLoader = Box::new(move || {
            async move {
                let bytes = tokio::fs::read(&archive).await.map_err(|e| {
                    PkgError::fetch_failed(format!("Failed to read {}: {e}", archive.display()))
                })?;
                Ok(Bytes::from(bytes))
            }
            .boxed()
        });

        opts.cache
            .fetch_package_from_cache(locator, opts.expected_checksum(locator), loader)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::fetcher::test_support::options;
    use crate::pkg::registry::MemoryRegistry;
    use crate::pkg::resolver::bind_range;
    use crate::pkg::tarball::test_support::package_tgz as tarball;
    use tempfile::tempdir;


    #[tokio::test]
    async fn test_fetch_archive_next_to_declaring_workspace() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("vendor")).unwrap();
        std::fs::write(
            dir.path().join("vendor").join("pad.tgz"),
            tarball(r#"{"name":"pad","version":"0.1.0"}"#),
        )
        .unwrap();
        let opts = options(dir.path(), MemoryRegistry::new());

        let root = Locator::parse("root@workspace:.").unwrap();
        let reference = format!("file:{}", bind_range("./vendor/pad.tgz", &root));
        let locator = Locator::parse(&format!("pad@{reference}")).unwrap();

        assert!(TarballFileFetcher.supports(&locator, &opts));
        let result = TarballFileFetcher.fetch(&locator, &opts).await.unwrap();
        assert!(result.package_root().join("package.json").exists());
        assert!(result.checksum.is_some());
    }

    #[tokio::test]
    async fn test_missing_archive() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), MemoryRegistry::new());

        let root = Locator::parse("root@workspace:.").unwrap();
        let reference = format!("file:{}", bind_range("./missing.tgz", &root));
        let locator = Locator::parse(&format!("pad@{reference}")).unwrap();

        let err = TarballFileFetcher.fetch(&locator, &opts).await.unwrap_err();
        assert_eq!(err.code(), "PKG_FETCH_FAILED");
    }
}
