use super::{bind_range, is_tarball_reference, ResolveOptions, Resolver, FILE_PROTOCOL};
use crate::pkg::error::PkgError;
use crate::pkg::fetcher::Fetcher;
use crate::pkg::ident::{Descriptor, Locator};
use crate::pkg::package::{LinkType, Manifest, Package};
use async_trait::async_trait;

/// Local tarballs referenced by path (`file:./vendor/x.tgz`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TarballFileResolver;

#[async_trait]
impl Resolver for TarballFileResolver {
    fn supports_descriptor(&self, descriptor: &Descriptor, _opts: &ResolveOptions) -> bool {
        is_tarball_reference(descriptor.range())
    }

    fn supports_locator(&self, locator: &Locator, _opts: &ResolveOptions) -> bool {
        is_tarball_reference(locator.reference())
    }

    fn normalize_descriptor(
        &self,
        descriptor: &Descriptor,
        from_locator: &Locator,
        _opts: &ResolveOptions,
    ) -> Result<Descriptor, PkgError> {
        let range = descriptor.range();
        if range.contains('?') {
            return Err(PkgError::parse(format!(
                "{descriptor}: file ranges cannot carry a query string"
            )));
        }

        let path = range.strip_prefix(FILE_PROTOCOL).unwrap_or(range);
        Ok(descriptor.with_range(&format!("{FILE_PROTOCOL}{}", bind_range(path, from_locator))))
    }

    async fn get_candidates(
        &self,
        descriptor: &Descriptor,
        _opts: &ResolveOptions,
    ) -> Result<Vec<Locator>, PkgError> {
        Ok(vec![Locator::new(descriptor.ident().clone(), descriptor.range())])
    }

    async fn resolve(&self, locator: &Locator, opts: &ResolveOptions) -> Result<Package, PkgError> {
        let fetch_options = &opts.fetch_options;
        let fetched = fetch_options.fetcher.fetch(locator, fetch_options).await?;
        let manifest = Manifest::find(&fetched.package_root())?;

        Ok(Package::from_manifest(locator.clone(), LinkType::Hard, &manifest))
    }
}
