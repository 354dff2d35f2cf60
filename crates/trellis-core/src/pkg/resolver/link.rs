use super::{bind_range, ResolveOptions, Resolver, LINK_PROTOCOL};
use crate::pkg::error::PkgError;
use crate::pkg::ident::{Descriptor, Locator};
use crate::pkg::package::{LinkType, Package};
use async_trait::async_trait;

/// `link:` directories: referenced in place, dependencies not followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkResolver;

#[async_trait]
impl Resolver for LinkResolver {
    fn supports_descriptor(&self, descriptor: &Descriptor, _opts: &ResolveOptions) -> bool {
        descriptor.range().starts_with(LINK_PROTOCOL)
    }

    fn supports_locator(&self, locator: &Locator, _opts: &ResolveOptions) -> bool {
        locator.reference().starts_with(LINK_PROTOCOL)
    }

    fn normalize_descriptor(
        &self,
        descriptor: &Descriptor,
        from_locator: &Locator,
        _opts: &ResolveOptions,
    ) -> Result<Descriptor, PkgError> {
        let path = &descriptor.range()[LINK_PROTOCOL.len()..];
        if path.contains('?') {
            return Err(PkgError::parse(format!(
                "{descriptor}: link ranges cannot carry a query string"
            )));
        }

        Ok(descriptor.with_range(&format!("{LINK_PROTOCOL}{}", bind_range(path, from_locator))))
    }

    async fn get_candidates(
        &self,
        descriptor: &Descriptor,
        _opts: &ResolveOptions,
    ) -> Result<Vec<Locator>, PkgError> {
        Ok(vec![Locator::new(descriptor.ident().clone(), descriptor.range())])
    }

    async fn resolve(&self, locator: &Locator, _opts: &ResolveOptions) -> Result<Package, PkgError> {
        Ok(Package::new(locator.clone(), LinkType::Soft))
    }
}
