use super::{ResolveOptions, Resolver, WORKSPACE_PROTOCOL};
use crate::pkg::error::PkgError;
use crate::pkg::ident::{Descriptor, Locator};
use crate::pkg::package::{LinkType, Package};
use async_trait::async_trait;

/// `workspace:` ranges, resolved against the project's own workspaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceResolver;

#[async_trait]
impl Resolver for WorkspaceResolver {
    fn supports_descriptor(&self, descriptor: &Descriptor, _opts: &ResolveOptions) -> bool {
        descriptor.range().starts_with(WORKSPACE_PROTOCOL)
    }

    fn supports_locator(&self, locator: &Locator, _opts: &ResolveOptions) -> bool {
        locator.reference().starts_with(WORKSPACE_PROTOCOL)
    }

    fn normalize_descriptor(
        &self,
        descriptor: &Descriptor,
        _from_locator: &Locator,
        _opts: &ResolveOptions,
    ) -> Result<Descriptor, PkgError> {
        Ok(descriptor.clone())
    }

    async fn get_candidates(
        &self,
        descriptor: &Descriptor,
        opts: &ResolveOptions,
    ) -> Result<Vec<Locator>, PkgError> {
        let selector = &descriptor.range()[WORKSPACE_PROTOCOL.len()..];

        // `workspace:packages/app` names a path, `workspace:^` names the ident
        let workspace = opts
            .workspaces
            .iter()
            .find(|w| w.relative_cwd == selector)
            .or_else(|| {
                opts.workspaces
                    .iter()
                    .find(|w| w.anchored_locator.ident() == descriptor.ident())
            })
            .ok_or_else(|| PkgError::candidate_exhausted(&descriptor.to_string()))?;

        Ok(vec![workspace.anchored_locator.clone()])
    }

    async fn resolve(&self, locator: &Locator, opts: &ResolveOptions) -> Result<Package, PkgError> {
        let workspace = opts
            .workspaces
            .iter()
            .find(|w| &w.anchored_locator == locator)
            .ok_or_else(|| PkgError::candidate_exhausted(&locator.to_string()))?;

        let mut package = Package::from_manifest(locator.clone(), LinkType::Soft, &workspace.manifest);
        package.dependencies = workspace
            .manifest
            .hard_dependencies()
            .into_values()
            .map(|descriptor| (descriptor.descriptor_hash().clone(), descriptor))
            .collect();
        Ok(package)
    }
}
