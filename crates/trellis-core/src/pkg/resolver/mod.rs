//! Resolvers: turn descriptors into locators and locators into packages.
//!
//! Each variant claims descriptors and locators by range/reference syntax.
//! [`MultiResolver`] holds them in priority order and dispatches to the first
//! one that accepts.

mod link;
mod npm;
mod tarball;
mod workspace;

pub use link::LinkResolver;
pub use npm::NpmResolver;
pub use tarball::TarballFileResolver;
pub use workspace::WorkspaceResolver;

use super::error::PkgError;
use super::fetcher::FetchOptions;
use super::ident::{Descriptor, DescriptorHash, Locator};
use super::package::Package;
use super::project::Workspace;
use async_trait::async_trait;
use regex_lite::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use url::form_urlencoded;

pub const NPM_PROTOCOL: &str = "npm:";
pub const FILE_PROTOCOL: &str = "file:";
pub const LINK_PROTOCOL: &str = "link:";
pub const WORKSPACE_PROTOCOL: &str = "workspace:";

/// Everything a resolver may need besides the descriptor or locator.
#[derive(Clone)]
pub struct ResolveOptions {
    pub fetch_options: FetchOptions,
    pub workspaces: Arc<Vec<Workspace>>,
    /// Resolutions carried over from a previous install.
    pub locked: Arc<BTreeMap<DescriptorHash, Locator>>,
}

/// One way of resolving packages.
#[async_trait]
pub trait Resolver: Send + Sync {
    fn supports_descriptor(&self, descriptor: &Descriptor, opts: &ResolveOptions) -> bool;

    fn supports_locator(&self, locator: &Locator, opts: &ResolveOptions) -> bool;

    /// Rewrite a descriptor into a form that means the same thing wherever it
    /// is used. Ranges that only make sense relative to their declaring
    /// package get that package folded in.
    fn normalize_descriptor(
        &self,
        descriptor: &Descriptor,
        from_locator: &Locator,
        opts: &ResolveOptions,
    ) -> Result<Descriptor, PkgError>;

    /// Candidate locators, most preferred first.
    async fn get_candidates(
        &self,
        descriptor: &Descriptor,
        opts: &ResolveOptions,
    ) -> Result<Vec<Locator>, PkgError>;

    /// Full package metadata for a concrete locator.
    async fn resolve(&self, locator: &Locator, opts: &ResolveOptions) -> Result<Package, PkgError>;
}

/// Ordered set of resolvers; the first that supports an input wins.
pub struct MultiResolver {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl MultiResolver {
    #[must_use]
    pub fn new(resolvers: Vec<Box<dyn Resolver>>) -> Self {
        Self { resolvers }
    }

    fn for_descriptor(
        &self,
        descriptor: &Descriptor,
        opts: &ResolveOptions,
    ) -> Result<&dyn Resolver, PkgError> {
        self.resolvers
            .iter()
            .find(|resolver| resolver.supports_descriptor(descriptor, opts))
            .map(AsRef::as_ref)
            .ok_or_else(|| PkgError::unsupported_range(&descriptor.to_string()))
    }

    fn for_locator(&self, locator: &Locator, opts: &ResolveOptions) -> Result<&dyn Resolver, PkgError> {
        self.resolvers
            .iter()
            .find(|resolver| resolver.supports_locator(locator, opts))
            .map(AsRef::as_ref)
            .ok_or_else(|| PkgError::unsupported_locator(&locator.to_string()))
    }
}

impl Default for MultiResolver {
    fn default() -> Self {
        Self::new(vec![
            Box::new(WorkspaceResolver),
            Box::new(LinkResolver),
            Box::new(TarballFileResolver),
            Box::new(NpmResolver),
        ])
    }
}

#[async_trait]
impl Resolver for MultiResolver {
    fn supports_descriptor(&self, descriptor: &Descriptor, opts: &ResolveOptions) -> bool {
        self.for_descriptor(descriptor, opts).is_ok()
    }

    fn supports_locator(&self, locator: &Locator, opts: &ResolveOptions) -> bool {
        self.for_locator(locator, opts).is_ok()
    }

    fn normalize_descriptor(
        &self,
        descriptor: &Descriptor,
        from_locator: &Locator,
        opts: &ResolveOptions,
    ) -> Result<Descriptor, PkgError> {
        self.for_descriptor(descriptor, opts)?
            .normalize_descriptor(descriptor, from_locator, opts)
    }

    async fn get_candidates(
        &self,
        descriptor: &Descriptor,
        opts: &ResolveOptions,
    ) -> Result<Vec<Locator>, PkgError> {
        self.for_descriptor(descriptor, opts)?
            .get_candidates(descriptor, opts)
            .await
    }

    async fn resolve(&self, locator: &Locator, opts: &ResolveOptions) -> Result<Package, PkgError> {
        self.for_locator(locator, opts)?.resolve(locator, opts).await
    }
}

/// Fold the declaring locator into a path-like range: `<path>?locator=<encoded>`.
#[must_use]
pub fn bind_range(path: &str, from_locator: &Locator) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("locator", &from_locator.to_string())
        .finish();
    format!("{path}?{query}")
}

/// Split a bound range into its path and declaring locator.
///
/// # Errors
/// Returns `PKG_PARSE_ERROR` if the embedded locator is malformed.
pub fn parse_bound_range(range: &str) -> Result<(&str, Option<Locator>), PkgError> {
    let Some((path, query)) = range.split_once('?') else {
        return Ok((range, None));
    };

    let locator = form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "locator")
        .map(|(_, value)| Locator::parse(&value))
        .transpose()?;

    Ok((path, locator))
}

/// Whether a range or reference names a local tarball (`file:x.tgz`, `./x.tar.gz`).
#[must_use]
pub fn is_tarball_reference(range: &str) -> bool {
    static TARBALL: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(tarball) = TARBALL
        .get_or_init(|| Regex::new(r"^[^?]*\.(?:tar\.gz|tgz)(?:\?.*)?$").ok())
        .as_ref()
    else {
        return false;
    };

    if !tarball.is_match(range) {
        return false;
    }

    range.starts_with(FILE_PROTOCOL)
        || range.starts_with("./")
        || range.starts_with("../")
        || range.starts_with('/')
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::pkg::fetcher::test_support as fetch_support;
    use crate::pkg::registry::MemoryRegistry;
    use std::path::Path;

    pub fn options(project_cwd: &Path, registry: MemoryRegistry) -> ResolveOptions {
        ResolveOptions {
            fetch_options: fetch_support::options(project_cwd, registry),
            workspaces: Arc::default(),
            locked: Arc::default(),
        }
    }
}
