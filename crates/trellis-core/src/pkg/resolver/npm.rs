use super::{ResolveOptions, Resolver, NPM_PROTOCOL};
use crate::pkg::error::PkgError;
use crate::pkg::ident::{Descriptor, Locator};
use crate::pkg::package::{LinkType, Manifest, Package};
use crate::pkg::registry::{get_dist_tag, get_version_manifest};
use crate::pkg::version::{is_valid_range, matching_versions};
use async_trait::async_trait;
use regex_lite::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Registry packages: semver ranges, exact versions and dist-tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpmResolver;

fn is_dist_tag(range: &str) -> bool {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9._-]*$").ok())
        .as_ref()
        .is_some_and(|tag| tag.is_match(range))
}

fn strip_protocol(range: &str) -> &str {
    range.strip_prefix(NPM_PROTOCOL).unwrap_or(range)
}

#[async_trait]
impl Resolver for NpmResolver {
    fn supports_descriptor(&self, descriptor: &Descriptor, _opts: &ResolveOptions) -> bool {
        let range = strip_protocol(descriptor.range());
        is_valid_range(range) || is_dist_tag(range)
    }

    fn supports_locator(&self, locator: &Locator, _opts: &ResolveOptions) -> bool {
        locator
            .reference()
            .strip_prefix(NPM_PROTOCOL)
            .is_some_and(|version| semver::Version::parse(version).is_ok())
    }

    fn normalize_descriptor(
        &self,
        descriptor: &Descriptor,
        _from_locator: &Locator,
        _opts: &ResolveOptions,
    ) -> Result<Descriptor, PkgError> {
        // Registry ranges mean the same thing everywhere; only the protocol is made explicit
        if descriptor.range().starts_with(NPM_PROTOCOL) {
            Ok(descriptor.clone())
        } else {
            Ok(descriptor.with_range(&format!("{NPM_PROTOCOL}{}", descriptor.range())))
        }
    }

    async fn get_candidates(
        &self,
        descriptor: &Descriptor,
        opts: &ResolveOptions,
    ) -> Result<Vec<Locator>, PkgError> {
        if let Some(locked) = opts.locked.get(descriptor.descriptor_hash()) {
            debug!(descriptor = %descriptor, locator = %locked, "Using locked resolution");
            return Ok(vec![locked.clone()]);
        }

        let ident = descriptor.ident();
        let range = strip_protocol(descriptor.range());
        let packument = opts
            .fetch_options
            .registry
            .fetch_packument(&ident.requirable_name())
            .await?;

        let versions: Vec<String> = if is_valid_range(range) {
            matching_versions(&packument, range)?
                .iter()
                .map(ToString::to_string)
                .collect()
        } else {
            get_dist_tag(&packument, range)
                .map(String::from)
                .into_iter()
                .collect()
        };

        if versions.is_empty() {
            return Err(PkgError::candidate_exhausted(&descriptor.to_string()));
        }

        Ok(versions
            .iter()
            .map(|version| Locator::new(ident.clone(), &format!("{NPM_PROTOCOL}{version}")))
            .collect())
    }

    async fn resolve(&self, locator: &Locator, opts: &ResolveOptions) -> Result<Package, PkgError> {
        let version = locator
            .reference()
            .strip_prefix(NPM_PROTOCOL)
            .ok_or_else(|| PkgError::unsupported_locator(&locator.to_string()))?;
        let packument = opts
            .fetch_options
            .registry
            .fetch_packument(&locator.ident().requirable_name())
            .await?;

        let data = get_version_manifest(&packument, version).ok_or_else(|| {
            PkgError::registry(format!("{locator}: version {version} is not in the registry"))
        })?;

        let mut manifest = Manifest::default();
        for error in manifest.load(data)? {
            warn!(locator = %locator, error = %error.message(), "Ignoring invalid manifest field");
        }

        let mut package = Package::from_manifest(locator.clone(), LinkType::Hard, &manifest);
        package.version = Some(version.to_string());
        Ok(package)
    }
}
