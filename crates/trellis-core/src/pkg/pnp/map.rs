//! Read-only view of a generated resolution map.
//!
//! A [`PnpMap`] is loaded once from disk and never mutated; a new install
//! writes a new artifact that must be loaded again.

use super::installer::{normalize_directory_path, real_path};
use super::script::{extract_runtime_state, RuntimeState};
use super::store::{PackageInformation, PackageInformationStore, StoreKey, DISK_STORE};
use crate::pkg::error::PkgError;
use crate::pkg::ident::{Ident, Locator};
use regex_lite::Regex;
use std::path::{Path, PathBuf};

/// A loaded resolution map.
#[derive(Debug, Clone)]
pub struct PnpMap {
    project_root: PathBuf,
    store: PackageInformationStore,
    ignore_pattern: Option<Regex>,
    blacklisted_locations: Vec<String>,
    dependency_tree_roots: Vec<Locator>,
}

impl PnpMap {
    /// Load the artifact at `path`.
    ///
    /// # Errors
    /// Returns `PKG_MISSING_INSTALL_STATE` if the file does not exist, or a
    /// parse error if it is not a resolution map.
    pub fn load(path: &Path) -> Result<Self, PkgError> {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PkgError::missing_install_state(path));
            }
            Err(e) => return Err(e.into()),
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_state(extract_runtime_state(&source)?, base)
    }

    /// Build a map from state whose artifact lived in `artifact_dir`.
    ///
    /// # Errors
    /// Returns `PKG_PARSE_ERROR` if the ignore pattern or a root locator is invalid.
    pub fn from_state(state: RuntimeState, artifact_dir: &Path) -> Result<Self, PkgError> {
        let ignore_pattern = state
            .ignore_pattern_data
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| PkgError::parse(format!("Invalid ignore pattern: {e}")))?;

        let dependency_tree_roots = state
            .dependency_tree_roots
            .iter()
            .map(|root| Ok(Locator::new(Ident::parse(&root.name)?, &root.reference)))
            .collect::<Result<Vec<_>, PkgError>>()?;

        let project_root = artifact_dir.join(&state.project_root);
        Ok(Self {
            project_root: dunce::canonicalize(&project_root).unwrap_or(project_root),
            store: PackageInformationStore::from_registry_data(state.package_registry_data),
            ignore_pattern,
            blacklisted_locations: state.blacklisted_locations,
            dependency_tree_roots,
        })
    }

    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    #[must_use]
    pub fn dependency_tree_roots(&self) -> &[Locator] {
        &self.dependency_tree_roots
    }

    /// Entry for `(name, reference)`; `(None, None)` is the top level.
    #[must_use]
    pub fn get_package_information(
        &self,
        name: Option<&str>,
        reference: Option<&str>,
    ) -> Option<&PackageInformation> {
        self.store.get(&StoreKey {
            name: name.map(String::from),
            reference: reference.map(String::from),
        })
    }

    /// Absolute location of an installed package.
    ///
    /// # Errors
    /// Returns `PKG_UNRESOLVED_LOCATOR` if the locator is not in the map.
    pub fn find_package_location(&self, locator: &Locator) -> Result<PathBuf, PkgError> {
        let information = self
            .get_package_information(
                Some(&locator.ident().requirable_name()),
                Some(locator.reference()),
            )
            .ok_or_else(|| PkgError::unresolved_locator(&locator.to_string()))?;

        Ok(self.absolute(&information.package_location))
    }

    /// Whether `location` is covered by the map at all.
    #[must_use]
    pub fn is_managed(&self, location: &Path) -> bool {
        let relative = normalize_directory_path(&self.project_root, &real_path(location));
        !self
            .ignore_pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&relative))
    }

    /// The package whose location is the longest prefix of `location`.
    ///
    /// # Errors
    /// Returns `PKG_PARSE_ERROR` if the matching entry name is not a valid ident.
    pub fn find_package_locator(&self, location: &Path) -> Result<Option<Locator>, PkgError> {
        if !self.is_managed(location) {
            return Ok(None);
        }
        let relative = normalize_directory_path(&self.project_root, &real_path(location));

        let best = self
            .store
            .iter()
            .filter_map(|(key, information)| match (&key.name, &key.reference) {
                (Some(name), Some(reference)) if name != DISK_STORE => {
                    Some((name, reference, information.package_location.as_str()))
                }
                _ => None,
            })
            .filter(|(_, _, package_location)| relative.starts_with(package_location))
            .max_by_key(|(_, _, package_location)| package_location.len());

        let best_length = best.map_or(0, |(_, _, package_location)| package_location.len());
        let blacklisted = self
            .blacklisted_locations
            .iter()
            .any(|blacklisted| relative.starts_with(blacklisted.as_str()) && blacklisted.len() > best_length);
        if blacklisted {
            return Ok(None);
        }

        best.map(|(name, reference, _)| Ok(Locator::new(Ident::parse(name)?, reference)))
            .transpose()
    }

    fn absolute(&self, package_location: &str) -> PathBuf {
        let mut path = self.project_root.clone();
        for segment in package_location.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    path.pop();
                }
                segment => path.push(segment),
            }
        }
        path
    }
}
