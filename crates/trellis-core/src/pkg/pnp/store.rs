//! The package information store: one entry per `(name, reference)`.

use crate::pkg::package::LinkType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pseudo package name under which path-addressed entries are stored.
pub const DISK_STORE: &str = "@@disk";

/// Where a package lives and what it can require.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInformation {
    /// Project-relative, `./` or `../` prefixed, `/` terminated.
    pub package_location: String,
    /// Requirable name -> reference. `None` defers to the top level.
    pub package_dependencies: BTreeMap<String, Option<String>>,
    pub link_type: LinkType,
}

impl PackageInformation {
    #[must_use]
    pub fn new(package_location: String, link_type: LinkType) -> Self {
        Self {
            package_location,
            package_dependencies: BTreeMap::new(),
            link_type,
        }
    }
}

/// Composite store key. `(None, None)` is the top-level entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey {
    pub name: Option<String>,
    pub reference: Option<String>,
}

impl StoreKey {
    #[must_use]
    pub fn top_level() -> Self {
        Self {
            name: None,
            reference: None,
        }
    }

    #[must_use]
    pub fn package(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            reference: Some(reference.into()),
        }
    }

    /// Entry for a consumer known only by its normalized path.
    #[must_use]
    pub fn disk(normalized_path: impl Into<String>) -> Self {
        Self::package(DISK_STORE, normalized_path)
    }
}

/// The generated lookup table. Rebuilt from scratch on every install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageInformationStore {
    entries: BTreeMap<StoreKey, PackageInformation>,
}

/// Serialized shape: `[[name, [[reference, information], ...]], ...]`.
pub type RegistryData = Vec<(Option<String>, Vec<(Option<String>, PackageInformation)>)>;

impl PackageInformationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &StoreKey) -> Option<&PackageInformation> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &StoreKey) -> Option<&mut PackageInformation> {
        self.entries.get_mut(key)
    }

    pub fn insert(&mut self, key: StoreKey, information: PackageInformation) {
        self.entries.insert(key, information);
    }

    /// Fetch the entry for `key`, creating it with `default` when missing.
    pub fn get_or_insert_with(
        &mut self,
        key: StoreKey,
        default: impl FnOnce() -> PackageInformation,
    ) -> &mut PackageInformation {
        self.entries.entry(key).or_insert_with(default)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StoreKey, &PackageInformation)> {
        self.entries.iter()
    }

    /// Group entries by name for serialization. Output order is deterministic.
    #[must_use]
    pub fn to_registry_data(&self) -> RegistryData {
        let mut grouped: BTreeMap<Option<String>, Vec<(Option<String>, PackageInformation)>> =
            BTreeMap::new();
        for (key, information) in &self.entries {
            grouped
                .entry(key.name.clone())
                .or_default()
                .push((key.reference.clone(), information.clone()));
        }
        grouped.into_iter().collect()
    }

    /// Inverse of [`Self::to_registry_data`].
    #[must_use]
    pub fn from_registry_data(data: RegistryData) -> Self {
        let entries = data
            .into_iter()
            .flat_map(|(name, references)| {
                references.into_iter().map(move |(reference, information)| {
                    (
                        StoreKey {
                            name: name.clone(),
                            reference,
                        },
                        information,
                    )
                })
            })
            .collect();
        Self { entries }
    }
}
