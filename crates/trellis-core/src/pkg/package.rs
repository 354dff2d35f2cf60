//! Resolved packages and the manifest values they are built from.

use super::error::PkgError;
use super::ident::{Descriptor, DescriptorHash, Ident, IdentHash, Locator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Manifest filename.
pub const MANIFEST_NAME: &str = "package.json";

/// Scripts that make a package need a build step, in execution order.
pub const BUILD_SCRIPT_NAMES: [&str; 3] = ["preinstall", "install", "postinstall"];

/// How a package's files are owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkType {
    /// Owned by the cache.
    Hard,
    /// Referenced in place on the filesystem (workspaces, `link:`).
    Soft,
}

/// A resolved package. Produced once per locator by a resolver.
#[derive(Debug, Clone)]
pub struct Package {
    pub locator: Locator,
    pub version: Option<String>,
    pub link_type: LinkType,
    pub dependencies: BTreeMap<DescriptorHash, Descriptor>,
    pub peer_dependencies: BTreeMap<DescriptorHash, Descriptor>,
    pub binaries: BTreeMap<String, String>,
}

impl Package {
    /// A package with no dependencies.
    #[must_use]
    pub fn new(locator: Locator, link_type: LinkType) -> Self {
        Self {
            locator,
            version: None,
            link_type,
            dependencies: BTreeMap::new(),
            peer_dependencies: BTreeMap::new(),
            binaries: BTreeMap::new(),
        }
    }

    /// Build a package from a manifest, keeping its regular and peer dependencies.
    #[must_use]
    pub fn from_manifest(locator: Locator, link_type: LinkType, manifest: &Manifest) -> Self {
        Self {
            locator,
            version: manifest.version.clone(),
            link_type,
            dependencies: rekey(&manifest.dependencies),
            peer_dependencies: rekey(&manifest.peer_dependencies),
            binaries: manifest.bin.clone(),
        }
    }

    #[must_use]
    pub fn ident(&self) -> &Ident {
        self.locator.ident()
    }
}

fn rekey(map: &BTreeMap<IdentHash, Descriptor>) -> BTreeMap<DescriptorHash, Descriptor> {
    map.values()
        .map(|d| (d.descriptor_hash().clone(), d.clone()))
        .collect()
}

/// The fields of a `package.json` the engine reads.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub name: Option<Ident>,
    pub version: Option<String>,
    pub bin: BTreeMap<String, String>,
    pub scripts: BTreeMap<String, String>,
    pub dependencies: BTreeMap<IdentHash, Descriptor>,
    pub dev_dependencies: BTreeMap<IdentHash, Descriptor>,
    pub peer_dependencies: BTreeMap<IdentHash, Descriptor>,
    /// Glob patterns from the `workspaces` field.
    pub workspace_definitions: Vec<String>,
}

impl Manifest {
    /// Read `<dir>/package.json`.
    ///
    /// Field-level problems are logged and skipped; only an unreadable file
    /// or a non-object document is an error.
    pub fn find(dir: &Path) -> Result<Self, PkgError> {
        let path = dir.join(MANIFEST_NAME);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            PkgError::manifest_invalid(format!("Failed to read {}: {e}", path.display()))
        })?;

        let (manifest, errors) = Self::parse(&content)?;
        for error in errors {
            warn!(path = %path.display(), error = %error.message(), "Ignoring invalid manifest field");
        }
        Ok(manifest)
    }

    /// Parse manifest JSON text, returning the manifest and any field errors.
    pub fn parse(content: &str) -> Result<(Self, Vec<PkgError>), PkgError> {
        let data: Value = serde_json::from_str(content)?;
        let mut manifest = Self::default();
        let errors = manifest.load(&data)?;
        Ok((manifest, errors))
    }

    /// Populate from a JSON value, collecting every field error.
    pub fn load(&mut self, data: &Value) -> Result<Vec<PkgError>, PkgError> {
        let Some(root) = data.as_object() else {
            return Err(PkgError::manifest_invalid(
                "Utterly invalid manifest data: expected a JSON object",
            ));
        };

        let mut errors = Vec::new();

        if let Some(name) = root.get("name").and_then(Value::as_str) {
            match Ident::parse(name) {
                Ok(ident) => self.name = Some(ident),
                Err(_) => errors.push(PkgError::manifest_invalid(
                    "Parsing failed for the 'name' field",
                )),
            }
        }

        if let Some(version) = root.get("version").and_then(Value::as_str) {
            self.version = Some(version.to_string());
        }

        match root.get("bin") {
            Some(Value::String(path)) => match &self.name {
                Some(name) => {
                    self.bin.insert(name.name().to_string(), path.clone());
                }
                None => errors.push(PkgError::manifest_invalid(
                    "String bin field, but no attached package name",
                )),
            },
            Some(Value::Object(entries)) => {
                load_string_map(entries, "bin", &mut self.bin, &mut errors);
            }
            _ => {}
        }

        if let Some(Value::Object(entries)) = root.get("scripts") {
            load_string_map(entries, "script", &mut self.scripts, &mut errors);
        }

        load_dependencies(root, "dependencies", &mut self.dependencies, &mut errors);
        load_dependencies(root, "devDependencies", &mut self.dev_dependencies, &mut errors);
        load_dependencies(root, "peerDependencies", &mut self.peer_dependencies, &mut errors);

        // Either `["packages/*"]` or `{"packages": ["packages/*"]}`
        let workspaces = match root.get("workspaces") {
            Some(Value::Array(entries)) => Some(entries),
            Some(Value::Object(obj)) => obj.get("packages").and_then(Value::as_array),
            _ => None,
        };
        for entry in workspaces.into_iter().flatten() {
            match entry.as_str() {
                Some(pattern) => self.workspace_definitions.push(pattern.to_string()),
                None => errors.push(PkgError::manifest_invalid(format!(
                    "Invalid workspace definition for '{entry}'"
                ))),
            }
        }

        Ok(errors)
    }

    /// Build scripts this manifest declares, in execution order.
    #[must_use]
    pub fn build_scripts(&self) -> Vec<String> {
        BUILD_SCRIPT_NAMES
            .iter()
            .filter(|name| self.scripts.contains_key(**name))
            .map(|name| (*name).to_string())
            .collect()
    }

    /// Dependencies and devDependencies, the latter overridden by the former.
    #[must_use]
    pub fn hard_dependencies(&self) -> BTreeMap<IdentHash, Descriptor> {
        let mut all = self.dev_dependencies.clone();
        all.extend(
            self.dependencies
                .iter()
                .map(|(hash, descriptor)| (hash.clone(), descriptor.clone())),
        );
        all
    }
}

fn load_string_map(
    entries: &Map<String, Value>,
    what: &str,
    target: &mut BTreeMap<String, String>,
    errors: &mut Vec<PkgError>,
) {
    for (key, value) in entries {
        match value.as_str() {
            Some(value) => {
                target.insert(key.clone(), value.to_string());
            }
            None => errors.push(PkgError::manifest_invalid(format!(
                "Invalid {what} definition for '{key}'"
            ))),
        }
    }
}

fn load_dependencies(
    root: &Map<String, Value>,
    section: &str,
    target: &mut BTreeMap<IdentHash, Descriptor>,
    errors: &mut Vec<PkgError>,
) {
    let Some(Value::Object(entries)) = root.get(section) else {
        return;
    };

    for (name, range) in entries {
        let Some(range) = range.as_str() else {
            errors.push(PkgError::manifest_invalid(format!(
                "Invalid dependency range for '{name}'"
            )));
            continue;
        };

        let Ok(ident) = Ident::parse(name) else {
            errors.push(PkgError::manifest_invalid(format!(
                "Parsing failed for the dependency name '{name}'"
            )));
            continue;
        };

        let descriptor = Descriptor::new(ident, range);
        target.insert(descriptor.ident().ident_hash().clone(), descriptor);
    }
}
