//! Generation of the runtime resolution artifact.
//!
//! The artifact is a self-contained CommonJS module. Its data lives in a single
//! JSON literal assigned to [`STATE_MARKER`], which is also how
//! [`extract_runtime_state`] reads it back without a JavaScript engine.

use super::store::RegistryData;
use crate::pkg::error::PkgError;
use serde::{Deserialize, Serialize};

/// Version of the serialized state layout.
pub const RUNTIME_STATE_VERSION: u32 = 1;

/// Text that directly precedes the JSON state in the artifact.
pub const STATE_MARKER: &str = "const RAW_RUNTIME_STATE =\n";

/// A `(name, reference)` pair as stored in the runtime state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorRef {
    pub name: String,
    pub reference: String,
}

/// Everything the artifact knows. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState {
    #[serde(rename = "__info")]
    pub info: Vec<String>,
    pub version: u32,
    /// Project root, relative to the directory holding the artifact.
    pub project_root: String,
    pub dependency_tree_roots: Vec<LocatorRef>,
    /// Regex of project-relative paths the map does not manage.
    pub ignore_pattern_data: Option<String>,
    /// Locations that never resolve to a package.
    pub blacklisted_locations: Vec<String>,
    pub package_registry_data: RegistryData,
}

impl RuntimeState {
    #[must_use]
    pub fn info_lines() -> Vec<String> {
        vec![
            "This file is automatically generated. Do not touch it, or risk".to_string(),
            "your modifications being lost. Regenerate it by running an install.".to_string(),
        ]
    }
}

/// Render the artifact source.
///
/// # Errors
/// Returns an error if the state cannot be serialized.
pub fn generate_runtime_script(state: &RuntimeState, shebang: Option<&str>) -> Result<String, PkgError> {
    let json = serde_json::to_string_pretty(state)?;

    let mut script = String::new();
    if let Some(shebang) = shebang.filter(|s| !s.is_empty()) {
        script.push_str(shebang);
        script.push('\n');
    }
    script.push_str("/* eslint-disable */\n\"use strict\";\n\n");
    script.push_str(STATE_MARKER);
    script.push_str(&json);
    script.push_str(";\n");
    script.push_str(RUNTIME_SOURCE);
    Ok(script)
}

/// Read the state back out of artifact source.
///
/// # Errors
/// Returns `PKG_MANIFEST_INVALID` if the marker is missing or the JSON is malformed.
pub fn extract_runtime_state(source: &str) -> Result<RuntimeState, PkgError> {
    let start = source
        .find(STATE_MARKER)
        .map(|index| index + STATE_MARKER.len())
        .ok_or_else(|| PkgError::manifest_invalid("The resolution map has no embedded state"))?;

    // The JSON literal is followed by the rest of the module
    let mut values = serde_json::Deserializer::from_str(&source[start..]).into_iter::<RuntimeState>();
    let state = values
        .next()
        .ok_or_else(|| PkgError::manifest_invalid("The resolution map has no embedded state"))??;

    if state.version != RUNTIME_STATE_VERSION {
        return Err(PkgError::manifest_invalid(format!(
            "Unsupported resolution map version {} (expected {RUNTIME_STATE_VERSION})",
            state.version
        )));
    }
    Ok(state)
}

const RUNTIME_SOURCE: &str = r#"
const path = require("path");

const basePath = path.resolve(__dirname, RAW_RUNTIME_STATE.projectRoot);
const ignorePattern = RAW_RUNTIME_STATE.ignorePatternData
  ? new RegExp(RAW_RUNTIME_STATE.ignorePatternData)
  : null;

const packageRegistry = new Map(
  RAW_RUNTIME_STATE.packageRegistryData.map(([name, references]) => [
    name,
    new Map(
      references.map(([reference, info]) => [
        reference,
        {
          packageLocation: path.resolve(basePath, info.packageLocation),
          packageDependencies: new Map(Object.entries(info.packageDependencies)),
          linkType: info.linkType,
        },
      ]),
    ),
  ]),
);

function normalizeLocation(location) {
  let relative = path.relative(basePath, path.resolve(location)).split(path.sep).join("/");
  if (!/^\.{0,2}\//.test(relative)) relative = `./${relative}`;
  return relative.endsWith("/") ? relative : `${relative}/`;
}

function getPackageInformation({name, reference}) {
  const references = packageRegistry.get(name);
  return (references && references.get(reference)) || null;
}

function findPackageLocator(location) {
  const relative = normalizeLocation(location);
  if (ignorePattern && ignorePattern.test(relative)) return null;

  let best = null;
  let bestLength = -1;
  for (const [name, references] of RAW_RUNTIME_STATE.packageRegistryData) {
    if (name === null || name === "@@disk") continue;
    for (const [reference, info] of references) {
      const candidate = info.packageLocation;
      if (relative.startsWith(candidate) && candidate.length > bestLength) {
        best = {name, reference};
        bestLength = candidate.length;
      }
    }
  }

  for (const blacklisted of RAW_RUNTIME_STATE.blacklistedLocations)
    if (relative.startsWith(blacklisted) && blacklisted.length > bestLength) return null;

  return best;
}

function resolveToUnqualified(request, issuer) {
  const match = /^(@[^/]+\/[^/]+|[^/]+)(\/.*)?$/.exec(request);
  if (!match) return null;
  const [, name, subPath = ""] = match;

  const issuerLocator = findPackageLocator(issuer) || {name: null, reference: null};
  const issuerInformation = getPackageInformation(issuerLocator);
  if (!issuerInformation) return null;

  let reference = issuerInformation.packageDependencies.get(name);
  if (reference === null || reference === undefined) {
    const topLevel = getPackageInformation({name: null, reference: null});
    reference = topLevel && topLevel.packageDependencies.get(name);
  }
  if (reference === null || reference === undefined) return null;

  const dependency = getPackageInformation({name, reference});
  return dependency ? path.join(dependency.packageLocation, subPath) : null;
}

module.exports = {
  getPackageInformation,
  findPackageLocator,
  resolveToUnqualified,
  dependencyTreeRoots: RAW_RUNTIME_STATE.dependencyTreeRoots,
};

if (require.main === module) {
  const [name, reference] = process.argv.slice(2);
  const information = getPackageInformation({name, reference});
  if (!information) process.exit(1);
  process.stdout.write(`${information.packageLocation}\n`);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::package::LinkType;
    use crate::pkg::pnp::store::{PackageInformation, PackageInformationStore, StoreKey};

    fn state() -> RuntimeState {
        let mut store = PackageInformationStore::new();
        store.insert(
            StoreKey::package("lib", "npm:1.0.0"),
            PackageInformation::new("./.trellis/cache/lib/".into(), LinkType::Hard),
        );

        RuntimeState {
            info: RuntimeState::info_lines(),
            version: RUNTIME_STATE_VERSION,
            project_root: ".".to_string(),
            dependency_tree_roots: vec![LocatorRef {
                name: "root".into(),
                reference: "workspace:.".into(),
            }],
            ignore_pattern_data: Some("^\\./vendor/".into()),
            blacklisted_locations: vec!["./.trellis/cache/".into()],
            package_registry_data: store.to_registry_data(),
        }
    }

    #[test]
    fn test_generate_and_extract() {
        let script = generate_runtime_script(&state(), Some("#!/usr/bin/env node")).unwrap();
        assert!(script.starts_with("#!/usr/bin/env node\n"));
        assert!(script.contains("module.exports"));

        assert_eq!(extract_runtime_state(&script).unwrap(), state());
    }

    #[test]
    fn test_no_shebang() {
        let script = generate_runtime_script(&state(), None).unwrap();
        assert!(script.starts_with("/* eslint-disable */"));
    }

    #[test]
    fn test_extract_rejects_foreign_files() {
        assert!(extract_runtime_state("module.exports = {};").is_err());

        let mut other = state();
        other.version = RUNTIME_STATE_VERSION + 1;
        let script = generate_runtime_script(&other, None).unwrap();
        assert!(extract_runtime_state(&script).is_err());
    }
}
