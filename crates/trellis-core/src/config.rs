//! Project configuration.
//!
//! Settings are read from `.trellisrc.json` at the project root. Every key is
//! optional; relative paths are anchored to the project root when loaded.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Settings file looked up at the project root.
pub const CONFIG_FILENAME: &str = ".trellisrc.json";

/// Environment variable to override the registry URL.
pub const REGISTRY_ENV: &str = "TRELLIS_NPM_REGISTRY";

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Per-package overrides from the `dependenciesMeta` setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyMeta {
    /// `Some(false)` disables the package's build scripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built: Option<bool>,
    /// `Some(true)` forces the package to be unpacked to a real directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unplugged: Option<bool>,
}

impl DependencyMeta {
    fn merged_with(self, other: Self) -> Self {
        Self {
            built: other.built.or(self.built),
            unplugged: other.unplugged.or(self.unplugged),
        }
    }
}

/// Runtime configuration for an install.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    /// Project root all relative settings are anchored to.
    #[serde(skip)]
    pub project_cwd: PathBuf,

    /// Location of the generated runtime artifact.
    pub pnp_path: PathBuf,

    /// Root of the unplugged package tree.
    pub pnp_unplugged_folder: PathBuf,

    /// Root of the content cache.
    pub cache_folder: PathBuf,

    /// Global switch for preinstall/install/postinstall scripts.
    pub enable_scripts: bool,

    /// First line of the generated artifact.
    pub pnp_shebang: Option<String>,

    /// Paths matching this regex are not managed by the resolution map.
    pub pnp_ignore_pattern: Option<String>,

    /// Registry used by the npm resolver and fetcher.
    pub npm_registry_server: String,

    /// Packages that are always unplugged, regardless of their scripts.
    pub forced_unplug_packages: Vec<String>,

    /// `name` or `name@version` -> overrides.
    pub dependencies_meta: BTreeMap<String, DependencyMeta>,

    /// Maximum concurrent resolve/fetch operations.
    pub network_concurrency: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            project_cwd: PathBuf::from("."),
            pnp_path: PathBuf::from(".pnp.cjs"),
            pnp_unplugged_folder: PathBuf::from(".trellis").join("unplugged"),
            cache_folder: PathBuf::from(".trellis").join("cache"),
            enable_scripts: true,
            pnp_shebang: Some("#!/usr/bin/env node".to_string()),
            pnp_ignore_pattern: None,
            npm_registry_server: DEFAULT_REGISTRY.to_string(),
            forced_unplug_packages: vec!["node-pre-gyp".to_string()],
            dependencies_meta: BTreeMap::new(),
            network_concurrency: 32,
        }
    }
}

impl Configuration {
    /// Default settings anchored at `project_cwd`.
    #[must_use]
    pub fn for_project(project_cwd: &Path) -> Self {
        let mut configuration = Self {
            project_cwd: project_cwd.to_path_buf(),
            ..Self::default()
        };
        configuration.anchor_paths();
        configuration
    }

    /// Load `.trellisrc.json` from `project_cwd` if it exists, then apply
    /// environment overrides.
    ///
    /// # Errors
    /// Returns an error if the settings file exists but cannot be read or parsed.
    pub fn find(project_cwd: &Path) -> Result<Self, Error> {
        let path = project_cwd.join(CONFIG_FILENAME);

        let mut configuration = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str::<Self>(&content)
                .map_err(|source| Error::ConfigParse { path, source })?
        } else {
            Self::default()
        };

        if let Ok(registry) = std::env::var(REGISTRY_ENV) {
            configuration.npm_registry_server = registry;
        }

        configuration.project_cwd = project_cwd.to_path_buf();
        configuration.anchor_paths();
        Ok(configuration)
    }

    fn anchor_paths(&mut self) {
        for path in [
            &mut self.pnp_path,
            &mut self.pnp_unplugged_folder,
            &mut self.cache_folder,
        ] {
            if path.is_relative() {
                *path = self.project_cwd.join(&*path);
            }
        }
    }

    /// Look up a setting by its camelCase key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let value = serde_json::to_value(self).ok()?;
        value.get(key).filter(|v| !v.is_null()).cloned()
    }

    /// Override a setting by its camelCase key.
    ///
    /// # Errors
    /// Returns an error if the key is unknown or the value has the wrong shape.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), Error> {
        let mut object = match serde_json::to_value(&*self) {
            Ok(Value::Object(object)) => object,
            _ => {
                return Err(Error::ConfigValue {
                    key: key.to_string(),
                    message: "configuration is not serializable".to_string(),
                })
            }
        };

        if !object.contains_key(key) {
            return Err(Error::ConfigValue {
                key: key.to_string(),
                message: "unknown setting".to_string(),
            });
        }
        object.insert(key.to_string(), value);

        let mut updated: Self =
            serde_json::from_value(Value::Object(object)).map_err(|e| Error::ConfigValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.project_cwd = std::mem::take(&mut self.project_cwd);
        updated.anchor_paths();
        *self = updated;
        Ok(())
    }

    /// Effective dependency metadata for a package.
    ///
    /// The bare `name` entry applies to every version; a `name@version` entry
    /// overrides it field by field.
    #[must_use]
    pub fn dependency_meta(&self, name: &str, version: Option<&str>) -> DependencyMeta {
        let base = self.dependencies_meta.get(name).copied().unwrap_or_default();

        match version.and_then(|v| self.dependencies_meta.get(&format!("{name}@{v}"))) {
            Some(exact) => base.merged_with(*exact),
            None => base,
        }
    }

    /// Set scripts enabled flag.
    #[must_use]
    pub fn with_enable_scripts(mut self, enabled: bool) -> Self {
        self.enable_scripts = enabled;
        self
    }

    /// Add a dependency meta entry.
    #[must_use]
    pub fn with_dependency_meta(mut self, key: impl Into<String>, meta: DependencyMeta) -> Self {
        self.dependencies_meta.insert(key.into(), meta);
        self
    }

    /// Set the ignore pattern.
    #[must_use]
    pub fn with_ignore_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pnp_ignore_pattern = Some(pattern.into());
        self
    }
}
