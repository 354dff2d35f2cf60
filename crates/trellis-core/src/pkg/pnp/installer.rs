//! The Plug'n'Play linker: one generated map instead of a `node_modules` tree.

use super::map::PnpMap;
use super::script::{generate_runtime_script, LocatorRef, RuntimeState, RUNTIME_STATE_VERSION};
use super::store::{PackageInformation, PackageInformationStore, StoreKey};
use crate::pkg::cache::FetchResult;
use crate::pkg::error::PkgError;
use crate::pkg::ident::{Ident, IdentHash, Locator};
use crate::pkg::linker::{BuildDirective, InstallResult, Installer, LinkOptions, Linker};
use crate::pkg::package::{LinkType, Manifest, Package, MANIFEST_NAME};
use crate::pkg::report::MessageName;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use trellis_util::fs::{
    atomic_write, copy_tree_no_overwrite, read_dir_sorted, relative_path, remove_path, to_slash_string,
};

/// Linker producing a single resolution map.
#[derive(Debug, Default, Clone, Copy)]
pub struct PnpLinker;

impl PnpLinker {
    fn load_map(opts: &LinkOptions) -> Result<PnpMap, PkgError> {
        PnpMap::load(&opts.configuration.pnp_path)
    }
}

impl Linker for PnpLinker {
    fn supports_package(&self, _package: &Package, _opts: &LinkOptions) -> bool {
        true
    }

    fn find_package_location(&self, locator: &Locator, opts: &LinkOptions) -> Result<PathBuf, PkgError> {
        Self::load_map(opts)?.find_package_location(locator)
    }

    fn find_package_locator(&self, location: &Path, opts: &LinkOptions) -> Result<Option<Locator>, PkgError> {
        Self::load_map(opts)?.find_package_locator(location)
    }

    fn make_installer(&self, opts: LinkOptions) -> Box<dyn Installer> {
        Box::new(PnpInstaller::new(opts))
    }
}

#[derive(Debug, Default)]
struct InstallState {
    store: PackageInformationStore,
    unplugged_paths: BTreeSet<PathBuf>,
    finalized: bool,
}

/// Installer for one run of the [`PnpLinker`].
pub struct PnpInstaller {
    opts: LinkOptions,
    project_root: PathBuf,
    forced_unplug: HashSet<IdentHash>,
    state: Mutex<InstallState>,
}

impl PnpInstaller {
    #[must_use]
    pub fn new(opts: LinkOptions) -> Self {
        let forced_unplug = opts
            .configuration
            .forced_unplug_packages
            .iter()
            .filter_map(|name| Ident::parse(name).ok())
            .map(|ident| ident.ident_hash().clone())
            .collect();

        Self {
            project_root: real_path(opts.project_cwd()),
            opts,
            forced_unplug,
            state: Mutex::new(InstallState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, InstallState>, PkgError> {
        self.state
            .lock()
            .map_err(|_| PkgError::io("Install state lock poisoned"))
    }

    fn normalize(&self, location: &Path) -> String {
        normalize_directory_path(&self.project_root, &real_path(location))
    }

    /// Build scripts that survive configuration gating.
    fn gated_build_scripts(&self, package: &Package, manifest: &Manifest) -> Vec<String> {
        let scripts = manifest.build_scripts();
        if scripts.is_empty() {
            return scripts;
        }

        let configuration = &self.opts.configuration;
        let report = &self.opts.report;
        let locator = &package.locator;

        if !configuration.enable_scripts {
            report.report_warning(
                MessageName::DisabledBuildScripts,
                &format!("{locator} lists build scripts, but all build scripts have been disabled."),
            );
            return Vec::new();
        }

        if package.link_type != LinkType::Hard {
            report.report_warning(
                MessageName::SoftLinkBuild,
                &format!("{locator} lists build scripts, but is referenced through a soft link. Soft links don't support build scripts, so they'll be ignored."),
            );
            return Vec::new();
        }

        let meta = configuration.dependency_meta(
            &package.ident().requirable_name(),
            package.version.as_deref(),
        );
        if meta.built == Some(false) {
            report.report_info(
                MessageName::BuildDisabled,
                &format!("{locator} lists build scripts, but its build has been explicitly disabled through configuration."),
            );
            return Vec::new();
        }

        scripts
    }

    fn must_unplug(&self, package: &Package, build_scripts: &[String]) -> bool {
        if package.link_type != LinkType::Hard {
            return false;
        }
        if !build_scripts.is_empty() {
            return true;
        }

        let meta = self.opts.configuration.dependency_meta(
            &package.ident().requirable_name(),
            package.version.as_deref(),
        );
        meta.unplugged == Some(true) || self.forced_unplug.contains(package.ident().ident_hash())
    }

    /// Copy the package out of the cache into its unplugged directory.
    async fn unplug(&self, locator: &Locator, fetch_result: &FetchResult) -> Result<FetchResult, PkgError> {
        let target = self
            .opts
            .configuration
            .pnp_unplugged_folder
            .join(locator.devirtualize().slug());

        let source = fetch_result.package_fs.clone();
        let destination = target.clone();
        let copied = tokio::task::spawn_blocking(move || copy_tree_no_overwrite(&source, &destination))
            .await
            .map_err(|e| PkgError::io(format!("Unplug task failed: {e}")))??;

        debug!(locator = %locator, target = %target.display(), copied, "Unplugged package");
        self.state()?.unplugged_paths.insert(target.clone());

        Ok(FetchResult {
            package_fs: target,
            prefix_path: fetch_result.prefix_path.clone(),
            checksum: fetch_result.checksum.clone(),
        })
    }

    fn assert_installed(state: &InstallState, key: &StoreKey, locator: &Locator) -> Result<(), PkgError> {
        if state.store.get(key).is_none() {
            return Err(PkgError::assertion(format!(
                "Package information store not found for {locator}"
            )));
        }
        Ok(())
    }

    /// Remove unplugged entries nothing asked for during this run.
    fn collect_unplugged(&self, in_use: &BTreeSet<PathBuf>) -> Result<(), PkgError> {
        let unplugged_root = &self.opts.configuration.pnp_unplugged_folder;

        if in_use.is_empty() {
            if unplugged_root.exists() {
                debug!(path = %unplugged_root.display(), "Removing unplugged folder");
                remove_path(unplugged_root)?;
            }
            return Ok(());
        }

        for entry in read_dir_sorted(unplugged_root)? {
            if in_use.contains(&entry) {
                continue;
            }
            debug!(path = %entry.display(), "Removing stale unplugged package");
            remove_path(&entry)?;
            if let Some(name) = entry.file_name() {
                self.opts.report.report_info(
                    MessageName::UnpluggedCleanup,
                    &format!("Removed stale unplugged package {}", name.to_string_lossy()),
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Installer for PnpInstaller {
    async fn install_package(
        &self,
        package: &Package,
        fetch_result: &FetchResult,
    ) -> Result<InstallResult, PkgError> {
        let package_root = fetch_result.package_root();
        let manifest = if package_root.join(MANIFEST_NAME).is_file() {
            Manifest::find(&package_root)?
        } else {
            Manifest::default()
        };

        let build_scripts = self.gated_build_scripts(package, &manifest);

        let fetch_result = if self.must_unplug(package, &build_scripts) {
            self.unplug(&package.locator, fetch_result).await?
        } else {
            fetch_result.clone()
        };

        let location = fetch_result.package_root();
        let mut information = PackageInformation::new(self.normalize(&location), package.link_type);
        for descriptor in package.peer_dependencies.values() {
            information
                .package_dependencies
                .insert(descriptor.ident().requirable_name(), None);
        }

        let key = StoreKey::package(
            package.ident().requirable_name(),
            package.locator.reference(),
        );
        self.state()?.store.insert(key, information);

        let build_directive = if build_scripts.is_empty() {
            None
        } else {
            Some(BuildDirective {
                scripts: build_scripts,
            })
        };
        Ok(InstallResult {
            location,
            build_directive,
        })
    }

    async fn attach_internal_dependencies(
        &self,
        locator: &Locator,
        dependencies: &[Locator],
    ) -> Result<(), PkgError> {
        let key = StoreKey::package(locator.ident().requirable_name(), locator.reference());
        let mut state = self.state()?;
        Self::assert_installed(&state, &key, locator)?;

        if let Some(information) = state.store.get_mut(&key) {
            for dependency in dependencies {
                information.package_dependencies.insert(
                    dependency.ident().requirable_name(),
                    Some(dependency.reference().to_string()),
                );
            }
        }
        Ok(())
    }

    async fn attach_external_dependents(
        &self,
        locator: &Locator,
        dependent_paths: &[PathBuf],
    ) -> Result<(), PkgError> {
        let key = StoreKey::package(locator.ident().requirable_name(), locator.reference());
        let normalized: Vec<String> = dependent_paths.iter().map(|path| self.normalize(path)).collect();

        let mut state = self.state()?;
        Self::assert_installed(&state, &key, locator)?;

        for location in normalized {
            let information = state
                .store
                .get_or_insert_with(StoreKey::disk(location.clone()), || {
                    PackageInformation::new(location, LinkType::Soft)
                });
            information.package_dependencies.insert(
                locator.ident().requirable_name(),
                Some(locator.reference().to_string()),
            );
        }
        Ok(())
    }

    async fn finalize_install(&self) -> Result<(), PkgError> {
        let configuration = &self.opts.configuration;

        let (script, in_use, entries) = {
            let mut state = self.state()?;
            if state.finalized {
                return Err(PkgError::assertion("The install has already been finalized"));
            }

            let top_level = &self.opts.top_level_locator;
            let root = state
                .store
                .get(&StoreKey::package(
                    top_level.ident().requirable_name(),
                    top_level.reference(),
                ))
                .cloned()
                .ok_or_else(|| {
                    PkgError::assertion(format!(
                        "Package information store not found for {top_level}"
                    ))
                })?;
            state.store.insert(StoreKey::top_level(), root);

            let pnp_dir = configuration
                .pnp_path
                .parent()
                .map_or_else(|| self.project_root.clone(), real_path);
            let project_root = relative_path(&pnp_dir, &self.project_root);
            let project_root = match to_slash_string(&project_root) {
                relative if relative.is_empty() => ".".to_string(),
                relative => relative,
            };

            let runtime_state = RuntimeState {
                info: RuntimeState::info_lines(),
                version: RUNTIME_STATE_VERSION,
                project_root,
                dependency_tree_roots: self
                    .opts
                    .dependency_tree_roots
                    .iter()
                    .map(|root| LocatorRef {
                        name: root.ident().requirable_name(),
                        reference: root.reference().to_string(),
                    })
                    .collect(),
                ignore_pattern_data: configuration.pnp_ignore_pattern.clone(),
                blacklisted_locations: vec![
                    self.normalize(&configuration.cache_folder),
                    self.normalize(&configuration.pnp_unplugged_folder),
                ],
                package_registry_data: state.store.to_registry_data(),
            };

            let script = generate_runtime_script(&runtime_state, configuration.pnp_shebang.as_deref())?;
            state.finalized = true;
            (script, state.unplugged_paths.clone(), state.store.len())
        };

        atomic_write(&configuration.pnp_path, script.as_bytes(), Some(0o755))?;
        info!(path = %configuration.pnp_path.display(), entries, "Wrote resolution map");

        self.collect_unplugged(&in_use)
    }
}

/// Express `location` as a project-relative directory path: `/` separated,
/// `./` or `../` prefixed, `/` terminated.
#[must_use]
pub fn normalize_directory_path(project_root: &Path, location: &Path) -> String {
    let mut relative = to_slash_string(&relative_path(project_root, location));

    let prefixed = relative.starts_with("./") || relative.starts_with("../") || relative.starts_with('/');
    if relative == ".." {
        relative.push('/');
    } else if !prefixed {
        relative.insert_str(0, "./");
    }
    if !relative.ends_with('/') {
        relative.push('/');
    }
    relative
}

/// Canonicalize the longest existing ancestor of `path` and re-attach the rest.
pub(crate) fn real_path(path: &Path) -> PathBuf {
    if let Ok(real) = dunce::canonicalize(path) {
        return real;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => real_path(parent).join(name),
        _ => path.to_path_buf(),
    }
}
