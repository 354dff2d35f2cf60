//! A project and its install pipeline.
//!
//! Installing runs three steps, each feeding the next:
//!
//! 1. [`Project::resolve_everything`] walks the dependency graph from the
//!    workspaces, deduplicating by descriptor and locator hash, then binds
//!    peer dependencies by creating virtual packages.
//! 2. [`Project::fetch_everything`] gets every package's files on disk.
//! 3. [`Project::link_everything`] drives the linker through an
//!    [`InstallSession`].

use super::cache::{Cache, FetchResult};
use super::error::{codes, PkgError};
use super::fetcher::{FetchOptions, Fetcher, MultiFetcher};
use super::ident::{Descriptor, DescriptorHash, Ident, Locator, LocatorHash};
use super::linker::{BuildDirective, InstallSession, LinkOptions, Linker};
use super::package::{Manifest, Package, MANIFEST_NAME};
use super::pnp::PnpLinker;
use super::registry::{PackumentSource, RegistryClient};
use super::report::{MemoryReport, MessageName, Report};
use super::resolver::{MultiResolver, ResolveOptions, Resolver, WORKSPACE_PROTOCOL};
use crate::config::Configuration;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use trellis_util::fs::{relative_path, to_slash_string};
use trellis_util::hash::blake3_parts;

/// Name given to a root workspace whose manifest has none.
pub const ROOT_WORKSPACE_NAME: &str = "root-workspace";

/// A directory of the project with its own manifest.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub cwd: PathBuf,
    /// Path from the project root, `/` separated; `.` for the root itself.
    pub relative_cwd: String,
    pub manifest: Manifest,
    /// `<name>@workspace:<relative_cwd>`
    pub anchored_locator: Locator,
}

impl Workspace {
    fn load(project_cwd: &Path, cwd: PathBuf) -> Result<Self, PkgError> {
        let manifest = Manifest::find(&cwd)?;

        let relative_cwd = match to_slash_string(&relative_path(project_cwd, &cwd)) {
            relative if relative.is_empty() => ".".to_string(),
            relative => relative,
        };

        let ident = match &manifest.name {
            Some(name) => name.clone(),
            None if relative_cwd == "." => Ident::new(None, ROOT_WORKSPACE_NAME),
            None => {
                return Err(PkgError::manifest_invalid(format!(
                    "The workspace at {relative_cwd} has no name"
                )))
            }
        };

        let anchored_locator = Locator::new(ident, &format!("{WORKSPACE_PROTOCOL}{relative_cwd}"));
        Ok(Self {
            cwd,
            relative_cwd,
            manifest,
            anchored_locator,
        })
    }
}

/// The root workspace followed by every child its `workspaces` patterns match.
fn discover_workspaces(project_cwd: &Path) -> Result<Vec<Workspace>, PkgError> {
    let root = Workspace::load(project_cwd, project_cwd.to_path_buf())?;

    let mut children = BTreeSet::new();
    for pattern in &root.manifest.workspace_definitions {
        let full_pattern = project_cwd.join(pattern);
        let entries = glob::glob(&full_pattern.to_string_lossy()).map_err(|e| {
            PkgError::manifest_invalid(format!("Invalid workspace pattern '{pattern}': {e}"))
        })?;

        for entry in entries.flatten() {
            if entry != project_cwd && entry.join(MANIFEST_NAME).is_file() {
                children.insert(entry);
            }
        }
    }

    let mut workspaces = vec![root];
    for cwd in children {
        workspaces.push(Workspace::load(project_cwd, cwd)?);
    }
    Ok(workspaces)
}

/// What an install produced.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// Packages with scripts left to run, in locator order.
    pub build_directives: Vec<(Locator, BuildDirective)>,
    /// Descriptor to locator, for every non-virtual descriptor in the graph.
    pub resolutions: BTreeMap<DescriptorHash, Locator>,
    /// Archive checksums of cache-backed packages.
    pub checksums: BTreeMap<LocatorHash, String>,
    pub resolved_count: usize,
    pub fetched_count: usize,
}

/// A project rooted at `configuration.project_cwd`.
pub struct Project {
    configuration: Arc<Configuration>,
    workspaces: Arc<Vec<Workspace>>,
    cache: Arc<Cache>,
    registry: Arc<dyn PackumentSource>,
    resolver: Arc<dyn Resolver>,
    fetcher: Arc<MultiFetcher>,
    linker: Arc<dyn Linker>,
    locked: Arc<BTreeMap<DescriptorHash, Locator>>,
    checksums: BTreeMap<LocatorHash, String>,

    stored_descriptors: BTreeMap<DescriptorHash, Descriptor>,
    stored_resolutions: BTreeMap<DescriptorHash, LocatorHash>,
    stored_packages: BTreeMap<LocatorHash, Package>,
    fetch_results: BTreeMap<LocatorHash, FetchResult>,
}

impl Project {
    /// Load the project's workspaces.
    ///
    /// # Errors
    /// Returns an error if a workspace manifest is missing or invalid, or the
    /// registry URL is malformed.
    pub fn load(configuration: Configuration) -> Result<Self, PkgError> {
        let workspaces = discover_workspaces(&configuration.project_cwd)?;
        let registry = RegistryClient::new(&configuration.npm_registry_server)?;
        debug!(
            root = %configuration.project_cwd.display(),
            workspaces = workspaces.len(),
            "Loaded project"
        );

        Ok(Self {
            cache: Arc::new(Cache::new(configuration.cache_folder.clone())),
            configuration: Arc::new(configuration),
            workspaces: Arc::new(workspaces),
            registry: Arc::new(registry),
            resolver: Arc::new(MultiResolver::default()),
            fetcher: Arc::new(MultiFetcher::default()),
            linker: Arc::new(PnpLinker),
            locked: Arc::default(),
            checksums: BTreeMap::new(),
            stored_descriptors: BTreeMap::new(),
            stored_resolutions: BTreeMap::new(),
            stored_packages: BTreeMap::new(),
            fetch_results: BTreeMap::new(),
        })
    }

    /// Use a different package registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn PackumentSource>) -> Self {
        self.registry = registry;
        self
    }

    /// Use a different resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Use a different linker.
    #[must_use]
    pub fn with_linker(mut self, linker: Arc<dyn Linker>) -> Self {
        self.linker = linker;
        self
    }

    /// Prefer these resolutions, typically from a previous install.
    #[must_use]
    pub fn with_locked_resolutions(mut self, locked: BTreeMap<DescriptorHash, Locator>) -> Self {
        self.locked = Arc::new(locked);
        self
    }

    /// Require cached archives to match these checksums.
    #[must_use]
    pub fn with_checksums(mut self, checksums: BTreeMap<LocatorHash, String>) -> Self {
        self.checksums = checksums;
        self
    }

    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    #[must_use]
    pub fn workspaces(&self) -> &[Workspace] {
        &self.workspaces
    }

    /// The root workspace.
    #[must_use]
    pub fn top_level_workspace(&self) -> &Workspace {
        &self.workspaces[0]
    }

    /// Every package of the resolved graph, keyed by locator hash.
    #[must_use]
    pub fn stored_packages(&self) -> &BTreeMap<LocatorHash, Package> {
        &self.stored_packages
    }

    /// The package a descriptor resolved to.
    #[must_use]
    pub fn resolved_package(&self, descriptor_hash: &DescriptorHash) -> Option<&Package> {
        self.stored_resolutions
            .get(descriptor_hash)
            .and_then(|hash| self.stored_packages.get(hash))
    }

    /// Resolve, fetch and link the whole project.
    ///
    /// # Errors
    /// Returns the first fatal error of any step; it has also been reported.
    pub async fn install(&mut self, report: Arc<dyn Report>) -> Result<InstallOutcome, PkgError> {
        self.resolve_everything(report.as_ref()).await?;
        self.fetch_everything(report.as_ref()).await?;
        let build_directives = self.link_everything(report).await?;

        let resolutions = self
            .stored_descriptors
            .iter()
            .filter(|(_, descriptor)| !descriptor.is_virtual())
            .filter_map(|(hash, _)| {
                self.resolved_package(hash)
                    .map(|package| (hash.clone(), package.locator.clone()))
            })
            .collect();

        let outcome = InstallOutcome {
            build_directives,
            resolutions,
            checksums: self.checksums.clone(),
            resolved_count: self.stored_packages.len(),
            fetched_count: self.fetch_results.len(),
        };
        info!(
            resolved = outcome.resolved_count,
            fetched = outcome.fetched_count,
            builds = outcome.build_directives.len(),
            "Install complete"
        );
        Ok(outcome)
    }

    fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            project_cwd: self.configuration.project_cwd.clone(),
            cache: Arc::clone(&self.cache),
            registry: Arc::clone(&self.registry),
            fetcher: Arc::clone(&self.fetcher),
            checksums: Arc::new(self.checksums.clone()),
        }
    }

    fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            fetch_options: self.fetch_options(),
            workspaces: Arc::clone(&self.workspaces),
            locked: Arc::clone(&self.locked),
        }
    }

    fn link_options(&self, report: Arc<dyn Report>) -> LinkOptions {
        LinkOptions {
            configuration: Arc::clone(&self.configuration),
            report,
            top_level_locator: self.top_level_workspace().anchored_locator.clone(),
            dependency_tree_roots: self
                .workspaces
                .iter()
                .map(|workspace| workspace.anchored_locator.clone())
                .collect(),
        }
    }

    fn concurrency(&self) -> usize {
        self.configuration.network_concurrency.max(1)
    }

    /// Build the full package graph.
    ///
    /// # Errors
    /// Returns `PKG_UNSUPPORTED_RANGE`, `PKG_CANDIDATE_EXHAUSTED` or a fetch
    /// error for the first descriptor that cannot be resolved. No partial
    /// graph is kept.
    pub async fn resolve_everything(&mut self, report: &dyn Report) -> Result<(), PkgError> {
        self.resolve_graph().await.map_err(|error| {
            report.report_error(MessageName::ResolutionFailed, error.message());
            error
        })?;
        self.apply_virtual_packages(report);

        info!(packages = self.stored_packages.len(), "Resolution complete");
        Ok(())
    }

    async fn resolve_graph(&mut self) -> Result<(), PkgError> {
        let opts = self.resolve_options();
        let resolver = Arc::clone(&self.resolver);
        let concurrency = self.concurrency();

        let (opts, resolver) = (&opts, resolver.as_ref());

        let mut descriptors = BTreeMap::new();
        let mut resolutions = BTreeMap::new();
        let mut packages = BTreeMap::new();
        let mut seen_descriptors = HashSet::new();
        let mut seen_locators = HashSet::new();

        let mut pending_locators: Vec<Locator> = self
            .workspaces
            .iter()
            .map(|workspace| workspace.anchored_locator.clone())
            .collect();
        seen_locators.extend(pending_locators.iter().map(|l| l.locator_hash().clone()));

        // Each wave resolves the new locators, then finds candidates for the
        // descriptors they introduced
        while !pending_locators.is_empty() {
            let resolved: Vec<Package> = stream::iter(std::mem::take(&mut pending_locators))
                .map(move |locator| async move {
                    debug!(locator = %locator, "Resolving package");
                    resolver.resolve(&locator, opts).await
                })
                .buffer_unordered(concurrency)
                .try_collect()
                .await?;

            let mut pending_descriptors = Vec::new();
            for mut package in resolved {
                let mut dependencies = BTreeMap::new();
                for descriptor in package.dependencies.values() {
                    let normalized = resolver.normalize_descriptor(descriptor, &package.locator, opts)?;
                    if seen_descriptors.insert(normalized.descriptor_hash().clone()) {
                        pending_descriptors.push(normalized.clone());
                    }
                    dependencies.insert(normalized.descriptor_hash().clone(), normalized);
                }
                package.dependencies = dependencies;
                packages.insert(package.locator.locator_hash().clone(), package);
            }

            let candidates: Vec<(Descriptor, Locator)> = stream::iter(pending_descriptors)
                .map(move |descriptor| async move {
                    let locator = resolver
                        .get_candidates(&descriptor, opts)
                        .await?
                        .into_iter()
                        .next()
                        .ok_or_else(|| PkgError::candidate_exhausted(&descriptor.to_string()))?;
                    Ok::<_, PkgError>((descriptor, locator))
                })
                .buffer_unordered(concurrency)
                .try_collect()
                .await?;

            for (descriptor, locator) in candidates {
                debug!(descriptor = %descriptor, locator = %locator, "Resolved descriptor");
                if seen_locators.insert(locator.locator_hash().clone()) {
                    pending_locators.push(locator.clone());
                }
                resolutions.insert(descriptor.descriptor_hash().clone(), locator.locator_hash().clone());
                descriptors.insert(descriptor.descriptor_hash().clone(), descriptor);
            }
        }

        self.stored_descriptors = descriptors;
        self.stored_resolutions = resolutions;
        self.stored_packages = packages;
        self.fetch_results.clear();
        Ok(())
    }

    /// Replace every dependency on a package with peer dependencies by a
    /// dependency on a virtual copy bound to the dependent's context.
    fn apply_virtual_packages(&mut self, report: &dyn Report) {
        let mut queue: VecDeque<LocatorHash> = self
            .workspaces
            .iter()
            .map(|workspace| workspace.anchored_locator.locator_hash().clone())
            .collect();
        let mut visited = HashSet::new();

        while let Some(parent_hash) = queue.pop_front() {
            if !visited.insert(parent_hash.clone()) {
                continue;
            }
            let Some(parent) = self.stored_packages.get(&parent_hash).cloned() else {
                continue;
            };

            let mut dependencies = BTreeMap::new();
            for (descriptor_hash, descriptor) in &parent.dependencies {
                let Some(dependency) = self.resolved_package(descriptor_hash).cloned() else {
                    dependencies.insert(descriptor_hash.clone(), descriptor.clone());
                    continue;
                };

                if dependency.peer_dependencies.is_empty() {
                    queue.push_back(dependency.locator.locator_hash().clone());
                    dependencies.insert(descriptor_hash.clone(), descriptor.clone());
                    continue;
                }

                let virtual_descriptor = self.virtualize(&parent, descriptor, &dependency, report);
                if let Some(hash) = self.stored_resolutions.get(virtual_descriptor.descriptor_hash()) {
                    queue.push_back(hash.clone());
                }
                dependencies.insert(virtual_descriptor.descriptor_hash().clone(), virtual_descriptor);
            }

            if let Some(package) = self.stored_packages.get_mut(&parent_hash) {
                package.dependencies = dependencies;
            }
        }

        self.collect_unreachable();
    }

    /// Virtual descriptor for `descriptor` as required by `parent`, creating
    /// the virtual package on first use.
    fn virtualize(
        &mut self,
        parent: &Package,
        descriptor: &Descriptor,
        dependency: &Package,
        report: &dyn Report,
    ) -> Descriptor {
        let mut bindings: BTreeMap<String, Option<Locator>> = BTreeMap::new();
        for peer in dependency.peer_dependencies.values() {
            let bound = parent
                .dependencies
                .values()
                .filter(|candidate| candidate.ident() == peer.ident())
                .find_map(|candidate| self.resolved_package(candidate.descriptor_hash()))
                .map(|package| package.locator.clone())
                .or_else(|| (parent.ident() == peer.ident()).then(|| parent.locator.clone()));

            if bound.is_none() {
                report.report_warning(
                    MessageName::UnmetPeerDependency,
                    &format!(
                        "{} doesn't provide {peer} requested by {}",
                        parent.locator, dependency.locator
                    ),
                );
            }
            bindings.insert(peer.ident().requirable_name(), bound);
        }

        let binding_key = bindings
            .iter()
            .map(|(name, bound)| {
                format!("{name}={}", bound.as_ref().map(ToString::to_string).unwrap_or_default())
            })
            .collect::<Vec<_>>()
            .join(",");
        let entropy = blake3_parts(&["virtual", &dependency.locator.to_string(), &binding_key]);

        let virtual_locator = dependency.locator.virtualize(&entropy);
        let virtual_descriptor = descriptor.virtualize(&entropy);
        let virtual_hash = virtual_locator.locator_hash().clone();

        if !self.stored_packages.contains_key(&virtual_hash) {
            let mut package = dependency.clone();
            package.locator = virtual_locator;

            for bound in bindings.values().flatten() {
                let peer_descriptor = Descriptor::from_locator(bound);
                let hash = peer_descriptor.descriptor_hash().clone();
                self.stored_resolutions.insert(hash.clone(), bound.locator_hash().clone());
                self.stored_descriptors.insert(hash.clone(), peer_descriptor.clone());
                package.dependencies.insert(hash, peer_descriptor);
            }

            debug!(locator = %package.locator, parent = %parent.locator, "Created virtual package");
            self.stored_packages.insert(virtual_hash.clone(), package);
        }

        self.stored_resolutions
            .insert(virtual_descriptor.descriptor_hash().clone(), virtual_hash);
        self.stored_descriptors
            .insert(virtual_descriptor.descriptor_hash().clone(), virtual_descriptor.clone());
        virtual_descriptor
    }

    /// Drop packages and descriptors the workspaces no longer reach.
    fn collect_unreachable(&mut self) {
        let mut reachable = HashSet::new();
        let mut stack: Vec<LocatorHash> = self
            .workspaces
            .iter()
            .map(|workspace| workspace.anchored_locator.locator_hash().clone())
            .collect();

        while let Some(hash) = stack.pop() {
            if !reachable.insert(hash.clone()) {
                continue;
            }
            if let Some(package) = self.stored_packages.get(&hash) {
                stack.extend(
                    package
                        .dependencies
                        .keys()
                        .filter_map(|descriptor_hash| self.stored_resolutions.get(descriptor_hash))
                        .cloned(),
                );
            }
        }

        self.stored_packages.retain(|hash, _| reachable.contains(hash));

        let used: HashSet<DescriptorHash> = self
            .stored_packages
            .values()
            .flat_map(|package| package.dependencies.keys().cloned())
            .collect();
        self.stored_resolutions.retain(|hash, _| used.contains(hash));
        self.stored_descriptors.retain(|hash, _| used.contains(hash));
    }

    /// Fetch every resolved package.
    ///
    /// # Errors
    /// Returns the first fetch failure; `PKG_INTEGRITY_ERROR` for a checksum
    /// mismatch.
    pub async fn fetch_everything(&mut self, report: &dyn Report) -> Result<(), PkgError> {
        let opts = self.fetch_options();
        let fetcher = Arc::clone(&self.fetcher);
        let (opts, fetcher) = (&opts, fetcher.as_ref());

        let locators: Vec<Locator> = self
            .stored_packages
            .values()
            .map(|package| package.locator.clone())
            .collect();

        let fetched: Vec<(Locator, FetchResult)> = stream::iter(locators)
            .map(move |locator| async move {
                let result = fetcher.fetch(&locator, opts).await?;
                Ok::<_, PkgError>((locator, result))
            })
            .buffer_unordered(self.concurrency())
            .try_collect()
            .await
            .map_err(|error| {
                let name = if error.code() == codes::PKG_INTEGRITY_ERROR {
                    MessageName::IntegrityError
                } else {
                    MessageName::FetchFailed
                };
                report.report_error(name, error.message());
                error
            })?;

        for (locator, result) in fetched {
            // Virtual packages share their original's archive
            if let Some(checksum) = result.checksum.as_ref().filter(|_| !locator.is_virtual()) {
                self.checksums
                    .insert(locator.locator_hash().clone(), checksum.clone());
            }
            self.fetch_results.insert(locator.locator_hash().clone(), result);
        }

        info!(packages = self.fetch_results.len(), "Fetch complete");
        Ok(())
    }

    /// Install every fetched package through the linker.
    ///
    /// # Errors
    /// Returns the first installer error.
    pub async fn link_everything(
        &self,
        report: Arc<dyn Report>,
    ) -> Result<Vec<(Locator, BuildDirective)>, PkgError> {
        let opts = self.link_options(report);
        let linker = self.linker.as_ref();

        let packages = self
            .stored_packages
            .values()
            .filter(|package| linker.supports_package(package, &opts))
            .map(|package| {
                self.fetch_results
                    .get(package.locator.locator_hash())
                    .map(|fetch_result| (package, fetch_result))
                    .ok_or_else(|| {
                        PkgError::assertion(format!("{} was linked before being fetched", package.locator))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let session = InstallSession::new(linker.make_installer(opts));

        let installing = &session;
        let results: Vec<Option<(Locator, BuildDirective)>> = stream::iter(packages.iter().copied())
            .map(move |(package, fetch_result)| async move {
                let result = installing.install_package(package, fetch_result).await?;
                Ok::<_, PkgError>(
                    result
                        .build_directive
                        .map(|directive| (package.locator.clone(), directive)),
                )
            })
            .buffer_unordered(self.concurrency())
            .try_collect()
            .await?;
        let mut build_directives: Vec<_> = results.into_iter().flatten().collect();
        build_directives.sort_by(|a, b| a.0.cmp(&b.0));

        let session = session.finish_packages();
        for (package, _) in &packages {
            let dependencies: Vec<Locator> = package
                .dependencies
                .keys()
                .filter_map(|hash| self.resolved_package(hash))
                .map(|dependency| dependency.locator.clone())
                .collect();
            session
                .attach_internal_dependencies(&package.locator, &dependencies)
                .await?;
        }

        for workspace in self.workspaces.iter() {
            let Some(package) = self.stored_packages.get(workspace.anchored_locator.locator_hash()) else {
                continue;
            };
            for hash in package.dependencies.keys() {
                if let Some(dependency) = self.resolved_package(hash) {
                    session
                        .attach_external_dependents(&dependency.locator, &[workspace.cwd.clone()])
                        .await?;
                }
            }
        }

        session.finish_attach().finalize().await?;
        Ok(build_directives)
    }

    /// Where the last install put `locator`.
    ///
    /// # Errors
    /// Returns `PKG_MISSING_INSTALL_STATE` or `PKG_UNRESOLVED_LOCATOR`.
    pub fn find_package_location(&self, locator: &Locator) -> Result<PathBuf, PkgError> {
        self.linker
            .find_package_location(locator, &self.link_options(Arc::new(MemoryReport::new())))
    }

    /// The installed package that owns `location`.
    ///
    /// # Errors
    /// Returns `PKG_MISSING_INSTALL_STATE` if nothing was installed yet.
    pub fn find_package_locator(&self, location: &Path) -> Result<Option<Locator>, PkgError> {
        self.linker
            .find_package_locator(location, &self.link_options(Arc::new(MemoryReport::new())))
    }
}
