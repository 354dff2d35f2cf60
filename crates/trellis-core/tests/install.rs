//! End-to-end installs against an in-memory registry.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use trellis_core::config::Configuration;
use trellis_core::pkg::{
    Descriptor, FetchResult, InstallSession, LinkOptions, LinkType, Linker, Locator, MemoryRegistry,
    MemoryReport, MessageName, MultiResolver, Package, PnpLinker, PnpMap, Project, ResolveOptions,
    Resolver,
};
use trellis_core::PkgError;
use walkdir::WalkDir;

fn tgz(manifest: &Value, files: &[(&str, &str)]) -> Vec<u8> {
    let manifest = manifest.to_string();
    let mut entries = vec![("package.json", manifest.as_str())];
    entries.extend_from_slice(files);

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, format!("package/{path}"), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn publish(registry: &mut MemoryRegistry, manifest: Value) {
    let tarball = tgz(&manifest, &[("index.js", "module.exports = 1;\n")]);
    registry.publish(manifest, tarball);
}

fn registry() -> Arc<MemoryRegistry> {
    let mut registry = MemoryRegistry::new();
    publish(&mut registry, json!({"name": "left-pad", "version": "1.0.0"}));
    publish(&mut registry, json!({"name": "left-pad", "version": "1.3.0"}));
    publish(
        &mut registry,
        json!({"name": "native", "version": "1.0.0", "scripts": {"postinstall": "node build.js"}}),
    );
    publish(&mut registry, json!({"name": "host", "version": "2.0.0"}));
    publish(
        &mut registry,
        json!({
            "name": "plugin",
            "version": "1.0.0",
            "dependencies": {"left-pad": "^1.0.0"},
            "peerDependencies": {"host": "^2.0.0"}
        }),
    );
    Arc::new(registry)
}

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    registry: Arc<MemoryRegistry>,
}

impl Fixture {
    fn new(manifest: Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::write(root.join("package.json"), manifest.to_string()).unwrap();
        Self {
            _dir: dir,
            root,
            registry: registry(),
        }
    }

    fn write(&self, relative: &str, content: &[u8]) {
        let path = self.root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn configuration(&self) -> Configuration {
        Configuration::for_project(&self.root)
    }

    fn project(&self, configuration: Configuration) -> Project {
        Project::load(configuration)
            .unwrap()
            .with_registry(self.registry.clone())
    }

    fn map(&self) -> PnpMap {
        PnpMap::load(&self.configuration().pnp_path).unwrap()
    }

    fn unplugged_snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        let unplugged = self.configuration().pnp_unplugged_folder;
        WalkDir::new(&unplugged)
            .into_iter()
            .map(Result::unwrap)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                (
                    entry.path().strip_prefix(&unplugged).unwrap().to_path_buf(),
                    fs::read(entry.path()).unwrap(),
                )
            })
            .collect()
    }
}

fn locator(input: &str) -> Locator {
    Locator::parse(input).unwrap()
}

fn app_with_everything() -> Value {
    json!({
        "name": "app",
        "dependencies": {
            "left-pad": "^1.0.0",
            "native": "1.0.0",
            "plugin": "^1.0.0",
            "host": "^2.0.0"
        }
    })
}

#[tokio::test]
async fn test_full_install() {
    let fixture = Fixture::new(app_with_everything());
    let report = Arc::new(MemoryReport::new());

    let outcome = fixture
        .project(fixture.configuration())
        .install(report.clone())
        .await
        .unwrap();
    assert!(!report.has_errors());

    // app, left-pad, native, host and one virtual plugin
    assert_eq!(outcome.resolved_count, 5);
    assert_eq!(outcome.fetched_count, 5);
    assert_eq!(outcome.build_directives.len(), 1);
    assert_eq!(outcome.build_directives[0].0, locator("native@npm:1.0.0"));
    assert_eq!(outcome.build_directives[0].1.scripts, vec!["postinstall".to_string()]);
    assert!(outcome.checksums.contains_key(locator("left-pad@npm:1.3.0").locator_hash()));

    let script = fs::read_to_string(fixture.root.join(".pnp.cjs")).unwrap();
    assert!(script.starts_with("#!/usr/bin/env node\n"));

    let map = fixture.map();
    let top = map.get_package_information(None, None).unwrap();
    let reference = |name: &str| top.package_dependencies.get(name).cloned().flatten().unwrap();
    assert_eq!(reference("left-pad"), "npm:1.3.0");
    assert_eq!(reference("native"), "npm:1.0.0");
    assert_eq!(reference("host"), "npm:2.0.0");
    let plugin_reference = reference("plugin");
    assert!(plugin_reference.starts_with("virtual:"));
    assert!(plugin_reference.ends_with("#npm:1.0.0"));

    // The virtual copy lives where the original does and sees the bound peer
    let plugin = map
        .get_package_information(Some("plugin"), Some(&plugin_reference))
        .unwrap();
    assert_eq!(
        plugin.package_dependencies.get("host"),
        Some(&Some("npm:2.0.0".to_string()))
    );
    assert_eq!(
        plugin.package_dependencies.get("left-pad"),
        Some(&Some("npm:1.3.0".to_string()))
    );
    let original = locator("plugin@npm:1.0.0");
    assert_eq!(
        map.find_package_location(&locator(&format!("plugin@{plugin_reference}")))
            .unwrap(),
        fixture
            .root
            .join(".trellis/cache")
            .join(original.slug())
            .join("node_modules/plugin")
    );

    let native = map.find_package_location(&locator("native@npm:1.0.0")).unwrap();
    assert!(native.starts_with(fixture.root.join(".trellis/unplugged")));
    assert!(native.join("package.json").is_file());
}

#[tokio::test]
async fn test_unmet_peer_is_reported_and_left_unbound() {
    let fixture = Fixture::new(json!({"name": "app", "dependencies": {"plugin": "^1.0.0"}}));
    let report = Arc::new(MemoryReport::new());

    fixture
        .project(fixture.configuration())
        .install(report.clone())
        .await
        .unwrap();

    let warnings = report.entries_named(MessageName::UnmetPeerDependency);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].text.contains("host"));

    let map = fixture.map();
    let top = map.get_package_information(None, None).unwrap();
    let plugin_reference = top.package_dependencies["plugin"].clone().unwrap();
    let plugin = map
        .get_package_information(Some("plugin"), Some(&plugin_reference))
        .unwrap();
    assert_eq!(plugin.package_dependencies.get("host"), Some(&None));
}

#[tokio::test]
async fn test_same_peer_context_shares_one_virtual_package() {
    let fixture = Fixture::new(json!({
        "name": "app",
        "workspaces": ["packages/*"],
        "dependencies": {"plugin": "^1.0.0", "host": "^2.0.0"}
    }));
    fixture.write(
        "packages/web/package.json",
        json!({"name": "web", "dependencies": {"plugin": "1.0.0", "host": "2.0.0"}})
            .to_string()
            .as_bytes(),
    );

    let mut project = fixture.project(fixture.configuration());
    project.install(Arc::new(MemoryReport::new())).await.unwrap();

    let plugins: Vec<_> = project
        .stored_packages()
        .values()
        .filter(|package| package.ident().name() == "plugin")
        .collect();
    assert_eq!(plugins.len(), 1);
    assert!(plugins[0].locator.is_virtual());
}

/// Counts calls per descriptor and per locator on top of the default resolvers.
#[derive(Default)]
struct CountingResolver {
    inner: MultiResolver,
    candidates: Mutex<HashMap<String, usize>>,
    resolves: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl Resolver for CountingResolver {
    fn supports_descriptor(&self, descriptor: &Descriptor, opts: &ResolveOptions) -> bool {
        self.inner.supports_descriptor(descriptor, opts)
    }

    fn supports_locator(&self, locator: &Locator, opts: &ResolveOptions) -> bool {
        self.inner.supports_locator(locator, opts)
    }

    fn normalize_descriptor(
        &self,
        descriptor: &Descriptor,
        from_locator: &Locator,
        opts: &ResolveOptions,
    ) -> Result<Descriptor, PkgError> {
        self.inner.normalize_descriptor(descriptor, from_locator, opts)
    }

    async fn get_candidates(
        &self,
        descriptor: &Descriptor,
        opts: &ResolveOptions,
    ) -> Result<Vec<Locator>, PkgError> {
        *self
            .candidates
            .lock()
            .unwrap()
            .entry(descriptor.to_string())
            .or_default() += 1;
        self.inner.get_candidates(descriptor, opts).await
    }

    async fn resolve(&self, locator: &Locator, opts: &ResolveOptions) -> Result<Package, PkgError> {
        *self
            .resolves
            .lock()
            .unwrap()
            .entry(locator.to_string())
            .or_default() += 1;
        self.inner.resolve(locator, opts).await
    }
}

#[tokio::test]
async fn test_equivalent_descriptors_resolve_once() {
    let mut registry = MemoryRegistry::new();
    publish(&mut registry, json!({"name": "a", "version": "1.0.0"}));
    publish(&mut registry, json!({"name": "a", "version": "1.3.0"}));
    publish(
        &mut registry,
        json!({"name": "b", "version": "1.0.0", "dependencies": {"a": "^1.2.0"}}),
    );

    let mut fixture = Fixture::new(json!({
        "name": "app",
        "workspaces": ["packages/*"],
        "dependencies": {"a": "^1.0.0"}
    }));
    fixture.registry = Arc::new(registry);
    fixture.write(
        "packages/x/package.json",
        json!({"name": "x", "dependencies": {"a": "^1.0.0", "b": "^1.0.0"}})
            .to_string()
            .as_bytes(),
    );

    let counting = Arc::new(CountingResolver::default());
    let mut project = fixture
        .project(fixture.configuration())
        .with_resolver(counting.clone());
    project.install(Arc::new(MemoryReport::new())).await.unwrap();

    let candidates = counting.candidates.lock().unwrap().clone();
    assert_eq!(candidates.get("a@npm:^1.0.0"), Some(&1));
    assert_eq!(candidates.get("a@npm:^1.2.0"), Some(&1));
    assert!(candidates.values().all(|count| *count == 1));

    let resolves = counting.resolves.lock().unwrap().clone();
    assert_eq!(resolves.get("a@npm:1.3.0"), Some(&1));
    assert!(resolves.values().all(|count| *count == 1));

    let names: Vec<_> = project
        .stored_packages()
        .values()
        .filter(|package| package.ident().name() == "a")
        .map(|package| package.locator.to_string())
        .collect();
    assert_eq!(names, vec!["a@npm:1.3.0"]);
}

#[tokio::test]
async fn test_reinstall_is_idempotent_then_collects_unplugged() {
    let fixture = Fixture::new(app_with_everything());

    let first = fixture
        .project(fixture.configuration())
        .install(Arc::new(MemoryReport::new()))
        .await
        .unwrap();
    let snapshot = fixture.unplugged_snapshot();
    assert!(!snapshot.is_empty());
    let downloads = fixture.registry.tarball_requests();

    let report = Arc::new(MemoryReport::new());
    let second = fixture
        .project(fixture.configuration())
        .with_locked_resolutions(first.resolutions.clone())
        .with_checksums(first.checksums.clone())
        .install(report.clone())
        .await
        .unwrap();
    assert_eq!(fixture.unplugged_snapshot(), snapshot);
    assert_eq!(fixture.registry.tarball_requests(), downloads);
    assert!(report.entries_named(MessageName::UnpluggedCleanup).is_empty());
    assert_eq!(second.build_directives, first.build_directives);

    // Without build scripts nothing needs unplugging any more
    let report = Arc::new(MemoryReport::new());
    let third = fixture
        .project(fixture.configuration().with_enable_scripts(false))
        .install(report.clone())
        .await
        .unwrap();
    assert!(third.build_directives.is_empty());
    assert_eq!(report.entries_named(MessageName::DisabledBuildScripts).len(), 1);
    assert!(!fixture.configuration().pnp_unplugged_folder.exists());

    let native = fixture.map().find_package_location(&locator("native@npm:1.0.0")).unwrap();
    assert!(native.starts_with(fixture.root.join(".trellis/cache")));
}

#[tokio::test]
async fn test_local_tarball_dependency() {
    let fixture = Fixture::new(json!({
        "name": "app",
        "dependencies": {"vendored": "file:./vendor/vendored-1.0.0.tgz"}
    }));
    fixture.write(
        "vendor/vendored-1.0.0.tgz",
        &tgz(
            &json!({"name": "vendored", "version": "1.0.0", "dependencies": {"left-pad": "1.0.0"}}),
            &[("lib/main.js", "exports.ok = true;\n")],
        ),
    );

    fixture
        .project(fixture.configuration())
        .install(Arc::new(MemoryReport::new()))
        .await
        .unwrap();

    let map = fixture.map();
    let top = map.get_package_information(None, None).unwrap();
    let reference = top.package_dependencies["vendored"].clone().unwrap();
    assert!(reference.starts_with("file:./vendor/vendored-1.0.0.tgz?locator="));

    let vendored = map.get_package_information(Some("vendored"), Some(&reference)).unwrap();
    assert_eq!(
        vendored.package_dependencies.get("left-pad"),
        Some(&Some("npm:1.0.0".to_string()))
    );

    let location = map
        .find_package_location(&locator(&format!("vendored@{reference}")))
        .unwrap();
    assert!(location.join("lib/main.js").is_file());
}

#[tokio::test]
async fn test_where_lookups() {
    let fixture = Fixture::new(app_with_everything());
    let project = fixture
        .project(fixture.configuration().with_ignore_pattern("^\\./scripts/"))
        .with_linker(Arc::new(PnpLinker));

    let err = project
        .find_package_location(&locator("left-pad@npm:1.3.0"))
        .unwrap_err();
    assert_eq!(err.code(), "PKG_MISSING_INSTALL_STATE");
    assert!(err.is_user_actionable());

    let mut project = project;
    project.install(Arc::new(MemoryReport::new())).await.unwrap();

    let left_pad = project
        .find_package_location(&locator("left-pad@npm:1.3.0"))
        .unwrap();
    assert!(left_pad.join("index.js").is_file());
    assert_eq!(
        project.find_package_locator(&left_pad.join("index.js")).unwrap(),
        Some(locator("left-pad@npm:1.3.0"))
    );
    assert_eq!(
        project
            .find_package_locator(&fixture.root.join("src").join("main.js"))
            .unwrap(),
        Some(locator("app@workspace:."))
    );
    assert_eq!(
        project
            .find_package_locator(&fixture.root.join("scripts").join("release.js"))
            .unwrap(),
        None
    );

    let err = project
        .find_package_location(&locator("left-pad@npm:1.0.0"))
        .unwrap_err();
    assert_eq!(err.code(), "PKG_UNRESOLVED_LOCATOR");
}

#[tokio::test]
async fn test_incomplete_install_sequence() {
    let fixture = Fixture::new(json!({"name": "app"}));
    let top = locator("app@workspace:.");
    let opts = LinkOptions {
        configuration: Arc::new(fixture.configuration()),
        report: Arc::new(MemoryReport::new()),
        top_level_locator: top.clone(),
        dependency_tree_roots: vec![top.clone()],
    };
    let linker = PnpLinker;
    let missing = locator("left-pad@npm:1.3.0");

    let session = InstallSession::new(linker.make_installer(opts.clone()));
    session
        .install_package(
            &Package::new(top.clone(), LinkType::Soft),
            &FetchResult::from_directory(&fixture.root),
        )
        .await
        .unwrap();

    let session = session.finish_packages();
    let err = session
        .attach_internal_dependencies(&missing, &[])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PKG_ASSERTION_FAILED");
    assert!(!err.is_user_actionable());

    session
        .attach_internal_dependencies(&top, &[missing.clone()])
        .await
        .unwrap();
    session.finish_attach().finalize().await.unwrap();

    // The edge was recorded, but the package itself never was
    let err = linker.find_package_location(&missing, &opts).unwrap_err();
    assert_eq!(err.code(), "PKG_UNRESOLVED_LOCATOR");
    assert!(err.is_user_actionable());
}

#[tokio::test]
async fn test_unsatisfiable_range_writes_nothing() {
    let fixture = Fixture::new(json!({"name": "app", "dependencies": {"left-pad": "^9.0.0"}}));
    let report = Arc::new(MemoryReport::new());

    let err = fixture
        .project(fixture.configuration())
        .install(report.clone())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PKG_CANDIDATE_EXHAUSTED");
    assert_eq!(report.entries_named(MessageName::ResolutionFailed).len(), 1);
    assert!(!fixture.root.join(".pnp.cjs").exists());
}

#[tokio::test]
async fn test_checksum_mismatch_fails_fetch() {
    let fixture = Fixture::new(json!({"name": "app", "dependencies": {"left-pad": "1.3.0"}}));
    let report = Arc::new(MemoryReport::new());

    let mut checksums = BTreeMap::new();
    checksums.insert(
        locator("left-pad@npm:1.3.0").locator_hash().clone(),
        "0".repeat(64),
    );

    let err = fixture
        .project(fixture.configuration())
        .with_checksums(checksums)
        .install(report.clone())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PKG_INTEGRITY_ERROR");
    assert_eq!(report.entries_named(MessageName::IntegrityError).len(), 1);
    assert!(!fixture.root.join(".pnp.cjs").exists());
}

#[test]
fn test_project_requires_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let result = Project::load(Configuration::for_project(dir.path()));
    assert!(result.is_err());
}
