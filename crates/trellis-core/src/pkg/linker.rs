//! Linker and installer protocol.
//!
//! A [`Linker`] decides which packages it owns and hands out an
//! [`Installer`] for one install run. Installers go through three phases:
//!
//! 1. `install_package` for every package, in any order, possibly concurrently
//! 2. `attach_internal_dependencies` / `attach_external_dependents`
//! 3. `finalize_install`, exactly once
//!
//! [`InstallSession`] encodes that order in its type: attach methods only
//! exist after [`InstallSession::finish_packages`], and `finalize` only after
//! [`InstallSession::finish_attach`].

use super::cache::FetchResult;
use super::error::PkgError;
use super::ident::Locator;
use super::package::Package;
use super::report::Report;
use crate::config::Configuration;
use async_trait::async_trait;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Scripts an external orchestrator should run for a package, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildDirective {
    pub scripts: Vec<String>,
}

/// Outcome of installing one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    /// Absolute path of the installed package.
    pub location: PathBuf,
    /// `None` when there is nothing to build.
    pub build_directive: Option<BuildDirective>,
}

/// Project-level context shared by a linker and its installer.
#[derive(Clone)]
pub struct LinkOptions {
    pub configuration: Arc<Configuration>,
    pub report: Arc<dyn Report>,
    /// Anchored locator of the root workspace.
    pub top_level_locator: Locator,
    /// Anchored locators of every workspace.
    pub dependency_tree_roots: Vec<Locator>,
}

impl LinkOptions {
    #[must_use]
    pub fn project_cwd(&self) -> &Path {
        &self.configuration.project_cwd
    }
}

/// Stateful installer for one install run.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Place a package on disk and record where it lives. Retrying for the
    /// same package is harmless.
    async fn install_package(
        &self,
        package: &Package,
        fetch_result: &FetchResult,
    ) -> Result<InstallResult, PkgError>;

    /// Record the resolved dependencies of an installed package.
    async fn attach_internal_dependencies(
        &self,
        locator: &Locator,
        dependencies: &[Locator],
    ) -> Result<(), PkgError>;

    /// Record consumers that are only known by path and depend on `locator`.
    async fn attach_external_dependents(
        &self,
        locator: &Locator,
        dependent_paths: &[PathBuf],
    ) -> Result<(), PkgError>;

    /// Persist generated state and clean up stale artifacts.
    async fn finalize_install(&self) -> Result<(), PkgError>;
}

/// A strategy for laying out installed packages.
pub trait Linker: Send + Sync {
    fn supports_package(&self, package: &Package, opts: &LinkOptions) -> bool;

    /// Location of an installed package, from the last install's generated state.
    ///
    /// # Errors
    /// Returns `PKG_MISSING_INSTALL_STATE` if there is no generated state and
    /// `PKG_UNRESOLVED_LOCATOR` if the locator is not part of it.
    fn find_package_location(&self, locator: &Locator, opts: &LinkOptions) -> Result<PathBuf, PkgError>;

    /// The installed package owning `location`, if any.
    ///
    /// # Errors
    /// Returns `PKG_MISSING_INSTALL_STATE` if there is no generated state.
    fn find_package_locator(&self, location: &Path, opts: &LinkOptions) -> Result<Option<Locator>, PkgError>;

    fn make_installer(&self, opts: LinkOptions) -> Box<dyn Installer>;
}

/// Phase marker: packages are being installed.
#[derive(Debug)]
pub enum InstallingPackages {}

/// Phase marker: every package is installed; edges may be attached.
#[derive(Debug)]
pub enum PackagesInstalled {}

/// Phase marker: every edge is attached; the install may be finalized.
#[derive(Debug)]
pub enum DependenciesAttached {}

/// An installer whose phase is tracked by the type system.
pub struct InstallSession<Phase> {
    installer: Box<dyn Installer>,
    phase: PhantomData<Phase>,
}

impl InstallSession<InstallingPackages> {
    #[must_use]
    pub fn new(installer: Box<dyn Installer>) -> Self {
        Self {
            installer,
            phase: PhantomData,
        }
    }

    /// See [`Installer::install_package`].
    pub async fn install_package(
        &self,
        package: &Package,
        fetch_result: &FetchResult,
    ) -> Result<InstallResult, PkgError> {
        self.installer.install_package(package, fetch_result).await
    }

    /// Close phase 1. Callers must have awaited every `install_package` call.
    #[must_use]
    pub fn finish_packages(self) -> InstallSession<PackagesInstalled> {
        InstallSession {
            installer: self.installer,
            phase: PhantomData,
        }
    }
}

impl InstallSession<PackagesInstalled> {
    /// See [`Installer::attach_internal_dependencies`].
    pub async fn attach_internal_dependencies(
        &self,
        locator: &Locator,
        dependencies: &[Locator],
    ) -> Result<(), PkgError> {
        self.installer
            .attach_internal_dependencies(locator, dependencies)
            .await
    }

    /// See [`Installer::attach_external_dependents`].
    pub async fn attach_external_dependents(
        &self,
        locator: &Locator,
        dependent_paths: &[PathBuf],
    ) -> Result<(), PkgError> {
        self.installer
            .attach_external_dependents(locator, dependent_paths)
            .await
    }

    /// Close phase 2.
    #[must_use]
    pub fn finish_attach(self) -> InstallSession<DependenciesAttached> {
        InstallSession {
            installer: self.installer,
            phase: PhantomData,
        }
    }
}

impl InstallSession<DependenciesAttached> {
    /// See [`Installer::finalize_install`]. Consumes the session.
    pub async fn finalize(self) -> Result<(), PkgError> {
        self.installer.finalize_install().await
    }
}
