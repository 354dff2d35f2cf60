//! Content cache for fetched packages.
//!
//! Each locator owns one entry directory named after its slug. An entry holds
//! the package under `node_modules/<name>` plus a checksum file, and only
//! becomes visible once fully extracted: contents are unpacked into a staging
//! directory inside the cache root and renamed into place.
//!
//! Concurrent requests for the same locator share a single in-flight fetch.

use super::error::PkgError;
use super::ident::{Locator, LocatorHash};
use super::tarball::extract_tgz;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use trellis_util::hash::blake3_bytes;

/// File inside an entry that records the archive checksum.
pub const CHECKSUM_FILENAME: &str = ".checksum";

/// Produces the archive bytes for a cache miss.
pub type ArchiveLoader = Box<dyn FnOnce() -> BoxFuture<'static, Result<Bytes, PkgError>> + Send>;

type InFlight = Shared<BoxFuture<'static, Result<FetchResult, PkgError>>>;

/// What a fetcher hands to the linker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// Real path of the filesystem view holding the package.
    pub package_fs: PathBuf,
    /// Location of the package inside `package_fs`, always `/`-rooted.
    pub prefix_path: String,
    /// Checksum of the archive, for cache-backed packages.
    pub checksum: Option<String>,
}

impl FetchResult {
    /// A package served straight from a directory on disk.
    #[must_use]
    pub fn from_directory(path: &Path) -> Self {
        Self {
            package_fs: dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
            prefix_path: "/".to_string(),
            checksum: None,
        }
    }

    /// Absolute path of the package root.
    #[must_use]
    pub fn package_root(&self) -> PathBuf {
        let prefix = self.prefix_path.trim_start_matches('/');
        if prefix.is_empty() {
            self.package_fs.clone()
        } else {
            self.package_fs.join(prefix)
        }
    }
}

/// Locator-keyed package cache.
#[derive(Debug)]
pub struct Cache {
    root: PathBuf,
    in_flight: Mutex<HashMap<LocatorHash, InFlight>>,
}

impl Cache {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Get the cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the entry for a locator.
    #[must_use]
    pub fn entry_path(&self, locator: &Locator) -> PathBuf {
        self.root.join(locator.slug())
    }

    /// Check if a locator already has a committed entry.
    #[must_use]
    pub fn is_cached(&self, locator: &Locator) -> bool {
        self.entry_path(locator).join(CHECKSUM_FILENAME).is_file()
    }

    /// Return the entry for `locator`, calling `loader` for the archive on a miss.
    ///
    /// When `expected_checksum` is set, both existing entries and freshly
    /// downloaded archives must match it. A downloaded archive that does not
    /// match is never committed.
    ///
    /// # Errors
    /// Returns `PKG_INTEGRITY_ERROR` on a checksum mismatch, or whatever the
    /// loader or extraction failed with.
    pub async fn fetch_package_from_cache(
        &self,
        locator: &Locator,
        expected_checksum: Option<&str>,
        loader: ArchiveLoader,
    ) -> Result<FetchResult, PkgError> {
        let in_flight = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| PkgError::io("Cache lock poisoned"))?;

            if let Some(existing) = in_flight.get(locator.locator_hash()) {
                existing.clone()
            } else {
                let entry = self.entry_path(locator);
                if let Some(result) = read_entry(&entry, locator)? {
                    debug!(locator = %locator, "Cache hit");
                    return verify(locator, result, expected_checksum);
                }

                let root = self.root.clone();
                let key = locator.locator_hash().clone();
                let locator = locator.clone();
                let expected = expected_checksum.map(str::to_string);
                let future = async move {
                    debug!(locator = %locator, "Cache miss, fetching archive");
                    let bytes = loader().await?;
                    tokio::task::spawn_blocking(move || {
                        commit(&root, &entry, &locator, &bytes, expected.as_deref())
                    })
                    .await
                    .map_err(|e| PkgError::io(format!("Cache commit task failed: {e}")))?
                }
                .boxed()
                .shared();

                in_flight.insert(key, future.clone());
                future
            }
        };

        let result = in_flight.clone().await;

        self.forget_in_flight(locator, &in_flight);

        verify(locator, result?, expected_checksum)
    }

    /// Drop the in-flight entry for `locator` if it is still `finished`.
    ///
    /// A later caller may already have registered a fresh fetch under the
    /// same key after `finished` failed.
    fn forget_in_flight(&self, locator: &Locator, finished: &InFlight) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if in_flight
                .get(locator.locator_hash())
                .is_some_and(|current| current.ptr_eq(finished))
            {
                in_flight.remove(locator.locator_hash());
            }
        }
    }
}

fn verify(
    locator: &Locator,
    result: FetchResult,
    expected_checksum: Option<&str>,
) -> Result<FetchResult, PkgError> {
    match (expected_checksum, result.checksum.as_deref()) {
        (Some(expected), Some(actual)) if expected != actual => Err(PkgError::integrity(
            &locator.to_string(),
            expected,
            actual,
        )),
        _ => Ok(result),
    }
}

fn prefix_for(locator: &Locator) -> String {
    format!("/node_modules/{}", locator.ident().requirable_name())
}

fn read_entry(entry: &Path, locator: &Locator) -> Result<Option<FetchResult>, PkgError> {
    let checksum_path = entry.join(CHECKSUM_FILENAME);
    if !checksum_path.is_file() {
        return Ok(None);
    }

    let checksum = fs::read_to_string(&checksum_path)?.trim().to_string();
    Ok(Some(FetchResult {
        package_fs: dunce::canonicalize(entry)?,
        prefix_path: prefix_for(locator),
        checksum: Some(checksum),
    }))
}

fn commit(
    root: &Path,
    entry: &Path,
    locator: &Locator,
    bytes: &[u8],
    expected_checksum: Option<&str>,
) -> Result<FetchResult, PkgError> {
    let checksum = blake3_bytes(bytes);
    if let Some(expected) = expected_checksum {
        if expected != checksum {
            return Err(PkgError::integrity(&locator.to_string(), expected, &checksum));
        }
    }

    fs::create_dir_all(root)?;
    let staging = tempfile::Builder::new().prefix(".tmp-").tempdir_in(root)?;

    let package_dir = staging
        .path()
        .join("node_modules")
        .join(locator.ident().requirable_name());
    extract_tgz(bytes, &package_dir)?;
    fs::write(staging.path().join(CHECKSUM_FILENAME), &checksum)?;

    if let Err(e) = fs::rename(staging.path(), entry) {
        // Another process may have committed the same entry first
        if read_entry(entry, locator)?.is_none() {
            return Err(PkgError::io(format!(
                "Failed to commit cache entry {}: {e}",
                entry.display()
            )));
        }
    }

    read_entry(entry, locator)?
        .ok_or_else(|| PkgError::io(format!("Cache entry vanished: {}", entry.display())))
}
