//! Tarball download and extraction.

use super::error::PkgError;
use bytes::Bytes;
use flate2::read::GzDecoder;
use reqwest::Client;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tar::{Archive, EntryType};
use trellis_util::fs::read_dir_sorted;

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Download timeout in seconds.
const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Download a tarball from a URL.
///
/// # Errors
/// Returns an error if the download fails or exceeds the size limit.
pub async fn download_tarball(client: &Client, url: &str, max_bytes: u64) -> Result<Bytes, PkgError> {
    let response = client
        .get(url)
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .send()
        .await
        .map_err(|e| PkgError::fetch_failed(format!("Failed to download '{url}': {e}")))?;

    if !response.status().is_success() {
        return Err(PkgError::fetch_failed(format!(
            "Download failed with status {} for '{url}'",
            response.status()
        )));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(PkgError::fetch_failed(format!(
                "Tarball too large: {len} bytes (max: {max_bytes})"
            )));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PkgError::fetch_failed(format!("Failed to read response body: {e}")))?;

    if bytes.len() as u64 > max_bytes {
        return Err(PkgError::fetch_failed(format!(
            "Tarball too large: {} bytes (max: {max_bytes})",
            bytes.len()
        )));
    }

    Ok(bytes)
}

/// Extract a package tarball so its root directory becomes `dest`.
///
/// Entries are unpacked into a staging directory next to `dest`, then the
/// tarball's single top-level directory is renamed into place. `dest` must
/// not exist yet.
///
/// # Errors
/// Returns `PKG_EXTRACT_FAILED` if the archive is invalid or tries to escape
/// the destination.
pub fn extract_tgz(bytes: &[u8], dest: &Path) -> Result<(), PkgError> {
    let parent = dest
        .parent()
        .ok_or_else(|| PkgError::extract_failed("Destination has no parent"))?;
    fs::create_dir_all(parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(parent)?;

    unpack_entries(bytes, staging.path())?;
    let root = find_extracted_root(staging.path())?;

    fs::rename(&root, dest).map_err(|e| {
        PkgError::extract_failed(format!("Failed to move extracted package into place: {e}"))
    })
}

/// The directory an npm tarball wraps its files in.
///
/// Usually `package/`, but some (`@types/*`) use the bare package name, so
/// any single top-level directory is accepted.
fn find_extracted_root(staging: &Path) -> Result<PathBuf, PkgError> {
    let conventional = staging.join("package");
    if conventional.is_dir() {
        return Ok(conventional);
    }

    let mut directories = read_dir_sorted(staging)?
        .into_iter()
        .filter(|path| path.is_dir());
    match (directories.next(), directories.next()) {
        (Some(root), None) => Ok(root),
        (None, _) => Err(PkgError::extract_failed(
            "Tarball does not contain any top-level directory",
        )),
        (Some(_), Some(_)) => Err(PkgError::extract_failed(
            "Tarball contains more than one top-level directory",
        )),
    }
}

/// Entry path made safe to join onto the staging directory.
fn sandboxed(path: &Path) -> Result<PathBuf, PkgError> {
    let mut safe = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => safe.push(part),
            Component::CurDir => {}
            _ => {
                return Err(PkgError::extract_failed(format!(
                    "Tarball entry escapes the package: {}",
                    path.display()
                )))
            }
        }
    }
    Ok(safe)
}

fn unpack_entries(bytes: &[u8], staging: &Path) -> Result<(), PkgError> {
    let corrupt = |e: io::Error| PkgError::extract_failed(format!("Corrupt tarball: {e}"));
    let mut archive = Archive::new(GzDecoder::new(bytes));

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let relative = sandboxed(&entry.path().map_err(corrupt)?)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = staging.join(relative);

        match entry.header().entry_type() {
            EntryType::Directory => fs::create_dir_all(&target)?,
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.unpack(&target).map_err(corrupt)?;
            }
            // Links and special files never make it into the cache
            _ => {}
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::tgz as tarball;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_extract_tarball() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("node_modules").join("test");

        let tgz = tarball(&[
            ("package/package.json", br#"{"name":"test","version":"1.0.0"}"#),
            ("package/lib/index.js", b"module.exports = 42;"),
        ]);
        extract_tgz(&tgz, &dest).unwrap();

        assert!(dest.join("package.json").exists());
        assert!(dest.join("lib").join("index.js").exists());
        // Staging directory is gone
        assert_eq!(fs::read_dir(dir.path().join("node_modules")).unwrap().count(), 1);
    }

    #[test]
    fn test_non_package_prefix() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("node");

        let tgz = tarball(&[("node/index.d.ts", b"export {};")]);
        extract_tgz(&tgz, &dest).unwrap();
        assert!(dest.join("index.d.ts").exists());
    }

    #[test]
    fn test_reject_empty_tarball() {
        let dir = tempdir().unwrap();
        let tgz = tarball(&[]);
        let err = extract_tgz(&tgz, &dir.path().join("x")).unwrap_err();
        assert_eq!(err.code(), "PKG_EXTRACT_FAILED");
    }

    #[test]
    fn test_reject_garbage() {
        let dir = tempdir().unwrap();
        assert!(extract_tgz(b"definitely not gzip", &dir.path().join("x")).is_err());
    }

    #[test]
    fn test_sandboxed_paths() {
        assert_eq!(
            sandboxed(Path::new("./package/lib/a.js")).unwrap(),
            PathBuf::from("package/lib/a.js")
        );
        assert!(sandboxed(Path::new("package/../../etc/passwd")).is_err());
        assert!(sandboxed(Path::new("/etc/passwd")).is_err());
    }
}
