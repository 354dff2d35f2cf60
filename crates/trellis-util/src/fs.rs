use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// This provides crash-safety: the file will either have the old contents or
/// the new contents, never a partial write. When `mode` is set (Unix only), the
/// permissions are applied to the temp file before it becomes visible.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8], mode: Option<u32>) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    // Same directory as the target so the rename never crosses filesystems
    let mut temp = tempfile::Builder::new()
        .prefix(".trellis-write-")
        .tempfile_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = mode {
            fs::set_permissions(temp.path(), fs::Permissions::from_mode(mode))?;
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Recursively copy `src` into `dst`, leaving files that already exist in `dst` untouched.
///
/// Symlinks are skipped. Returns the number of files actually written.
///
/// # Errors
/// Returns an error if the source cannot be walked or a copy fails.
pub fn copy_tree_no_overwrite(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            if target.symlink_metadata().is_ok() {
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Remove a file, symlink or directory tree. Missing paths are not an error.
///
/// # Errors
/// Returns an error if the path exists but cannot be removed.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// List the direct children of a directory, sorted. A missing directory has no children.
///
/// # Errors
/// Returns an error if the directory exists but cannot be read.
pub fn read_dir_sorted(path: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut result = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    result.sort();
    Ok(result)
}

/// Express `path` relative to `base`, walking up with `..` where needed.
///
/// Both paths are compared component by component; neither is touched on disk.
#[must_use]
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    let base: Vec<_> = base.components().collect();
    let target: Vec<_> = path.components().collect();

    let common = base
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common..base.len() {
        result.push("..");
    }
    for component in &target[common..] {
        result.push(component.as_os_str());
    }
    result
}

/// Join the components of `path` with `/`, whatever the platform separator.
#[must_use]
pub fn to_slash_string(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");

        atomic_write(&path, b"hello", None).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");

        // Overwrite
        atomic_write(&path, b"world", None).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "world");
    }

    #[test]
    fn test_atomic_write_no_temp_left_on_success() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");

        atomic_write(&path, b"content", None).unwrap();

        let entries = read_dir_sorted(dir.path()).unwrap();
        assert_eq!(entries, vec![path]);
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("script.cjs");

        atomic_write(&path, b"#!/usr/bin/env node\n", Some(0o755)).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_copy_tree_keeps_existing_files() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();

        fs::create_dir_all(src.path().join("lib")).unwrap();
        fs::write(src.path().join("package.json"), "{}").unwrap();
        fs::write(src.path().join("lib").join("index.js"), "new").unwrap();

        fs::create_dir_all(dst.path().join("lib")).unwrap();
        fs::write(dst.path().join("lib").join("index.js"), "built").unwrap();

        let copied = copy_tree_no_overwrite(src.path(), dst.path()).unwrap();

        assert_eq!(copied, 1);
        assert_eq!(
            fs::read_to_string(dst.path().join("lib").join("index.js")).unwrap(),
            "built"
        );
        assert!(dst.path().join("package.json").exists());
    }

    #[test]
    fn test_remove_path_missing_is_ok() {
        let dir = tempdir().unwrap();
        remove_path(&dir.path().join("nope")).unwrap();
    }

    #[test]
    fn test_remove_path_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("file"), "x").unwrap();

        remove_path(&dir.path().join("a")).unwrap();
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn test_relative_path() {
        let base = Path::new("/root/project");
        assert_eq!(
            relative_path(base, Path::new("/root/project/cache/x")),
            PathBuf::from("cache/x")
        );
        assert_eq!(
            relative_path(base, Path::new("/root/other/pkg")),
            PathBuf::from("../other/pkg")
        );
        assert_eq!(relative_path(base, base), PathBuf::new());
    }

    #[test]
    fn test_to_slash_string() {
        assert_eq!(to_slash_string(&Path::new("a").join("b").join("c")), "a/b/c");
        assert_eq!(to_slash_string(Path::new("")), "");
    }

    #[test]
    fn test_read_dir_sorted_missing_dir() {
        let dir = tempdir().unwrap();
        assert!(read_dir_sorted(&dir.path().join("missing")).unwrap().is_empty());
    }
}
