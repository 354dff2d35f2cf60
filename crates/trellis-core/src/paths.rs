use std::path::{Path, PathBuf};

/// Find the project root by walking up from `cwd` looking for a `package.json`.
///
/// A directory holding a settings file wins over any nested manifest below it,
/// so running from inside a workspace still finds the project that owns it.
#[must_use]
pub fn project_root(cwd: &Path) -> Option<PathBuf> {
    let cwd = dunce::canonicalize(cwd).unwrap_or_else(|_| cwd.to_path_buf());
    let mut nearest_manifest = None;
    let mut current = cwd.as_path();

    loop {
        if current.join(crate::config::CONFIG_FILENAME).exists() {
            return Some(current.to_path_buf());
        }
        if nearest_manifest.is_none() && current.join("package.json").exists() {
            nearest_manifest = Some(current.to_path_buf());
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return nearest_manifest,
        }
    }
}
