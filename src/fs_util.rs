use std::fs;
use std::io::Write;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::error::TarKvError;

/// Writes `content` to `path` through a uniquely named temp file in the
/// same directory, then renames into place. Parent directories are created
/// as needed; concurrent writers to distinct paths never collide.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), TarKvError> {
    let parent = path
        .parent()
        .ok_or_else(|| TarKvError::Filesystem(format!("invalid destination path: {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| TarKvError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".tarkv")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| TarKvError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| TarKvError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| TarKvError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Joins `key` under `root`, rejecting keys that would land outside it.
/// Keys may carry relative subpaths; absolute paths and `..` components are
/// refused.
pub fn safe_join(root: &Utf8Path, key: &str) -> Result<Utf8PathBuf, TarKvError> {
    let relative = Utf8Path::new(key);
    if relative.is_absolute() {
        return Err(TarKvError::InvalidKey(format!("absolute key: {key}")));
    }
    for component in relative.components() {
        if matches!(component, Utf8Component::ParentDir) {
            return Err(TarKvError::InvalidKey(format!(
                "key escapes output directory: {key}"
            )));
        }
    }
    Ok(root.join(relative))
}

/// Reads a newline-delimited key file; lines are trimmed and blank lines
/// skipped.
pub fn read_key_list(path: &Utf8Path) -> Result<Vec<String>, TarKvError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| TarKvError::KeyList(format!("{path}: {err}")))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
