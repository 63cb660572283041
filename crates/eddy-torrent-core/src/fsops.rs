//! Save-path preparation and name sanitising.

use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, TorrentError};

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("character class compiles"));

/// Validate a save path and make sure it exists.
///
/// Rejects `..` traversal, creates missing directories, and returns the
/// canonical absolute path.
///
/// # Errors
///
/// Returns [`TorrentError::PermissionDenied`] when the path contains a parent
/// component or cannot be created or resolved.
pub fn sanitize_save_path(path: &Path) -> Result<PathBuf> {
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(TorrentError::PermissionDenied {
            path: path.to_path_buf(),
        });
    }

    std::fs::create_dir_all(path).map_err(|_| TorrentError::PermissionDenied {
        path: path.to_path_buf(),
    })?;
    std::fs::canonicalize(path).map_err(|_| TorrentError::PermissionDenied {
        path: path.to_path_buf(),
    })
}

/// Replace characters forbidden by common filesystems with `_`.
///
/// Used when composing a save directory from a torrent display name.
#[must_use]
pub fn safe_directory_name(name: &str) -> String {
    UNSAFE_CHARS.replace_all(name, "_").into_owned()
}
