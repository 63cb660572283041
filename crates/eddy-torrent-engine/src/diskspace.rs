//! Free-space probe backing the admission check for metainfo adds.

use std::path::Path;

use eddy_torrent_core::{Result, TorrentError};

/// Bytes available to unprivileged writers on the volume holding `path`.
///
/// # Errors
///
/// Returns [`TorrentError::DiskError`] when the volume cannot be statted.
#[cfg(unix)]
#[allow(unsafe_code)]
pub(crate) fn free_space(path: &Path) -> Result<u64> {
    use std::os::unix::ffi::OsStrExt;

    let path_cstr = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|err| {
        TorrentError::FileSystemError {
            detail: format!("path contains interior NUL: {err}"),
        }
    })?;

    // SAFETY: statvfs contains only primitive integer fields, so a zeroed
    // value is a valid initial state; it lives only for this call.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };

    // SAFETY: path_cstr outlives the call and stat is a valid out-pointer.
    let result = unsafe { libc::statvfs(path_cstr.as_ptr(), &raw mut stat) };

    if result != 0 {
        let err = std::io::Error::last_os_error();
        return Err(TorrentError::DiskError {
            detail: format!("statvfs failed for {}: {err}", path.display()),
        });
    }

    // f_bavail rather than f_bfree: space available to non-root writers.
    #[allow(clippy::unnecessary_cast)]
    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

/// Fallback for platforms without a statvfs equivalent wired up.
#[cfg(not(unix))]
pub(crate) fn free_space(path: &Path) -> Result<u64> {
    tracing::warn!(
        path = %path.display(),
        "free-space probe not implemented for this platform; skipping check"
    );
    Ok(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_space_for_an_existing_volume() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let space = free_space(dir.path())?;
        assert!(space > 0, "temp volume should have free space");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn errors_for_missing_paths() {
        assert!(free_space(Path::new("/nonexistent/volume/for/tests")).is_err());
    }
}
