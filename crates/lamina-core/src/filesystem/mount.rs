//! Mount table utilities.

use std::path::Path;

use lamina_common::error::{LaminaError, Result};

/// Reports whether `path` is the root of a mounted filesystem.
///
/// A directory is a mountpoint when its device differs from its parent's,
/// or when it is `/`. Bind mounts of a directory onto itself on the same
/// device are not detected.
///
/// # Errors
///
/// Returns `LaminaError::Storage` if `path` or its parent cannot be stat'ed.
pub fn is_mountpoint(path: &Path) -> Result<bool> {
    let Some(parent) = path.parent() else {
        return Ok(true);
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };

    let own = device_of(path)?;
    let above = device_of(parent)?;
    tracing::trace!(path = %path.display(), own, above, "compared device ids");
    Ok(own != above)
}

#[allow(clippy::useless_conversion)]
fn device_of(path: &Path) -> Result<u64> {
    let stat = nix::sys::stat::stat(path)
        .map_err(|e| LaminaError::storage(path, std::io::Error::from(e)))?;
    Ok(u64::from(stat.st_dev))
}
