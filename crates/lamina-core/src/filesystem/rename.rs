//! Directory entry swaps.

use std::io;
use std::path::Path;

/// Atomically exchanges the directory entries at `a` and `b`.
///
/// Both paths must exist and live on the same filesystem. Observers see
/// either the old pair or the swapped pair, never a moment where one of
/// the names is missing.
///
/// # Errors
///
/// Returns `io::ErrorKind::NotFound` if either path is missing, and
/// `io::ErrorKind::Unsupported` or `io::ErrorKind::InvalidInput` when the
/// platform or filesystem cannot exchange entries.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn exchange(a: &Path, b: &Path) -> io::Result<()> {
    use nix::fcntl::{AT_FDCWD, RenameFlags, renameat2};

    renameat2(AT_FDCWD, a, AT_FDCWD, b, RenameFlags::RENAME_EXCHANGE).map_err(io::Error::from)?;
    tracing::trace!(a = %a.display(), b = %b.display(), "exchanged entries");
    Ok(())
}

/// Stub for platforms without `renameat2(2)`.
///
/// # Errors
///
/// Always returns `io::ErrorKind::Unsupported`.
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn exchange(_a: &Path, _b: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "atomic exchange requires renameat2",
    ))
}

/// Flushes a directory's entries to stable storage.
///
/// # Errors
///
/// Returns the error from opening or syncing `dir`.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}
