//! `OverlayFS` management for layered root filesystems.
//!
//! Stacks multiple read-only layers with a single writable upper layer,
//! presenting the union at a merged mount point with copy-on-write semantics.

use std::path::{Path, PathBuf};

use lamina_common::error::{LaminaError, Result};

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers, bottom to top.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`; must share a filesystem with `upper_dir`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Renders the `mount(2)` data string for this configuration.
    ///
    /// `OverlayFS` reads `lowerdir` top-first, so the bottom-to-top
    /// `lower_dirs` are emitted in reverse.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Mount` if there are no lower layers or if a path
    /// contains a character the option parser treats as a separator.
    pub fn mount_options(&self) -> Result<String> {
        if self.lower_dirs.is_empty() {
            return Err(LaminaError::mount(
                &self.merged_dir,
                "overlay requires at least one lower layer",
            ));
        }

        let mut paths = self.lower_dirs.iter().rev().map(PathBuf::as_path).collect::<Vec<_>>();
        paths.push(self.upper_dir.as_path());
        paths.push(self.work_dir.as_path());
        if let Some(bad) = paths.iter().find(|p| !is_option_safe(p)) {
            return Err(LaminaError::mount(
                &self.merged_dir,
                format!("path not representable in overlay options: {}", bad.display()),
            ));
        }

        let lowers = self
            .lower_dirs
            .iter()
            .rev()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        Ok(format!(
            "lowerdir={},upperdir={},workdir={}",
            lowers,
            self.upper_dir.display(),
            self.work_dir.display()
        ))
    }
}

fn is_option_safe(path: &Path) -> bool {
    path.to_str().is_some_and(|s| !s.contains([':', ',', '\n']))
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// Creates the work directory if it does not exist; the merged and upper
/// directories must already exist.
///
/// # Errors
///
/// Returns an error if the options cannot be rendered, the work directory
/// cannot be created, or the mount syscall fails.
#[cfg(target_os = "linux")]
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let opts = config.mount_options()?;
    std::fs::create_dir_all(&config.work_dir)
        .map_err(|e| LaminaError::storage(&config.work_dir, e))?;

    mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| LaminaError::mount(&config.merged_dir, format!("overlay mount failed: {e}")))?;

    tracing::info!(
        merged = %config.merged_dir.display(),
        layers = config.lower_dirs.len(),
        "overlayfs mounted"
    );
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: `OverlayFS` mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    Err(LaminaError::mount(
        &config.merged_dir,
        "Linux required for overlay mounts",
    ))
}

/// Unmounts an `OverlayFS` at the given path.
///
/// The unmount is synchronous so that a busy filesystem is reported to the
/// caller instead of lingering detached.
///
/// # Errors
///
/// Returns an error if nothing is mounted at `merged_dir` or the unmount
/// syscall fails.
#[cfg(target_os = "linux")]
pub fn unmount_overlay(merged_dir: &Path) -> Result<()> {
    nix::mount::umount2(merged_dir, nix::mount::MntFlags::empty())
        .map_err(|e| LaminaError::mount(merged_dir, format!("unmount failed: {e}")))?;
    tracing::info!(path = %merged_dir.display(), "overlayfs unmounted");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: `OverlayFS` unmounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn unmount_overlay(merged_dir: &Path) -> Result<()> {
    Err(LaminaError::mount(
        merged_dir,
        "Linux required for overlay mounts",
    ))
}
