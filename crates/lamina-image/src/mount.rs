//! Root filesystem assembly.
//!
//! The assembler resolves an image's ancestor chain through the graph and
//! hands the layer directories, base first, to a [`MountDriver`] together
//! with the caller's writable directory. Operations on the same target path
//! are serialized; unrelated targets proceed in parallel.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use lamina_common::config::{DriverKind, GraphConfig};
use lamina_common::error::{LaminaError, Result};
use lamina_core::filesystem::mount::is_mountpoint;
use lamina_core::filesystem::overlayfs::{self, OverlayConfig};

use crate::graph::Graph;
use crate::image::Image;

/// A union-mount capability.
pub trait MountDriver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Presents `layers` (read-only, base first) under the writable `rw` at `target`.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Mount` if the composition is rejected, including
    /// when something is already mounted at `target`.
    fn compose(&self, layers: &[PathBuf], rw: &Path, target: &Path) -> Result<()>;

    /// Tears down whatever is mounted at `target`.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Mount` if nothing is mounted there or the
    /// teardown is rejected.
    fn teardown(&self, target: &Path) -> Result<()>;
}

/// Mount driver backed by Linux `OverlayFS`.
///
/// `OverlayFS` needs a work directory on the same filesystem as the writable
/// layer; the driver creates it as a hidden sibling of `rw` and removes it
/// after teardown. A writable layer backs at most one live mount.
#[derive(Debug, Default)]
pub struct OverlayDriver {
    work_dirs: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl OverlayDriver {
    /// Creates an overlay driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn work_dirs(&self) -> Result<MutexGuard<'_, HashMap<PathBuf, PathBuf>>> {
        self.work_dirs.lock().map_err(|_| LaminaError::Config {
            message: "overlay work directory table poisoned".into(),
        })
    }
}

/// Returns the work directory paired with the writable layer `rw`.
fn work_dir_for(rw: &Path) -> Result<PathBuf> {
    match (rw.parent(), rw.file_name()) {
        (Some(parent), Some(name)) => {
            Ok(parent.join(format!(".{}-work", name.to_string_lossy())))
        }
        _ => Err(LaminaError::mount(
            rw,
            "writable layer needs a parent directory for the overlay work directory",
        )),
    }
}

impl MountDriver for OverlayDriver {
    fn name(&self) -> &'static str {
        "overlay"
    }

    fn compose(&self, layers: &[PathBuf], rw: &Path, target: &Path) -> Result<()> {
        if is_mountpoint(target)? {
            return Err(LaminaError::mount(target, "already mounted"));
        }

        let work_dir = work_dir_for(rw)?;
        {
            let mut work_dirs = self.work_dirs()?;
            if work_dirs.values().any(|used| *used == work_dir) {
                return Err(LaminaError::mount(target, "writable layer already in use"));
            }
            let _ = work_dirs.insert(target.to_path_buf(), work_dir.clone());
        }

        let created = !work_dir.exists();
        let config = OverlayConfig {
            lower_dirs: layers.to_vec(),
            upper_dir: rw.to_path_buf(),
            work_dir,
            merged_dir: target.to_path_buf(),
        };
        if let Err(e) = overlayfs::mount_overlay(&config) {
            let _ = self.work_dirs()?.remove(target);
            if created {
                if let Err(cleanup) = fs::remove_dir_all(&config.work_dir) {
                    tracing::debug!(path = %config.work_dir.display(), error = %cleanup, "work directory not removed");
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn teardown(&self, target: &Path) -> Result<()> {
        overlayfs::unmount_overlay(target)?;
        if let Some(work_dir) = self.work_dirs()?.remove(target) {
            if let Err(e) = fs::remove_dir_all(&work_dir) {
                tracing::warn!(path = %work_dir.display(), error = %e, "failed to remove overlay work directory");
            }
        }
        Ok(())
    }
}

/// Composes image chains into mounted root filesystems.
#[derive(Debug)]
pub struct MountAssembler<D = OverlayDriver> {
    driver: D,
    in_flight: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl MountAssembler<OverlayDriver> {
    /// Creates an assembler using `OverlayFS`.
    #[must_use]
    pub fn overlay() -> Self {
        Self::new(OverlayDriver::new())
    }

    /// Creates an assembler using the driver selected in `config`.
    #[must_use]
    pub fn from_config(config: &GraphConfig) -> Self {
        match config.driver {
            DriverKind::Overlay => Self::overlay(),
        }
    }
}

impl<D: MountDriver> MountAssembler<D> {
    /// Creates an assembler over `driver`.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the underlying driver.
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Mounts `image` and its ancestors at `rootfs`, with `rw` as the writable layer.
    ///
    /// Both directories must already exist. The caller owns the mount and
    /// must call [`MountAssembler::unmount`] on every exit path.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::NotFound` if `rootfs`, `rw`, the image, or any
    /// ancestor is missing, and `LaminaError::Mount` if the driver rejects
    /// the composition.
    pub fn mount(&self, graph: &Graph, image: &Image, rootfs: &Path, rw: &Path) -> Result<()> {
        let rootfs = existing_dir(rootfs)?;
        let rw = existing_dir(rw)?;
        let layers = graph.layers(image)?;

        self.serialized(&rootfs, || self.driver.compose(&layers, &rw, &rootfs))?;
        tracing::info!(
            id = %image.id.short(),
            rootfs = %rootfs.display(),
            layers = layers.len(),
            driver = self.driver.name(),
            "image mounted"
        );
        Ok(())
    }

    /// Tears down the mount at `path`.
    ///
    /// Neither `path` nor the writable layer's contents are removed.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Mount` if nothing is mounted at `path` or the
    /// driver rejects the teardown.
    pub fn unmount(&self, path: &Path) -> Result<()> {
        let target = fs::canonicalize(path)
            .map_err(|e| LaminaError::mount(path, format!("not mounted: {e}")))?;

        self.serialized(&target, || self.driver.teardown(&target))?;
        tracing::info!(path = %target.display(), driver = self.driver.name(), "image unmounted");
        Ok(())
    }

    /// Runs `op` while holding the lock for `target`.
    fn serialized<T>(&self, target: &Path, op: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = Arc::clone(self.in_flight()?.entry(target.to_path_buf()).or_default());
        let result = {
            let _guard = lock.lock().map_err(|_| LaminaError::Config {
                message: format!("mount lock for {} poisoned", target.display()),
            })?;
            op()
        };

        let mut in_flight = self.in_flight()?;
        drop(lock);
        // Clones are only taken under the table lock, so a count of one
        // means nobody is waiting on this target.
        if in_flight
            .get(target)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            let _ = in_flight.remove(target);
        }
        result
    }

    fn in_flight(&self) -> Result<MutexGuard<'_, HashMap<PathBuf, Arc<Mutex<()>>>>> {
        self.in_flight.lock().map_err(|_| LaminaError::Config {
            message: "mount lock table poisoned".into(),
        })
    }
}

fn existing_dir(path: &Path) -> Result<PathBuf> {
    let resolved = fs::canonicalize(path).map_err(|_| LaminaError::NotFound {
        kind: "directory",
        id: path.display().to_string(),
    })?;
    if resolved.is_dir() {
        Ok(resolved)
    } else {
        Err(LaminaError::NotFound {
            kind: "directory",
            id: path.display().to_string(),
        })
    }
}
