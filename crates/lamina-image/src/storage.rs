//! On-disk layout of a graph root.
//!
//! ```text
//! <root>/<id>/json      metadata record
//! <root>/<id>/layer/    extracted layer content
//! <root>/_tmp/          registrations in progress
//! <root>/_trash/        image directories being removed
//! ```
//!
//! An image directory only ever appears, disappears, or is replaced through
//! a single `rename(2)`, so readers see either a complete image or none at
//! all.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lamina_common::constants::{LAYER_DIR, METADATA_FILE, STAGING_DIR, TRASH_DIR};
use lamina_common::error::{LaminaError, Result};
use lamina_common::types::ImageId;
use lamina_core::filesystem::rename;
use tempfile::TempDir;

/// Maps image identifiers to locations under a storage root.
#[derive(Debug, Clone)]
pub struct LayerStore {
    /// Root directory for all stored images.
    root: PathBuf,
}

impl LayerStore {
    /// Opens or initializes the layer store at the given root.
    ///
    /// Creates the root and its staging and trash areas, and removes anything
    /// a previous process left in them.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Storage` if the root exists but is not a
    /// directory, or if a directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tracing::info!(path = %root.display(), "opening layer store");

        if root.exists() && !root.is_dir() {
            return Err(LaminaError::storage(
                &root,
                io::Error::new(io::ErrorKind::AlreadyExists, "not a directory"),
            ));
        }

        let store = Self { root };
        for area in [store.staging_root(), store.trash_root()] {
            fs::create_dir_all(&area).map_err(|e| LaminaError::storage(&area, e))?;
            clear_leftovers(&area);
        }
        Ok(store)
    }

    /// Returns the root storage path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding everything stored for `id`.
    #[must_use]
    pub fn image_dir(&self, id: &ImageId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Returns the extracted layer directory for `id`.
    #[must_use]
    pub fn layer_dir(&self, id: &ImageId) -> PathBuf {
        self.image_dir(id).join(LAYER_DIR)
    }

    /// Returns the metadata record path for `id`.
    #[must_use]
    pub fn metadata_path(&self, id: &ImageId) -> PathBuf {
        self.image_dir(id).join(METADATA_FILE)
    }

    /// Returns `true` if a committed image directory exists for `id`.
    #[must_use]
    pub fn has_image(&self, id: &ImageId) -> bool {
        self.metadata_path(id).is_file()
    }

    fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    fn trash_root(&self) -> PathBuf {
        self.root.join(TRASH_DIR)
    }

    /// Creates a private directory in which a registration is assembled.
    ///
    /// The directory is removed when the returned handle is dropped, unless
    /// it has been committed with [`LayerStore::commit`].
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Storage` if the directory cannot be created.
    pub fn stage(&self, id: &ImageId) -> Result<TempDir> {
        let area = self.staging_root();
        tempfile::Builder::new()
            .prefix(&format!("{}-", id.short()))
            .tempdir_in(&area)
            .map_err(|e| LaminaError::storage(&area, e))
    }

    /// Moves a staged directory into place as the image directory for `id`.
    ///
    /// The destination must not exist; callers discard any previous image
    /// first.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Storage` if the rename fails. The staged
    /// directory is still owned by `staged` in that case.
    pub fn commit(&self, id: &ImageId, staged: &TempDir) -> Result<()> {
        let dest = self.image_dir(id);
        fs::rename(staged.path(), &dest).map_err(|e| LaminaError::storage(&dest, e))
    }

    /// Swaps a staged directory with the committed image directory for `id`.
    ///
    /// On success the previous image tree sits at the staged path and is
    /// removed along with `staged`. Returns `false`, leaving both untouched,
    /// if nothing is committed under `id` or the filesystem cannot exchange
    /// entries; the caller then falls back to [`LayerStore::discard`] and
    /// [`LayerStore::commit`].
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Storage` if the exchange fails for another reason.
    pub fn exchange(&self, id: &ImageId, staged: &TempDir) -> Result<bool> {
        let dest = self.image_dir(id);
        match rename::exchange(staged.path(), &dest) {
            Ok(()) => Ok(true),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound
                        | io::ErrorKind::Unsupported
                        | io::ErrorKind::InvalidInput
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(LaminaError::storage(&dest, e)),
        }
    }

    /// Flushes every file and directory under a staged tree to stable storage.
    ///
    /// Symbolic links are not followed.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Storage` if any entry cannot be opened or synced.
    pub fn sync_staged(&self, staged: &TempDir) -> Result<()> {
        sync_tree(staged.path())
    }

    /// Flushes the root directory so committed renames survive a crash.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Storage` if the root cannot be synced.
    pub fn sync_root(&self) -> Result<()> {
        rename::sync_dir(&self.root).map_err(|e| LaminaError::storage(&self.root, e))
    }

    /// Atomically moves the image directory for `id` out of the root.
    ///
    /// Returns `None` if there was nothing to move. The returned handle owns
    /// the removed tree; pass it to [`purge`] or drop it.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Storage` if the rename fails for any reason other
    /// than the image directory being absent.
    pub fn discard(&self, id: &ImageId) -> Result<Option<TempDir>> {
        let area = self.trash_root();
        let holder = tempfile::Builder::new()
            .prefix(&format!("{}-", id.short()))
            .tempdir_in(&area)
            .map_err(|e| LaminaError::storage(&area, e))?;

        let src = self.image_dir(id);
        match fs::rename(&src, holder.path().join(id.as_str())) {
            Ok(()) => Ok(Some(holder)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LaminaError::storage(&src, e)),
        }
    }

    /// Moves a discarded image directory back into place.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Storage` if the rename fails.
    pub fn restore(&self, id: &ImageId, discarded: &TempDir) -> Result<()> {
        let dest = self.image_dir(id);
        fs::rename(discarded.path().join(id.as_str()), &dest)
            .map_err(|e| LaminaError::storage(&dest, e))
    }
}

/// Removes a discarded or abandoned tree, logging instead of failing.
pub fn purge(dir: TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove directory");
    }
}

fn sync_tree(dir: &Path) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| LaminaError::storage(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| LaminaError::storage(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| LaminaError::storage(&path, e))?;
        if file_type.is_dir() {
            sync_tree(&path)?;
        } else if file_type.is_file() {
            fs::File::open(&path)
                .and_then(|file| file.sync_all())
                .map_err(|e| LaminaError::storage(&path, e))?;
        }
    }
    rename::sync_dir(dir).map_err(|e| LaminaError::storage(dir, e))
}

fn clear_leftovers(area: &Path) {
    let Ok(entries) = fs::read_dir(area) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        tracing::warn!(path = %path.display(), "removing leftover from interrupted operation");
        if let Err(e) = fs::remove_dir_all(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove leftover");
        }
    }
}
