//! The image graph: catalog and storage root for a collection of images.
//!
//! Each image lives in its own directory under the root, named by its
//! identifier. Registration assembles the directory in a staging area and
//! renames it into place under the graph's commit lock; deletion renames it
//! out under the same lock. Enumeration is a lock-free directory scan.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use lamina_common::config::GraphConfig;
use lamina_common::constants::{LAYER_DIR, METADATA_FILE};
use lamina_common::error::{LaminaError, Result};
use lamina_common::types::ImageId;

use crate::image::Image;
use crate::layer;
use crate::storage::{self, LayerStore};

/// A named storage root and the images registered under it.
#[derive(Debug)]
pub struct Graph {
    store: LayerStore,
    /// Serializes the rename steps of register and delete.
    commit: Mutex<()>,
}

impl Graph {
    /// Opens the graph rooted at `root`, creating the directory if absent.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Storage` if `root` exists and is not a usable
    /// directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: LayerStore::open(root)?,
            commit: Mutex::new(()),
        })
    }

    /// Opens the graph described by `config`.
    ///
    /// # Errors
    ///
    /// See [`Graph::new`].
    pub fn from_config(config: &GraphConfig) -> Result<Self> {
        Self::new(config.root.clone())
    }

    /// Returns the storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Returns the storage layout backing this graph.
    #[must_use]
    pub const fn store(&self) -> &LayerStore {
        &self.store
    }

    /// Returns `true` if an image with `id` is registered.
    #[must_use]
    pub fn exists(&self, id: &ImageId) -> bool {
        self.store.has_image(id)
    }

    /// Loads the image registered as `id`.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::NotFound` if no image is stored under `id` or its
    /// metadata record cannot be read or decoded.
    pub fn get(&self, id: &ImageId) -> Result<Image> {
        let path = self.store.metadata_path(id);
        let bytes = fs::read(&path).map_err(|e| {
            tracing::debug!(id = %id.short(), error = %e, "image metadata unreadable");
            not_found(id)
        })?;

        let image = Image::decode(&bytes).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "corrupt image metadata");
            not_found(id)
        })?;
        if image.id != *id {
            tracing::warn!(
                path = %path.display(),
                recorded = %image.id,
                "image metadata names a different identifier"
            );
            return Err(not_found(id));
        }
        Ok(image)
    }

    /// Lists every fully registered image, oldest first.
    ///
    /// Directory entries that are not valid image directories are skipped.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Storage` if the root itself cannot be read.
    pub fn all(&self) -> Result<Vec<Image>> {
        let root = self.root();
        let entries = fs::read_dir(root).map_err(|e| LaminaError::storage(root, e))?;

        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LaminaError::storage(root, e))?;
            if let Some(image) = self.parse_entry(&entry.file_name()) {
                images.push(image);
            }
        }
        images.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));

        tracing::debug!(count = images.len(), "scanned image graph");
        Ok(images)
    }

    /// Turns one directory entry of the root into an image, if it is one.
    fn parse_entry(&self, name: &std::ffi::OsStr) -> Option<Image> {
        let Some(name) = name.to_str() else {
            tracing::debug!(entry = ?name, "skipping non-UTF-8 entry");
            return None;
        };
        let Ok(id) = ImageId::parse(name) else {
            tracing::debug!(entry = name, "skipping entry with invalid identifier");
            return None;
        };
        self.get(&id).ok()
    }

    /// Creates an image with a fresh identifier from `archive`.
    ///
    /// # Errors
    ///
    /// See [`Graph::register`].
    pub fn create(
        &self,
        archive: impl Read,
        parent: Option<&ImageId>,
        comment: &str,
    ) -> Result<Image> {
        let mut image = Image::new(parent.cloned(), comment);
        image.created = Some(Utc::now());
        self.register(archive, &image)
    }

    /// Registers `image` with the layer contained in `archive`.
    ///
    /// A missing creation time is set to now. Any image already stored
    /// under the same identifier is replaced in a single step where the
    /// filesystem supports it, so readers keep seeing the old image until
    /// the new one takes its place. The image becomes visible to
    /// [`Graph::get`] and [`Graph::all`] only once its layer and metadata
    /// are flushed to disk; on failure nothing is left behind.
    ///
    /// Returns the image as persisted.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Archive` if extraction fails, or
    /// `LaminaError::Storage` if the image directory cannot be written.
    pub fn register(&self, archive: impl Read, image: &Image) -> Result<Image> {
        let mut image = image.clone();
        if image.created.is_none() {
            image.created = Some(Utc::now());
        }
        let id = image.id.clone();

        let staged = self.store.stage(&id)?;
        let layer = layer::extract_layer(archive, &staged.path().join(LAYER_DIR))?;
        write_metadata(&staged.path().join(METADATA_FILE), &image)?;
        self.store.sync_staged(&staged)?;

        let replaced = {
            let _guard = self.lock()?;
            if self.store.exchange(&id, &staged)? {
                Some(staged)
            } else {
                let replaced = self.store.discard(&id)?;
                if let Err(e) = self.store.commit(&id, &staged) {
                    if let Some(previous) = &replaced {
                        if let Err(restore) = self.store.restore(&id, previous) {
                            tracing::warn!(id = %id.short(), error = %restore, "failed to restore replaced image");
                        }
                    }
                    return Err(e);
                }
                let _ = staged.keep();
                replaced
            }
        };
        if let Err(e) = self.store.sync_root() {
            tracing::warn!(id = %id.short(), error = %e, "failed to flush graph root");
        }

        if let Some(previous) = replaced {
            tracing::debug!(id = %id.short(), "replaced existing image");
            storage::purge(previous);
        }
        tracing::info!(
            id = %id.short(),
            parent = image.parent.as_ref().map_or("-", ImageId::short),
            entries = layer.entries,
            size = layer.size_bytes,
            "image registered"
        );
        Ok(image)
    }

    /// Removes the image stored under `id`.
    ///
    /// Children referring to `id` as their parent are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::NotFound` if no image is stored under `id`, or
    /// `LaminaError::Storage` if it cannot be moved out of the root.
    pub fn delete(&self, id: &ImageId) -> Result<()> {
        let discarded = {
            let _guard = self.lock()?;
            self.store.discard(id)?
        };
        let Some(discarded) = discarded else {
            return Err(not_found(id));
        };
        storage::purge(discarded);
        tracing::info!(id = %id.short(), "image deleted");
        Ok(())
    }

    /// Groups registered images by parent.
    ///
    /// # Errors
    ///
    /// See [`Graph::all`].
    pub fn by_parent(&self) -> Result<HashMap<ImageId, Vec<Image>>> {
        let mut children: HashMap<ImageId, Vec<Image>> = HashMap::new();
        for image in self.all()? {
            if let Some(parent) = image.parent.clone() {
                children.entry(parent).or_default().push(image);
            }
        }
        Ok(children)
    }

    /// Returns the images no other image names as its parent.
    ///
    /// # Errors
    ///
    /// See [`Graph::all`].
    pub fn heads(&self) -> Result<HashMap<ImageId, Image>> {
        let all = self.all()?;
        let parents: HashSet<&ImageId> = all.iter().filter_map(|i| i.parent.as_ref()).collect();
        Ok(all
            .iter()
            .filter(|i| !parents.contains(&i.id))
            .map(|i| (i.id.clone(), i.clone()))
            .collect())
    }

    /// Resolves the ancestor chain of `image`, receiver first and base last.
    ///
    /// The chain is read from the stored records, so `image` must itself be
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::NotFound` if `image` or any ancestor is missing,
    /// or if the parent pointers form a cycle.
    pub fn history(&self, image: &Image) -> Result<Vec<Image>> {
        let head = self.get(&image.id)?;
        let mut seen = HashSet::from([head.id.clone()]);
        let mut next = head.parent.clone();
        let mut chain = vec![head];

        while let Some(parent_id) = next {
            if !seen.insert(parent_id.clone()) {
                tracing::warn!(id = %parent_id.short(), "cycle in parent chain");
                return Err(LaminaError::NotFound {
                    kind: "acyclic ancestor chain",
                    id: parent_id.to_string(),
                });
            }
            let parent = self.get(&parent_id).map_err(|_| LaminaError::NotFound {
                kind: "parent image",
                id: parent_id.to_string(),
            })?;
            next = parent.parent.clone();
            chain.push(parent);
        }
        Ok(chain)
    }

    /// Returns the layer directories of `image`'s chain, base first.
    ///
    /// # Errors
    ///
    /// See [`Graph::history`].
    pub fn layers(&self, image: &Image) -> Result<Vec<PathBuf>> {
        Ok(self
            .history(image)?
            .iter()
            .rev()
            .map(|i| self.store.layer_dir(&i.id))
            .collect())
    }

    /// Writes a tar archive of the layer stored under `id` to `writer`.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::NotFound` if `id` is not registered, or
    /// `LaminaError::Archive` if the layer cannot be archived.
    pub fn export_layer<W: Write>(&self, id: &ImageId, writer: W) -> Result<W> {
        if !self.exists(id) {
            return Err(not_found(id));
        }
        layer::archive_layer(&self.store.layer_dir(id), writer)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.commit.lock().map_err(|_| LaminaError::Config {
            message: "graph commit lock poisoned".into(),
        })
    }
}

fn not_found(id: &ImageId) -> LaminaError {
    LaminaError::NotFound {
        kind: "image",
        id: id.to_string(),
    }
}

fn write_metadata(path: &Path, image: &Image) -> Result<()> {
    let bytes = image.encode()?;
    let mut file = fs::File::create(path).map_err(|e| LaminaError::storage(path, e))?;
    file.write_all(&bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| LaminaError::storage(path, e))
}
