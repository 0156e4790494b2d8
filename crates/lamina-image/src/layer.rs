//! Filesystem layer extraction and export.
//!
//! A layer is the directory tree produced by applying one archive. Archives
//! are plain or gzip-compressed tar streams; entry paths are always taken
//! relative to the target directory.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use lamina_common::error::{LaminaError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Summary of one applied archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layer {
    /// Number of entries written to the target.
    pub entries: usize,
    /// Total size of regular file contents in bytes.
    pub size_bytes: u64,
}

/// Applies every entry of a tar archive to `target`.
///
/// `target` is created if missing. Leading separators in entry paths are
/// ignored; an entry containing `..` aborts extraction. Device nodes, FIFOs
/// and other special entries are skipped.
///
/// On error the target is left partially populated; callers are expected to
/// discard it.
///
/// # Errors
///
/// Returns `LaminaError::Archive` if the stream is malformed, an entry
/// escapes the target, or writing an entry fails.
pub fn extract_layer(archive: impl Read, target: &Path) -> Result<Layer> {
    tracing::debug!(target = %target.display(), "extracting layer");

    let archive_err = |path: &Path, source: io::Error| LaminaError::Archive {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(target).map_err(|e| archive_err(target, e))?;

    let reader = decompress(archive).map_err(|e| archive_err(target, e))?;
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut layer = Layer::default();
    for entry in archive.entries().map_err(|e| archive_err(target, e))? {
        let mut entry = entry.map_err(|e| archive_err(target, e))?;
        let raw_path = entry.path().map_err(|e| archive_err(target, e))?.into_owned();
        let relative = relative_entry_path(&raw_path).map_err(|e| archive_err(&raw_path, e))?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let kind = entry.header().entry_type();
        if !is_supported(kind) {
            tracing::debug!(path = %relative.display(), ?kind, "skipping unsupported entry");
            continue;
        }

        let unpacked = entry
            .unpack_in(target)
            .map_err(|e| archive_err(&target.join(&relative), e))?;
        if !unpacked {
            return Err(archive_err(
                &raw_path,
                io::Error::new(io::ErrorKind::InvalidData, "entry escapes the target directory"),
            ));
        }

        layer.entries += 1;
        if kind.is_file() {
            layer.size_bytes += entry.size();
        }
    }

    tracing::info!(
        target = %target.display(),
        entries = layer.entries,
        size = layer.size_bytes,
        "layer extracted"
    );
    Ok(layer)
}

/// Writes a tar archive of the directory tree at `source` to `writer`.
///
/// Paths in the archive are relative to `source`; symlinks are archived as
/// links, not followed.
///
/// # Errors
///
/// Returns `LaminaError::Archive` if the tree cannot be read or the writer fails.
pub fn archive_layer<W: Write>(source: &Path, writer: W) -> Result<W> {
    let archive_err = |source_err: io::Error| LaminaError::Archive {
        path: source.to_path_buf(),
        source: source_err,
    };

    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", source).map_err(archive_err)?;
    let writer = builder.into_inner().map_err(archive_err)?;

    tracing::debug!(source = %source.display(), "layer archived");
    Ok(writer)
}

/// Wraps `archive` in a gzip decoder when the stream starts with the gzip magic.
fn decompress<'a>(archive: impl Read + 'a) -> io::Result<Box<dyn Read + 'a>> {
    let mut reader = BufReader::new(archive);
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    if is_gzip {
        Ok(Box::new(flate2::read::GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Strips root, prefix and `.` components; refuses `..`.
fn relative_entry_path(path: &Path) -> io::Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "found '..' in entry path",
                ));
            }
            Component::Normal(part) => relative.push(part),
        }
    }
    Ok(relative)
}

const fn is_supported(kind: tar::EntryType) -> bool {
    matches!(
        kind,
        tar::EntryType::Regular
            | tar::EntryType::Continuous
            | tar::EntryType::Directory
            | tar::EntryType::Symlink
            | tar::EntryType::Link
    )
}
