//! Unified error types for the Lamina workspace.
//!
//! Every fallible operation in the graph, layer store, and mount assembler
//! returns [`LaminaError`]. The variants follow the taxonomy callers match on;
//! [`LaminaError::kind`] exposes it without destructuring.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum LaminaError {
    /// A value does not have the syntax of an image identifier.
    #[error("invalid image identifier: {id:?}")]
    InvalidIdentifier {
        /// The rejected value.
        id: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// Applying or producing a layer archive failed.
    #[error("archive error at {path}: {source}")]
    Archive {
        /// Directory or entry being processed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A filesystem operation on the storage root failed.
    #[error("storage error at {path}: {source}")]
    Storage {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The mount primitive rejected a composition or teardown.
    #[error("mount error at {target}: {message}")]
    Mount {
        /// Mount target directory.
        target: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Classification of a [`LaminaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed identifier.
    InvalidIdentifier,
    /// Unknown image or unresolved ancestor.
    NotFound,
    /// Archive extraction or production failure.
    Archive,
    /// Filesystem failure under the storage root.
    Storage,
    /// Mount composition or teardown rejected.
    Mount,
    /// Invalid configuration or internal state.
    Config,
    /// Metadata encoding failure.
    Serialization,
}

impl LaminaError {
    /// Returns the taxonomy bucket this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Archive { .. } => ErrorKind::Archive,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Mount { .. } => ErrorKind::Mount,
            Self::Config { .. } => ErrorKind::Config,
            Self::Serialization { .. } => ErrorKind::Serialization,
        }
    }

    /// Shorthand for a [`LaminaError::Storage`] at `path`.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for a [`LaminaError::Mount`] at `target`.
    pub fn mount(target: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Mount {
            target: target.into(),
            message: message.to_string(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LaminaError>;
