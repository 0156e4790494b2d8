//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for Lamina data on Linux with root access.
const SYSTEM_DATA_DIR: &str = "/var/lib/lamina";

/// Returns the data directory, preferring `$HOME/.lamina` for non-root
/// environments, falling back to `/var/lib/lamina`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let user_dir = PathBuf::from(home).join(".lamina");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Returns the default graph storage root.
pub fn default_graph_root() -> PathBuf {
    data_dir().join("graph")
}

/// Number of random bytes behind an image identifier.
pub const ID_BYTES: usize = 32;

/// Image identifier length in hex characters.
pub const ID_HEX_LENGTH: usize = ID_BYTES * 2;

/// Length of the truncated identifier used in logs.
pub const SHORT_ID_LENGTH: usize = 12;

/// File name of the metadata record inside an image directory.
pub const METADATA_FILE: &str = "json";

/// Directory name of the extracted layer inside an image directory.
pub const LAYER_DIR: &str = "layer";

/// Staging area for registrations in progress, relative to the graph root.
pub const STAGING_DIR: &str = "_tmp";

/// Holding area for image directories being removed, relative to the graph root.
pub const TRASH_DIR: &str = "_trash";
