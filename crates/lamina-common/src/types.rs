//! Domain primitive types used across the Lamina workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{ID_BYTES, ID_HEX_LENGTH, SHORT_ID_LENGTH};
use crate::error::{LaminaError, Result};

/// Unique identifier for an image in a graph.
///
/// Always 64 lowercase hexadecimal characters. Values are only constructed
/// through [`ImageId::generate`] or [`ImageId::parse`], so holding an
/// `ImageId` means the syntax has been checked.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(String);

impl ImageId {
    /// Generates a fresh identifier from 256 bits of CSPRNG output.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; ID_BYTES] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Parses and validates an identifier.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::InvalidIdentifier` if `id` is not exactly
    /// 64 lowercase hexadecimal characters.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self(id))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the truncated form used in log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..SHORT_ID_LENGTH]
    }
}

/// Checks that `id` has the syntax of an image identifier.
///
/// # Errors
///
/// Returns `LaminaError::InvalidIdentifier` unless `id` is exactly 64
/// characters drawn from `[0-9a-f]`.
pub fn validate_id(id: &str) -> Result<()> {
    let well_formed = id.len() == ID_HEX_LENGTH
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if well_formed {
        Ok(())
    } else {
        Err(LaminaError::InvalidIdentifier { id: id.to_string() })
    }
}

impl FromStr for ImageId {
    type Err = LaminaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageId {
    type Error = LaminaError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

impl AsRef<str> for ImageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
