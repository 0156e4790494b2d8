//! The metadata record of one image.
//!
//! Persisted as JSON next to the image's layer. Fields the graph does not
//! interpret are carried through unchanged, including keys this version does
//! not know about.

use chrono::{DateTime, Utc};
use lamina_common::error::Result;
use lamina_common::types::ImageId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One node of the image graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Unique identifier, also the name of the image's storage directory.
    pub id: ImageId,
    /// Image this layer applies on top of; `None` for a root layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ImageId>,
    /// Free-form description.
    #[serde(default)]
    pub comment: String,
    /// Creation time; filled in at registration when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Container this image was committed from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Opaque configuration of that container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_config: Option<Value>,
    /// Auxiliary fields preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Image {
    /// Creates an image with a freshly generated identifier.
    pub fn new(parent: Option<ImageId>, comment: impl Into<String>) -> Self {
        Self::with_id(ImageId::generate(), parent, comment)
    }

    /// Creates an image with a caller-chosen identifier.
    pub fn with_id(id: ImageId, parent: Option<ImageId>, comment: impl Into<String>) -> Self {
        Self {
            id,
            parent,
            comment: comment.into(),
            created: None,
            container: None,
            container_config: None,
            extra: Map::new(),
        }
    }

    /// Returns `true` if this image has no parent.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Encodes the record for storage.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Serialization` if an auxiliary value cannot be encoded.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decodes a stored record.
    ///
    /// # Errors
    ///
    /// Returns `LaminaError::Serialization` if the bytes are not a valid record,
    /// including when `id` or `parent` is not a well-formed identifier.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_image_has_valid_generated_id() {
        let image = Image::new(None, "Testing");
        lamina_common::types::validate_id(image.id.as_str()).expect("valid id");
        assert_eq!(image.comment, "Testing");
        assert!(image.is_root());
        assert!(image.created.is_none());
    }

    #[test]
    fn encode_omits_absent_optionals() {
        let image = Image::new(None, "base");
        let json: Value = serde_json::from_slice(&image.encode().expect("encode")).expect("json");
        let object = json.as_object().expect("object");
        assert!(object.contains_key("id"));
        assert!(!object.contains_key("parent"));
        assert!(!object.contains_key("created"));
        assert!(!object.contains_key("container_config"));
    }

    #[test]
    fn decode_preserves_unknown_fields() {
        let id = ImageId::generate();
        let parent = ImageId::generate();
        let raw = format!(
            r#"{{
                "id": "{id}",
                "parent": "{parent}",
                "comment": "postgres",
                "created": "2013-03-21T10:00:00Z",
                "container": "c0ffee",
                "container_config": {{"Cmd": ["/bin/sh"]}},
                "architecture": "x86_64"
            }}"#
        );

        let image = Image::decode(raw.as_bytes()).expect("decode");
        assert_eq!(image.parent.as_ref(), Some(&parent));
        assert_eq!(image.container.as_deref(), Some("c0ffee"));
        assert_eq!(image.extra.get("architecture"), Some(&Value::from("x86_64")));

        let again = Image::decode(&image.encode().expect("encode")).expect("decode");
        assert_eq!(again, image);
    }

    #[test]
    fn decode_rejects_malformed_parent() {
        let raw = format!(r#"{{"id": "{}", "parent": "Not_foo"}}"#, ImageId::generate());
        assert!(Image::decode(raw.as_bytes()).is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Image::decode(b"not json").is_err());
        assert!(Image::decode(b"{}").is_err());
    }
}
