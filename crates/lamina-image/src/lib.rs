//! # lamina-image
//!
//! Content-addressed image graph for the Lamina workspace.
//!
//! Handles:
//! - **Images**: the persisted metadata record of one graph node.
//! - **Layers**: applying archives to, and producing archives from, layer directories.
//! - **Storage**: the deterministic on-disk layout under a graph root.
//! - **Graph**: the catalog with atomic register/delete and tolerant enumeration.
//! - **Mount**: composing an image's ancestor chain into a root filesystem.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod graph;
pub mod image;
pub mod layer;
pub mod mount;
pub mod storage;

pub use graph::Graph;
pub use image::Image;
pub use mount::{MountAssembler, MountDriver, OverlayDriver};
