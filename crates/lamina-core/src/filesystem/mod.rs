//! Filesystem management for root filesystem assembly.
//!
//! Provides `OverlayFS` composition, mount table utilities, and atomic
//! directory swaps.

pub mod mount;
pub mod overlayfs;
pub mod rename;
