//! # lamina-core
//!
//! Low-level Linux filesystem primitives for the Lamina image graph.
//!
//! This crate provides safe wrappers over:
//! - **`OverlayFS`**: stacking read-only layers under one writable layer.
//! - **Mount table queries**: detecting whether a directory is a mountpoint.
//!
//! It knows nothing about images or graphs; the mount assembler in
//! `lamina-image` drives it.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod filesystem;
