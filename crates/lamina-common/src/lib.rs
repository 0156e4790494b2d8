//! # lamina-common
//!
//! Shared identifiers, error definitions, configuration models, and constants
//! used across the Lamina workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and provides the primitives the layer store, graph index,
//! and mount assembler are built on.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
