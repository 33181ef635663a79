//! Core library for the cordon CLI
//!
//! This crate contains the shared logic for project configuration, image
//! building with content-addressed caching, container engine integration,
//! workspace strategies, interactive terminal handling, the multiplexed
//! socket bridge, container lifecycle, and the background update check.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod env;
pub mod errors;
pub mod fingerprint;
pub mod image;
pub mod lifecycle;
pub mod naming;
pub mod pty;
pub mod recipe;
pub mod update;
pub mod variable;
pub mod workspace;

// Re-export IndexMap for use by dependent crates (preserves insertion order for ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
