//! Shared types and wire format for framepin manifests.
//!
//! A manifest declares binary artifacts pinned by URL and SHA-256 checksum,
//! the products that expose them, and the dependency edges between products.
//! This crate only describes the data; validation and resolution live in
//! `framepin-core`.

pub mod declaration;
pub mod hash;
pub mod types;

// Re-exports
pub use declaration::{ArtifactDecl, Declaration, EdgeDecl, PackageDecl, Platform, ProductDecl};
pub use hash::*;
pub use types::*;

/// Default manifest file name looked up in the working directory.
pub const MANIFEST_FILE: &str = "framepin.toml";
