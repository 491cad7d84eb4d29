//! The human-authored declaration a manifest is built from.
//!
//! In TOML form (`framepin.toml`):
//!
//! ```toml
//! [package]
//! name = "ios-frameworks"
//! platforms = [{ name = "ios", version = "14" }]
//!
//! [[artifact]]
//! name = "Realm"
//! url = "https://example.com/Realm.xcframework.zip"
//! checksum = "28900311f75395dcd07187b615a3d63d56961f61ce7a81a52ebfd903d23e63bc"
//!
//! [[product]]
//! name = "Realm"
//! artifacts = ["Realm"]
//!
//! [[dependency]]
//! product = "RealmSwift"
//! depends_on = ["Realm"]
//! ```
//!
//! Nothing here is validated. Checksums stay raw strings so that a bad
//! value surfaces as a manifest validation error naming the artifact.

use serde::{Deserialize, Serialize};

use crate::types::{ArtifactName, ProductName};

/// Top-level declaration: everything a manifest is constructed from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Declaration {
    /// Optional `[package]` metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageDecl>,

    /// Binary artifacts, in declaration order.
    #[serde(default, rename = "artifact", alias = "artifacts")]
    pub artifacts: Vec<ArtifactDecl>,

    /// Products, in declaration order.
    #[serde(default, rename = "product", alias = "products")]
    pub products: Vec<ProductDecl>,

    /// Dependency edges between products.
    #[serde(default, rename = "dependency", alias = "dependencies")]
    pub dependencies: Vec<EdgeDecl>,
}

/// The `[package]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageDecl {
    /// Human-readable manifest name.
    pub name: String,

    /// Minimum platform versions. Informational only; never used to pick artifacts.
    #[serde(default)]
    pub platforms: Vec<Platform>,
}

/// A minimum supported platform version (e.g. `ios` `14`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platform {
    /// Platform identifier such as `ios` or `macos`.
    pub name: String,
    /// Minimum version string.
    pub version: String,
}

/// One `[[artifact]]` record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactDecl {
    /// Unique artifact name.
    pub name: ArtifactName,
    /// Remote source of the archive.
    pub url: String,
    /// Expected SHA256 of the archive bytes, hex encoded.
    pub checksum: String,
}

/// One `[[product]]` record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductDecl {
    /// Unique product name.
    pub name: ProductName,
    /// Constituent artifacts, in the order they should load.
    #[serde(default)]
    pub artifacts: Vec<ArtifactName>,
}

/// One `[[dependency]]` record: `product` requires every product in `depends_on`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EdgeDecl {
    /// The consuming product.
    pub product: ProductName,
    /// Required products, in declaration order.
    #[serde(default)]
    pub depends_on: Vec<ProductName>,
}
