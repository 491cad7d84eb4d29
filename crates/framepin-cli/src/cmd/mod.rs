//! Subcommand implementations.

pub mod check;
pub mod checksum;
pub mod fetch;
pub mod list;
pub mod resolve;

use std::path::Path;

use anyhow::{Context, Result};
use framepin_core::Manifest;
use framepin_core::manifest::read_declaration;

/// Read and validate the manifest at `path`.
pub async fn load_manifest(path: &Path) -> Result<Manifest> {
    let declaration = read_declaration(path)
        .await
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let manifest = Manifest::load(declaration)
        .with_context(|| format!("Invalid manifest {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        artifacts = manifest.artifacts().len(),
        products = manifest.products().len(),
        "loaded manifest"
    );
    Ok(manifest)
}
