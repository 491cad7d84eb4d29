use std::path::Path;

use anyhow::Result;

/// Validate the manifest and summarize what it declares.
pub async fn check(path: &Path) -> Result<()> {
    let manifest = super::load_manifest(path).await?;

    let name = manifest
        .package()
        .map_or_else(|| path.display().to_string(), |p| p.name.clone());
    println!(
        "{name}: ok ({} artifacts, {} products)",
        manifest.artifacts().len(),
        manifest.products().len()
    );
    Ok(())
}
