use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

/// Print the artifacts `product` needs, dependencies first. No network access.
pub async fn resolve(path: &Path, product: &str, as_json: bool) -> Result<()> {
    let manifest = super::load_manifest(path).await?;
    let artifacts = manifest
        .resolve_product(product)
        .with_context(|| format!("Cannot resolve '{product}'"))?;

    if as_json {
        let entries: Vec<_> = artifacts
            .iter()
            .map(|a| {
                json!({
                    "name": a.name.as_str(),
                    "url": a.url,
                    "checksum": a.checksum.as_str(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for artifact in artifacts {
        println!("{}  {}", artifact.name, artifact.url);
    }
    Ok(())
}
