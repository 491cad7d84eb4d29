use std::path::Path;

use anyhow::Result;
use comfy_table::{Table, presets};
use framepin_core::filename_from_url;

/// Print the declared artifacts and products as tables.
pub async fn list(path: &Path) -> Result<()> {
    let manifest = super::load_manifest(path).await?;

    if manifest.artifacts().is_empty() {
        println!();
        println!("  No artifacts declared in {}.", path.display());
        return Ok(());
    }

    let mut artifacts = Table::new();
    artifacts
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_header(vec!["Artifact", "Archive", "Checksum"]);
    for artifact in manifest.artifacts() {
        artifacts.add_row(vec![
            artifact.name.to_string(),
            filename_from_url(&artifact.url).to_string(),
            artifact.checksum.to_string(),
        ]);
    }
    println!("{artifacts}");

    let mut products = Table::new();
    products
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_header(vec!["Product", "Artifacts", "Depends on"]);
    for product in manifest.products() {
        products.add_row(vec![
            product.name.to_string(),
            join(&product.artifacts),
            join(&product.depends_on),
        ]);
    }
    println!("{products}");

    Ok(())
}

fn join<T: AsRef<str>>(names: &[T]) -> String {
    names.iter().map(<T as AsRef<str>>::as_ref).collect::<Vec<_>>().join(", ")
}
