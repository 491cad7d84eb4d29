use std::path::PathBuf;

use anyhow::{Context, Result};
use framepin_schema::Sha256Digest;

/// Print `<sha256>  <file>` for each file, like `shasum -a 256`.
pub fn checksum(files: &[PathBuf]) -> Result<()> {
    for file in files {
        let digest = Sha256Digest::compute_file(file)
            .with_context(|| format!("Failed to hash {}", file.display()))?;
        println!("{digest}  {}", file.display());
    }
    Ok(())
}
