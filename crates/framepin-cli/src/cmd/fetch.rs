use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use framepin_core::io::{BlobCache, ZipUnpacker};
use framepin_core::{Fetcher, ProductHandle, cache_dir, store_dir, try_framepin_home};

use crate::reporter::{TerminalReporter, format_size};

/// Flags for `framepin fetch`.
#[derive(Debug, Default)]
pub struct FetchOptions {
    pub unpack: bool,
    pub store: Option<PathBuf>,
    pub cache: Option<PathBuf>,
    pub no_cache: bool,
    pub quiet: bool,
}

/// Materialize every product concurrently through one shared fetcher.
///
/// Artifacts needed by several products are fetched once.
pub async fn fetch(path: &Path, products: &[String], options: FetchOptions) -> Result<()> {
    let manifest = super::load_manifest(path).await?;
    let home = try_framepin_home();

    let mut builder =
        Fetcher::builder(manifest).reporter(Arc::new(TerminalReporter::new(options.quiet)));

    if options.unpack {
        let store = options
            .store
            .or_else(|| home.as_deref().map(store_dir))
            .context("Could not determine store directory; pass --store or set FRAMEPIN_HOME")?;
        builder = builder.unpacker(Arc::new(ZipUnpacker::new(store)));
    }

    if !options.no_cache {
        if let Some(cache) = options.cache.or_else(|| home.as_deref().map(cache_dir)) {
            builder = builder.blob_cache(BlobCache::new(cache));
        }
    }

    let fetcher = builder.build();
    let results =
        futures::future::join_all(products.iter().map(|p| fetcher.materialize_product(p))).await;

    let mut failed = 0usize;
    for (name, result) in products.iter().zip(results) {
        match result {
            Ok(handle) => print_handle(&handle),
            Err(e) => {
                eprintln!("error: {name}: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} product(s) could not be materialized", products.len());
    }
    Ok(())
}

fn print_handle(handle: &ProductHandle) {
    println!("{}", handle.name());
    for module in handle.modules() {
        let location = module
            .path()
            .map_or_else(|| format_size(module.size()), |p| p.display().to_string());
        println!("  {}  {location}", module.name());
    }
}
