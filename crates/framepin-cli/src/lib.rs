//! framepin - checksum-pinned binary framework resolver
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Reads a `framepin.toml` manifest declaring prebuilt binary artifacts, the
//! products that group them, and the dependency edges between products.
//! Every artifact is pinned by a SHA-256 checksum and is never made
//! available unless the fetched bytes match it.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.framepin/
//! ├── store/      # Unpacked modules by artifact/checksum
//! └── cache/      # Verified archives (by checksum)
//! ```

pub mod cmd;
pub mod reporter;

pub use framepin_core::paths::*;
pub use framepin_schema::MANIFEST_FILE;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "framepin")]
#[command(author, version, about = "framepin - checksum-pinned binary framework resolver")]
pub struct Cli {
    /// Path to the manifest
    #[arg(
        long,
        short = 'm',
        global = true,
        env = "FRAMEPIN_MANIFEST",
        default_value = MANIFEST_FILE
    )]
    pub manifest: PathBuf,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate the manifest
    Check,
    /// Print the artifacts a product needs, in load order
    Resolve {
        /// Product name
        product: String,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Fetch and verify everything the given products need
    Fetch {
        /// Product name(s)
        #[arg(required = true)]
        products: Vec<String>,
        /// Extract zip archives into the store
        #[arg(long)]
        unpack: bool,
        /// Store directory for unpacked modules (default: ~/.framepin/store)
        #[arg(long, env = "FRAMEPIN_STORE")]
        store: Option<PathBuf>,
        /// Blob cache directory (default: ~/.framepin/cache)
        #[arg(long, env = "FRAMEPIN_CACHE", conflicts_with = "no_cache")]
        cache: Option<PathBuf>,
        /// Do not read or write the blob cache
        #[arg(long)]
        no_cache: bool,
    },
    /// List declared artifacts and products
    List,
    /// Compute the SHA-256 checksum of local archives (for manifest authoring)
    Checksum {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}
