//! Core library for framepin.
//!
//! - [`manifest`]: validates a [`Declaration`](framepin_schema::Declaration)
//!   into an immutable artifact/product graph and resolves load order.
//! - [`fetcher`]: fetches, verifies, and caches artifacts, and materializes
//!   products into handles.
//! - [`io`]: the collaborators the fetcher delegates to (transport,
//!   unpacking, on-disk blob cache).

pub mod fetcher;
pub mod io;
pub mod manifest;
pub mod paths;
pub mod reporter;

pub use fetcher::{
    ArtifactState, FetchError, Fetcher, FetcherBuilder, MaterializeError, ProductHandle,
    VerifiedModule,
};
pub use manifest::{Artifact, Manifest, Product, ValidationError};
pub use paths::*;
pub use reporter::{NullReporter, Reporter};

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("framepin/", env!("CARGO_PKG_VERSION"));
