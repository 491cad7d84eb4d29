//! Reporter trait for dependency injection
//!
//! This trait allows the fetcher to report progress and status without
//! being coupled to a specific terminal implementation.

use framepin_schema::{ArtifactName, ProductName, Sha256Digest};

/// Receives status events from the fetcher.
pub trait Reporter: Send + Sync {
    /// A transport fetch for the artifact has started.
    fn fetching(&self, name: &ArtifactName, url: &str);

    /// The artifact was served from the in-process cache or the blob cache.
    fn cached(&self, name: &ArtifactName);

    /// The artifact's bytes matched the declared checksum and were unpacked.
    fn verified(&self, name: &ArtifactName, checksum: &Sha256Digest, size: u64);

    /// The artifact could not be made available.
    fn failed(&self, name: &ArtifactName, reason: &str);

    /// Every artifact of the product (and its dependencies) is verified.
    fn materialized(&self, product: &ProductName, modules: usize);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn fetching(&self, name: &ArtifactName, url: &str) {
        (**self).fetching(name, url);
    }
    fn cached(&self, name: &ArtifactName) {
        (**self).cached(name);
    }
    fn verified(&self, name: &ArtifactName, checksum: &Sha256Digest, size: u64) {
        (**self).verified(name, checksum, size);
    }
    fn failed(&self, name: &ArtifactName, reason: &str) {
        (**self).failed(name, reason);
    }
    fn materialized(&self, product: &ProductName, modules: usize) {
        (**self).materialized(product, modules);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn fetching(&self, _: &ArtifactName, _: &str) {}
    fn cached(&self, _: &ArtifactName) {}
    fn verified(&self, _: &ArtifactName, _: &Sha256Digest, _: u64) {}
    fn failed(&self, _: &ArtifactName, _: &str) {}
    fn materialized(&self, _: &ProductName, _: usize) {}
}
