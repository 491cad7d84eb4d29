//! Verified artifact fetching and product materialization.
//!
//! A [`Fetcher`] owns the artifact cache for one manifest. Each artifact moves
//! through [`ArtifactState`]:
//!
//! ```text
//! NotFetched --ensure()--> Fetching --checksum ok--> Verified
//!                             |     --mismatch----> Failed
//!                             +-----transport err-> NotFetched
//! ```
//!
//! `Verified` and `Failed` are sticky; only [`Fetcher::refetch`] clears a
//! failure. Concurrent `ensure` calls for the same artifact share a single
//! in-flight fetch, which runs in its own task so it still settles the cache
//! when every caller has stopped waiting.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use framepin_schema::{ArtifactName, ProductName, Sha256Digest};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::io::{BlobCache, DefaultTransport, MemoryUnpacker, ModuleContents, Transport, Unpacker};
use crate::manifest::{Artifact, Manifest, ValidationError};
use crate::reporter::{NullReporter, Reporter};

/// Local state of one artifact inside a [`Fetcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Never fetched, or the last attempt failed in a retryable way.
    NotFetched,
    /// A fetch is in flight.
    Fetching,
    /// Bytes matched the checksum and were unpacked.
    Verified,
    /// Bytes did not match the checksum.
    Failed,
}

/// Why an artifact could not be made available.
///
/// `Clone` so one in-flight result can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The source could not be read. Retryable by calling `ensure` again.
    #[error("failed to fetch '{artifact}' from {url}: {message}")]
    Transport {
        /// Artifact being fetched.
        artifact: ArtifactName,
        /// Source URL.
        url: String,
        /// Transport error text.
        message: String,
    },

    /// The fetched bytes do not match the declared checksum. Never retried.
    #[error("checksum mismatch for '{artifact}': expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Artifact being fetched.
        artifact: ArtifactName,
        /// Checksum declared in the manifest.
        expected: Sha256Digest,
        /// Checksum of the bytes received.
        actual: Sha256Digest,
    },

    /// Verified bytes could not be unpacked. Retryable.
    #[error("failed to unpack '{artifact}': {message}")]
    Unpack {
        /// Artifact being unpacked.
        artifact: ArtifactName,
        /// Unpacker error text.
        message: String,
    },

    /// The requested artifact is not the one this fetcher's manifest
    /// declares under that name (unknown name, other URL or checksum).
    #[error("artifact '{artifact}' does not match the manifest declaration")]
    Undeclared {
        /// Requested artifact name.
        artifact: ArtifactName,
    },
}

impl FetchError {
    /// The artifact this error is about.
    pub fn artifact(&self) -> &ArtifactName {
        match self {
            Self::Transport { artifact, .. }
            | Self::IntegrityMismatch { artifact, .. }
            | Self::Unpack { artifact, .. }
            | Self::Undeclared { artifact } => artifact,
        }
    }

    /// Returns `true` if a later `ensure` call may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::IntegrityMismatch { .. } | Self::Undeclared { .. }
        )
    }
}

/// Why a product could not be materialized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterializeError {
    /// The product is not declared.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The first artifact that failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// A verified, unpacked artifact. Cheap to clone; clones share one allocation.
#[derive(Debug, Clone)]
pub struct VerifiedModule(Arc<ModuleInner>);

#[derive(Debug)]
struct ModuleInner {
    name: ArtifactName,
    checksum: Sha256Digest,
    size: u64,
    contents: ModuleContents,
}

impl VerifiedModule {
    fn new(artifact: &Artifact, size: u64, contents: ModuleContents) -> Self {
        Self(Arc::new(ModuleInner {
            name: artifact.name.clone(),
            checksum: artifact.checksum.clone(),
            size,
            contents,
        }))
    }

    /// Name of the artifact this module was built from.
    pub fn name(&self) -> &ArtifactName {
        &self.0.name
    }

    /// The checksum the bytes were verified against.
    pub fn checksum(&self) -> &Sha256Digest {
        &self.0.checksum
    }

    /// Size of the verified archive in bytes.
    pub fn size(&self) -> u64 {
        self.0.size
    }

    /// Where the module's contents live.
    pub fn contents(&self) -> &ModuleContents {
        &self.0.contents
    }

    /// Directory the module was unpacked into, if it lives on disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.0.contents {
            ModuleContents::Directory(path) => Some(path),
            ModuleContents::InMemory(_) => None,
        }
    }

    /// Returns `true` if both handles refer to the same cached module.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A materialized product: its own modules plus everything it depends on,
/// already verified.
#[derive(Debug, Clone)]
pub struct ProductHandle {
    name: ProductName,
    own: Vec<VerifiedModule>,
    dependencies: Vec<ProductName>,
    modules: Vec<VerifiedModule>,
}

impl ProductHandle {
    /// The materialized product.
    pub fn name(&self) -> &ProductName {
        &self.name
    }

    /// Modules of the product's own artifacts, in declaration order.
    pub fn own_modules(&self) -> &[VerifiedModule] {
        &self.own
    }

    /// Transitively required products, dependencies first.
    pub fn dependencies(&self) -> &[ProductName] {
        &self.dependencies
    }

    /// Every module needed by the product, in load order.
    pub fn modules(&self) -> &[VerifiedModule] {
        &self.modules
    }

    /// Look up a module of the product or one of its dependencies.
    pub fn module(&self, name: &str) -> Option<&VerifiedModule> {
        self.modules.iter().find(|m| m.name() == name)
    }
}

type PendingFetch = Shared<BoxFuture<'static, Result<VerifiedModule, FetchError>>>;

enum Slot {
    Fetching(PendingFetch),
    Verified(VerifiedModule),
    Failed(FetchError),
}

struct Inner {
    manifest: Arc<Manifest>,
    transport: Arc<dyn Transport>,
    unpacker: Arc<dyn Unpacker>,
    blobs: Option<BlobCache>,
    reporter: Arc<dyn Reporter>,
    slots: Mutex<HashMap<ArtifactName, Slot>>,
}

/// Fetches, verifies, and caches the artifacts of one manifest.
///
/// Clones share the same cache.
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<Inner>,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("transport", &self.inner.transport)
            .field("unpacker", &self.inner.unpacker)
            .field("blobs", &self.inner.blobs)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Fetcher`].
pub struct FetcherBuilder {
    manifest: Arc<Manifest>,
    transport: Arc<dyn Transport>,
    unpacker: Arc<dyn Unpacker>,
    blobs: Option<BlobCache>,
    reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for FetcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherBuilder").finish_non_exhaustive()
    }
}

impl FetcherBuilder {
    /// Source of artifact bytes.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Step that turns verified bytes into a module.
    pub fn unpacker(mut self, unpacker: Arc<dyn Unpacker>) -> Self {
        self.unpacker = unpacker;
        self
    }

    /// Consult and populate an on-disk cache of verified archives.
    pub fn blob_cache(mut self, blobs: BlobCache) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Receiver of progress events.
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Finish with an empty artifact cache.
    pub fn build(self) -> Fetcher {
        Fetcher {
            inner: Arc::new(Inner {
                manifest: self.manifest,
                transport: self.transport,
                unpacker: self.unpacker,
                blobs: self.blobs,
                reporter: self.reporter,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Fetcher {
    /// Start building a fetcher. Defaults: [`DefaultTransport`],
    /// [`MemoryUnpacker`], no blob cache, [`NullReporter`].
    pub fn builder(manifest: impl Into<Arc<Manifest>>) -> FetcherBuilder {
        FetcherBuilder {
            manifest: manifest.into(),
            transport: Arc::new(DefaultTransport::default()),
            unpacker: Arc::new(MemoryUnpacker),
            blobs: None,
            reporter: Arc::new(NullReporter),
        }
    }

    /// A fetcher with default collaborators.
    pub fn new(manifest: impl Into<Arc<Manifest>>) -> Self {
        Self::builder(manifest).build()
    }

    /// The manifest this fetcher serves.
    pub fn manifest(&self) -> &Manifest {
        &self.inner.manifest
    }

    /// Current local state of an artifact.
    pub async fn state(&self, name: &str) -> ArtifactState {
        match self.inner.slots.lock().await.get(name) {
            None => ArtifactState::NotFetched,
            Some(Slot::Fetching(_)) => ArtifactState::Fetching,
            Some(Slot::Verified(_)) => ArtifactState::Verified,
            Some(Slot::Failed(_)) => ArtifactState::Failed,
        }
    }

    /// Make `artifact` available as a verified module.
    ///
    /// Returns the cached module without any transport access once the
    /// artifact is verified. An artifact whose checksum did not match keeps
    /// failing with the recorded [`FetchError::IntegrityMismatch`] until
    /// [`refetch`](Self::refetch) is called.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Undeclared`] if `artifact` is not exactly as the
    /// manifest declares it, or another [`FetchError`] if the artifact cannot
    /// be fetched, verified, or unpacked.
    pub async fn ensure(&self, artifact: &Artifact) -> Result<VerifiedModule, FetchError> {
        self.check_declared(artifact)?;
        let pending = {
            let mut slots = self.inner.slots.lock().await;
            match slots.get(&artifact.name) {
                Some(Slot::Verified(module)) => {
                    debug!(artifact = %artifact.name, "cache hit");
                    self.inner.reporter.cached(&artifact.name);
                    return Ok(module.clone());
                }
                Some(Slot::Failed(err)) => return Err(err.clone()),
                Some(Slot::Fetching(pending)) => {
                    debug!(artifact = %artifact.name, "joining in-flight fetch");
                    pending.clone()
                }
                None => {
                    let pending = self.spawn_fetch(artifact.clone());
                    slots.insert(artifact.name.clone(), Slot::Fetching(pending.clone()));
                    pending
                }
            }
        };
        pending.await
    }

    /// Forget a recorded failure (or verified module) and fetch again.
    ///
    /// An in-flight fetch is joined rather than restarted.
    ///
    /// # Errors
    ///
    /// Same as [`ensure`](Self::ensure).
    pub async fn refetch(&self, artifact: &Artifact) -> Result<VerifiedModule, FetchError> {
        self.check_declared(artifact)?;
        {
            let mut slots = self.inner.slots.lock().await;
            if !matches!(slots.get(&artifact.name), Some(Slot::Fetching(_))) {
                slots.remove(&artifact.name);
            }
        }
        self.ensure(artifact).await
    }

    /// Fetch and verify every artifact `name` needs, dependencies first.
    ///
    /// Stops at the first failure; no handle is returned unless every
    /// artifact verified.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError::Validation`] for an undeclared product and
    /// [`MaterializeError::Fetch`] for the first artifact that failed.
    pub async fn materialize_product(&self, name: &str) -> Result<ProductHandle, MaterializeError> {
        let manifest = &self.inner.manifest;
        let closure = manifest.product_closure(name)?;
        let artifacts = manifest.resolve_product(name)?;

        let mut modules = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            modules.push(self.ensure(artifact).await?);
        }

        let (product, required) = closure
            .split_last()
            .ok_or_else(|| ValidationError::UnknownProduct(name.to_string()))?;

        let own = product
            .artifacts
            .iter()
            .filter_map(|a| modules.iter().find(|m| m.name() == a).cloned())
            .collect();

        self.inner.reporter.materialized(&product.name, modules.len());
        Ok(ProductHandle {
            name: product.name.clone(),
            own,
            dependencies: required.iter().map(|p| p.name.clone()).collect(),
            modules,
        })
    }

    /// Slots are keyed by name, so only the manifest's own declaration of an
    /// artifact may be fetched through this fetcher.
    fn check_declared(&self, artifact: &Artifact) -> Result<(), FetchError> {
        match self.inner.manifest.artifact(&artifact.name) {
            Some(declared) if declared == artifact => Ok(()),
            _ => {
                warn!(artifact = %artifact.name, checksum = %artifact.checksum, "artifact does not match manifest");
                Err(FetchError::Undeclared {
                    artifact: artifact.name.clone(),
                })
            }
        }
    }

    fn spawn_fetch(&self, artifact: Artifact) -> PendingFetch {
        let name = artifact.name.clone();
        let url = artifact.url.clone();

        let task_inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let result = task_inner.fetch_and_verify(&artifact).await;
            task_inner.settle(&artifact.name, &result).await;
            result
        });

        let inner = Arc::clone(&self.inner);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    inner.slots.lock().await.remove(&name);
                    Err(FetchError::Transport {
                        artifact: name,
                        url,
                        message: format!("fetch task aborted: {join_error}"),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn settle(&self, name: &ArtifactName, result: &Result<VerifiedModule, FetchError>) {
        let mut slots = self.slots.lock().await;
        match result {
            Ok(module) => {
                slots.insert(name.clone(), Slot::Verified(module.clone()));
            }
            Err(err @ FetchError::IntegrityMismatch { .. }) => {
                slots.insert(name.clone(), Slot::Failed(err.clone()));
            }
            Err(_) => {
                slots.remove(name);
            }
        }
    }

    async fn fetch_and_verify(&self, artifact: &Artifact) -> Result<VerifiedModule, FetchError> {
        let bytes = match self.cached_blob(artifact).await {
            Some(bytes) => {
                self.reporter.cached(&artifact.name);
                bytes
            }
            None => self.download(artifact).await?,
        };

        let size = bytes.len() as u64;
        let unpacker = Arc::clone(&self.unpacker);
        let owned = artifact.clone();
        let unpacked = tokio::task::spawn_blocking(move || unpacker.unpack(&owned, bytes))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));

        let contents = match unpacked {
            Ok(contents) => contents,
            Err(message) => {
                warn!(artifact = %artifact.name, %message, "unpack failed");
                self.reporter.failed(&artifact.name, &message);
                return Err(FetchError::Unpack {
                    artifact: artifact.name.clone(),
                    message,
                });
            }
        };

        info!(artifact = %artifact.name, checksum = %artifact.checksum, size, "verified");
        self.reporter.verified(&artifact.name, &artifact.checksum, size);
        Ok(VerifiedModule::new(artifact, size, contents))
    }

    async fn download(&self, artifact: &Artifact) -> Result<Bytes, FetchError> {
        debug!(artifact = %artifact.name, url = %artifact.url, "fetching");
        self.reporter.fetching(&artifact.name, &artifact.url);

        let bytes = match self.transport.fetch(&artifact.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = e.to_string();
                warn!(artifact = %artifact.name, %message, "transport failure");
                self.reporter.failed(&artifact.name, &message);
                return Err(FetchError::Transport {
                    artifact: artifact.name.clone(),
                    url: artifact.url.clone(),
                    message,
                });
            }
        };

        let actual = Sha256Digest::compute(&bytes);
        if actual != artifact.checksum {
            warn!(
                artifact = %artifact.name,
                expected = %artifact.checksum,
                actual = %actual,
                "checksum mismatch"
            );
            self.reporter.failed(&artifact.name, "checksum mismatch");
            return Err(FetchError::IntegrityMismatch {
                artifact: artifact.name.clone(),
                expected: artifact.checksum.clone(),
                actual,
            });
        }

        if let Some(blobs) = &self.blobs {
            if let Err(e) = blobs.put(&artifact.checksum, bytes.clone()).await {
                warn!(artifact = %artifact.name, error = %e, "failed to write blob cache entry");
            }
        }

        Ok(bytes)
    }

    async fn cached_blob(&self, artifact: &Artifact) -> Option<Bytes> {
        let blobs = self.blobs.as_ref()?;
        let bytes = blobs.get(&artifact.checksum).await?;

        if Sha256Digest::compute(&bytes) == artifact.checksum {
            debug!(artifact = %artifact.name, "blob cache hit");
            return Some(bytes);
        }

        warn!(
            artifact = %artifact.name,
            path = %blobs.path_for(&artifact.checksum).display(),
            "discarding corrupt blob cache entry"
        );
        if let Err(e) = blobs.remove(&artifact.checksum).await {
            warn!(error = %e, "failed to remove blob cache entry");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::TransportError;
    use async_trait::async_trait;
    use framepin_schema::{ArtifactDecl, Declaration, EdgeDecl, ProductDecl};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves fixed bodies by URL and records every request.
    #[derive(Debug, Default)]
    struct MockTransport {
        bodies: std::sync::Mutex<HashMap<String, Bytes>>,
        calls: std::sync::Mutex<Vec<String>>,
        failures: AtomicUsize,
        delay: Option<Duration>,
    }

    impl MockTransport {
        fn serve(&self, name: &str, body: &'static [u8]) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url_for(name), Bytes::from_static(body));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_for(&self, name: &str) -> usize {
            let url = url_for(name);
            self.calls().iter().filter(|u| **u == url).count()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn fetch(&self, url: &str) -> Result<Bytes, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TransportError::Status {
                    url: url.to_string(),
                    status: 503,
                });
            }
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| TransportError::Status {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    fn url_for(name: &str) -> String {
        format!("https://mock.test/{name}.xcframework.zip")
    }

    fn artifact(name: &str, body: &[u8]) -> ArtifactDecl {
        ArtifactDecl {
            name: name.into(),
            url: url_for(name),
            checksum: Sha256Digest::compute(body).to_string(),
        }
    }

    /// Realm = {RealmCore}, RealmSwift = {RealmSwiftArtifact} -> Realm
    fn realm_manifest() -> Manifest {
        Manifest::load(Declaration {
            package: None,
            artifacts: vec![
                artifact("RealmCore", b"core"),
                artifact("RealmSwiftArtifact", b"swift"),
            ],
            products: vec![
                ProductDecl {
                    name: "Realm".into(),
                    artifacts: vec!["RealmCore".into()],
                },
                ProductDecl {
                    name: "RealmSwift".into(),
                    artifacts: vec!["RealmSwiftArtifact".into()],
                },
            ],
            dependencies: vec![EdgeDecl {
                product: "RealmSwift".into(),
                depends_on: vec!["Realm".into()],
            }],
        })
        .unwrap()
    }

    fn realm_transport() -> Arc<MockTransport> {
        let transport = MockTransport::default();
        transport.serve("RealmCore", b"core");
        transport.serve("RealmSwiftArtifact", b"swift");
        Arc::new(transport)
    }

    fn fetcher_with(transport: &Arc<MockTransport>) -> Fetcher {
        Fetcher::builder(realm_manifest())
            .transport(transport.clone())
            .build()
    }

    fn core(fetcher: &Fetcher) -> Artifact {
        fetcher.manifest().artifact("RealmCore").unwrap().clone()
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let transport = realm_transport();
        let fetcher = fetcher_with(&transport);
        let artifact = core(&fetcher);

        let first = fetcher.ensure(&artifact).await.unwrap();
        let second = fetcher.ensure(&artifact).await.unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(transport.calls_for("RealmCore"), 1);
        assert_eq!(fetcher.state("RealmCore").await, ArtifactState::Verified);
        assert_eq!(first.contents(), &ModuleContents::InMemory(Bytes::from_static(b"core")));
    }

    #[tokio::test]
    async fn test_integrity_mismatch_is_sticky() {
        let transport = realm_transport();
        transport.serve("RealmCore", b"tampered");
        let fetcher = fetcher_with(&transport);
        let artifact = core(&fetcher);

        let err = fetcher.ensure(&artifact).await.unwrap_err();
        match &err {
            FetchError::IntegrityMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, &Sha256Digest::compute(b"core"));
                assert_eq!(actual, &Sha256Digest::compute(b"tampered"));
            }
            other => panic!("expected integrity mismatch, got {other:?}"),
        }
        assert!(!err.is_retryable());
        assert_eq!(fetcher.state("RealmCore").await, ArtifactState::Failed);

        // Not retried automatically, even once the server is fixed.
        transport.serve("RealmCore", b"core");
        assert_eq!(fetcher.ensure(&artifact).await.unwrap_err(), err);
        assert_eq!(transport.calls_for("RealmCore"), 1);

        fetcher.refetch(&artifact).await.unwrap();
        assert_eq!(fetcher.state("RealmCore").await, ArtifactState::Verified);
        assert_eq!(transport.calls_for("RealmCore"), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_is_retryable() {
        let transport = realm_transport();
        transport.failures.store(1, Ordering::SeqCst);
        let fetcher = fetcher_with(&transport);
        let artifact = core(&fetcher);

        let err = fetcher.ensure(&artifact).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
        assert!(err.is_retryable());
        assert_eq!(fetcher.state("RealmCore").await, ArtifactState::NotFetched);

        fetcher.ensure(&artifact).await.unwrap();
        assert_eq!(transport.calls_for("RealmCore"), 2);
    }

    #[tokio::test]
    async fn test_materialize_realm_swift_wires_realm() {
        let transport = realm_transport();
        let fetcher = fetcher_with(&transport);

        let handle = fetcher.materialize_product("RealmSwift").await.unwrap();

        assert_eq!(
            transport.calls(),
            vec![url_for("RealmCore"), url_for("RealmSwiftArtifact")]
        );
        assert_eq!(handle.name(), "RealmSwift");
        assert_eq!(handle.dependencies(), &[ProductName::new("Realm")]);
        assert_eq!(handle.own_modules().len(), 1);
        assert_eq!(handle.own_modules()[0].name(), "RealmSwiftArtifact");
        assert!(handle.module("RealmCore").is_some());
        assert!(handle.module("RealmSwiftArtifact").is_some());

        // Importing Realm afterwards needs no further fetch.
        let realm = fetcher.materialize_product("Realm").await.unwrap();
        assert!(realm.modules()[0].ptr_eq(handle.module("RealmCore").unwrap()));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_materialize_fails_fast_on_mismatch() {
        let transport = realm_transport();
        transport.serve("RealmCore", b"tampered");
        let fetcher = fetcher_with(&transport);

        let err = fetcher.materialize_product("RealmSwift").await.unwrap_err();
        assert!(matches!(
            err,
            MaterializeError::Fetch(FetchError::IntegrityMismatch { .. })
        ));
        assert_eq!(transport.calls_for("RealmSwiftArtifact"), 0);
        assert_ne!(fetcher.state("RealmCore").await, ArtifactState::Verified);
        assert_eq!(
            fetcher.state("RealmSwiftArtifact").await,
            ArtifactState::NotFetched
        );
    }

    #[tokio::test]
    async fn test_materialize_unknown_product() {
        let fetcher = fetcher_with(&realm_transport());
        let err = fetcher.materialize_product("Nope").await.unwrap_err();
        assert!(matches!(
            err,
            MaterializeError::Validation(ValidationError::UnknownProduct(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_materialize_fetches_shared_artifact_once() {
        let transport = Arc::new(MockTransport {
            delay: Some(Duration::from_millis(50)),
            ..MockTransport::default()
        });
        transport.serve("RealmCore", b"core");
        transport.serve("RealmSwiftArtifact", b"swift");
        let fetcher = fetcher_with(&transport);

        let (swift, realm) = tokio::join!(
            fetcher.materialize_product("RealmSwift"),
            fetcher.materialize_product("Realm"),
        );

        let swift = swift.unwrap();
        let realm = realm.unwrap();
        assert_eq!(transport.calls_for("RealmCore"), 1);
        assert!(swift.module("RealmCore").unwrap().ptr_eq(&realm.modules()[0]));
    }

    #[tokio::test]
    async fn test_abandoned_fetch_still_populates_cache() {
        let transport = Arc::new(MockTransport {
            delay: Some(Duration::from_millis(50)),
            ..MockTransport::default()
        });
        transport.serve("RealmCore", b"core");
        let fetcher = fetcher_with(&transport);
        let artifact = core(&fetcher);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), fetcher.ensure(&artifact)).await;
        assert!(abandoned.is_err());
        assert_eq!(fetcher.state("RealmCore").await, ArtifactState::Fetching);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fetcher.state("RealmCore").await, ArtifactState::Verified);

        fetcher.ensure(&artifact).await.unwrap();
        assert_eq!(transport.calls_for("RealmCore"), 1);
    }

    #[tokio::test]
    async fn test_blob_cache_serves_later_fetchers() {
        let dir = tempfile::tempdir().unwrap();
        let transport = realm_transport();

        let first = Fetcher::builder(realm_manifest())
            .transport(transport.clone())
            .blob_cache(BlobCache::new(dir.path()))
            .build();
        first.materialize_product("Realm").await.unwrap();
        assert_eq!(transport.calls().len(), 1);

        let offline = Arc::new(MockTransport::default());
        let second = Fetcher::builder(realm_manifest())
            .transport(offline.clone())
            .blob_cache(BlobCache::new(dir.path()))
            .build();
        second.materialize_product("Realm").await.unwrap();
        assert!(offline.calls().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_blob_cache_entry_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobCache::new(dir.path());
        blobs
            .put(&Sha256Digest::compute(b"core"), Bytes::from_static(b"bit-rot"))
            .await
            .unwrap();

        let transport = realm_transport();
        let fetcher = Fetcher::builder(realm_manifest())
            .transport(transport.clone())
            .blob_cache(blobs.clone())
            .build();

        fetcher.materialize_product("Realm").await.unwrap();
        assert_eq!(transport.calls_for("RealmCore"), 1);
        assert_eq!(
            blobs.get(&Sha256Digest::compute(b"core")).await.unwrap(),
            Bytes::from_static(b"core")
        );
    }

    #[tokio::test]
    async fn test_ensure_rejects_artifact_not_matching_manifest() {
        let transport = realm_transport();
        let fetcher = fetcher_with(&transport);
        let declared = core(&fetcher);
        let module = fetcher.ensure(&declared).await.unwrap();

        let repinned = Artifact {
            checksum: Sha256Digest::compute(b"core v2"),
            ..declared.clone()
        };
        let err = fetcher.ensure(&repinned).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Undeclared {
                artifact: "RealmCore".into()
            }
        );
        assert!(!err.is_retryable());
        assert!(fetcher.refetch(&repinned).await.is_err());

        let moved = Artifact {
            url: "https://mirror.test/RealmCore.zip".to_string(),
            ..declared.clone()
        };
        assert!(fetcher.ensure(&moved).await.is_err());

        let stranger = Artifact {
            name: "Kingfisher".into(),
            ..declared.clone()
        };
        assert!(fetcher.ensure(&stranger).await.is_err());

        // The declared artifact is untouched.
        assert!(fetcher.ensure(&declared).await.unwrap().ptr_eq(&module));
        assert_eq!(transport.calls_for("RealmCore"), 1);
    }

    #[cfg(feature = "network")]
    #[tokio::test]
    async fn test_short_http_body_leaves_artifact_retryable() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 4096\r\nconnection: close\r\n\r\ncore")
                .await
                .unwrap();
            let _ = socket.shutdown().await;
        });

        let manifest = Manifest::load(Declaration {
            package: None,
            artifacts: vec![ArtifactDecl {
                name: "RealmCore".into(),
                url: format!("http://{addr}/Realm.xcframework.zip"),
                checksum: Sha256Digest::compute(b"core").to_string(),
            }],
            products: vec![ProductDecl {
                name: "Realm".into(),
                artifacts: vec!["RealmCore".into()],
            }],
            dependencies: Vec::new(),
        })
        .unwrap();
        let fetcher = Fetcher::builder(manifest)
            .transport(Arc::new(crate::io::HttpTransport::default()))
            .build();

        let err = fetcher.materialize_product("Realm").await.unwrap_err();
        assert!(matches!(
            err,
            MaterializeError::Fetch(FetchError::Transport { .. })
        ));
        assert_eq!(fetcher.state("RealmCore").await, ArtifactState::NotFetched);
    }

    #[derive(Debug)]
    struct CountingUnpacker(AtomicUsize);

    impl Unpacker for CountingUnpacker {
        fn unpack(
            &self,
            artifact: &Artifact,
            _: Bytes,
        ) -> Result<ModuleContents, crate::io::UnpackError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ModuleContents::Directory(
                Path::new("/modules").join(artifact.name.as_str()),
            ))
        }
    }

    #[tokio::test]
    async fn test_custom_unpacker_runs_once_per_artifact() {
        let unpacker = Arc::new(CountingUnpacker(AtomicUsize::new(0)));
        let fetcher = Fetcher::builder(realm_manifest())
            .transport(realm_transport())
            .unpacker(unpacker.clone())
            .build();

        let handle = fetcher.materialize_product("RealmSwift").await.unwrap();
        fetcher.materialize_product("RealmSwift").await.unwrap();

        assert_eq!(unpacker.0.load(Ordering::SeqCst), 2);
        assert_eq!(
            handle.module("RealmCore").unwrap().path(),
            Some(Path::new("/modules/RealmCore"))
        );
    }
}
