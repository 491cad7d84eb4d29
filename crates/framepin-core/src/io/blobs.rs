//! On-disk cache of verified archives.
//!
//! Layout: `<root>/<sha256>` - one file per verified checksum.
//!
//! Entries are never trusted: the fetcher re-hashes whatever it reads back
//! and discards entries that no longer match.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use framepin_schema::Sha256Digest;
use tokio::fs;

/// Checksum-addressed store of archive bytes.
#[derive(Debug, Clone)]
pub struct BlobCache {
    root: PathBuf,
}

impl BlobCache {
    /// Cache rooted at `root` (created lazily on first write).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an entry for `checksum` is stored at.
    pub fn path_for(&self, checksum: &Sha256Digest) -> PathBuf {
        self.root.join(checksum.as_str())
    }

    /// Read the entry for `checksum`, if present.
    pub async fn get(&self, checksum: &Sha256Digest) -> Option<Bytes> {
        fs::read(self.path_for(checksum)).await.ok().map(Bytes::from)
    }

    /// Atomically store `data` under `checksum`.
    ///
    /// The bytes go to a uniquely named temporary file in the cache directory
    /// which is then renamed over the entry, so readers never observe a
    /// partial write and concurrent writers never share a temporary file.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the write or
    /// rename fails.
    pub async fn put(&self, checksum: &Sha256Digest, data: Bytes) -> io::Result<()> {
        let root = self.root.clone();
        let path = self.path_for(checksum);
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            let mut temp = tempfile::NamedTempFile::new_in(&root)?;
            temp.write_all(&data)?;
            temp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(io::Error::other)?
    }

    /// Drop the entry for `checksum`. Missing entries are not an error.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than `NotFound`.
    pub async fn remove(&self, checksum: &Sha256Digest) -> io::Result<()> {
        match fs::remove_file(self.path_for(checksum)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
