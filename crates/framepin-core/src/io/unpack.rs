//! Turning verified archive bytes into a usable module.
//!
//! Unpackers only ever see bytes whose checksum already matched the
//! manifest. They run on a blocking thread.

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::manifest::Artifact;

/// Errors turning verified bytes into a module.
#[derive(Error, Debug)]
pub enum UnpackError {
    /// Filesystem failure while extracting.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The bytes are not a readable zip archive.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// An entry would be written outside the destination directory.
    #[error("archive entry escapes the destination: {0}")]
    UnsafeEntry(String),
}

/// Where a verified module's contents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleContents {
    /// The verified archive bytes, kept as-is.
    InMemory(Bytes),
    /// The archive was extracted into this directory.
    Directory(PathBuf),
}

/// Platform-specific step that makes verified bytes loadable.
pub trait Unpacker: Send + Sync + fmt::Debug {
    /// Unpack `bytes`, the verified contents of `artifact`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be turned into a module.
    fn unpack(&self, artifact: &Artifact, bytes: Bytes) -> Result<ModuleContents, UnpackError>;
}

/// Keeps verified bytes in memory without touching the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryUnpacker;

impl Unpacker for MemoryUnpacker {
    fn unpack(&self, _: &Artifact, bytes: Bytes) -> Result<ModuleContents, UnpackError> {
        Ok(ModuleContents::InMemory(bytes))
    }
}

/// Extracts zip archives (e.g. `.xcframework.zip`) into
/// `<root>/<artifact>/<checksum>/`.
///
/// A destination that already exists is reused, since its path is keyed
/// by the checksum that was just verified.
#[derive(Debug, Clone)]
pub struct ZipUnpacker {
    root: PathBuf,
}

impl ZipUnpacker {
    /// Extract under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the given artifact unpacks into.
    pub fn destination(&self, artifact: &Artifact) -> PathBuf {
        self.root
            .join(artifact.name.as_str())
            .join(artifact.checksum.as_str())
    }
}

impl Unpacker for ZipUnpacker {
    fn unpack(&self, artifact: &Artifact, bytes: Bytes) -> Result<ModuleContents, UnpackError> {
        let dest = self.destination(artifact);
        if dest.is_dir() {
            debug!(artifact = %artifact.name, path = %dest.display(), "reusing unpacked module");
            return Ok(ModuleContents::Directory(dest));
        }

        let parent = dest.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent)?;

        // Extract next to the destination, then rename, so a crash never
        // leaves a half-written directory under the final path.
        let staging = tempfile::TempDir::new_in(parent)?;
        extract_zip(&bytes, staging.path())?;
        if install_staged(staging.path(), &dest)? {
            debug!(artifact = %artifact.name, path = %dest.display(), "unpacked module");
        } else {
            debug!(artifact = %artifact.name, path = %dest.display(), "module unpacked concurrently, reusing");
        }
        Ok(ModuleContents::Directory(dest))
    }
}

/// Move `staging` to `dest`. Returns `false` if another writer already
/// installed `dest`, which is then kept as-is.
fn install_staged(staging: &Path, dest: &Path) -> std::io::Result<bool> {
    match std::fs::rename(staging, dest) {
        Ok(()) => Ok(true),
        Err(_) if dest.is_dir() => Ok(false),
        Err(e) => Err(e),
    }
}

fn extract_zip(bytes: &Bytes, dest: &Path) -> Result<(), UnpackError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.as_ref()))?;

    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.enclosed_name().is_none() {
            return Err(UnpackError::UnsafeEntry(entry.name().to_string()));
        }
    }

    archive.extract(dest)?;
    Ok(())
}
