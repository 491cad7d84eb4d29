//! IO modules - side effects (network, filesystem)

pub mod blobs;
pub mod transport;
pub mod unpack;

pub use blobs::BlobCache;
pub use transport::{DefaultTransport, FileTransport, Transport, TransportError};
#[cfg(feature = "network")]
pub use transport::HttpTransport;
pub use unpack::{MemoryUnpacker, ModuleContents, UnpackError, Unpacker, ZipUnpacker};
