//! Byte transport for artifact sources.
//!
//! The fetcher only sees the [`Transport`] capability; retries and backoff
//! are left to callers.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(feature = "network")]
use futures::StreamExt;
use thiserror::Error;

/// Upper bound on the buffer reserved up front from a `Content-Length` header.
#[cfg(feature = "network")]
const MAX_PREALLOCATION: usize = 8 * 1024 * 1024;

/// Errors raised while reading a source.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The HTTP client failed (connection, TLS, or an interrupted body).
    #[cfg(feature = "network")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The body length disagrees with the announced `Content-Length`.
    #[error("truncated transfer from {url}: expected {expected} bytes, got {received}")]
    Truncated {
        /// Requested URL.
        url: String,
        /// Announced length.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },

    /// A local `file://` source could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// Local path derived from the URL.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The URL scheme has no transport.
    #[error("unsupported source scheme: {0}")]
    UnsupportedScheme(String),
}

/// Supplies the raw bytes behind a source URL.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Fetch the full contents of `url`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the source cannot be read in full.
    async fn fetch(&self, url: &str) -> Result<Bytes, TransportError>;
}

/// Reads `file://` sources from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

#[async_trait]
impl Transport for FileTransport {
    async fn fetch(&self, url: &str) -> Result<Bytes, TransportError> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| TransportError::UnsupportedScheme(url.to_string()))?;
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| TransportError::Io {
                path: PathBuf::from(path),
                source,
            })?;
        Ok(Bytes::from(data))
    }
}

/// Downloads `http(s)://` sources with reqwest.
#[cfg(feature = "network")]
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(feature = "network")]
impl HttpTransport {
    /// Wrap an existing client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "network")]
#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<Bytes, TransportError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Content-Length is only a hint; the body is checked against it below.
        let expected = response.content_length();
        let capacity = expected.map_or(0, |len| {
            usize::try_from(len).map_or(MAX_PREALLOCATION, |len| len.min(MAX_PREALLOCATION))
        });
        let mut body = Vec::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
            if let Some(expected) = expected {
                let received = body.len() as u64;
                if received > expected {
                    return Err(TransportError::Truncated {
                        url: url.to_string(),
                        expected,
                        received,
                    });
                }
            }
        }

        if let Some(expected) = expected {
            let received = body.len() as u64;
            if received != expected {
                return Err(TransportError::Truncated {
                    url: url.to_string(),
                    expected,
                    received,
                });
            }
        }

        Ok(Bytes::from(body))
    }
}

/// Dispatches on the URL scheme: `file://` locally, `http(s)://` over the network.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransport {
    file: FileTransport,
    #[cfg(feature = "network")]
    http: HttpTransport,
}

impl DefaultTransport {
    /// Use `client` for HTTP sources.
    #[cfg(feature = "network")]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            file: FileTransport,
            http: HttpTransport::new(client),
        }
    }
}

#[async_trait]
impl Transport for DefaultTransport {
    async fn fetch(&self, url: &str) -> Result<Bytes, TransportError> {
        if url.starts_with("file://") {
            return self.file.fetch(url).await;
        }
        #[cfg(feature = "network")]
        if url.starts_with("https://") || url.starts_with("http://") {
            return self.http.fetch(url).await;
        }
        Err(TransportError::UnsupportedScheme(url.to_string()))
    }
}
