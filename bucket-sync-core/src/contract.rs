//! # contract: capability interfaces the reconciliation engine talks to
//!
//! The engine never owns remote or stored state. It observes and mutates it
//! through the traits below, which concrete adapters (HTTP listing, local
//! filesystem store, ...) implement.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, so consumers can count calls
//!   and script failures in tests (enabled by the default
//!   `test-export-mocks` feature).
//!
//! ## Streams
//! - Payloads travel as [`ByteStream`]: chunked, `Send`, and never required
//!   to be buffered whole.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::{DocumentError, SourceError, StoreError};

/// A chunked payload. Errors surface as I/O errors so adapters can bridge
/// to and from `tokio::io` readers.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Wraps an in-memory payload as a single-chunk [`ByteStream`].
pub fn once_stream(content: impl Into<Bytes>) -> ByteStream {
    let chunk: std::io::Result<Bytes> = Ok(content.into());
    Box::pin(futures::stream::once(futures::future::ready(chunk)))
}

/// One entry of the upstream listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    /// Name, unique within one listing; directly comparable to stored names.
    pub name: String,
    /// Opaque fetch reference (typically a URL).
    pub locator: String,
}

impl RemoteItem {
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
        }
    }
}

/// The upstream side of a reconciliation.
///
/// Implementations must exclude navigation entries (parent or self links)
/// from `list`; the engine treats every returned item as a real file.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteListingSource: Send + Sync {
    /// Produce the current set of items available upstream.
    async fn list(&self) -> Result<Vec<RemoteItem>, SourceError>;

    /// Open a chunked stream over the content behind `locator`.
    async fn fetch(&self, locator: &str) -> Result<ByteStream, SourceError>;
}

/// The destination side of a reconciliation.
///
/// Keys are full object keys (`prefix + name`). `list_by_prefix` hides any
/// pagination and strips the prefix from the returned names.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Map of name (prefix stripped) to content digest.
    async fn list_by_prefix(&self, prefix: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn get(&self, key: &str) -> Result<ByteStream, StoreError>;

    async fn put(&self, key: &str, content: ByteStream) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Raw answer of a document endpoint.
#[derive(Debug, Clone)]
pub struct DocumentResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Read-only transport used by the document sync. Retry policy lives above it.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentTransport: Send + Sync {
    /// Issue a single GET against `endpoint`.
    async fn get(&self, endpoint: &str) -> Result<DocumentResponse, DocumentError>;
}
