//! Typed failures for the listing source, the content store and a sync run.
//!
//! Only [`SyncError`] aborts a run. Everything else is recorded per item and
//! the run continues.

use thiserror::Error;

/// Failures raised by a [`crate::contract::RemoteListingSource`].
#[derive(Debug, Error)]
pub enum SourceError {
    /// The listing endpoint could not be reached or answered with a non-success status.
    #[error("listing source unavailable: {0}")]
    Unavailable(String),

    /// A single item could not be fetched.
    #[error("fetch of {locator} failed: {reason}")]
    FetchFailed { locator: String, reason: String },
}

/// Failures raised by a [`crate::contract::ContentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content store unavailable: {0}")]
    Unavailable(String),

    #[error("no object stored under {0}")]
    NotFound(String),

    #[error("invalid key {0:?}")]
    InvalidKey(String),

    /// The body stream failed while the object was being written.
    #[error("body stream for {key} interrupted: {reason}")]
    Interrupted { key: String, reason: String },
}

/// Run-level failures. Both happen before any mutation is attempted.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote listing failed: {0}")]
    Listing(#[source] SourceError),

    #[error("store listing failed: {0}")]
    StoreListing(#[source] StoreError),
}

/// Failures while fetching a single document. Never surfaced past
/// [`crate::documents::DocumentFetcher`], which turns them into `None`.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("body is not valid JSON: {0}")]
    InvalidJson(String),
}
