//! Incremental content digests.
//!
//! Digests are SHA-256 rendered as lowercase hex. Feeding the same bytes in
//! any chunking yields the same digest.

use futures::StreamExt;
use sha2::{Digest, Sha256};

use crate::contract::ByteStream;

#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn digest(self) -> String {
        format!("{:x}", self.inner.finalize())
    }
}

pub fn digest_bytes(content: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(content);
    hasher.digest()
}

/// Drains `stream` chunk by chunk into a digest. The payload is never held whole.
pub async fn digest_stream(mut stream: ByteStream) -> std::io::Result<String> {
    let mut hasher = ContentHasher::new();
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk?);
    }
    Ok(hasher.digest())
}
