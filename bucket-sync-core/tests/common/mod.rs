#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use bucket_sync_core::contract::{once_stream, ByteStream, ContentStore, RemoteItem, RemoteListingSource};
use bucket_sync_core::error::{SourceError, StoreError};
use bucket_sync_core::hasher::digest_bytes;

/// Listing source backed by a fixed table of locator -> content.
#[derive(Default)]
pub struct StaticSource {
    pub items: Vec<RemoteItem>,
    pub contents: HashMap<String, Vec<u8>>,
    pub failing: HashSet<String>,
    pub fetches: AtomicUsize,
}

impl StaticSource {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let mut source = StaticSource::default();
        for (name, content) in files {
            source.add(name, content);
        }
        source
    }

    pub fn add(&mut self, name: &str, content: &str) {
        let locator = format!("https://example.test/pub/{name}");
        self.items.push(RemoteItem::new(name, locator.clone()));
        self.contents.insert(locator, content.as_bytes().to_vec());
    }

    pub fn fail(&mut self, name: &str) {
        self.failing.insert(format!("https://example.test/pub/{name}"));
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteListingSource for StaticSource {
    async fn list(&self) -> Result<Vec<RemoteItem>, SourceError> {
        Ok(self.items.clone())
    }

    async fn fetch(&self, locator: &str) -> Result<ByteStream, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(locator) {
            return Err(SourceError::FetchFailed {
                locator: locator.to_string(),
                reason: "status 404 Not Found".into(),
            });
        }
        let content = self
            .contents
            .get(locator)
            .cloned()
            .ok_or_else(|| SourceError::FetchFailed {
                locator: locator.to_string(),
                reason: "unknown locator".into(),
            })?;
        // Split into small chunks so hashing sees more than one.
        let chunks: Vec<std::io::Result<Bytes>> = content
            .chunks(3)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// In-memory store that counts mutations.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MemoryStore {
    pub fn seeded(objects: &[(&str, &str)]) -> Self {
        let store = MemoryStore::default();
        {
            let mut map = store.objects.lock().unwrap();
            for (key, content) in objects {
                map.insert(key.to_string(), content.as_bytes().to_vec());
            }
        }
        store
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn content(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|c| String::from_utf8_lossy(c).into_owned())
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.puts.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn list_by_prefix(&self, prefix: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(key, content)| {
                key.strip_prefix(prefix)
                    .map(|name| (name.to_string(), digest_bytes(content)))
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<ByteStream, StoreError> {
        let content = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(once_stream(content))
    }

    async fn put(&self, key: &str, mut content: ByteStream) -> Result<(), StoreError> {
        let mut buffer = Vec::new();
        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(|e| StoreError::Interrupted {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            buffer.extend_from_slice(&chunk);
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(key.to_string(), buffer);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Stream over a literal, for mock `returning` closures.
pub fn content_stream(content: &'static str) -> ByteStream {
    once_stream(Bytes::from_static(content.as_bytes()))
}
