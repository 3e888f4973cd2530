//! Whole-document sync: fetch JSON payloads from read-only endpoints and
//! store them verbatim under fixed names.
//!
//! Fetching degrades gracefully. After the retry budget is spent, or on any
//! non-retryable failure, [`DocumentFetcher::fetch_document`] yields `None`
//! and the document is skipped for this run. Documents are independent of
//! each other.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method};
use tracing::{error, info, warn};

use crate::config::{normalise_prefix, RetryConfig};
use crate::contract::{once_stream, ContentStore, DocumentResponse, DocumentTransport};
use crate::error::DocumentError;

const MAX_BACKOFF: Duration = Duration::from_secs(120);

pub const POPULATION_ENDPOINT: &str =
    "https://datausa.io/api/data?drilldowns=Nation&measures=Population";
pub const COMMENTS_ENDPOINT: &str = "https://datausa.io/api/comments";

/// A document to mirror: where it comes from and the name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DocumentSpec {
    pub name: String,
    pub endpoint: String,
}

impl DocumentSpec {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }

    /// The population dataset and its comments feed.
    pub fn defaults() -> Vec<DocumentSpec> {
        vec![
            DocumentSpec::new("response.json", POPULATION_ENDPOINT),
            DocumentSpec::new("comments.json", COMMENTS_ENDPOINT),
        ]
    }
}

/// A fetched document: the exact bytes received plus their parsed form.
#[derive(Debug, Clone)]
pub struct Document {
    pub raw: Bytes,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub backoff_factor: f64,
    pub retryable_statuses: BTreeSet<u16>,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            retry_count: config.retry_count,
            backoff_factor: config.backoff_factor,
            retryable_statuses: config.retryable_statuses.clone(),
        }
    }
}

impl RetryPolicy {
    /// Whether a response with `status` to a `method` request may be retried.
    /// Only safe (read-only) methods are ever retried.
    pub fn is_retryable(&self, method: &Method, status: u16) -> bool {
        method.is_safe() && self.retryable_statuses.contains(&status)
    }

    /// Delay before retry number `retry` (1-based). The first retry goes out
    /// immediately; later ones wait `backoff_factor * 2^(retry - 1)` seconds.
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry <= 1 || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = (retry - 1).min(31) as i32;
        let secs = self.backoff_factor * 2f64.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

pub struct DocumentFetcher<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: DocumentTransport> DocumentFetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// `None` means "skip this document this run", never a fatal condition.
    pub async fn fetch_document(&self, endpoint: &str) -> Option<Document> {
        match self.fetch_with_retry(endpoint).await {
            Ok(document) => {
                info!(endpoint, size = document.raw.len(), "[DOCS] Fetched document");
                Some(document)
            }
            Err(e) => {
                error!(endpoint, error = %e, "[DOCS][ERROR] Document unavailable");
                None
            }
        }
    }

    async fn fetch_with_retry(&self, endpoint: &str) -> Result<Document, DocumentError> {
        let mut retry = 0;
        loop {
            let response = self.transport.get(endpoint).await?;
            if (200..300).contains(&response.status) {
                let value = serde_json::from_slice(&response.body)
                    .map_err(|e| DocumentError::InvalidJson(e.to_string()))?;
                return Ok(Document {
                    raw: response.body,
                    value,
                });
            }
            if retry >= self.policy.retry_count
                || !self.policy.is_retryable(&Method::GET, response.status)
            {
                return Err(DocumentError::Status(response.status));
            }
            retry += 1;
            let delay = self.policy.backoff(retry);
            warn!(
                endpoint,
                status = response.status,
                retry,
                delay_ms = delay.as_millis() as u64,
                "[DOCS] Retryable status, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[derive(Debug, Default)]
pub struct DocumentReport {
    pub stored: Vec<String>,
    /// Documents that could not be fetched this run.
    pub skipped: Vec<String>,
    /// Documents fetched but not written.
    pub failed: Vec<String>,
}

pub struct DocumentSync<'a, T, C> {
    fetcher: DocumentFetcher<T>,
    store: &'a C,
    prefix: String,
}

impl<'a, T, C> DocumentSync<'a, T, C>
where
    T: DocumentTransport,
    C: ContentStore,
{
    pub fn new(fetcher: DocumentFetcher<T>, store: &'a C, prefix: &str) -> Self {
        Self {
            fetcher,
            store,
            prefix: normalise_prefix(prefix),
        }
    }

    pub async fn run(&self, documents: &[DocumentSpec]) -> DocumentReport {
        let mut report = DocumentReport::default();
        for spec in documents {
            info!(name = %spec.name, endpoint = %spec.endpoint, "[DOCS] Fetching document");
            let Some(document) = self.fetcher.fetch_document(&spec.endpoint).await else {
                warn!(name = %spec.name, "[DOCS] Skipping upload due to fetch failure");
                report.skipped.push(spec.name.clone());
                continue;
            };
            let key = format!("{}{}", self.prefix, spec.name);
            match self.store.put(&key, once_stream(document.raw)).await {
                Ok(()) => {
                    info!(%key, "[DOCS] Stored document");
                    report.stored.push(spec.name.clone());
                }
                Err(e) => {
                    error!(%key, error = %e, "[DOCS][ERROR] Failed to store document");
                    report.failed.push(spec.name.clone());
                }
            }
        }
        report
    }
}

/// reqwest-backed [`DocumentTransport`].
pub struct HttpDocumentTransport {
    client: Client,
}

impl HttpDocumentTransport {
    pub fn new(user_agent: &str, retry: &RetryConfig) -> Result<Self, DocumentError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(retry.request_timeout)
            .build()
            .map_err(|e| DocumentError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentTransport for HttpDocumentTransport {
    async fn get(&self, endpoint: &str) -> Result<DocumentResponse, DocumentError> {
        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| DocumentError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| DocumentError::Transport(e.to_string()))?;
        Ok(DocumentResponse { status, body })
    }
}
