mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;

use bucket_sync_core::config::RetryConfig;
use bucket_sync_core::contract::{DocumentResponse, MockContentStore, MockDocumentTransport};
use bucket_sync_core::documents::{DocumentFetcher, DocumentSpec, DocumentSync, RetryPolicy};
use bucket_sync_core::error::{DocumentError, StoreError};

use common::MemoryStore;

const POPULATION: &str = r#"{"data":[{"Nation":"United States","Year":"2021","Population":329725481}]}"#;

fn instant_policy() -> RetryPolicy {
    let mut policy = RetryPolicy::from(&RetryConfig::default());
    policy.backoff_factor = 0.0;
    policy
}

fn response(status: u16, body: &'static str) -> DocumentResponse {
    DocumentResponse {
        status,
        body: Bytes::from_static(body.as_bytes()),
    }
}

/// Transport that replays `statuses` in order, answering with `body` on success.
fn scripted_transport(statuses: Vec<u16>, body: &'static str) -> (MockDocumentTransport, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let mut transport = MockDocumentTransport::new();
    transport.expect_get().returning(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let status = statuses.get(n).copied().unwrap_or(200);
        Ok(response(status, if status == 200 { body } else { "" }))
    });
    (transport, attempts)
}

#[tokio::test]
async fn two_503s_then_success_takes_three_attempts_and_stores_once() {
    let (transport, attempts) = scripted_transport(vec![503, 503, 200], POPULATION);
    let store = MemoryStore::default();
    let sync = DocumentSync::new(DocumentFetcher::new(transport, instant_policy()), &store, "datausa");

    let report = sync
        .run(&[DocumentSpec::new("response.json", "https://example.test/api/data")])
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.put_count(), 1);
    assert_eq!(report.stored, vec!["response.json".to_string()]);
    assert_eq!(store.content("datausa/response.json").as_deref(), Some(POPULATION));
}

#[tokio::test]
async fn exhausted_retries_yield_none() {
    let (transport, attempts) = scripted_transport(vec![502, 502, 502, 502, 502], POPULATION);
    let fetcher = DocumentFetcher::new(transport, instant_policy());

    let document = fetcher.fetch_document("https://example.test/api/data").await;

    assert!(document.is_none());
    // One initial attempt plus three retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn non_retryable_status_is_not_retried() {
    let (transport, attempts) = scripted_transport(vec![404], POPULATION);
    let fetcher = DocumentFetcher::new(transport, instant_policy());

    assert!(fetcher.fetch_document("https://example.test/missing").await.is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transport_error_yields_none() {
    let mut transport = MockDocumentTransport::new();
    transport
        .expect_get()
        .times(1)
        .returning(|_| Err(DocumentError::Transport("dns error".into())));
    let fetcher = DocumentFetcher::new(transport, instant_policy());

    assert!(fetcher.fetch_document("https://nowhere.test").await.is_none());
}

#[tokio::test]
async fn invalid_json_yields_none() {
    let mut transport = MockDocumentTransport::new();
    transport
        .expect_get()
        .returning(|_| Ok(response(200, "<html>maintenance</html>")));
    let fetcher = DocumentFetcher::new(transport, instant_policy());

    assert!(fetcher.fetch_document("https://example.test/api").await.is_none());
}

#[tokio::test]
async fn payload_is_stored_byte_for_byte() {
    const SPACED: &str = "{ \"b\" : 1,\n  \"a\" : [ 2 ] }";
    let mut transport = MockDocumentTransport::new();
    transport.expect_get().returning(|_| Ok(response(200, SPACED)));
    let fetcher = DocumentFetcher::new(transport, instant_policy());

    let document = fetcher
        .fetch_document("https://example.test/api")
        .await
        .expect("document should be fetched");

    assert_eq!(document.raw, Bytes::from_static(SPACED.as_bytes()));
    assert_eq!(document.value["a"][0], 2);
}

#[tokio::test]
async fn one_missing_document_does_not_block_the_other() {
    let mut transport = MockDocumentTransport::new();
    transport
        .expect_get()
        .withf(|endpoint| endpoint == "https://example.test/api/data")
        .returning(|_| Ok(response(500, "")));
    transport
        .expect_get()
        .withf(|endpoint| endpoint == "https://example.test/api/comments")
        .times(1)
        .returning(|_| Ok(response(200, r#"{"comments":[]}"#)));
    let store = MemoryStore::default();
    let sync = DocumentSync::new(DocumentFetcher::new(transport, instant_policy()), &store, "datausa/");

    let report = sync
        .run(&[
            DocumentSpec::new("response.json", "https://example.test/api/data"),
            DocumentSpec::new("comments.json", "https://example.test/api/comments"),
        ])
        .await;

    assert_eq!(report.skipped, vec!["response.json".to_string()]);
    assert_eq!(report.stored, vec!["comments.json".to_string()]);
    assert_eq!(store.keys(), vec!["datausa/comments.json".to_string()]);
}

#[tokio::test]
async fn store_failure_on_one_document_does_not_block_the_other() {
    let mut transport = MockDocumentTransport::new();
    transport.expect_get().returning(|_| Ok(response(200, "{}")));

    let mut store = MockContentStore::new();
    store
        .expect_put()
        .withf(|key, _| key == "datausa/response.json")
        .times(1)
        .returning(|_, _| Err(StoreError::Unavailable("bucket unreachable".into())));
    store
        .expect_put()
        .withf(|key, _| key == "datausa/comments.json")
        .times(1)
        .returning(|_, _| Ok(()));
    store.expect_list_by_prefix().never();

    let sync = DocumentSync::new(DocumentFetcher::new(transport, instant_policy()), &store, "datausa");
    let report = sync.run(&DocumentSpec::defaults()).await;

    assert_eq!(report.failed, vec!["response.json".to_string()]);
    assert_eq!(report.stored, vec!["comments.json".to_string()]);
}

#[test]
fn first_retry_is_immediate_then_backoff_doubles_up_to_the_cap() {
    let policy = RetryPolicy::from(&RetryConfig::default());

    assert_eq!(policy.backoff(0), Duration::ZERO);
    assert_eq!(policy.backoff(1), Duration::ZERO);
    assert_eq!(policy.backoff(2), Duration::from_secs(4));
    assert_eq!(policy.backoff(3), Duration::from_secs(8));
    assert_eq!(policy.backoff(20), Duration::from_secs(120));
}

#[test]
fn only_safe_methods_and_listed_statuses_are_retryable() {
    let policy = RetryPolicy::from(&RetryConfig::default());

    assert!(policy.is_retryable(&Method::GET, 503));
    assert!(policy.is_retryable(&Method::HEAD, 504));
    assert!(!policy.is_retryable(&Method::GET, 500));
    assert!(!policy.is_retryable(&Method::POST, 503));
}
