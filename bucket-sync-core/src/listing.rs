//! HTTP directory-index adapter for [`RemoteListingSource`].
//!
//! Reads an auto-generated index page (Apache/IIS style), turns every file
//! link into a [`RemoteItem`] and streams file bodies on `fetch`.

use std::sync::OnceLock;

use async_trait::async_trait;
use futures::TryStreamExt;
use regex::Regex;
use reqwest::{Client, Url};
use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::contract::{ByteStream, RemoteItem, RemoteListingSource};
use crate::error::SourceError;

pub struct HttpDirectoryListing {
    client: Client,
    base_url: Url,
}

impl HttpDirectoryListing {
    pub fn new(listing_url: &str, config: &SyncConfig) -> Result<Self, SourceError> {
        let base_url = Url::parse(listing_url).map_err(|e| {
            error!(error = ?e, url = listing_url, "Invalid listing URL");
            SourceError::Unavailable(format!("invalid listing url {listing_url}: {e}"))
        })?;
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to build http client: {e}")))?;
        info!(url = %base_url, user_agent = %config.user_agent, "Initialized HttpDirectoryListing");
        Ok(Self { client, base_url })
    }
}

fn href_pattern() -> &'static Regex {
    static HREF: OnceLock<Regex> = OnceLock::new();
    HREF.get_or_init(|| {
        Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']*)["']"#).expect("href pattern is valid")
    })
}

/// Extracts file entries from an index page served at `base_url`.
///
/// Skips parent and self links, directory links, and query- or
/// fragment-only links such as column sort toggles.
pub fn parse_directory_listing(html: &str, base_url: &Url) -> Vec<RemoteItem> {
    let mut items = Vec::new();
    for capture in href_pattern().captures_iter(html) {
        let href = capture[1].trim();
        if href.is_empty()
            || href.starts_with("../")
            || href.starts_with('?')
            || href.starts_with('#')
        {
            continue;
        }
        let Ok(resolved) = base_url.join(href) else {
            debug!(href, "Skipping unresolvable link");
            continue;
        };
        if resolved == *base_url || resolved.path().ends_with('/') {
            continue;
        }
        let name = resolved
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string();
        if name.is_empty() {
            continue;
        }
        items.push(RemoteItem {
            name,
            locator: resolved.to_string(),
        });
    }
    items
}

#[async_trait]
impl RemoteListingSource for HttpDirectoryListing {
    async fn list(&self) -> Result<Vec<RemoteItem>, SourceError> {
        info!(url = %self.base_url, "[SYNC][LIST] Fetching directory listing");
        let response = self
            .client
            .get(self.base_url.clone())
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| {
                error!(error = ?e, url = %self.base_url, "[SYNC][LIST] Listing request failed");
                SourceError::Unavailable(e.to_string())
            })?;
        let html = response
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(format!("failed to read listing body: {e}")))?;

        let items = parse_directory_listing(&html, &self.base_url);
        info!(count = items.len(), "[SYNC][LIST] Found files in remote listing");
        for item in &items {
            debug!(name = %item.name, locator = %item.locator, "[SYNC][LIST] Remote file");
        }
        Ok(items)
    }

    async fn fetch(&self, locator: &str) -> Result<ByteStream, SourceError> {
        let failed = |reason: String| SourceError::FetchFailed {
            locator: locator.to_string(),
            reason,
        };
        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("status {status}")));
        }
        debug!(locator, content_length = ?response.content_length(), "Opened remote stream");
        Ok(Box::pin(response.bytes_stream().map_err(std::io::Error::other)))
    }
}
