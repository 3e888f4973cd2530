/// `load_config` module: loads a static YAML config file into the typed sections the CLI runs from.
///
/// This module is the only place where untrusted YAML is parsed and mapped to rich, strongly-typed structs.
///
/// # Responsibilities
/// - Parse the YAML file into the raw sections below
/// - Fill defaults (retry policy, default documents) and normalise prefixes
/// - Apply environment overrides (`BUCKET_SYNC_USER_AGENT`)
/// - Reject configurations that cannot run: nothing to sync, out-of-range guard fraction
///
/// # Errors
/// All errors use `anyhow::Error` for context-rich diagnostics, surfaced at the CLI boundary.
use anyhow::{bail, Context, Result};
use bucket_sync_core::config::{normalise_prefix, RetryConfig, SyncConfig, DEFAULT_USER_AGENT};
use bucket_sync_core::documents::DocumentSpec;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const USER_AGENT_ENV: &str = "BUCKET_SYNC_USER_AGENT";

#[derive(Debug)]
pub struct CliConfig {
    pub user_agent: String,
    pub run_timeout_secs: Option<u64>,
    pub store: StoreSection,
    pub listing: Option<ListingSection>,
    pub documents: Option<DocumentsSection>,
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
pub struct StoreSection {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ListingSection {
    /// Directory index page to mirror.
    pub url: String,
    #[serde(flatten)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize)]
pub struct DocumentsSection {
    #[serde(default = "default_documents_prefix")]
    pub prefix: String,
    #[serde(default = "DocumentSpec::defaults")]
    pub items: Vec<DocumentSpec>,
}

fn default_documents_prefix() -> String {
    "datausa".to_string()
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    user_agent: Option<String>,
    #[serde(default)]
    run_timeout_secs: Option<u64>,
    store: StoreSection,
    #[serde(default)]
    listing: Option<ListingSection>,
    #[serde(default)]
    documents: Option<DocumentsSection>,
    #[serde(default)]
    retry: RetryConfig,
}

/// The listing reconciler deletes every stored name under its prefix that the
/// listing lacks, so it must never see the documents' keys.
fn check_disjoint_prefixes(listing_prefix: &str, documents_prefix: &str) -> Result<()> {
    if listing_prefix.is_empty() {
        error!("Empty listing prefix would cover the documents prefix");
        bail!(
            "listing.prefix must not be empty when a `documents` section is configured \
             (it would cover documents under {documents_prefix:?})"
        );
    }
    if listing_prefix.starts_with(documents_prefix) || documents_prefix.starts_with(listing_prefix) {
        error!(listing_prefix, documents_prefix, "Listing and documents prefixes overlap");
        bail!(
            "listing.prefix {listing_prefix:?} and documents.prefix {documents_prefix:?} overlap; \
             they must name separate parts of the store"
        );
    }
    Ok(())
}

/// Loads a YAML config file and applies environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref)
        .map_err(|e| {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            e
        })
        .with_context(|| format!("Failed to read config file {path_ref:?}"))?;

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let user_agent = match std::env::var(USER_AGENT_ENV) {
        Ok(agent) if !agent.trim().is_empty() => {
            info!(env = USER_AGENT_ENV, "User agent taken from environment");
            agent
        }
        _ => raw
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
    };

    if raw.listing.is_none() && raw.documents.is_none() {
        error!(config_path = ?path_ref, "Config declares neither a listing nor documents");
        bail!("Config must declare a `listing` section, a `documents` section, or both");
    }

    let listing = match raw.listing {
        Some(mut section) => {
            if let Some(fraction) = section.sync.max_delete_fraction {
                if !(0.0..=1.0).contains(&fraction) {
                    bail!("listing.max_delete_fraction must be within 0.0..=1.0, got {fraction}");
                }
            }
            section.sync.destination_prefix = normalise_prefix(&section.sync.destination_prefix);
            section.sync.user_agent = user_agent.clone();
            section.sync.concurrency = section.sync.concurrency.max(1);
            section.sync.trace_loaded();
            Some(section)
        }
        None => None,
    };

    let documents = raw.documents.map(|mut section| {
        section.prefix = normalise_prefix(&section.prefix);
        info!(
            prefix = %section.prefix,
            count = section.items.len(),
            "Loaded documents section"
        );
        section
    });

    if let (Some(listing), Some(documents)) = (&listing, &documents) {
        check_disjoint_prefixes(&listing.sync.destination_prefix, &documents.prefix)?;
    }

    info!(
        store_root = %raw.store.root.display(),
        listing = listing.is_some(),
        documents = documents.is_some(),
        retry_count = raw.retry.retry_count,
        "Config loaded and merged successfully"
    );

    Ok(CliConfig {
        user_agent,
        run_timeout_secs: raw.run_timeout_secs,
        store: raw.store,
        listing,
        documents,
        retry: raw.retry,
    })
}
