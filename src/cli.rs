///
/// This module implements the CLI interface for bucket-sync: command parsing,
/// the async entrypoint, and user-visible output.
///
/// All reconciliation logic lives in the [`bucket-sync-core`] crate. This
/// module wires the concrete adapters (HTTP listing, HTTP documents,
/// filesystem store) to it and prints the resulting reports.
///
/// ## How To Use
/// - For command-line users: use the installed `bucket-sync` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`bucket-sync-core`]: ../../bucket-sync-core/
use crate::load_config::{load_config, CliConfig};
use crate::store::FsContentStore;
use anyhow::{Context, Result};
use bucket_sync_core::documents::{DocumentFetcher, DocumentSync, HttpDocumentTransport, RetryPolicy};
use bucket_sync_core::listing::HttpDirectoryListing;
use bucket_sync_core::synchronise::{Action, ReconciliationPlan, Reconciler};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// CLI for bucket-sync: mirror a remote file listing and JSON documents into a store.
#[derive(Parser)]
#[clap(
    name = "bucket-sync",
    version,
    about = "Mirror a remote directory listing and JSON API documents into a content store"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile the store with the configured listing and refresh the configured documents
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Print the reconciliation plan without changing the store
        #[clap(long)]
        dry_run: bool,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config, dry_run } => {
            let config = load_config(config)?;
            tracing::info!(command = "sync", dry_run, "Starting synchronisation process");
            let store = FsContentStore::new(&config.store.root);
            let job = sync_all(&config, &store, dry_run);
            match config.run_timeout_secs {
                Some(secs) => tokio::time::timeout(Duration::from_secs(secs), job)
                    .await
                    .map_err(|_| {
                        tracing::error!(command = "sync", timeout_secs = secs, "Run timed out");
                        anyhow::anyhow!("Synchronisation did not finish within {secs}s")
                    })?,
                None => job.await,
            }
        }
    }
}

/// Listing reconciliation first, then documents. The document flow runs even
/// when the listing phase failed; the listing error is returned afterwards.
async fn sync_all(config: &CliConfig, store: &FsContentStore, dry_run: bool) -> Result<()> {
    let listing_result = match &config.listing {
        Some(listing) => sync_listing(&listing.url, &listing.sync, store, dry_run).await,
        None => Ok(()),
    };
    if let Err(e) = &listing_result {
        tracing::error!(command = "sync", error = %e, "Listing synchronisation failed");
    }

    if let Some(documents) = &config.documents {
        if dry_run {
            tracing::info!(prefix = %documents.prefix, "Dry run, not fetching documents");
        } else {
            let transport = HttpDocumentTransport::new(&config.user_agent, &config.retry)?;
            let fetcher = DocumentFetcher::new(transport, RetryPolicy::from(&config.retry));
            let report = DocumentSync::new(fetcher, store, &documents.prefix)
                .run(&documents.items)
                .await;
            println!("Documents complete.\nReport:");
            println!("{:#?}", report);
        }
    }

    listing_result
}

async fn sync_listing(
    url: &str,
    sync: &bucket_sync_core::config::SyncConfig,
    store: &FsContentStore,
    dry_run: bool,
) -> Result<()> {
    let source = HttpDirectoryListing::new(url, sync)?;
    let reconciler = Reconciler::new(&source, store, sync.clone());
    if dry_run {
        let plan = reconciler
            .plan()
            .await
            .context("Failed to build reconciliation plan")?;
        print_plan(reconciler.prefix(), &plan);
        return Ok(());
    }

    println!("Synchronise starting...");
    let report = reconciler
        .sync()
        .await
        .with_context(|| format!("Synchronisation of {url} failed"))?;
    tracing::info!(command = "sync", ?report, "Synchronisation complete");
    println!("Synchronise complete.\nReport:");
    println!("{:#?}", report);
    Ok(())
}

fn print_plan(prefix: &str, plan: &ReconciliationPlan) {
    println!("Plan for prefix {prefix:?} ({} stored):", plan.stored_count);
    for item in &plan.items {
        let label = match item.action {
            Action::Upload(reason) => format!("upload ({reason:?})"),
            Action::Skip => "skip".to_string(),
            Action::Delete => "delete".to_string(),
        };
        println!("  {label:<16} {}", item.name);
    }
    for failure in &plan.failures {
        println!("  {:<16} {} ({})", "unreachable", failure.name, failure.reason);
    }
    if plan.is_noop() {
        println!("Nothing to do.");
    }
}
