//! Reconciliation engine: keeps a store prefix in line with a remote listing.
//!
//! A run has two phases:
//!   - **plan**: list the remote source and the store, fetch and hash every
//!     remote item, decide Upload/Skip per name and Delete for every stored
//!     name the listing no longer has.
//!   - **execute**: re-fetch and upload changed items, then (only after every
//!     upload attempt has finished) delete stale names.
//!
//! # Error Handling
//! Only the two listing calls are fatal ([`SyncError`]). Fetch, upload and
//! delete failures are recorded per item in the [`SyncReport`] and the run
//! carries on; the next run picks up whatever was left behind.
//!
//! # Concurrency
//! Per-item work runs through `futures` `buffered` with
//! [`SyncConfig::concurrency`] slots, so results keep listing order.
//! Duplicate names are resolved before any work starts, which means no two
//! operations in one run ever target the same key.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`] or [`Reconciler::sync`]
//! - Dry run: [`Reconciler::plan`]

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::{normalise_prefix, SyncConfig};
use crate::contract::{ContentStore, RemoteItem, RemoteListingSource};
use crate::error::SyncError;
use crate::hasher::digest_stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadReason {
    /// The store has no object under this name.
    New,
    /// The stored digest differs from the remote content's digest.
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Upload(UploadReason),
    Skip,
    Delete,
}

#[derive(Debug, Clone)]
pub struct PlannedItem {
    pub name: String,
    pub action: Action,
    /// Where to re-fetch the content from; `None` for deletions.
    pub locator: Option<String>,
    /// Digest of the remote content at planning time; `None` for deletions.
    pub digest: Option<String>,
}

/// Per-run decision for every name involved. Built fresh every run.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationPlan {
    pub items: Vec<PlannedItem>,
    /// Remote items that could not be fetched or hashed while planning.
    pub failures: Vec<ItemFailure>,
    /// Number of names stored under the prefix when the plan was made.
    pub stored_count: usize,
}

impl ReconciliationPlan {
    pub fn uploads(&self) -> impl Iterator<Item = &PlannedItem> {
        self.items
            .iter()
            .filter(|item| matches!(item.action, Action::Upload(_)))
    }

    pub fn deletes(&self) -> impl Iterator<Item = &PlannedItem> {
        self.items
            .iter()
            .filter(|item| item.action == Action::Delete)
    }

    pub fn skips(&self) -> impl Iterator<Item = &PlannedItem> {
        self.items.iter().filter(|item| item.action == Action::Skip)
    }

    /// True when executing the plan would not mutate the store.
    pub fn is_noop(&self) -> bool {
        self.uploads().next().is_none() && self.deletes().next().is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Fetch,
    Upload,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub name: String,
    pub stage: FailureStage,
    pub reason: String,
}

impl ItemFailure {
    fn new(name: &str, stage: FailureStage, reason: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Outcome of a run. Item failures live here instead of aborting the run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<ItemFailure>,
    /// Deletions held back by [`SyncConfig::max_delete_fraction`].
    pub deletes_withheld: usize,
}

impl SyncReport {
    pub fn uploaded_count(&self) -> usize {
        self.uploaded.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn failures_at(&self, stage: FailureStage) -> impl Iterator<Item = &ItemFailure> {
        self.failed.iter().filter(move |f| f.stage == stage)
    }
}

pub struct Reconciler<'a, S, C> {
    source: &'a S,
    store: &'a C,
    config: SyncConfig,
}

impl<'a, S, C> Reconciler<'a, S, C>
where
    S: RemoteListingSource,
    C: ContentStore,
{
    pub fn new(source: &'a S, store: &'a C, mut config: SyncConfig) -> Self {
        config.destination_prefix = normalise_prefix(&config.destination_prefix);
        Self {
            source,
            store,
            config,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.config.destination_prefix
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.config.destination_prefix, name)
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    /// Plan, then execute. Fails only when either listing call fails.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        info!(prefix = %self.prefix(), "[SYNC] Starting reconciliation");
        let plan = self.plan().await?;
        let report = self.execute(plan).await;
        info!(
            prefix = %self.prefix(),
            uploaded = report.uploaded_count(),
            skipped = report.skipped_count(),
            deleted = report.deleted_count(),
            failed = report.failed_count(),
            deletes_withheld = report.deletes_withheld,
            "[SYNC] Reconciliation complete"
        );
        Ok(report)
    }

    /// Compute what a run would do without mutating the store.
    pub async fn plan(&self) -> Result<ReconciliationPlan, SyncError> {
        let remote = self.source.list().await.map_err(|e| {
            error!(error = %e, "[SYNC][ERROR] Remote listing failed, aborting run");
            SyncError::Listing(e)
        })?;
        let stored = self
            .store
            .list_by_prefix(self.prefix())
            .await
            .map_err(|e| {
                error!(error = %e, prefix = %self.prefix(), "[SYNC][ERROR] Store listing failed, aborting run");
                SyncError::StoreListing(e)
            })?;
        info!(
            remote = remote.len(),
            stored = stored.len(),
            "[SYNC] Listings retrieved"
        );

        let remote = resolve_duplicates(remote);
        // Every listed name counts as seen, including the ones whose fetch fails below.
        let seen: HashSet<&str> = remote.iter().map(|item| item.name.as_str()).collect();

        let outcomes: Vec<_> = stream::iter(remote.iter())
            .map(|item| self.assess(item, &stored))
            .buffered(self.concurrency())
            .collect()
            .await;

        let mut plan = ReconciliationPlan {
            stored_count: stored.len(),
            ..ReconciliationPlan::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(item) => plan.items.push(item),
                Err(failure) => plan.failures.push(failure),
            }
        }

        let mut stale: Vec<&String> = stored
            .keys()
            .filter(|name| !seen.contains(name.as_str()))
            .collect();
        stale.sort();
        plan.items.extend(stale.into_iter().map(|name| PlannedItem {
            name: name.clone(),
            action: Action::Delete,
            locator: None,
            digest: None,
        }));

        debug!(
            uploads = plan.uploads().count(),
            deletes = plan.deletes().count(),
            skips = plan.skips().count(),
            failures = plan.failures.len(),
            "[SYNC] Plan built"
        );
        Ok(plan)
    }

    async fn assess(
        &self,
        item: &RemoteItem,
        stored: &HashMap<String, String>,
    ) -> Result<PlannedItem, ItemFailure> {
        debug!(name = %item.name, "[SYNC] Checking file");
        let stream = self.source.fetch(&item.locator).await.map_err(|e| {
            warn!(name = %item.name, error = %e, "[SYNC][ERROR] Failed to fetch file, skipping");
            ItemFailure::new(&item.name, FailureStage::Fetch, e)
        })?;
        let digest = digest_stream(stream).await.map_err(|e| {
            warn!(name = %item.name, error = %e, "[SYNC][ERROR] Failed to hash file, skipping");
            ItemFailure::new(&item.name, FailureStage::Fetch, e)
        })?;

        let action = match stored.get(&item.name) {
            None => Action::Upload(UploadReason::New),
            Some(current) if *current != digest => Action::Upload(UploadReason::Changed),
            Some(_) => Action::Skip,
        };
        debug!(name = %item.name, %digest, ?action, "[SYNC] Decided action");
        Ok(PlannedItem {
            name: item.name.clone(),
            action,
            locator: Some(item.locator.clone()),
            digest: Some(digest),
        })
    }

    /// Apply `plan`. Never fails as a whole; see [`SyncReport::failed`].
    pub async fn execute(&self, plan: ReconciliationPlan) -> SyncReport {
        let mut report = SyncReport {
            failed: plan.failures.clone(),
            ..SyncReport::default()
        };
        report.skipped = plan.skips().map(|item| item.name.clone()).collect();
        for name in &report.skipped {
            debug!(%name, "[SYNC] Skipping, no changes detected");
        }

        let uploads: Vec<_> = stream::iter(plan.uploads())
            .map(|item| self.upload(item))
            .buffered(self.concurrency())
            .collect()
            .await;
        for outcome in uploads {
            match outcome {
                Ok(name) => report.uploaded.push(name),
                Err(failure) => report.failed.push(failure),
            }
        }

        // All upload attempts have settled; stale names can go now.
        let deletes: Vec<&PlannedItem> = plan.deletes().collect();
        if self.exceeds_delete_guard(deletes.len(), plan.stored_count) {
            warn!(
                planned = deletes.len(),
                stored = plan.stored_count,
                max_fraction = ?self.config.max_delete_fraction,
                "[SYNC][DELETE] Planned deletions exceed the configured fraction, withholding delete phase"
            );
            report.deletes_withheld = deletes.len();
            return report;
        }

        for item in deletes {
            let key = self.key(&item.name);
            info!(%key, "[SYNC][DELETE] Deleting, no longer in source");
            match self.store.delete(&key).await {
                Ok(()) => report.deleted.push(item.name.clone()),
                Err(e) => {
                    error!(%key, error = %e, "[SYNC][ERROR][DELETE] Delete failed");
                    report
                        .failed
                        .push(ItemFailure::new(&item.name, FailureStage::Delete, e));
                }
            }
        }
        report
    }

    async fn upload(&self, item: &PlannedItem) -> Result<String, ItemFailure> {
        let key = self.key(&item.name);
        let locator = item.locator.as_deref().ok_or_else(|| {
            ItemFailure::new(&item.name, FailureStage::Upload, "planned upload has no locator")
        })?;
        info!(name = %item.name, %locator, action = ?item.action, "[SYNC][UPLOAD] Downloading for upload");
        let content = self.source.fetch(locator).await.map_err(|e| {
            error!(name = %item.name, error = %e, "[SYNC][ERROR][UPLOAD] Re-fetch failed");
            ItemFailure::new(&item.name, FailureStage::Fetch, e)
        })?;
        self.store.put(&key, content).await.map_err(|e| {
            error!(%key, error = %e, "[SYNC][ERROR][UPLOAD] Upload failed");
            ItemFailure::new(&item.name, FailureStage::Upload, e)
        })?;
        info!(%key, "[SYNC][UPLOAD] Uploaded");
        Ok(item.name.clone())
    }

    fn exceeds_delete_guard(&self, planned: usize, stored: usize) -> bool {
        match self.config.max_delete_fraction {
            Some(max) if planned > 0 && stored > 0 => planned as f64 / stored as f64 > max,
            _ => false,
        }
    }
}

/// Later entries replace earlier ones with the same name, keeping the first position.
fn resolve_duplicates(items: Vec<RemoteItem>) -> Vec<RemoteItem> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut resolved: Vec<RemoteItem> = Vec::with_capacity(items.len());
    for item in items {
        match positions.get(&item.name) {
            Some(&idx) => {
                debug!(name = %item.name, locator = %item.locator, "[SYNC] Duplicate name in listing, last entry wins");
                resolved[idx] = item;
            }
            None => {
                positions.insert(item.name.clone(), resolved.len());
                resolved.push(item);
            }
        }
    }
    resolved
}

/// Convenience entrypoint: reconcile `config.destination_prefix` of `store` with `source`.
pub async fn synchronise<S, C>(
    config: &SyncConfig,
    source: &S,
    store: &C,
) -> Result<SyncReport, SyncError>
where
    S: RemoteListingSource,
    C: ContentStore,
{
    Reconciler::new(source, store, config.clone()).sync().await
}
