//! `bucket-sync` binary.
//!
//! Exit status is non-zero only for fatal errors: an unreadable or invalid
//! config, a failed listing phase, or an expired run timeout. Per-file and
//! per-document failures are reported on stdout and still exit 0.

use anyhow::Result;
use bucket_sync::cli::{run, Cli};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    // `.env` may carry BUCKET_SYNC_USER_AGENT and RUST_LOG.
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let result = run(cli).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "bucket-sync run failed");
    }
    result
}
