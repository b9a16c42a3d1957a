//! Deletes stale Azure resources left behind by image builds: VM images,
//! storage blobs, and throwaway resource groups.

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod azure;
mod config;
mod purge;

use azure::AzureApi;
use config::PurgeConfig;
use purge::PurgeContext;

/// CLI arguments for azure-purge
#[derive(Parser, Debug)]
#[command(version, about = "Deletes stale Azure images, blobs, and resource groups", long_about = None)]
struct Args {
    /// Compute and log deletions without executing them
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Path to a TOML config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Initialize the tracing subscriber.
///
/// Defaults to `info` for this crate and `warn` elsewhere; override with
/// `RUST_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,azure_purge=info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "Purge run failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = PurgeConfig::load(args.config.as_deref())?;

    tracing::info!(
        subscription_id = %config.azure.subscription_id,
        resource_group = %config.azure.resource_group,
        storage_account = %config.azure.storage_account,
        container = %config.azure.container,
        keep_images = config.retention.keep_images,
        build_timeout_hours = config.retention.build_timeout_hours,
        group_timeout_hours = config.retention.group_timeout_hours,
        dry_run = args.dry_run,
        "Starting azure-purge"
    );

    let api = AzureApi::new(&config.azure)?;
    let ctx = PurgeContext::new(Arc::new(api), &config.retention, args.dry_run);

    let result = purge::run(&ctx).await?;

    if result.has_deletions() {
        tracing::info!(
            invalid_images = result.invalid_images,
            retired_images = result.retired_images,
            orphaned_blobs = result.orphaned_blobs,
            expired_groups = result.expired_groups,
            total = result.total(),
            dry_run = args.dry_run,
            "Purge run complete"
        );
    } else {
        tracing::info!("Purge run complete, no resources to delete");
    }

    Ok(())
}
