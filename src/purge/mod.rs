//! The purge decision engine and its delete executors.
//!
//! Four routines run sequentially against a single `now` instant captured at
//! startup: invalid images, images beyond the per-prefix retention count,
//! orphaned blobs, and expired resource groups. Each routine lists fresh,
//! classifies with a pure filter, logs every decision, then submits the
//! deletes and joins on their completion. Any error aborts the run.

pub mod blobs;
pub mod groups;
pub mod images;

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::{
    azure::{AzureError, CloudResources},
    config::RetentionConfig,
};

/// Everything a purge routine needs: the API, the thresholds, the run
/// instant, and the dry-run switch.
pub struct PurgeContext {
    pub api: Arc<dyn CloudResources>,
    pub keep_images: usize,
    pub build_timeout: Duration,
    pub group_timeout: Duration,
    /// Captured once so all four routines share one purge epoch.
    pub now: DateTime<Utc>,
    pub dry_run: bool,
}

impl PurgeContext {
    pub fn new(api: Arc<dyn CloudResources>, retention: &RetentionConfig, dry_run: bool) -> Self {
        Self {
            api,
            keep_images: retention.keep_images,
            build_timeout: saturating_hours(retention.build_timeout_hours),
            group_timeout: saturating_hours(retention.group_timeout_hours),
            now: Utc::now(),
            dry_run,
        }
    }
}

/// Config timeouts are unsigned; saturate rather than wrap when converting
/// to a signed duration. Validation caps them far below this point, but the
/// context must hold for any input.
fn saturating_hours(hours: u64) -> Duration {
    i64::try_from(hours)
        .ok()
        .and_then(Duration::try_hours)
        .unwrap_or(Duration::MAX)
}

/// Results from a single purge run.
///
/// Under dry-run these are the deletions that would have happened.
#[derive(Debug, Default)]
pub struct PurgeRunResult {
    /// Images deleted for failing validity checks.
    pub invalid_images: u64,
    /// Images deleted for falling beyond the per-prefix retention count.
    pub retired_images: u64,
    /// Blobs deleted for having no corresponding live image.
    pub orphaned_blobs: u64,
    /// Resource groups deleted for outliving their creation tag.
    pub expired_groups: u64,
}

impl PurgeRunResult {
    /// Total number of resources deleted across all routines.
    pub fn total(&self) -> u64 {
        self.invalid_images + self.retired_images + self.orphaned_blobs + self.expired_groups
    }

    /// Check if any resources were deleted.
    pub fn has_deletions(&self) -> bool {
        self.total() > 0
    }
}

/// Run the four purge routines in order.
///
/// The blob routine deliberately runs after both image routines so its
/// allow-set reflects the surviving images.
pub async fn run(ctx: &PurgeContext) -> Result<PurgeRunResult, AzureError> {
    let mut result = PurgeRunResult::default();

    result.invalid_images = images::purge_invalid(ctx).await?;
    result.retired_images = images::purge_beyond_retention(ctx).await?;
    result.orphaned_blobs = blobs::purge_orphaned(ctx).await?;
    result.expired_groups = groups::purge_expired(ctx).await?;

    Ok(result)
}

/// Parse a 12-digit `YYYYMMDDHHMM` name timestamp as UTC.
///
/// Twelve digits do not guarantee a calendar-valid timestamp, so this can
/// fail even on names the patterns accept.
pub(crate) fn name_timestamp(digits: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M")
        .ok()
        .map(|t| t.and_utc())
}
