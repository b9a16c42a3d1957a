//! Blob purge routine: drop VHDs with no corresponding live image.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use futures::future;
use regex::Regex;

use super::{PurgeContext, name_timestamp};
use crate::azure::{AzureError, Blob, Image};

static VHD_RX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-([0-9]{12})\.vhd$").unwrap());

/// Delete blobs with no matching image, once past the build timeout.
///
/// Lists images fresh so the allow-set reflects the state after the image
/// routines have run.
pub(crate) async fn purge_orphaned(ctx: &PurgeContext) -> Result<u64, AzureError> {
    let images = ctx.api.list_images().await?;
    let blobs = ctx.api.list_blobs().await?;
    let doomed = orphaned_blobs(&blobs, &images, ctx.now, ctx.build_timeout);

    let mut deletions = Vec::with_capacity(doomed.len());
    for name in &doomed {
        tracing::info!(blob = %name, "delete blob");
        if ctx.dry_run {
            continue;
        }
        deletions.push(ctx.api.delete_blob(name));
    }
    future::try_join_all(deletions).await?;

    Ok(doomed.len() as u64)
}

/// Select blobs with no corresponding live image.
///
/// A blob named `<image-name>.vhd` for any live image is kept regardless of
/// age. Otherwise a recognizable build timestamp younger than the build
/// timeout grants a grace period for in-flight uploads; anything else is
/// selected.
pub fn orphaned_blobs<'a>(
    blobs: &'a [Blob],
    images: &[Image],
    now: DateTime<Utc>,
    build_timeout: Duration,
) -> Vec<&'a str> {
    let allowed: HashSet<String> = images
        .iter()
        .map(|image| format!("{}.vhd", image.name))
        .collect();

    let mut doomed = Vec::new();
    for blob in blobs {
        if allowed.contains(&blob.name) {
            continue;
        }

        if let Some(captures) = VHD_RX.captures(&blob.name)
            && let Some(digits) = captures.get(1)
            && let Some(uploaded_at) = name_timestamp(digits.as_str())
            && now - uploaded_at < build_timeout
        {
            continue;
        }

        doomed.push(blob.name.as_str());
    }

    doomed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(name: &str) -> Blob {
        Blob {
            name: name.to_string(),
        }
    }

    fn image(name: &str) -> Image {
        Image {
            name: name.to_string(),
            tags: Default::default(),
        }
    }

    fn at(name: &str) -> DateTime<Utc> {
        name_timestamp(name).unwrap()
    }

    #[test]
    fn test_blob_matching_live_image_is_kept_even_if_old() {
        let blobs = vec![blob("rhel-200001010000.vhd")];
        let images = vec![image("rhel-200001010000")];
        let doomed = orphaned_blobs(&blobs, &images, at("202601011200"), Duration::hours(6));
        assert!(doomed.is_empty());
    }

    #[test]
    fn test_young_orphan_gets_a_grace_period() {
        let blobs = vec![blob("rhel-202601011000.vhd")];
        let doomed = orphaned_blobs(&blobs, &[], at("202601011200"), Duration::hours(6));
        assert!(doomed.is_empty());
    }

    #[test]
    fn test_old_orphan_is_deleted() {
        let blobs = vec![blob("rhel-202601010000.vhd")];
        let doomed = orphaned_blobs(&blobs, &[], at("202601011200"), Duration::hours(6));
        assert_eq!(doomed, vec!["rhel-202601010000.vhd"]);
    }

    #[test]
    fn test_unrecognizable_orphan_gets_no_grace() {
        let blobs = vec![blob("scratch.vhd"), blob("notes.txt")];
        let doomed = orphaned_blobs(&blobs, &[], at("202601011200"), Duration::hours(6));
        assert_eq!(doomed, vec!["scratch.vhd", "notes.txt"]);
    }

    #[test]
    fn test_allow_set_requires_exact_name() {
        // A live image only protects its own `.vhd`, not other extensions or
        // prefixed variants.
        let blobs = vec![blob("rhel-202601010000.vhd.bak"), blob("rhel-202601010000")];
        let images = vec![image("rhel-202601010000")];
        let doomed = orphaned_blobs(&blobs, &images, at("202601011200"), Duration::hours(6));
        assert_eq!(doomed, vec!["rhel-202601010000.vhd.bak", "rhel-202601010000"]);
    }
}
