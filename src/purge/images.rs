//! Image purge routines: validity filtering and per-prefix retention.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use futures::future;
use regex::Regex;

use super::{PurgeContext, name_timestamp};
use crate::azure::{AzureError, Image};

/// Image names end in a 12-digit `YYYYMMDDHHMM` build timestamp.
static TIMESTAMP_RX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^.*-([0-9]{12})$").unwrap());

/// Everything before the trailing timestamp is the retention prefix.
static PREFIX_RX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*)-[0-9]{12}$").unwrap());

/// Delete images that are not tagged `valid: true` and are older than the
/// build timeout.
pub(crate) async fn purge_invalid(ctx: &PurgeContext) -> Result<u64, AzureError> {
    let images = ctx.api.list_images().await?;
    let doomed = invalid_images(&images, ctx.now, ctx.build_timeout);
    delete_images(ctx, &doomed).await
}

/// Delete images beyond the `keep_images` most recent of each name prefix.
pub(crate) async fn purge_beyond_retention(ctx: &PurgeContext) -> Result<u64, AzureError> {
    let images = ctx.api.list_images().await?;
    let doomed = beyond_retention(&images, ctx.keep_images);
    delete_images(ctx, &doomed).await
}

/// Select images failing the validity check.
///
/// A name without the trailing timestamp is selected unconditionally.
/// An image younger than `build_timeout` is never selected: it may still be
/// mid-build and untagged. Anything else must carry `valid: true`.
pub fn invalid_images<'a>(
    images: &'a [Image],
    now: DateTime<Utc>,
    build_timeout: Duration,
) -> Vec<&'a str> {
    let mut doomed = Vec::new();

    for image in images {
        let Some(captures) = TIMESTAMP_RX.captures(&image.name) else {
            doomed.push(image.name.as_str());
            continue;
        };

        if let Some(digits) = captures.get(1)
            && let Some(built_at) = name_timestamp(digits.as_str())
            && now - built_at < build_timeout
        {
            continue;
        }

        if image.tags.get("valid").map(String::as_str) != Some("true") {
            doomed.push(image.name.as_str());
        }
    }

    doomed
}

/// Select images beyond the `keep` most recent of each prefix.
///
/// The walk is in descending full-name order, which is descending build
/// time for the fixed-width timestamp. Names without the timestamp suffix
/// are selected unconditionally and do not disturb the running prefix
/// counter.
pub fn beyond_retention(images: &[Image], keep: usize) -> Vec<&str> {
    let mut sorted: Vec<&Image> = images.iter().collect();
    sorted.sort_by(|a, b| b.name.cmp(&a.name));

    let mut doomed = Vec::new();
    let mut last_prefix: Option<&str> = None;
    let mut rank = 0;

    for image in sorted {
        let prefix = PREFIX_RX
            .captures(&image.name)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());

        match prefix {
            None => doomed.push(image.name.as_str()),
            Some(prefix) if last_prefix != Some(prefix) => {
                last_prefix = Some(prefix);
                rank = 1;
            }
            Some(_) => {
                rank += 1;
                if rank > keep {
                    doomed.push(image.name.as_str());
                }
            }
        }
    }

    doomed
}

/// Log each decision, submit the deletes, then join on their completion.
async fn delete_images(ctx: &PurgeContext, names: &[&str]) -> Result<u64, AzureError> {
    let mut pending = Vec::with_capacity(names.len());
    for name in names {
        tracing::info!(image = %name, "delete image");
        if ctx.dry_run {
            continue;
        }
        pending.push(ctx.api.begin_delete_image(name).await?);
    }

    future::try_join_all(pending.into_iter().map(|op| ctx.api.wait(op))).await?;

    Ok(names.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str, tags: &[(&str, &str)]) -> Image {
        Image {
            name: name.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn at(name: &str) -> DateTime<Utc> {
        name_timestamp(name).unwrap()
    }

    #[test]
    fn test_name_without_timestamp_is_always_invalid() {
        let images = vec![
            image("no-timestamp-here", &[("valid", "true")]),
            image("rhel", &[]),
        ];
        let doomed = invalid_images(&images, at("202601011200"), Duration::hours(6));
        assert_eq!(doomed, vec!["no-timestamp-here", "rhel"]);
    }

    #[test]
    fn test_young_image_is_never_invalid() {
        let images = vec![image("rhel-202601011000", &[])];
        // Two hours old, no valid tag: still inside the build window
        let doomed = invalid_images(&images, at("202601011200"), Duration::hours(6));
        assert!(doomed.is_empty());
    }

    #[test]
    fn test_old_image_requires_valid_tag() {
        let images = vec![
            image("rhel-202601010000", &[("valid", "true")]),
            image("fedora-202601010000", &[("valid", "false")]),
            image("centos-202601010000", &[]),
        ];
        let doomed = invalid_images(&images, at("202601011200"), Duration::hours(6));
        assert_eq!(doomed, vec!["fedora-202601010000", "centos-202601010000"]);
    }

    #[test]
    fn test_unparsable_timestamp_still_honors_valid_tag() {
        // Matches the 12-digit pattern but is not a calendar date, so the
        // age check cannot exempt it; the tag check still applies.
        let images = vec![
            image("weird-999999999999", &[("valid", "true")]),
            image("weird-999999999998", &[]),
        ];
        let doomed = invalid_images(&images, at("202601011200"), Duration::hours(6));
        assert_eq!(doomed, vec!["weird-999999999998"]);
    }

    #[test]
    fn test_retention_keeps_the_five_most_recent() {
        let images: Vec<Image> = (1..=6)
            .map(|i| image(&format!("a-20260101000{i}"), &[]))
            .collect();
        let doomed = beyond_retention(&images, 5);
        // Only the oldest (lexicographically smallest) falls off
        assert_eq!(doomed, vec!["a-202601010001"]);
    }

    #[test]
    fn test_retention_counts_per_prefix() {
        let images = vec![
            image("a-202601010001", &[]),
            image("a-202601010002", &[]),
            image("a-202601010003", &[]),
            image("b-202601010001", &[]),
            image("b-202601010002", &[]),
        ];
        let doomed = beyond_retention(&images, 2);
        assert_eq!(doomed, vec!["a-202601010001"]);
    }

    #[test]
    fn test_retention_deletes_unparsable_names() {
        let images = vec![image("mystery", &[]), image("a-202601010001", &[])];
        let doomed = beyond_retention(&images, 5);
        assert_eq!(doomed, vec!["mystery"]);
    }

    #[test]
    fn test_retention_counter_survives_interleaved_junk_name() {
        // "a-202601010002x" has no timestamp suffix and sorts between the
        // two newest real builds. It must be selected itself without
        // restarting the per-prefix count, so "a-202601010002" is still the
        // second build of prefix "a" and falls outside keep = 1.
        let images = vec![
            image("a-202601010001", &[]),
            image("a-202601010002", &[]),
            image("a-202601010002x", &[]),
            image("a-202601010003", &[]),
        ];
        let doomed = beyond_retention(&images, 1);
        assert_eq!(
            doomed,
            vec!["a-202601010002x", "a-202601010002", "a-202601010001"]
        );
    }

    #[test]
    fn test_retention_with_fewer_images_than_keep() {
        let images = vec![
            image("a-202601010001", &[]),
            image("a-202601010002", &[]),
        ];
        assert!(beyond_retention(&images, 5).is_empty());
    }
}
