//! Resource group purge routine: drop groups whose creation tag has aged
//! past the group timeout.

use chrono::{DateTime, Duration, Utc};
use futures::future;

use super::PurgeContext;
use crate::azure::{AzureError, ResourceGroup};

/// Delete resource groups tagged with an expired `now` creation epoch.
pub(crate) async fn purge_expired(ctx: &PurgeContext) -> Result<u64, AzureError> {
    let groups = ctx.api.list_groups().await?;
    let doomed = expired_groups(&groups, ctx.now, ctx.group_timeout);

    let mut pending = Vec::with_capacity(doomed.len());
    for name in &doomed {
        tracing::info!(group = %name, "delete group");
        if ctx.dry_run {
            continue;
        }
        pending.push(ctx.api.begin_delete_group(name).await?);
    }
    future::try_join_all(pending.into_iter().map(|op| ctx.api.wait(op))).await?;

    Ok(doomed.len() as u64)
}

/// Select groups whose `now` tag (Unix seconds) is at least `group_timeout`
/// in the past.
///
/// Groups without the tag are not managed by this tool and are always kept.
/// An unparsable or out-of-range tag is treated as not yet expired.
pub fn expired_groups<'a>(
    groups: &'a [ResourceGroup],
    now: DateTime<Utc>,
    group_timeout: Duration,
) -> Vec<&'a str> {
    let mut doomed = Vec::new();

    for group in groups {
        let Some(stamp) = group.tags.get("now") else {
            continue;
        };

        let created = stamp
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        match created {
            Some(created) if now - created >= group_timeout => {
                doomed.push(group.name.as_str());
            }
            _ => {}
        }
    }

    doomed
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const TIMEOUT_SECS: i64 = 72 * 3600;

    fn group(name: &str, tags: &[(&str, &str)]) -> ResourceGroup {
        ResourceGroup {
            name: name.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_untagged_group_is_never_deleted() {
        let now = Utc::now();
        let groups = vec![group("permanent", &[("team", "ops")])];
        assert!(expired_groups(&groups, now, Duration::hours(72)).is_empty());
    }

    #[rstest]
    #[case::just_expired(TIMEOUT_SECS + 1, true)]
    #[case::exactly_at_timeout(TIMEOUT_SECS, true)]
    #[case::not_yet_expired(TIMEOUT_SECS - 1, false)]
    fn test_expiry_boundary(#[case] age_secs: i64, #[case] deleted: bool) {
        let now = Utc::now();
        let stamp = (now.timestamp() - age_secs).to_string();
        let groups = vec![group("ci-1234", &[("now", stamp.as_str())])];

        let doomed = expired_groups(&groups, now, Duration::hours(72));
        assert_eq!(!doomed.is_empty(), deleted);
    }

    #[rstest]
    #[case::not_a_number("soon")]
    #[case::empty("")]
    #[case::out_of_range("99999999999999999")]
    fn test_unparsable_tag_is_kept(#[case] stamp: &str) {
        let now = Utc::now();
        let groups = vec![group("ci-1234", &[("now", stamp)])];
        assert!(expired_groups(&groups, now, Duration::hours(72)).is_empty());
    }
}
