//! Realtime-days reporting over continuous buckets.

use chrono::{DateTime, NaiveDate, Utc};
use futures::TryStreamExt;
use log::debug;
use std::collections::{BTreeSet, HashMap};

use crate::db::repository::{ErrorContext, FullRepository, RepositoryError, RepositoryResult};
use crate::models::time::{truncate_to_hour, utc_day};
use crate::models::SummaryType;

/// Count, per user, the distinct UTC days in `[start, end]` having at least
/// one continuous record uploaded in realtime.
///
/// Users without a continuous summary count zero days.
///
/// # Arguments
/// * `repo` - Store holding continuous buckets and summaries
/// * `user_ids` - Users to report on
/// * `start` - Inclusive lower bound; the hour containing it counts
/// * `end` - Inclusive upper bound
///
/// # Returns
/// * `Ok(HashMap)` - Realtime day count keyed by user id
/// * `Err(RepositoryError)` - `start` is after `end`, or a store call failed
pub async fn get_realtime_days_for_users(
    repo: &dyn FullRepository,
    user_ids: &[String],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> RepositoryResult<HashMap<String, i64>> {
    if start > end {
        return Err(RepositoryError::validation_with_context(
            "startTime is after endTime",
            ErrorContext::new("get_realtime_days_for_users")
                .with_details(format!("start={}, end={}", start, end)),
        ));
    }

    let mut days = HashMap::with_capacity(user_ids.len());
    for user_id in user_ids {
        let count = if repo
            .get_summary(SummaryType::Continuous, user_id)
            .await?
            .is_some()
        {
            realtime_days(repo, user_id, start, end).await?
        } else {
            0
        };
        days.insert(user_id.clone(), count);
    }
    Ok(days)
}

async fn realtime_days(
    repo: &dyn FullRepository,
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> RepositoryResult<i64> {
    let buckets = repo
        .get_buckets_range(
            SummaryType::Continuous,
            user_id,
            Some(truncate_to_hour(start)),
            Some(end),
        )
        .await?;

    let days: BTreeSet<NaiveDate> = buckets
        .try_filter(|bucket| futures::future::ready(bucket.data.realtime_records() > 0))
        .map_ok(|bucket| utc_day(bucket.time))
        .try_collect()
        .await?;

    debug!("User {} has {} realtime days", user_id, days.len());
    Ok(days.len() as i64)
}
