//! Bucket repository trait.
//!
//! Buckets are partitioned by summary type; every operation names the type
//! explicitly. Streaming reads return buckets newest first, which the period
//! computation relies on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::RepositoryResult;
use crate::db::models::{Bucket, BucketStream, BucketsByTime, SortDirection, SummaryType};
use crate::models::time::hours_spanned;

/// Repository trait for hourly bucket storage.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to work with async Rust.
#[async_trait]
pub trait BucketRepository: Send + Sync {
    /// Fetch the buckets in the closed range `[start, end]`, keyed by hour.
    ///
    /// # Returns
    /// * `Ok(BucketsByTime)` - Possibly empty map
    /// * `Err(RepositoryError)` - Invalid user id or store failure
    async fn get_buckets_by_time(
        &self,
        typ: SummaryType,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<BucketsByTime>;

    /// Stream the buckets between optional bounds, newest first, fetched in
    /// batches of [`crate::db::models::BUCKET_BATCH_SIZE`].
    async fn get_buckets_range(
        &self,
        typ: SummaryType,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> RepositoryResult<BucketStream>;

    /// Stream every bucket of a user, newest first.
    async fn get_all_buckets(&self, typ: SummaryType, user_id: &str) -> RepositoryResult<BucketStream> {
        self.get_buckets_range(typ, user_id, None, None).await
    }

    /// Newest (`Descending`) or oldest (`Ascending`) bucket of a user.
    async fn get_end(
        &self,
        typ: SummaryType,
        user_id: &str,
        direction: SortDirection,
    ) -> RepositoryResult<Option<Bucket>>;

    /// `last_data` of the newest bucket.
    async fn get_newest_record_time(
        &self,
        typ: SummaryType,
        user_id: &str,
    ) -> RepositoryResult<Option<DateTime<Utc>>> {
        Ok(self
            .get_end(typ, user_id, SortDirection::Descending)
            .await?
            .and_then(|b| b.last_data))
    }

    /// `first_data` of the oldest bucket.
    async fn get_oldest_record_time(
        &self,
        typ: SummaryType,
        user_id: &str,
    ) -> RepositoryResult<Option<DateTime<Utc>>> {
        Ok(self
            .get_end(typ, user_id, SortDirection::Ascending)
            .await?
            .and_then(|b| b.first_data))
    }

    /// Number of hour slots between the oldest and newest bucket, inclusive.
    async fn get_total_hours(&self, typ: SummaryType, user_id: &str) -> RepositoryResult<i64> {
        let oldest = self.get_end(typ, user_id, SortDirection::Ascending).await?;
        let newest = self.get_end(typ, user_id, SortDirection::Descending).await?;
        Ok(match (oldest, newest) {
            (Some(oldest), Some(newest)) => hours_spanned(oldest.time, newest.time),
            _ => 0,
        })
    }

    /// Delete buckets older than the retention window behind the newest one.
    ///
    /// # Returns
    /// * `Ok(usize)` - Number of buckets deleted
    async fn trim_excess_buckets(&self, typ: SummaryType, user_id: &str) -> RepositoryResult<usize>;

    /// Delete every bucket from the hour containing `earliest_modified` on.
    ///
    /// # Returns
    /// * `Ok(Some(time))` - `last_data` of the newest remaining bucket
    /// * `Ok(None)` - No buckets remain
    async fn clear_invalidated_buckets(
        &self,
        typ: SummaryType,
        user_id: &str,
        earliest_modified: DateTime<Utc>,
    ) -> RepositoryResult<Option<DateTime<Utc>>>;

    /// Upsert the modified buckets of a pass. Unmodified buckets are skipped.
    ///
    /// # Returns
    /// * `Ok(usize)` - Number of buckets written
    /// * `Err(RepositoryError::PartialWriteError)` - Some buckets failed
    async fn write_modified_buckets(&self, buckets: BucketsByTime) -> RepositoryResult<usize>;

    /// Delete every bucket of a user.
    async fn delete_buckets(&self, typ: SummaryType, user_id: &str) -> RepositoryResult<usize>;
}
