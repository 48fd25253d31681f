//! In-memory local repository implementation.
//!
//! This module provides a local implementation of all repository traits
//! suitable for unit testing and local development. Buckets live in ordered
//! maps per `(type, user)`, summaries in a map keyed the same way, and raw
//! records in per-user vectors with tombstones for removed records.

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use log::debug;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::ops::Bound;
use std::sync::Arc;

use crate::db::models::{
    Bucket, BucketStream, BucketsByTime, DatumStream, GlucoseDatum, Pagination, SortDirection,
    Summary, SummaryType, UserDataStatus, BUCKET_BATCH_SIZE, HOURS_AGO_TO_KEEP,
};
use crate::db::repository::*;
use crate::models::time::truncate_to_hour;

type UserKey = (SummaryType, String);

/// In-memory local repository.
///
/// Clones share the same underlying store.
///
/// # Example
/// ```
/// use glycemic_summary::db::repositories::LocalRepository;
/// use glycemic_summary::db::repository::SummaryRepository;
/// use glycemic_summary::models::SummaryType;
///
/// let repo = LocalRepository::new();
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let summary = rt.block_on(repo.get_summary(SummaryType::Cgm, "user-1")).unwrap();
/// assert!(summary.is_none());
/// ```
#[derive(Clone)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
}

#[derive(Clone)]
struct StoredRecord {
    datum: GlucoseDatum,
    removed: bool,
}

#[derive(Clone)]
struct LocalData {
    buckets: HashMap<UserKey, BTreeMap<DateTime<Utc>, Bucket>>,
    summaries: HashMap<UserKey, Summary>,
    records: HashMap<String, Vec<StoredRecord>>,

    // Connection health
    is_healthy: bool,
}

impl Default for LocalData {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
            summaries: HashMap::new(),
            records: HashMap::new(),
            is_healthy: true,
        }
    }
}

impl LocalData {
    fn ensure_healthy(&self, operation: &str) -> RepositoryResult<()> {
        if self.is_healthy {
            Ok(())
        } else {
            Err(RepositoryError::ConnectionError {
                message: "local repository is unavailable".to_string(),
                context: ErrorContext::new(operation).retryable(),
            })
        }
    }

    fn live_records<'a>(
        &'a self,
        typ: SummaryType,
        user_id: &str,
    ) -> impl Iterator<Item = &'a GlucoseDatum> + 'a {
        self.records
            .get(user_id)
            .into_iter()
            .flatten()
            .filter(move |r| !r.removed && typ.accepts(r.datum.kind))
            .map(|r| &r.datum)
    }
}

impl Default for LocalRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRepository {
    /// Create a new empty local repository.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(LocalData::default())),
        }
    }

    /// Add raw records, stamping each with the current time as its
    /// `modified_time` the way the device data store does on write.
    ///
    /// # Returns
    /// The number of records stored
    pub fn insert_data(&self, records: impl IntoIterator<Item = GlucoseDatum>) -> usize {
        let now = Utc::now();
        let mut data = self.data.write();
        let mut inserted = 0;
        for mut datum in records {
            datum.modified_time = now;
            data.records
                .entry(datum.user_id.clone())
                .or_default()
                .push(StoredRecord {
                    datum,
                    removed: false,
                });
            inserted += 1;
        }
        inserted
    }

    /// Remove a user's records with `start <= time <= end`.
    ///
    /// Removed records stay behind as tombstones so the change is visible
    /// through `earliest_modified`.
    ///
    /// # Returns
    /// The number of records removed
    pub fn remove_data(&self, user_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
        let now = Utc::now();
        let mut data = self.data.write();
        let Some(records) = data.records.get_mut(user_id) else {
            return 0;
        };

        let mut removed = 0;
        for record in records
            .iter_mut()
            .filter(|r| !r.removed && r.datum.time >= start && r.datum.time <= end)
        {
            record.removed = true;
            record.datum.modified_time = now;
            removed += 1;
        }
        removed
    }

    /// Store buckets directly, bypassing the dirty flag.
    pub fn insert_buckets(&self, buckets: impl IntoIterator<Item = Bucket>) {
        let mut data = self.data.write();
        for mut bucket in buckets {
            bucket.set_modified(false);
            data.buckets
                .entry((bucket.summary_type, bucket.user_id.clone()))
                .or_default()
                .insert(bucket.time, bucket);
        }
    }

    /// Number of stored buckets of a user.
    pub fn bucket_count(&self, typ: SummaryType, user_id: &str) -> usize {
        self.data
            .read()
            .buckets
            .get(&(typ, user_id.to_string()))
            .map_or(0, BTreeMap::len)
    }

    /// Simulate a connection failure (or recovery).
    pub fn set_healthy(&self, healthy: bool) {
        self.data.write().is_healthy = healthy;
    }

    /// Drop every record, bucket and summary.
    pub fn clear(&self) {
        let mut data = self.data.write();
        let healthy = data.is_healthy;
        *data = LocalData {
            is_healthy: healthy,
            ..Default::default()
        };
    }

    /// Run `f` against this repository, restoring the prior contents if it
    /// fails. A failure is reported as a `TransactionError` carrying the
    /// cause; it stays retryable when the cause was.
    ///
    /// Concurrent writers are not isolated from each other; this only
    /// guarantees all-or-nothing for a single caller.
    pub async fn with_transaction<F, Fut, T>(&self, f: F) -> RepositoryResult<T>
    where
        F: FnOnce(LocalRepository) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        let snapshot = self.data.read().clone();
        match f(self.clone()).await {
            Ok(value) => Ok(value),
            Err(err) => {
                *self.data.write() = snapshot;
                debug!("local transaction rolled back: {}", err);
                let mut context =
                    ErrorContext::new("with_transaction").with_details(err.to_string());
                if err.is_retryable() {
                    context = context.retryable();
                }
                Err(RepositoryError::transaction("rolled back", context))
            }
        }
    }

    /// One batch of a newest-first bucket scan below `upper`.
    fn bucket_batch(
        &self,
        key: &UserKey,
        lower: Option<DateTime<Utc>>,
        upper: Bound<DateTime<Utc>>,
    ) -> RepositoryResult<Vec<Bucket>> {
        let data = self.data.read();
        data.ensure_healthy("get_buckets_range")?;
        let Some(buckets) = data.buckets.get(key) else {
            return Ok(Vec::new());
        };
        Ok(buckets
            .range((Bound::Unbounded, upper))
            .rev()
            .take_while(|(time, _)| lower.map_or(true, |lower| **time >= lower))
            .take(BUCKET_BATCH_SIZE)
            .map(|(_, bucket)| bucket.clone())
            .collect())
    }
}

#[async_trait]
impl BucketRepository for LocalRepository {
    async fn get_buckets_by_time(
        &self,
        typ: SummaryType,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<BucketsByTime> {
        validate_user_id(user_id, "get_buckets_by_time")?;
        let data = self.data.read();
        data.ensure_healthy("get_buckets_by_time")?;

        if start > end {
            return Ok(BucketsByTime::new());
        }
        Ok(data
            .buckets
            .get(&(typ, user_id.to_string()))
            .map(|buckets| buckets.range(start..=end).map(|(_, b)| b.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_buckets_range(
        &self,
        typ: SummaryType,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> RepositoryResult<BucketStream> {
        validate_user_id(user_id, "get_buckets_range")?;

        let repo = self.clone();
        let key = (typ, user_id.to_string());
        let stream = try_stream! {
            let mut upper = end.map_or(Bound::Unbounded, Bound::Included);
            loop {
                let batch = repo.bucket_batch(&key, start, upper)?;
                let fetched = batch.len();
                if let Some(oldest) = batch.last() {
                    upper = Bound::Excluded(oldest.time);
                }
                for bucket in batch {
                    yield bucket;
                }
                if fetched < BUCKET_BATCH_SIZE {
                    break;
                }
            }
        };
        Ok(stream.boxed())
    }

    async fn get_end(
        &self,
        typ: SummaryType,
        user_id: &str,
        direction: SortDirection,
    ) -> RepositoryResult<Option<Bucket>> {
        validate_user_id(user_id, "get_end")?;
        let data = self.data.read();
        data.ensure_healthy("get_end")?;

        let Some(buckets) = data.buckets.get(&(typ, user_id.to_string())) else {
            return Ok(None);
        };
        let end = match direction {
            SortDirection::Ascending => buckets.first_key_value(),
            SortDirection::Descending => buckets.last_key_value(),
        };
        Ok(end.map(|(_, b)| b.clone()))
    }

    async fn trim_excess_buckets(&self, typ: SummaryType, user_id: &str) -> RepositoryResult<usize> {
        validate_user_id(user_id, "trim_excess_buckets")?;
        let mut data = self.data.write();
        data.ensure_healthy("trim_excess_buckets")?;

        let Some(buckets) = data.buckets.get_mut(&(typ, user_id.to_string())) else {
            return Ok(0);
        };
        let Some(newest) = buckets.last_key_value().map(|(time, _)| *time) else {
            return Ok(0);
        };

        let cutoff = newest - Duration::hours(HOURS_AGO_TO_KEEP);
        let kept = buckets.split_off(&cutoff);
        let trimmed = buckets.len();
        *buckets = kept;

        debug!("Trimmed {} {} buckets for user {}", trimmed, typ, user_id);
        Ok(trimmed)
    }

    async fn clear_invalidated_buckets(
        &self,
        typ: SummaryType,
        user_id: &str,
        earliest_modified: DateTime<Utc>,
    ) -> RepositoryResult<Option<DateTime<Utc>>> {
        validate_user_id(user_id, "clear_invalidated_buckets")?;
        let mut data = self.data.write();
        data.ensure_healthy("clear_invalidated_buckets")?;

        let key = (typ, user_id.to_string());
        let Some(buckets) = data.buckets.get_mut(&key) else {
            return Ok(None);
        };

        let cleared = buckets.split_off(&truncate_to_hour(earliest_modified));
        let newest = buckets.last_key_value().and_then(|(_, b)| b.last_data);
        debug!(
            "Cleared {} invalidated {} buckets for user {} from {}",
            cleared.len(),
            typ,
            user_id,
            earliest_modified
        );
        if buckets.is_empty() {
            data.buckets.remove(&key);
        }
        Ok(newest)
    }

    async fn write_modified_buckets(&self, buckets: BucketsByTime) -> RepositoryResult<usize> {
        let mut data = self.data.write();
        data.ensure_healthy("write_modified_buckets")?;

        let mut written = 0;
        let mut failed = Vec::new();
        for mut bucket in buckets.into_modified() {
            if let Err(err) = validate_user_id(&bucket.user_id, "write_modified_buckets") {
                failed.push(format!("{}: {}", bucket.time, err));
                continue;
            }
            bucket.set_modified(false);
            data.buckets
                .entry((bucket.summary_type, bucket.user_id.clone()))
                .or_default()
                .insert(bucket.time, bucket);
            written += 1;
        }

        if !failed.is_empty() {
            return Err(RepositoryError::partial_write(
                written,
                format!("{} buckets could not be written", failed.len()),
                ErrorContext::new("write_modified_buckets")
                    .with_entity("bucket")
                    .with_details(failed.join("; ")),
            ));
        }
        Ok(written)
    }

    async fn delete_buckets(&self, typ: SummaryType, user_id: &str) -> RepositoryResult<usize> {
        validate_user_id(user_id, "delete_buckets")?;
        let mut data = self.data.write();
        data.ensure_healthy("delete_buckets")?;

        Ok(data
            .buckets
            .remove(&(typ, user_id.to_string()))
            .map_or(0, |b| b.len()))
    }
}

#[async_trait]
impl SummaryRepository for LocalRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(self.data.read().is_healthy)
    }

    async fn get_summary(
        &self,
        typ: SummaryType,
        user_id: &str,
    ) -> RepositoryResult<Option<Summary>> {
        validate_user_id(user_id, "get_summary")?;
        let data = self.data.read();
        data.ensure_healthy("get_summary")?;
        Ok(data.summaries.get(&(typ, user_id.to_string())).cloned())
    }

    async fn upsert_summary(&self, typ: SummaryType, summary: &Summary) -> RepositoryResult<()> {
        validate_user_id(&summary.user_id, "upsert_summary")?;
        if summary.summary_type != typ {
            return Err(RepositoryError::validation_with_context(
                format!(
                    "summary type {} does not match store type {}",
                    summary.summary_type, typ
                ),
                ErrorContext::new("upsert_summary")
                    .with_entity("summary")
                    .with_entity_id(&summary.user_id),
            ));
        }

        let mut data = self.data.write();
        data.ensure_healthy("upsert_summary")?;
        data.summaries
            .insert((typ, summary.user_id.clone()), summary.clone());
        Ok(())
    }

    async fn create_summaries(
        &self,
        typ: SummaryType,
        summaries: Vec<Summary>,
    ) -> RepositoryResult<usize> {
        if summaries.is_empty() {
            return Err(RepositoryError::validation_with_context(
                "no summaries to create",
                ErrorContext::new("create_summaries"),
            ));
        }
        for (i, summary) in summaries.iter().enumerate() {
            validate_user_id(&summary.user_id, "create_summaries")?;
            if summary.summary_type != typ {
                return Err(RepositoryError::validation_with_context(
                    format!("summary {} has type {}, expected {}", i, summary.summary_type, typ),
                    ErrorContext::new("create_summaries").with_entity("summary"),
                ));
            }
        }

        let mut data = self.data.write();
        data.ensure_healthy("create_summaries")?;

        let total = summaries.len();
        let mut duplicates = Vec::new();
        for summary in summaries {
            let key = (typ, summary.user_id.clone());
            if data.summaries.contains_key(&key) {
                duplicates.push(summary.user_id);
                continue;
            }
            data.summaries.insert(key, summary);
        }

        let inserted = total - duplicates.len();
        if duplicates.is_empty() {
            return Ok(inserted);
        }

        let context = ErrorContext::new("create_summaries")
            .with_entity("summary")
            .with_details(format!("already exist: {}", duplicates.join(", ")));
        if inserted == 0 {
            Err(RepositoryError::query_with_context(
                "unable to create summaries",
                context,
            ))
        } else {
            Err(RepositoryError::partial_write(
                inserted,
                format!("{} of {} summaries created", inserted, total),
                context,
            ))
        }
    }

    async fn get_outdated_user_ids(
        &self,
        typ: SummaryType,
        pagination: &Pagination,
    ) -> RepositoryResult<Vec<String>> {
        pagination.validate()?;
        let now = Utc::now();
        let data = self.data.read();
        data.ensure_healthy("get_outdated_user_ids")?;

        let mut outdated: Vec<(DateTime<Utc>, &str)> = data
            .summaries
            .values()
            .filter(|s| s.summary_type == typ && s.is_outdated(now))
            .filter_map(|s| s.dates.outdated_since.map(|since| (since, s.user_id.as_str())))
            .collect();
        outdated.sort();

        Ok(outdated
            .into_iter()
            .take(pagination.size)
            .map(|(_, user_id)| user_id.to_string())
            .collect())
    }

    async fn get_migratable_user_ids(
        &self,
        typ: SummaryType,
        pagination: &Pagination,
    ) -> RepositoryResult<Vec<String>> {
        pagination.validate()?;
        let data = self.data.read();
        data.ensure_healthy("get_migratable_user_ids")?;

        let mut migratable: Vec<(Option<DateTime<Utc>>, &str)> = data
            .summaries
            .values()
            .filter(|s| s.summary_type == typ && s.is_migratable())
            .map(|s| (s.dates.last_updated_date, s.user_id.as_str()))
            .collect();
        migratable.sort();

        Ok(migratable
            .into_iter()
            .take(pagination.size)
            .map(|(_, user_id)| user_id.to_string())
            .collect())
    }

    async fn distinct_summary_ids(&self, typ: SummaryType) -> RepositoryResult<Vec<String>> {
        let data = self.data.read();
        data.ensure_healthy("distinct_summary_ids")?;

        let mut ids: Vec<String> = data
            .summaries
            .keys()
            .filter(|(t, _)| *t == typ)
            .map(|(_, user_id)| user_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_summary(&self, typ: SummaryType, user_id: &str) -> RepositoryResult<bool> {
        validate_user_id(user_id, "delete_summary")?;
        let mut data = self.data.write();
        data.ensure_healthy("delete_summary")?;
        Ok(data.summaries.remove(&(typ, user_id.to_string())).is_some())
    }
}

#[async_trait]
impl DeviceDataRepository for LocalRepository {
    async fn get_last_updated_for_user(
        &self,
        typ: SummaryType,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> RepositoryResult<Option<UserDataStatus>> {
        validate_user_id(user_id, "get_last_updated_for_user")?;
        let data = self.data.read();
        data.ensure_healthy("get_last_updated_for_user")?;

        let mut status: Option<UserDataStatus> = None;
        for datum in data.live_records(typ, user_id) {
            let s = status.get_or_insert(UserDataStatus {
                first_data: datum.time,
                last_data: datum.time,
                last_upload: datum.created_time,
                earliest_modified: None,
            });
            s.first_data = s.first_data.min(datum.time);
            s.last_data = s.last_data.max(datum.time);
            s.last_upload = s.last_upload.max(datum.created_time);
        }

        let Some(mut status) = status else {
            return Ok(None);
        };

        // Tombstones count: removing a record invalidates its hour too.
        if let Some(since) = since {
            status.earliest_modified = data
                .records
                .get(user_id)
                .into_iter()
                .flatten()
                .filter(|r| typ.accepts(r.datum.kind) && r.datum.modified_time > since)
                .map(|r| r.datum.time)
                .min();
        }
        Ok(Some(status))
    }

    async fn get_data_range(
        &self,
        typ: SummaryType,
        user_id: &str,
        after: Option<DateTime<Utc>>,
        through: DateTime<Utc>,
    ) -> RepositoryResult<DatumStream> {
        validate_user_id(user_id, "get_data_range")?;
        let data = self.data.read();
        data.ensure_healthy("get_data_range")?;

        let mut records: Vec<GlucoseDatum> = data
            .live_records(typ, user_id)
            .filter(|d| after.map_or(true, |after| d.time > after) && d.time <= through)
            .cloned()
            .collect();
        records.sort_by_key(|d| d.time);

        Ok(futures::stream::iter(records.into_iter().map(Ok)).boxed())
    }

    async fn distinct_data_user_ids(&self, typ: SummaryType) -> RepositoryResult<Vec<String>> {
        let data = self.data.read();
        data.ensure_healthy("distinct_data_user_ids")?;

        let mut ids: Vec<String> = data
            .records
            .keys()
            .filter(|user_id| data.live_records(typ, user_id).next().is_some())
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}
