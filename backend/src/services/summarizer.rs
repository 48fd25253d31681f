//! Summary recomputation for one summary type.
//!
//! A [`Summarizer`] folds new raw records into hourly buckets, trims and
//! invalidates buckets as needed, and rolls the buckets up into the 1, 7, 14
//! and 30 day periods stored on the user's summary.

use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use log::{debug, info};
use std::sync::Arc;

use crate::db::models::{Pagination, HOURS_AGO_TO_KEEP};
use crate::db::repository::{validate_user_id, FullRepository, RepositoryError, RepositoryResult};
use crate::models::bucket::DEFAULT_REALTIME_LATENCY_HOURS;
use crate::models::{
    reasons, BucketsByTime, Dates, GlucoseDatum, PeriodAccumulator, PeriodMap, StatsError, Summary,
    SummaryConfig, SummaryType, UpdateOptions, SCHEMA_VERSION,
};
use crate::models::time::truncate_to_hour;

/// Tunables of the summarizer and the sweeps built on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarizerConfig {
    /// Raw records folded into buckets per bucket write.
    pub data_batch_size: usize,
    /// Largest upload delay for a continuous record to count as realtime.
    pub realtime_latency_hours: i64,
    /// Users recomputed concurrently by a sweep.
    pub sweep_concurrency: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            data_batch_size: 200,
            realtime_latency_hours: DEFAULT_REALTIME_LATENCY_HOURS,
            sweep_concurrency: 4,
        }
    }
}

impl SummarizerConfig {
    /// Defaults with `SUMMARY_*` environment overrides applied.
    pub fn from_env() -> RepositoryResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `SUMMARY_DATA_BATCH_SIZE`, `SUMMARY_REALTIME_LATENCY_HOURS` and
    /// `SUMMARY_SWEEP_CONCURRENCY` when set.
    pub fn with_env_overrides(self) -> RepositoryResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by variable name.
    pub fn with_overrides<F>(mut self, lookup: F) -> RepositoryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SUMMARY_DATA_BATCH_SIZE") {
            self.data_batch_size = parse_setting("SUMMARY_DATA_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("SUMMARY_REALTIME_LATENCY_HOURS") {
            self.realtime_latency_hours = parse_setting("SUMMARY_REALTIME_LATENCY_HOURS", &value)?;
        }
        if let Some(value) = lookup("SUMMARY_SWEEP_CONCURRENCY") {
            self.sweep_concurrency = parse_setting("SUMMARY_SWEEP_CONCURRENCY", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> RepositoryResult<()> {
        if self.data_batch_size == 0 {
            return Err(RepositoryError::configuration("data_batch_size must be positive"));
        }
        if self.realtime_latency_hours <= 0 {
            return Err(RepositoryError::configuration(
                "realtime_latency_hours must be positive",
            ));
        }
        if self.sweep_concurrency == 0 {
            return Err(RepositoryError::configuration("sweep_concurrency must be positive"));
        }
        Ok(())
    }

    pub fn realtime_latency(&self) -> Duration {
        Duration::hours(self.realtime_latency_hours)
    }
}

fn parse_setting<T: std::str::FromStr>(key: &str, value: &str) -> RepositoryResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RepositoryError::configuration(format!("invalid {}: {:?}", key, value)))
}

fn stats_error<'a>(
    operation: &'static str,
    user_id: &'a str,
) -> impl Fn(StatsError) -> RepositoryError + 'a {
    move |err| {
        RepositoryError::from(err)
            .with_operation(operation)
            .with_entity_id(user_id)
    }
}

/// Recomputes and serves summaries of one type.
pub struct Summarizer {
    typ: SummaryType,
    repo: Arc<dyn FullRepository>,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(typ: SummaryType, repo: Arc<dyn FullRepository>, config: SummarizerConfig) -> Self {
        Self { typ, repo, config }
    }

    pub fn summary_type(&self) -> SummaryType {
        self.typ
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn FullRepository> {
        &self.repo
    }

    pub async fn get_summary(&self, user_id: &str) -> RepositoryResult<Option<Summary>> {
        self.repo.get_summary(self.typ, user_id).await
    }

    /// Flag a user's summary for recomputation.
    ///
    /// # Returns
    /// * `Ok(DateTime)` - The effective `outdated_since`
    pub async fn set_outdated(
        &self,
        user_id: &str,
        reason: &str,
    ) -> RepositoryResult<DateTime<Utc>> {
        let since = self.repo.set_outdated(self.typ, user_id, reason).await?;
        debug!("{} summary of {} outdated since {} ({})", self.typ, user_id, since, reason);
        Ok(since)
    }

    pub async fn get_outdated_user_ids(
        &self,
        pagination: &Pagination,
    ) -> RepositoryResult<Vec<String>> {
        self.repo.get_outdated_user_ids(self.typ, pagination).await
    }

    pub async fn get_migratable_user_ids(
        &self,
        pagination: &Pagination,
    ) -> RepositoryResult<Vec<String>> {
        self.repo.get_migratable_user_ids(self.typ, pagination).await
    }

    /// Bring a user's buckets and summary up to date with their raw data.
    ///
    /// # Returns
    /// * `Ok(Some(Summary))` - The stored summary
    /// * `Ok(None)` - The user has no data; any summary and buckets were deleted
    /// * `Err(RepositoryError)` - A store call or statistics invariant failed;
    ///   the stored summary is left untouched
    pub async fn update_summary(&self, user_id: &str) -> RepositoryResult<Option<Summary>> {
        validate_user_id(user_id, "update_summary")?;
        let typ = self.typ;

        let mut summary = self
            .repo
            .get_summary(typ, user_id)
            .await?
            .unwrap_or_else(|| Summary::new(typ, user_id));
        let loaded = summary.dates.clone();

        if summary.is_migratable() {
            info!(
                "Rebuilding {} summary of {} from schema version {}",
                typ, user_id, summary.config.schema_version
            );
            self.repo.delete_buckets(typ, user_id).await?;
            summary.dates.reset_data_range();
            summary.dates.outdated_reason.insert(reasons::SCHEMA_MIGRATION);
            summary.config = SummaryConfig::default();
        }

        // Records written after this instant are left for the next run.
        let cutoff = Utc::now();
        let Some(status) = self
            .repo
            .get_last_updated_for_user(typ, user_id, summary.dates.last_updated_date)
            .await?
        else {
            self.delete_user(user_id).await?;
            return Ok(None);
        };

        let mut continue_from = summary.dates.last_data;
        if let (Some(earliest), Some(last_data)) =
            (status.earliest_modified, summary.dates.last_data)
        {
            if earliest <= last_data {
                continue_from = self
                    .repo
                    .clear_invalidated_buckets(typ, user_id, earliest)
                    .await?;
                debug!(
                    "{} data of {} modified at {}, continuing from {:?}",
                    typ, user_id, earliest, continue_from
                );
            }
        }

        let retention_start = status.last_data - Duration::hours(HOURS_AGO_TO_KEEP);
        let after = continue_from.map_or(retention_start, |from| from.max(retention_start));
        let counted = self
            .fold_new_data(&summary, user_id, after, status.last_data)
            .await?;

        self.repo.trim_excess_buckets(typ, user_id).await?;

        let Some((periods, offset_periods)) = self.compute_periods(user_id).await? else {
            self.delete_user(user_id).await?;
            return Ok(None);
        };

        let pending = std::mem::take(&mut summary.dates.outdated_reason);
        summary.dates.last_updated_reason.merge(&pending);
        summary.dates.outdated_since = None;
        self.carry_late_changes(&mut summary, &loaded, cutoff).await?;
        summary.dates.first_data = self.repo.get_oldest_record_time(typ, user_id).await?;
        summary.dates.last_data = self.repo.get_newest_record_time(typ, user_id).await?;
        summary.dates.last_upload_date = Some(status.last_upload);
        summary.dates.last_updated_date = Some(cutoff);
        summary.config.schema_version = SCHEMA_VERSION;
        summary.periods = periods;
        summary.offset_periods = offset_periods;

        self.repo.upsert_summary(typ, &summary).await?;
        info!(
            "Updated {} summary of {}: {} new records, data through {:?}",
            typ, user_id, counted, summary.dates.last_data
        );
        Ok(Some(summary))
    }

    /// Keep the summary outdated when it was flagged, or its data changed,
    /// while this run was computing.
    async fn carry_late_changes(
        &self,
        summary: &mut Summary,
        loaded: &Dates,
        cutoff: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let user_id = summary.user_id.clone();
        if let Some(stored) = self.repo.get_summary(self.typ, &user_id).await? {
            let flags = &stored.dates;
            if flags.outdated_since.is_some()
                && (flags.outdated_since != loaded.outdated_since
                    || flags.outdated_reason != loaded.outdated_reason)
            {
                summary.dates.outdated_since = flags.outdated_since;
                summary.dates.outdated_reason = flags.outdated_reason.clone();
            }
        }

        let late = self
            .repo
            .get_last_updated_for_user(self.typ, &user_id, Some(cutoff))
            .await?
            .and_then(|status| status.earliest_modified);
        if let Some(earliest) = late {
            debug!(
                "{} data of {} modified at {} during recompute",
                self.typ, user_id, earliest
            );
            summary.set_outdated(reasons::DATA_ADDED, Utc::now());
        }
        Ok(())
    }

    /// Stream the records in `(after, through]` into buckets.
    async fn fold_new_data(
        &self,
        summary: &Summary,
        user_id: &str,
        after: DateTime<Utc>,
        through: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        let opts = UpdateOptions {
            thresholds: summary.config.thresholds,
            realtime_latency: self.config.realtime_latency(),
        };

        let mut data = self
            .repo
            .get_data_range(self.typ, user_id, Some(after), through)
            .await?;
        let mut batch = Vec::with_capacity(self.config.data_batch_size);
        let mut counted = 0;
        while let Some(datum) = data.try_next().await? {
            batch.push(datum);
            if batch.len() >= self.config.data_batch_size {
                counted += self.update_buckets(user_id, &batch, &opts).await?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            counted += self.update_buckets(user_id, &batch, &opts).await?;
        }
        Ok(counted)
    }

    /// Fold one ascending batch into its buckets and write the changed ones.
    async fn update_buckets(
        &self,
        user_id: &str,
        batch: &[GlucoseDatum],
        opts: &UpdateOptions,
    ) -> RepositoryResult<usize> {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return Ok(0);
        };

        // The hour before the batch is loaded too; CGM overlap is checked
        // against its last reading.
        let mut buckets: BucketsByTime = self
            .repo
            .get_buckets_by_time(
                self.typ,
                user_id,
                truncate_to_hour(first.time) - Duration::hours(1),
                truncate_to_hour(last.time),
            )
            .await?;
        let counted = buckets
            .update(user_id, self.typ, batch, opts)
            .map_err(stats_error("update_buckets", user_id))?;
        let written = self.repo.write_modified_buckets(buckets).await?;

        debug!(
            "{} of {}: counted {} of {} records into {} buckets",
            self.typ,
            user_id,
            counted,
            batch.len(),
            written
        );
        Ok(counted)
    }

    /// Roll every stored bucket into periods. `None` when no bucket exists.
    async fn compute_periods(
        &self,
        user_id: &str,
    ) -> RepositoryResult<Option<(PeriodMap, PeriodMap)>> {
        let mut buckets = self.repo.get_all_buckets(self.typ, user_id).await?;
        let mut accumulator = PeriodAccumulator::new(self.typ);
        while let Some(bucket) = buckets.try_next().await? {
            accumulator
                .push(&bucket)
                .map_err(stats_error("compute_periods", user_id))?;
        }

        if accumulator.buckets_seen() == 0 {
            return Ok(None);
        }
        let periods = accumulator
            .finish()
            .map_err(stats_error("compute_periods", user_id))?;
        Ok(Some(periods))
    }

    async fn delete_user(&self, user_id: &str) -> RepositoryResult<()> {
        let buckets = self.repo.delete_buckets(self.typ, user_id).await?;
        let existed = self.repo.delete_summary(self.typ, user_id).await?;
        if existed || buckets > 0 {
            info!(
                "Deleted {} summary of {} ({} buckets): no data remains",
                self.typ, user_id, buckets
            );
        }
        Ok(())
    }
}
