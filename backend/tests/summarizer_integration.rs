//! End-to-end tests of the summarizer against the in-memory repository.
//!
//! Each test seeds raw records, runs `update_summary` and inspects the stored
//! buckets and summary the way a caller of the library would.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::TryStreamExt;
use parking_lot::Mutex;
use std::sync::Arc;

use glycemic_summary::db::models::{
    BucketStream, DatumStream, Pagination, SortDirection, UserDataStatus, HOURS_AGO_TO_KEEP,
};
use glycemic_summary::db::repositories::LocalRepository;
use glycemic_summary::db::repository::{
    BucketRepository, DeviceDataRepository, RepositoryResult, SummaryRepository,
};
use glycemic_summary::models::{
    reasons, Bucket, BucketData, BucketsByTime, DatumKind, GlucoseDatum, GlucoseUnits, Summary,
    SummaryType,
};
use glycemic_summary::services::{
    get_realtime_days_for_users, process_outdated, Summarizer, SummarizerConfig,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 1, 8, 0, 0).unwrap()
}

fn record(
    user_id: &str,
    kind: DatumKind,
    time: DateTime<Utc>,
    value_mmol: f64,
    latency: Duration,
) -> GlucoseDatum {
    GlucoseDatum {
        user_id: user_id.to_string(),
        device_id: "DexG6-SN123".to_string(),
        kind,
        time,
        created_time: time + latency,
        modified_time: time + latency,
        value: value_mmol,
        units: GlucoseUnits::MmolL,
    }
}

fn cbg(user_id: &str, time: DateTime<Utc>, value_mmol: f64) -> GlucoseDatum {
    record(user_id, DatumKind::Cbg, time, value_mmol, Duration::minutes(5))
}

fn summarizer(repo: &LocalRepository, typ: SummaryType) -> Summarizer {
    Summarizer::new(typ, Arc::new(repo.clone()), SummarizerConfig::default())
}

async fn all_buckets(repo: &LocalRepository, typ: SummaryType, user_id: &str) -> Vec<Bucket> {
    repo.get_all_buckets(typ, user_id)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap()
}

fn total_records(summary: &Summary, label: &str) -> i64 {
    summary.periods[label].total_records()
}

#[tokio::test]
async fn test_five_hours_of_data_build_five_buckets() {
    let repo = LocalRepository::new();
    repo.insert_data((0..5).map(|h| cbg("u1", start() + Duration::hours(h), 6.0)));

    let summary = summarizer(&repo, SummaryType::Cgm)
        .update_summary("u1")
        .await
        .unwrap()
        .unwrap();

    let buckets = all_buckets(&repo, SummaryType::Cgm, "u1").await;
    assert_eq!(buckets.len(), 5);
    assert!(buckets.iter().all(|b| b.data.total_records() == 1));
    assert_eq!(total_records(&summary, "7d"), 5);
    assert_eq!(summary.dates.first_data, Some(start()));
    assert_eq!(summary.dates.last_data, Some(start() + Duration::hours(4)));

    let week = summary.periods["7d"].as_glucose().unwrap();
    assert_eq!(week.hours_with_data, 5);
    assert_eq!(week.days_with_data, 1);
    assert_eq!(week.ranges.target.records, 5);
    assert_eq!(week.ranges.total.minutes, 25);
    assert_eq!(week.gmi, Some(5.9));
}

#[tokio::test]
async fn test_incremental_update_only_adds_new_records() {
    let repo = LocalRepository::new();
    let s = summarizer(&repo, SummaryType::Cgm);
    repo.insert_data((0..3).map(|h| cbg("u1", start() + Duration::hours(h), 6.0)));
    s.update_summary("u1").await.unwrap();

    repo.insert_data((3..6).map(|h| cbg("u1", start() + Duration::hours(h), 6.0)));
    let summary = s.update_summary("u1").await.unwrap().unwrap();

    assert_eq!(total_records(&summary, "7d"), 6);
    assert_eq!(repo.bucket_count(SummaryType::Cgm, "u1"), 6);
}

#[tokio::test]
async fn test_out_of_order_upload_invalidates_later_buckets() {
    let repo = LocalRepository::new();
    let s = summarizer(&repo, SummaryType::Cgm);
    repo.insert_data((0..5).map(|h| cbg("u1", start() + Duration::hours(h), 6.0)));
    let before = s.update_summary("u1").await.unwrap().unwrap();
    assert_eq!(total_records(&before, "7d"), 5);

    // A late upload lands inside an hour that was already summarized.
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    repo.insert_data([cbg("u1", start() + Duration::hours(2) + Duration::minutes(30), 12.0)]);

    let after = s.update_summary("u1").await.unwrap().unwrap();
    assert_eq!(total_records(&after, "7d"), 6);

    let buckets = all_buckets(&repo, SummaryType::Cgm, "u1").await;
    let hour_two = buckets
        .iter()
        .find(|b| b.time == start() + Duration::hours(2))
        .unwrap();
    assert_eq!(hour_two.data.total_records(), 2);
    match &hour_two.data {
        BucketData::Glucose(ranges) => assert_eq!(ranges.high.records, 1),
        other => panic!("unexpected bucket data {:?}", other),
    }
}

#[tokio::test]
async fn test_removing_all_data_deletes_summary() {
    let repo = LocalRepository::new();
    let s = summarizer(&repo, SummaryType::Cgm);
    repo.insert_data((0..5).map(|h| cbg("u1", start() + Duration::hours(h), 6.0)));
    s.update_summary("u1").await.unwrap();

    repo.remove_data("u1", start() - Duration::days(1), start() + Duration::days(1));
    assert!(s.update_summary("u1").await.unwrap().is_none());
    assert!(s.get_summary("u1").await.unwrap().is_none());
    assert_eq!(repo.bucket_count(SummaryType::Cgm, "u1"), 0);
}

#[tokio::test]
async fn test_removing_newest_data_rolls_summary_back() {
    let repo = LocalRepository::new();
    let s = summarizer(&repo, SummaryType::Cgm);
    repo.insert_data((0..5).map(|h| cbg("u1", start() + Duration::hours(h), 6.0)));
    s.update_summary("u1").await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    repo.remove_data("u1", start() + Duration::hours(3), start() + Duration::hours(4));
    let summary = s.update_summary("u1").await.unwrap().unwrap();

    assert_eq!(total_records(&summary, "7d"), 3);
    assert_eq!(summary.dates.last_data, Some(start() + Duration::hours(2)));
}

#[tokio::test]
async fn test_trimming_keeps_retention_window() {
    let repo = LocalRepository::new();
    let s = summarizer(&repo, SummaryType::Cgm);
    repo.insert_data([cbg("u1", start(), 6.0)]);
    s.update_summary("u1").await.unwrap();

    let later = start() + Duration::hours(HOURS_AGO_TO_KEEP + 24);
    repo.insert_data([cbg("u1", later, 6.0)]);
    let summary = s.update_summary("u1").await.unwrap().unwrap();

    let buckets = all_buckets(&repo, SummaryType::Cgm, "u1").await;
    assert_eq!(buckets.len(), 1);
    let newest = buckets[0].time;
    assert!(buckets
        .iter()
        .all(|b| b.time >= newest - Duration::hours(HOURS_AGO_TO_KEEP)));
    assert_eq!(summary.dates.first_data, Some(later));
}

#[tokio::test]
async fn test_offset_periods_cover_previous_window() {
    let repo = LocalRepository::new();
    let now = start() + Duration::days(10);
    repo.insert_data([
        cbg("u1", now, 6.0),
        cbg("u1", now - Duration::hours(30), 8.0),
        cbg("u1", now - Duration::days(9), 9.0),
    ]);

    let summary = summarizer(&repo, SummaryType::Cgm)
        .update_summary("u1")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(total_records(&summary, "1d"), 1);
    assert_eq!(summary.offset_periods["1d"].total_records(), 1);
    assert_eq!(total_records(&summary, "7d"), 2);
    assert_eq!(summary.offset_periods["7d"].total_records(), 1);
    assert_eq!(total_records(&summary, "30d"), 3);
    assert_eq!(summary.offset_periods["30d"].total_records(), 0);

    let day = summary.periods["1d"].as_glucose().unwrap();
    let delta = day.delta.as_ref().unwrap();
    assert_eq!(delta.ranges.total.records, 0);
}

#[tokio::test]
async fn test_bgm_counts_meter_readings_only() {
    let repo = LocalRepository::new();
    repo.insert_data([
        record("u1", DatumKind::Smbg, start(), 3.5, Duration::minutes(1)),
        record("u1", DatumKind::Smbg, start() + Duration::hours(1), 7.0, Duration::minutes(1)),
        record("u1", DatumKind::Smbg, start() + Duration::hours(2), 15.0, Duration::minutes(1)),
        record("u1", DatumKind::Smbg, start() + Duration::hours(3), 7.5, Duration::minutes(1)),
        cbg("u1", start() + Duration::hours(4), 6.0),
    ]);

    let summary = summarizer(&repo, SummaryType::Bgm)
        .update_summary("u1")
        .await
        .unwrap()
        .unwrap();

    let week = summary.periods["7d"].as_glucose().unwrap();
    assert_eq!(week.ranges.total.records, 4);
    assert_eq!(week.ranges.low.records, 1);
    assert_eq!(week.ranges.target.records, 2);
    assert_eq!(week.ranges.very_high.records, 1);
    assert!((week.ranges.target.percent - 0.5).abs() < 1e-9);
    assert!(week.gmi.is_none());
}

#[tokio::test]
async fn test_continuous_splits_realtime_and_deferred() {
    let repo = LocalRepository::new();
    repo.insert_data([
        record("u1", DatumKind::Cbg, start(), 6.0, Duration::minutes(5)),
        record("u1", DatumKind::Smbg, start() + Duration::hours(1), 6.0, Duration::hours(2)),
        record("u1", DatumKind::Cbg, start() + Duration::hours(2), 6.0, Duration::hours(30)),
    ]);

    let summary = summarizer(&repo, SummaryType::Continuous)
        .update_summary("u1")
        .await
        .unwrap()
        .unwrap();

    let week = summary.periods["7d"].as_continuous().unwrap();
    assert_eq!(week.ranges.total.records, 3);
    assert_eq!(week.ranges.realtime.records, 2);
    assert_eq!(week.ranges.deferred.records, 1);

    let users = vec!["u1".to_string(), "nobody".to_string()];
    let days = get_realtime_days_for_users(
        &repo,
        &users,
        start() - Duration::days(1),
        start() + Duration::days(1),
    )
    .await
    .unwrap();
    assert_eq!(days["u1"], 1);
    assert_eq!(days["nobody"], 0);
}

#[tokio::test]
async fn test_outdated_sweep_recomputes_flagged_users() {
    let repo = LocalRepository::new();
    let s = summarizer(&repo, SummaryType::Cgm);
    for user_id in ["a", "b", "c"] {
        repo.insert_data([cbg(user_id, start(), 6.0)]);
        s.set_outdated(user_id, reasons::UPLOAD_COMPLETED).await.unwrap();
    }

    let first = process_outdated(&s, &Pagination::new(2)).await.unwrap();
    assert_eq!(first.processed, 2);
    let second = process_outdated(&s, &Pagination::new(2)).await.unwrap();
    assert_eq!(second.processed, 1);

    for user_id in ["a", "b", "c"] {
        let summary = repo.get_summary(SummaryType::Cgm, user_id).await.unwrap().unwrap();
        assert!(summary.dates.outdated_since.is_none());
        assert!(summary
            .dates
            .last_updated_reason
            .contains(reasons::UPLOAD_COMPLETED));
    }
}

/// Local store that ingests a pending upload the first time raw data is read,
/// the way a concurrent upload lands while a recompute is folding.
struct UploadDuringFold {
    inner: LocalRepository,
    pending: Mutex<Option<GlucoseDatum>>,
}

impl UploadDuringFold {
    fn new(inner: LocalRepository, upload: GlucoseDatum) -> Self {
        Self {
            inner,
            pending: Mutex::new(Some(upload)),
        }
    }
}

#[async_trait]
impl BucketRepository for UploadDuringFold {
    async fn get_buckets_by_time(
        &self,
        typ: SummaryType,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<BucketsByTime> {
        self.inner.get_buckets_by_time(typ, user_id, start, end).await
    }

    async fn get_buckets_range(
        &self,
        typ: SummaryType,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> RepositoryResult<BucketStream> {
        self.inner.get_buckets_range(typ, user_id, start, end).await
    }

    async fn get_end(
        &self,
        typ: SummaryType,
        user_id: &str,
        direction: SortDirection,
    ) -> RepositoryResult<Option<Bucket>> {
        self.inner.get_end(typ, user_id, direction).await
    }

    async fn trim_excess_buckets(
        &self,
        typ: SummaryType,
        user_id: &str,
    ) -> RepositoryResult<usize> {
        self.inner.trim_excess_buckets(typ, user_id).await
    }

    async fn clear_invalidated_buckets(
        &self,
        typ: SummaryType,
        user_id: &str,
        earliest_modified: DateTime<Utc>,
    ) -> RepositoryResult<Option<DateTime<Utc>>> {
        self.inner
            .clear_invalidated_buckets(typ, user_id, earliest_modified)
            .await
    }

    async fn write_modified_buckets(&self, buckets: BucketsByTime) -> RepositoryResult<usize> {
        self.inner.write_modified_buckets(buckets).await
    }

    async fn delete_buckets(&self, typ: SummaryType, user_id: &str) -> RepositoryResult<usize> {
        self.inner.delete_buckets(typ, user_id).await
    }
}

#[async_trait]
impl SummaryRepository for UploadDuringFold {
    async fn health_check(&self) -> RepositoryResult<bool> {
        self.inner.health_check().await
    }

    async fn get_summary(
        &self,
        typ: SummaryType,
        user_id: &str,
    ) -> RepositoryResult<Option<Summary>> {
        self.inner.get_summary(typ, user_id).await
    }

    async fn upsert_summary(&self, typ: SummaryType, summary: &Summary) -> RepositoryResult<()> {
        self.inner.upsert_summary(typ, summary).await
    }

    async fn create_summaries(
        &self,
        typ: SummaryType,
        summaries: Vec<Summary>,
    ) -> RepositoryResult<usize> {
        self.inner.create_summaries(typ, summaries).await
    }

    async fn get_outdated_user_ids(
        &self,
        typ: SummaryType,
        pagination: &Pagination,
    ) -> RepositoryResult<Vec<String>> {
        self.inner.get_outdated_user_ids(typ, pagination).await
    }

    async fn get_migratable_user_ids(
        &self,
        typ: SummaryType,
        pagination: &Pagination,
    ) -> RepositoryResult<Vec<String>> {
        self.inner.get_migratable_user_ids(typ, pagination).await
    }

    async fn distinct_summary_ids(&self, typ: SummaryType) -> RepositoryResult<Vec<String>> {
        self.inner.distinct_summary_ids(typ).await
    }

    async fn delete_summary(&self, typ: SummaryType, user_id: &str) -> RepositoryResult<bool> {
        self.inner.delete_summary(typ, user_id).await
    }
}

#[async_trait]
impl DeviceDataRepository for UploadDuringFold {
    async fn get_last_updated_for_user(
        &self,
        typ: SummaryType,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> RepositoryResult<Option<UserDataStatus>> {
        self.inner.get_last_updated_for_user(typ, user_id, since).await
    }

    async fn get_data_range(
        &self,
        typ: SummaryType,
        user_id: &str,
        after: Option<DateTime<Utc>>,
        through: DateTime<Utc>,
    ) -> RepositoryResult<DatumStream> {
        let upload = self.pending.lock().take();
        if let Some(datum) = upload {
            self.inner.insert_data([datum]);
            self.inner
                .set_outdated(typ, user_id, reasons::DATA_ADDED)
                .await?;
        }
        self.inner.get_data_range(typ, user_id, after, through).await
    }

    async fn distinct_data_user_ids(&self, typ: SummaryType) -> RepositoryResult<Vec<String>> {
        self.inner.distinct_data_user_ids(typ).await
    }
}

#[tokio::test]
async fn test_upload_during_recompute_is_picked_up_next_run() {
    let repo = LocalRepository::new();
    let s = summarizer(&repo, SummaryType::Cgm);
    repo.insert_data((0..6).map(|h| cbg("u1", start() + Duration::hours(h), 6.0)));
    s.update_summary("u1").await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    repo.insert_data([cbg("u1", start() + Duration::hours(6), 6.0)]);

    // A late reading for an hour that is already summarized arrives mid-fold.
    let late = cbg("u1", start() + Duration::hours(1) + Duration::minutes(30), 6.0);
    let racing = Summarizer::new(
        SummaryType::Cgm,
        Arc::new(UploadDuringFold::new(repo.clone(), late)),
        SummarizerConfig::default(),
    );
    let during = racing.update_summary("u1").await.unwrap().unwrap();
    assert_eq!(total_records(&during, "7d"), 7);
    assert!(during.dates.outdated_since.is_some());
    assert!(during.dates.outdated_reason.contains(reasons::DATA_ADDED));
    assert_eq!(
        s.get_outdated_user_ids(&Pagination::default()).await.unwrap(),
        vec!["u1".to_string()]
    );

    let after = s.update_summary("u1").await.unwrap().unwrap();
    assert_eq!(total_records(&after, "7d"), 8);
    assert!(after.dates.outdated_since.is_none());
    let hour_one = all_buckets(&repo, SummaryType::Cgm, "u1")
        .await
        .into_iter()
        .find(|b| b.time == start() + Duration::hours(1))
        .unwrap();
    assert_eq!(hour_one.data.total_records(), 2);
}
