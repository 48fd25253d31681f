//! Hourly pre-aggregated buckets.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::{StatsError, StatsResult};
use super::glucose::{GlucoseDatum, GlucoseThresholds};
use super::ranges::{ContinuousRanges, GlucoseRanges};
use super::summary_type::SummaryType;
use super::time::truncate_to_hour;

/// Default maximum upload delay for a continuous record to count as realtime.
pub const DEFAULT_REALTIME_LATENCY_HOURS: i64 = 24;

/// Type-specific bucket payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BucketData {
    Glucose(GlucoseRanges),
    Continuous(ContinuousRanges),
}

impl BucketData {
    pub fn empty(typ: SummaryType) -> Self {
        match typ {
            SummaryType::Cgm | SummaryType::Bgm => BucketData::Glucose(GlucoseRanges::default()),
            SummaryType::Continuous => BucketData::Continuous(ContinuousRanges::default()),
        }
    }

    pub fn total_records(&self) -> i64 {
        match self {
            BucketData::Glucose(r) => r.total.records,
            BucketData::Continuous(r) => r.total.records,
        }
    }

    pub fn realtime_records(&self) -> i64 {
        match self {
            BucketData::Glucose(_) => 0,
            BucketData::Continuous(r) => r.realtime.records,
        }
    }
}

/// Settings applied while folding records into buckets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateOptions {
    pub thresholds: GlucoseThresholds,
    pub realtime_latency: Duration,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            thresholds: GlucoseThresholds::default(),
            realtime_latency: Duration::hours(DEFAULT_REALTIME_LATENCY_HOURS),
        }
    }
}

/// One user's statistics for one hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub user_id: String,
    #[serde(rename = "type")]
    pub summary_type: SummaryType,
    /// Start of the hour this bucket covers.
    pub time: DateTime<Utc>,
    pub first_data: Option<DateTime<Utc>>,
    pub last_data: Option<DateTime<Utc>>,
    /// Sampling interval in minutes of the newest record.
    pub last_record_duration: i64,
    pub data: BucketData,
    #[serde(skip)]
    modified: bool,
}

impl Bucket {
    /// Create an empty bucket for the hour containing `time`.
    pub fn new(user_id: impl Into<String>, typ: SummaryType, time: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            summary_type: typ,
            time: truncate_to_hour(time),
            first_data: None,
            last_data: None,
            last_record_duration: 0,
            data: BucketData::empty(typ),
            modified: false,
        }
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Fold one record into the bucket.
    ///
    /// Returns `Ok(false)` when the record was skipped: a kind this summary
    /// does not count, a replay of an already counted record, or (CGM) a
    /// reading that overlaps the previous reading's sampling interval.
    pub fn update(&mut self, datum: &GlucoseDatum, opts: &UpdateOptions) -> StatsResult<bool> {
        if truncate_to_hour(datum.time) != self.time {
            return Err(StatsError::RecordOutsideBucket {
                record: datum.time,
                bucket: self.time,
            });
        }

        if !self.summary_type.accepts(datum.kind) {
            return Ok(false);
        }

        if let Some(last) = self.last_data {
            if datum.time <= last {
                return Ok(false);
            }
            if self.summary_type == SummaryType::Cgm
                && datum.time < last + Duration::minutes(self.last_record_duration)
            {
                return Ok(false);
            }
        }

        let minutes = match self.summary_type {
            SummaryType::Cgm => datum.duration_minutes(),
            SummaryType::Bgm | SummaryType::Continuous => 0,
        };

        match &mut self.data {
            BucketData::Glucose(ranges) => {
                let value = datum.value_mmol();
                let bin = opts.thresholds.classify(value);
                ranges.update(bin, value, minutes, self.summary_type.weighting());
            }
            BucketData::Continuous(ranges) => {
                ranges.update(datum.upload_latency() <= opts.realtime_latency);
            }
        }

        self.first_data.get_or_insert(datum.time);
        self.last_data = Some(datum.time);
        self.last_record_duration = minutes;
        self.modified = true;
        Ok(true)
    }
}

/// Buckets of a single reconciliation pass, addressed by hour.
#[derive(Debug, Clone, Default)]
pub struct BucketsByTime {
    buckets: HashMap<DateTime<Utc>, Bucket>,
}

impl BucketsByTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn get(&self, time: &DateTime<Utc>) -> Option<&Bucket> {
        self.buckets.get(time)
    }

    pub fn insert(&mut self, bucket: Bucket) -> Option<Bucket> {
        self.buckets.insert(bucket.time, bucket)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.values()
    }

    /// Fold a batch of records into their hourly buckets, creating buckets
    /// as needed. Returns how many records were counted.
    ///
    /// A CGM reading that opens an hour is checked against the previous
    /// hour's bucket, when present, so sampling intervals do not overlap
    /// across the boundary.
    pub fn update(
        &mut self,
        user_id: &str,
        typ: SummaryType,
        data: &[GlucoseDatum],
        opts: &UpdateOptions,
    ) -> StatsResult<usize> {
        let mut counted = 0;
        for datum in data {
            let hour = truncate_to_hour(datum.time);
            if typ == SummaryType::Cgm && self.overlaps_previous_hour(hour, datum) {
                continue;
            }
            let bucket = self
                .buckets
                .entry(hour)
                .or_insert_with(|| Bucket::new(user_id, typ, hour));
            if bucket.update(datum, opts)? {
                counted += 1;
            }
        }
        Ok(counted)
    }

    fn overlaps_previous_hour(&self, hour: DateTime<Utc>, datum: &GlucoseDatum) -> bool {
        if self.buckets.get(&hour).is_some_and(|b| b.last_data.is_some()) {
            return false;
        }
        self.buckets
            .get(&(hour - Duration::hours(1)))
            .and_then(|prev| {
                prev.last_data
                    .map(|last| last + Duration::minutes(prev.last_record_duration))
            })
            .is_some_and(|covered_until| datum.time < covered_until)
    }

    /// Drain the buckets that changed during this pass, oldest first.
    pub fn into_modified(self) -> Vec<Bucket> {
        let mut modified: Vec<Bucket> = self
            .buckets
            .into_values()
            .filter(Bucket::is_modified)
            .collect();
        modified.sort_by_key(|b| b.time);
        modified
    }
}

impl FromIterator<Bucket> for BucketsByTime {
    fn from_iter<I: IntoIterator<Item = Bucket>>(iter: I) -> Self {
        Self {
            buckets: iter.into_iter().map(|b| (b.time, b)).collect(),
        }
    }
}
