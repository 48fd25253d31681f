//! Rolling N-day periods derived from hourly buckets.
//!
//! Buckets are consumed newest first. Each configured window (1, 7, 14 and 30
//! days) ends at the hour after the newest bucket; an offset window of the
//! same length directly precedes it so the two can be compared for deltas.
//!
//! A period is a one-shot accumulator: it accepts buckets in strictly
//! descending time order, is finalized exactly once, and is frozen after that.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::bucket::{Bucket, BucketData};
use super::error::{StatsError, StatsResult};
use super::glucose::MMOL_TO_MGDL;
use super::ranges::{ContinuousRanges, GlucoseRanges, Range};
use super::summary_type::{SummaryType, Weighting};
use super::time::{next_hour, utc_day, MINUTES_PER_DAY};

/// Window lengths, in days, computed for every summary.
pub const PERIOD_DAYS: [i64; 4] = [1, 7, 14, 30];

/// Map key for a window length, e.g. `"7d"`.
pub fn period_label(days: i64) -> String {
    format!("{}d", days)
}

/// Maximum minutes of monitored time a window could contain.
///
/// Multi-day windows are treated as fully elapsed. A one-day window ends at
/// the hour after the last record, so the minutes between the end of the last
/// record's sampling interval and that hour have not happened yet and are
/// not counted.
pub fn calculate_wall_minutes(
    days: i64,
    last_record_time: DateTime<Utc>,
    last_record_duration: i64,
) -> f64 {
    let full = (days * MINUTES_PER_DAY) as f64;
    if days > 1 {
        return full;
    }

    let record_end = last_record_time + Duration::minutes(last_record_duration);
    let unelapsed = (next_hour(last_record_time) - record_end).num_seconds() as f64 / 60.0;
    full - unelapsed.max(0.0)
}

/// Glucose Management Indicator (%) from a mean glucose in mmol/L.
pub fn calculate_gmi(average_glucose_mmol: f64) -> f64 {
    let gmi = 3.31 + 0.02392 * average_glucose_mmol * MMOL_TO_MGDL;
    (gmi * 10.0).round() / 10.0
}

fn scalar_delta(a: f64, b: f64) -> (f64, f64) {
    (a - b, b - a)
}

fn count_delta(a: i64, b: i64) -> (i64, i64) {
    (a - b, b - a)
}

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator != 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Bookkeeping shared by all period kinds; never serialized.
#[derive(Debug, Clone, Default, PartialEq)]
struct Tracker {
    weighting: Weighting,
    oldest_counted: Option<DateTime<Utc>>,
    last_counted_day: Option<NaiveDate>,
    newest_record: Option<(DateTime<Utc>, i64)>,
    hours: i64,
    days: i64,
    finalized: bool,
    fully_elapsed: bool,
}

impl Tracker {
    fn new(weighting: Weighting, fully_elapsed: bool) -> Self {
        Self {
            weighting,
            fully_elapsed,
            ..Self::default()
        }
    }

    fn admit(&self, bucket: &Bucket) -> StatsResult<()> {
        if self.finalized {
            return Err(StatsError::PeriodFinalized);
        }
        if let Some(oldest) = self.oldest_counted {
            if bucket.time >= oldest {
                return Err(StatsError::BucketOutOfOrder {
                    bucket: bucket.time,
                    oldest,
                });
            }
        }
        Ok(())
    }

    fn record(&mut self, bucket: &Bucket) {
        self.oldest_counted = Some(bucket.time);
        if bucket.data.total_records() == 0 {
            return;
        }

        self.hours += 1;
        let day = utc_day(bucket.time);
        if self.last_counted_day != Some(day) {
            self.days += 1;
            self.last_counted_day = Some(day);
        }
        if self.newest_record.is_none() {
            self.newest_record = bucket
                .last_data
                .map(|t| (t, bucket.last_record_duration));
        }
    }

    fn finish(&mut self) -> StatsResult<()> {
        if self.finalized {
            return Err(StatsError::PeriodFinalized);
        }
        self.finalized = true;
        Ok(())
    }

    fn wall_minutes(&self, days: i64) -> f64 {
        match self.newest_record {
            Some((time, duration)) if !self.fully_elapsed => {
                calculate_wall_minutes(days, time, duration)
            }
            _ => (days * MINUTES_PER_DAY) as f64,
        }
    }
}

/// Common interface of the period kinds.
pub trait Statistics {
    /// Merge one bucket; buckets must arrive newest first.
    fn update(&mut self, bucket: &Bucket) -> StatsResult<()>;

    /// Convert accumulated counts into the reported statistics.
    fn finalize(&mut self, days: i64) -> StatsResult<()>;

    /// Record the difference against `offset` on both periods.
    fn compute_delta(&mut self, offset: &mut Self);

    fn total_records(&self) -> i64;

    fn is_finalized(&self) -> bool;
}

/// Statistics of a CGM or BGM window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucosePeriod {
    pub ranges: GlucoseRanges,
    pub any_low: Range,
    pub any_high: Range,
    pub average_glucose_mmol: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmi: Option<f64>,
    pub standard_deviation: f64,
    pub coefficient_of_variation: f64,
    pub hours_with_data: i64,
    pub days_with_data: i64,
    pub average_daily_records: f64,
    pub wall_minutes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Box<GlucosePeriod>>,
    #[serde(skip)]
    tracker: Tracker,
}

impl GlucosePeriod {
    pub fn new(weighting: Weighting) -> Self {
        Self {
            tracker: Tracker::new(weighting, false),
            ..Self::default()
        }
    }

    /// A period over a window that has already fully elapsed.
    pub fn new_offset(weighting: Weighting) -> Self {
        Self {
            tracker: Tracker::new(weighting, true),
            ..Self::default()
        }
    }
}

impl Statistics for GlucosePeriod {
    fn update(&mut self, bucket: &Bucket) -> StatsResult<()> {
        self.tracker.admit(bucket)?;
        let ranges = match &bucket.data {
            BucketData::Glucose(r) if bucket.summary_type.weighting() == self.tracker.weighting => r,
            _ => {
                return Err(StatsError::IncompatibleBucket {
                    actual: bucket.summary_type,
                })
            }
        };

        self.ranges.add(ranges, self.tracker.weighting);
        self.tracker.record(bucket);
        Ok(())
    }

    fn finalize(&mut self, days: i64) -> StatsResult<()> {
        self.tracker.finish()?;
        let weighting = self.tracker.weighting;

        self.wall_minutes = self.tracker.wall_minutes(days);
        self.ranges.compute_percents(weighting, self.wall_minutes);
        self.any_low = self.ranges.any_low(weighting);
        self.any_high = self.ranges.any_high(weighting);

        self.average_glucose_mmol = self.ranges.total.mean(weighting);
        self.gmi = match weighting {
            Weighting::Minutes if self.ranges.total.records > 0 => {
                Some(calculate_gmi(self.average_glucose_mmol))
            }
            _ => None,
        };
        self.standard_deviation = self.ranges.total.standard_deviation(weighting);
        self.coefficient_of_variation =
            safe_div(self.standard_deviation, self.average_glucose_mmol);

        self.hours_with_data = self.tracker.hours;
        self.days_with_data = self.tracker.days;
        self.average_daily_records = safe_div(self.ranges.total.records as f64, days as f64);
        Ok(())
    }

    fn compute_delta(&mut self, offset: &mut Self) {
        let (ranges, ranges_back) = GlucoseRanges::delta(&self.ranges, &offset.ranges);
        let (any_low, any_low_back) = super::ranges::bin_delta(&self.any_low, &offset.any_low);
        let (any_high, any_high_back) = super::ranges::bin_delta(&self.any_high, &offset.any_high);
        let (avg, avg_back) = scalar_delta(self.average_glucose_mmol, offset.average_glucose_mmol);
        let (gmi, gmi_back) = match (self.gmi, offset.gmi) {
            (Some(a), Some(b)) => {
                let (x, y) = scalar_delta(a, b);
                (Some(x), Some(y))
            }
            _ => (None, None),
        };
        let (sd, sd_back) = scalar_delta(self.standard_deviation, offset.standard_deviation);
        let (cv, cv_back) =
            scalar_delta(self.coefficient_of_variation, offset.coefficient_of_variation);
        let (hours, hours_back) = count_delta(self.hours_with_data, offset.hours_with_data);
        let (days, days_back) = count_delta(self.days_with_data, offset.days_with_data);
        let (daily, daily_back) =
            scalar_delta(self.average_daily_records, offset.average_daily_records);

        self.delta = Some(Box::new(GlucosePeriod {
            ranges,
            any_low,
            any_high,
            average_glucose_mmol: avg,
            gmi,
            standard_deviation: sd,
            coefficient_of_variation: cv,
            hours_with_data: hours,
            days_with_data: days,
            average_daily_records: daily,
            ..GlucosePeriod::default()
        }));
        offset.delta = Some(Box::new(GlucosePeriod {
            ranges: ranges_back,
            any_low: any_low_back,
            any_high: any_high_back,
            average_glucose_mmol: avg_back,
            gmi: gmi_back,
            standard_deviation: sd_back,
            coefficient_of_variation: cv_back,
            hours_with_data: hours_back,
            days_with_data: days_back,
            average_daily_records: daily_back,
            ..GlucosePeriod::default()
        }));
    }

    fn total_records(&self) -> i64 {
        self.ranges.total.records
    }

    fn is_finalized(&self) -> bool {
        self.tracker.finalized
    }
}

/// Realtime vs deferred upload statistics of a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuousPeriod {
    pub ranges: ContinuousRanges,
    pub hours_with_data: i64,
    pub days_with_data: i64,
    pub average_daily_records: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Box<ContinuousPeriod>>,
    #[serde(skip)]
    tracker: Tracker,
}

impl ContinuousPeriod {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_offset() -> Self {
        Self {
            tracker: Tracker::new(Weighting::Records, true),
            ..Self::default()
        }
    }
}

impl Statistics for ContinuousPeriod {
    fn update(&mut self, bucket: &Bucket) -> StatsResult<()> {
        self.tracker.admit(bucket)?;
        let ranges = match &bucket.data {
            BucketData::Continuous(r) => r,
            BucketData::Glucose(_) => {
                return Err(StatsError::IncompatibleBucket {
                    actual: bucket.summary_type,
                })
            }
        };

        self.ranges.add(ranges);
        self.tracker.record(bucket);
        Ok(())
    }

    fn finalize(&mut self, days: i64) -> StatsResult<()> {
        self.tracker.finish()?;
        self.ranges.compute_percents();
        self.hours_with_data = self.tracker.hours;
        self.days_with_data = self.tracker.days;
        self.average_daily_records = safe_div(self.ranges.total.records as f64, days as f64);
        Ok(())
    }

    fn compute_delta(&mut self, offset: &mut Self) {
        let (ranges, ranges_back) = ContinuousRanges::delta(&self.ranges, &offset.ranges);
        let (hours, hours_back) = count_delta(self.hours_with_data, offset.hours_with_data);
        let (days, days_back) = count_delta(self.days_with_data, offset.days_with_data);
        let (daily, daily_back) =
            scalar_delta(self.average_daily_records, offset.average_daily_records);

        self.delta = Some(Box::new(ContinuousPeriod {
            ranges,
            hours_with_data: hours,
            days_with_data: days,
            average_daily_records: daily,
            ..ContinuousPeriod::default()
        }));
        offset.delta = Some(Box::new(ContinuousPeriod {
            ranges: ranges_back,
            hours_with_data: hours_back,
            days_with_data: days_back,
            average_daily_records: daily_back,
            ..ContinuousPeriod::default()
        }));
    }

    fn total_records(&self) -> i64 {
        self.ranges.total.records
    }

    fn is_finalized(&self) -> bool {
        self.tracker.finalized
    }
}

/// A period of any summary type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Period {
    Glucose(GlucosePeriod),
    Continuous(ContinuousPeriod),
}

impl Period {
    pub fn new(typ: SummaryType) -> Self {
        match typ {
            SummaryType::Cgm | SummaryType::Bgm => Period::Glucose(GlucosePeriod::new(typ.weighting())),
            SummaryType::Continuous => Period::Continuous(ContinuousPeriod::new()),
        }
    }

    pub fn new_offset(typ: SummaryType) -> Self {
        match typ {
            SummaryType::Cgm | SummaryType::Bgm => {
                Period::Glucose(GlucosePeriod::new_offset(typ.weighting()))
            }
            SummaryType::Continuous => Period::Continuous(ContinuousPeriod::new_offset()),
        }
    }

    pub fn update(&mut self, bucket: &Bucket) -> StatsResult<()> {
        match self {
            Period::Glucose(p) => p.update(bucket),
            Period::Continuous(p) => p.update(bucket),
        }
    }

    pub fn finalize(&mut self, days: i64) -> StatsResult<()> {
        match self {
            Period::Glucose(p) => p.finalize(days),
            Period::Continuous(p) => p.finalize(days),
        }
    }

    pub fn compute_delta(&mut self, offset: &mut Period) -> StatsResult<()> {
        match (self, offset) {
            (Period::Glucose(a), Period::Glucose(b)) => a.compute_delta(b),
            (Period::Continuous(a), Period::Continuous(b)) => a.compute_delta(b),
            (Period::Glucose(_), _) => return Err(StatsError::IncompatiblePeriod("glucose")),
            (Period::Continuous(_), _) => {
                return Err(StatsError::IncompatiblePeriod("continuous"))
            }
        }
        Ok(())
    }

    pub fn total_records(&self) -> i64 {
        match self {
            Period::Glucose(p) => p.total_records(),
            Period::Continuous(p) => p.total_records(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        match self {
            Period::Glucose(p) => p.is_finalized(),
            Period::Continuous(p) => p.is_finalized(),
        }
    }

    pub fn as_glucose(&self) -> Option<&GlucosePeriod> {
        match self {
            Period::Glucose(p) => Some(p),
            Period::Continuous(_) => None,
        }
    }

    pub fn as_continuous(&self) -> Option<&ContinuousPeriod> {
        match self {
            Period::Continuous(p) => Some(p),
            Period::Glucose(_) => None,
        }
    }
}

struct Window {
    days: i64,
    start: DateTime<Utc>,
    offset_start: DateTime<Utc>,
    period: Period,
    offset: Period,
}

/// Periods keyed by window label.
pub type PeriodMap = BTreeMap<String, Period>;

/// Feeds a newest-first bucket sequence into every window at once.
pub struct PeriodAccumulator {
    typ: SummaryType,
    windows: Vec<Window>,
    buckets_seen: usize,
}

impl PeriodAccumulator {
    pub fn new(typ: SummaryType) -> Self {
        Self {
            typ,
            windows: Vec::new(),
            buckets_seen: 0,
        }
    }

    pub fn buckets_seen(&self) -> usize {
        self.buckets_seen
    }

    fn open_windows(&mut self, newest: DateTime<Utc>) {
        let end = newest + Duration::hours(1);
        self.windows = PERIOD_DAYS
            .iter()
            .map(|&days| {
                let start = end - Duration::days(days);
                Window {
                    days,
                    start,
                    offset_start: start - Duration::days(days),
                    period: Period::new(self.typ),
                    offset: Period::new_offset(self.typ),
                }
            })
            .collect();
    }

    pub fn push(&mut self, bucket: &Bucket) -> StatsResult<()> {
        if self.windows.is_empty() {
            self.open_windows(bucket.time);
        }
        self.buckets_seen += 1;

        for window in &mut self.windows {
            if bucket.time >= window.start {
                window.period.update(bucket)?;
            } else if bucket.time >= window.offset_start {
                window.offset.update(bucket)?;
            }
        }
        Ok(())
    }

    /// Finalize every window and compute the deltas.
    ///
    /// Returns `(periods, offset_periods)`, both empty when no bucket was pushed.
    pub fn finish(self) -> StatsResult<(PeriodMap, PeriodMap)> {
        let mut periods = PeriodMap::new();
        let mut offsets = PeriodMap::new();

        for mut window in self.windows {
            window.period.finalize(window.days)?;
            window.offset.finalize(window.days)?;
            window.period.compute_delta(&mut window.offset)?;

            periods.insert(period_label(window.days), window.period);
            offsets.insert(period_label(window.days), window.offset);
        }
        Ok((periods, offsets))
    }
}
