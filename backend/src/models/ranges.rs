//! Range counters shared by buckets and periods.
//!
//! A [`Range`] accumulates the records of one glucose bin: how many records,
//! how many minutes they cover, their weighted glucose sum and a running sum
//! of squared deviations (weighted Welford) so variances can be merged across
//! buckets without revisiting the raw data.

use serde::{Deserialize, Serialize};

use super::glucose::GlucoseBin;
use super::summary_type::Weighting;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    /// Weighted glucose sum in mmol/L.
    pub glucose: f64,
    pub minutes: i64,
    pub records: i64,
    pub percent: f64,
    /// Weighted sum of squared deviations from the mean.
    pub variance: f64,
}

impl Range {
    fn weight(&self, weighting: Weighting) -> f64 {
        match weighting {
            Weighting::Minutes => self.minutes as f64,
            Weighting::Records => self.records as f64,
        }
    }

    /// Count one record of `value` covering `minutes`.
    pub fn update(&mut self, value: f64, minutes: i64, weighting: Weighting) {
        let weight = match weighting {
            Weighting::Minutes => minutes as f64,
            Weighting::Records => 1.0,
        };
        let mean_before = self.mean(weighting);

        self.glucose += value * weight;
        self.minutes += minutes;
        self.records += 1;

        let mean_after = self.mean(weighting);
        self.variance += weight * (value - mean_before) * (value - mean_after);
    }

    /// Count a record without a glucose value (continuous upload counters).
    pub fn increment(&mut self) {
        self.records += 1;
    }

    /// Merge another range into this one, combining variances.
    pub fn add(&mut self, other: &Range, weighting: Weighting) {
        let w1 = self.weight(weighting);
        let w2 = other.weight(weighting);

        if w1 > 0.0 && w2 > 0.0 {
            let delta = self.glucose / w1 - other.glucose / w2;
            self.variance += other.variance + (w1 * w2 / (w1 + w2)) * delta * delta;
        } else {
            self.variance += other.variance;
        }

        self.glucose += other.glucose;
        self.minutes += other.minutes;
        self.records += other.records;
    }

    /// Weighted mean in mmol/L, zero for an empty range.
    pub fn mean(&self, weighting: Weighting) -> f64 {
        let w = self.weight(weighting);
        if w > 0.0 {
            self.glucose / w
        } else {
            0.0
        }
    }

    /// Population standard deviation in mmol/L.
    pub fn standard_deviation(&self, weighting: Weighting) -> f64 {
        let w = self.weight(weighting);
        if w > 0.0 {
            (self.variance / w).max(0.0).sqrt()
        } else {
            0.0
        }
    }
}

/// Signed differences of two ranges, in both directions.
///
/// Only `minutes`, `records` and `percent` carry meaning in a delta.
pub fn bin_delta(a: &Range, b: &Range) -> (Range, Range) {
    let forward = Range {
        minutes: a.minutes - b.minutes,
        records: a.records - b.records,
        percent: a.percent - b.percent,
        ..Range::default()
    };
    let backward = Range {
        minutes: -forward.minutes,
        records: -forward.records,
        percent: -forward.percent,
        ..Range::default()
    };
    (forward, backward)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Glucose bins plus their total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseRanges {
    pub total: Range,
    pub very_low: Range,
    pub low: Range,
    pub target: Range,
    pub high: Range,
    pub very_high: Range,
    pub extreme_high: Range,
}

impl GlucoseRanges {
    fn bin_mut(&mut self, bin: GlucoseBin) -> &mut Range {
        match bin {
            GlucoseBin::VeryLow => &mut self.very_low,
            GlucoseBin::Low => &mut self.low,
            GlucoseBin::Target => &mut self.target,
            GlucoseBin::High => &mut self.high,
            GlucoseBin::VeryHigh => &mut self.very_high,
            GlucoseBin::ExtremeHigh => &mut self.extreme_high,
        }
    }

    fn bins(&self) -> [&Range; 6] {
        [
            &self.very_low,
            &self.low,
            &self.target,
            &self.high,
            &self.very_high,
            &self.extreme_high,
        ]
    }

    fn bins_mut(&mut self) -> [&mut Range; 6] {
        [
            &mut self.very_low,
            &mut self.low,
            &mut self.target,
            &mut self.high,
            &mut self.very_high,
            &mut self.extreme_high,
        ]
    }

    pub fn update(&mut self, bin: GlucoseBin, value: f64, minutes: i64, weighting: Weighting) {
        self.total.update(value, minutes, weighting);
        self.bin_mut(bin).update(value, minutes, weighting);
    }

    pub fn add(&mut self, other: &GlucoseRanges, weighting: Weighting) {
        self.total.add(&other.total, weighting);
        for (mine, theirs) in self.bins_mut().into_iter().zip(other.bins()) {
            mine.add(theirs, weighting);
        }
    }

    /// Records summed over the exclusive bins.
    pub fn binned_records(&self) -> i64 {
        self.bins().iter().map(|r| r.records).sum()
    }

    pub fn any_low(&self, weighting: Weighting) -> Range {
        let mut r = self.very_low;
        r.add(&self.low, weighting);
        r.percent = self.very_low.percent + self.low.percent;
        r
    }

    pub fn any_high(&self, weighting: Weighting) -> Range {
        let mut r = self.high;
        r.add(&self.very_high, weighting);
        r.add(&self.extreme_high, weighting);
        r.percent = self.high.percent + self.very_high.percent + self.extreme_high.percent;
        r
    }

    /// Fill in bin percentages relative to the total.
    ///
    /// With minute weighting the total's own percentage is its share of
    /// `wall_minutes`; with record weighting it stays zero.
    pub fn compute_percents(&mut self, weighting: Weighting, wall_minutes: f64) {
        let (total, total_minutes) = (self.total, self.total.minutes as f64);
        for bin in self.bins_mut() {
            bin.percent = match weighting {
                Weighting::Minutes => ratio(bin.minutes as f64, total_minutes),
                Weighting::Records => ratio(bin.records as f64, total.records as f64),
            };
        }
        self.total.percent = match weighting {
            Weighting::Minutes => ratio(total_minutes, wall_minutes),
            Weighting::Records => 0.0,
        };
    }

    pub fn delta(a: &GlucoseRanges, b: &GlucoseRanges) -> (GlucoseRanges, GlucoseRanges) {
        let mut forward = GlucoseRanges::default();
        let mut backward = GlucoseRanges::default();
        (forward.total, backward.total) = bin_delta(&a.total, &b.total);
        for ((f, r), (x, y)) in forward
            .bins_mut()
            .into_iter()
            .zip(backward.bins_mut())
            .zip(a.bins().into_iter().zip(b.bins()))
        {
            (*f, *r) = bin_delta(x, y);
        }
        (forward, backward)
    }
}

/// Upload timeliness counters for continuous summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuousRanges {
    pub total: Range,
    pub realtime: Range,
    pub deferred: Range,
}

impl ContinuousRanges {
    pub fn update(&mut self, realtime: bool) {
        self.total.increment();
        if realtime {
            self.realtime.increment();
        } else {
            self.deferred.increment();
        }
    }

    pub fn add(&mut self, other: &ContinuousRanges) {
        self.total.add(&other.total, Weighting::Records);
        self.realtime.add(&other.realtime, Weighting::Records);
        self.deferred.add(&other.deferred, Weighting::Records);
    }

    pub fn compute_percents(&mut self) {
        let total = self.total.records as f64;
        self.realtime.percent = ratio(self.realtime.records as f64, total);
        self.deferred.percent = ratio(self.deferred.records as f64, total);
    }

    pub fn delta(a: &ContinuousRanges, b: &ContinuousRanges) -> (ContinuousRanges, ContinuousRanges) {
        let (total, total_back) = bin_delta(&a.total, &b.total);
        let (realtime, realtime_back) = bin_delta(&a.realtime, &b.realtime);
        let (deferred, deferred_back) = bin_delta(&a.deferred, &b.deferred);
        (
            ContinuousRanges {
                total,
                realtime,
                deferred,
            },
            ContinuousRanges {
                total: total_back,
                realtime: realtime_back,
                deferred: deferred_back,
            },
        )
    }
}
