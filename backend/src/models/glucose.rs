//! Raw glucose records and their classification into ranges.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Conversion factor between mg/dL and mmol/L for glucose.
pub const MMOL_TO_MGDL: f64 = 18.01559;

/// Sampling interval in minutes for most continuous monitors.
pub const DEFAULT_SAMPLING_MINUTES: i64 = 5;

/// Sampling interval in minutes for FreeStyle Libre sensors.
pub const LIBRE_SAMPLING_MINUTES: i64 = 15;

const LIBRE_DEVICE_MARKER: &str = "AbbottFreeStyleLibre";

/// Kind of glucose record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatumKind {
    /// Continuous blood glucose reading.
    Cbg,
    /// Self-monitored blood glucose (finger stick) reading.
    Smbg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlucoseUnits {
    #[serde(rename = "mmol/L")]
    MmolL,
    #[serde(rename = "mg/dL")]
    MgDl,
}

/// A single glucose record as supplied by the device data store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseDatum {
    pub user_id: String,
    pub device_id: String,
    pub kind: DatumKind,
    pub time: DateTime<Utc>,
    /// When the record reached the data store.
    pub created_time: DateTime<Utc>,
    /// Last time the record was written, used to detect out-of-order uploads.
    pub modified_time: DateTime<Utc>,
    pub value: f64,
    pub units: GlucoseUnits,
}

impl GlucoseDatum {
    /// Glucose value normalized to mmol/L.
    pub fn value_mmol(&self) -> f64 {
        match self.units {
            GlucoseUnits::MmolL => self.value,
            GlucoseUnits::MgDl => self.value / MMOL_TO_MGDL,
        }
    }

    /// Minutes of monitored time this record represents.
    pub fn duration_minutes(&self) -> i64 {
        sampling_interval_minutes(&self.device_id)
    }

    /// Delay between the record's timestamp and its arrival in the store.
    pub fn upload_latency(&self) -> Duration {
        self.created_time - self.time
    }
}

/// Sampling interval for a device, keyed on the device id.
pub fn sampling_interval_minutes(device_id: &str) -> i64 {
    if device_id.contains(LIBRE_DEVICE_MARKER) {
        LIBRE_SAMPLING_MINUTES
    } else {
        DEFAULT_SAMPLING_MINUTES
    }
}

/// Mutually exclusive glucose bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlucoseBin {
    VeryLow,
    Low,
    Target,
    High,
    VeryHigh,
    ExtremeHigh,
}

/// Range boundaries in mmol/L.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseThresholds {
    pub very_low: f64,
    pub low: f64,
    pub high: f64,
    pub very_high: f64,
    pub extreme_high: f64,
}

impl Default for GlucoseThresholds {
    fn default() -> Self {
        Self {
            very_low: 3.0,
            low: 3.9,
            high: 10.0,
            very_high: 13.9,
            extreme_high: 19.4,
        }
    }
}

impl GlucoseThresholds {
    /// Place a mmol/L value into exactly one bin.
    ///
    /// Target is inclusive on both ends; the bins above it start strictly
    /// above their lower boundary, except extreme high which includes it.
    pub fn classify(&self, value_mmol: f64) -> GlucoseBin {
        if value_mmol < self.very_low {
            GlucoseBin::VeryLow
        } else if value_mmol < self.low {
            GlucoseBin::Low
        } else if value_mmol <= self.high {
            GlucoseBin::Target
        } else if value_mmol <= self.very_high {
            GlucoseBin::High
        } else if value_mmol < self.extreme_high {
            GlucoseBin::VeryHigh
        } else {
            GlucoseBin::ExtremeHigh
        }
    }
}
