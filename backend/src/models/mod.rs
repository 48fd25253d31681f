//! Domain models: raw glucose records, hourly buckets, rolling periods and
//! the per-user summary document.

pub mod bucket;
pub mod error;
pub mod glucose;
pub mod period;
pub mod ranges;
pub mod summary;
pub mod summary_type;
pub mod time;

pub use bucket::{Bucket, BucketData, BucketsByTime, UpdateOptions};
pub use error::{StatsError, StatsResult};
pub use glucose::{DatumKind, GlucoseBin, GlucoseDatum, GlucoseThresholds, GlucoseUnits};
pub use period::{
    calculate_gmi, calculate_wall_minutes, period_label, ContinuousPeriod, GlucosePeriod, Period,
    PeriodAccumulator, PeriodMap, Statistics, PERIOD_DAYS,
};
pub use ranges::{bin_delta, ContinuousRanges, GlucoseRanges, Range};
pub use summary::{reasons, Dates, ReasonSet, Summary, SummaryConfig, SCHEMA_VERSION};
pub use summary_type::{SummaryType, Weighting};
pub use time::{truncate_to_hour, utc_day};
