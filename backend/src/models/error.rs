//! Errors raised by the bucket and period computations.

use chrono::{DateTime, Utc};

use super::SummaryType;

pub type StatsResult<T> = Result<T, StatsError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatsError {
    #[error("period has already been finalized")]
    PeriodFinalized,

    #[error("bucket {bucket} is not older than the oldest counted bucket {oldest}")]
    BucketOutOfOrder {
        bucket: DateTime<Utc>,
        oldest: DateTime<Utc>,
    },

    #[error("record at {record} does not belong to bucket {bucket}")]
    RecordOutsideBucket {
        record: DateTime<Utc>,
        bucket: DateTime<Utc>,
    },

    #[error("{actual} bucket cannot be merged into this period")]
    IncompatibleBucket { actual: SummaryType },

    #[error("cannot compare {0} period with a period of another kind")]
    IncompatiblePeriod(&'static str),
}
