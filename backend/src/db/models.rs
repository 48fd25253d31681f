//! Store-level value types shared by the repository traits.

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use crate::models::{Bucket, BucketsByTime, GlucoseDatum, Summary, SummaryType};

use super::repository::{ErrorContext, RepositoryError, RepositoryResult};

/// Buckets fetched per round trip by streaming reads.
pub const BUCKET_BATCH_SIZE: usize = 200;

/// Hours of buckets kept behind the newest bucket. Covers the 30 day period
/// plus its 30 day offset window.
pub const HOURS_AGO_TO_KEEP: i64 = 60 * 24;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Lazily fetched buckets.
pub type BucketStream = BoxStream<'static, RepositoryResult<Bucket>>;

/// Lazily fetched raw records.
pub type DatumStream = BoxStream<'static, RepositoryResult<GlucoseDatum>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Page request for user id sweeps.
///
/// There is no cursor: callers process a page, which clears or advances the
/// selected field, and ask again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub size: usize,
}

impl Pagination {
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    pub fn validate(&self) -> RepositoryResult<()> {
        if self.size == 0 || self.size > MAX_PAGE_SIZE {
            return Err(RepositoryError::validation_with_context(
                format!("pagination size must be between 1 and {}", MAX_PAGE_SIZE),
                ErrorContext::new("validate_pagination").with_details(format!("size={}", self.size)),
            ));
        }
        Ok(())
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { size: 100 }
    }
}

/// What the device data store knows about a user's records of one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserDataStatus {
    pub first_data: DateTime<Utc>,
    pub last_data: DateTime<Utc>,
    /// Newest `created_time` among the user's records.
    pub last_upload: DateTime<Utc>,
    /// Earliest record time touched since the requested instant, if any.
    pub earliest_modified: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_bounds() {
        assert!(Pagination::new(1).validate().is_ok());
        assert!(Pagination::new(MAX_PAGE_SIZE).validate().is_ok());
        assert!(Pagination::new(0).validate().unwrap_err().is_validation());
        assert!(Pagination::new(MAX_PAGE_SIZE + 1).validate().is_err());
    }
}
