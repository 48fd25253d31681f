//! Read interface of the raw device data store.
//!
//! The device data store owns parsing, validation and normalization of
//! uploaded records; the summary engine only needs these queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::RepositoryResult;
use crate::db::models::{DatumStream, SummaryType, UserDataStatus};

#[async_trait]
pub trait DeviceDataRepository: Send + Sync {
    /// Range and freshness of a user's records that count towards `typ`.
    ///
    /// `since` is the summary's last update; `earliest_modified` covers
    /// records written or removed after it.
    ///
    /// # Returns
    /// * `Ok(Some(UserDataStatus))` - The user has qualifying records
    /// * `Ok(None)` - No qualifying records remain
    async fn get_last_updated_for_user(
        &self,
        typ: SummaryType,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> RepositoryResult<Option<UserDataStatus>>;

    /// Stream qualifying records with `after < time <= through`, oldest first.
    async fn get_data_range(
        &self,
        typ: SummaryType,
        user_id: &str,
        after: Option<DateTime<Utc>>,
        through: DateTime<Utc>,
    ) -> RepositoryResult<DatumStream>;

    /// Users having at least one qualifying record.
    async fn distinct_data_user_ids(&self, typ: SummaryType) -> RepositoryResult<Vec<String>>;
}
