//! Summary repository trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::RepositoryResult;
use super::validate_user_id;
use crate::db::models::{Pagination, Summary, SummaryType};

/// Repository trait for per-user summary documents.
///
/// One document exists per `(user_id, type)`.
#[async_trait]
pub trait SummaryRepository: Send + Sync {
    /// Check if the store is reachable.
    async fn health_check(&self) -> RepositoryResult<bool>;

    /// Fetch a user's summary.
    ///
    /// # Returns
    /// * `Ok(Some(Summary))` - The stored document
    /// * `Ok(None)` - No summary exists
    async fn get_summary(&self, typ: SummaryType, user_id: &str)
        -> RepositoryResult<Option<Summary>>;

    /// Insert or replace a summary keyed by `(user_id, type)`.
    ///
    /// Fails validation if `summary.summary_type` is not `typ`.
    async fn upsert_summary(&self, typ: SummaryType, summary: &Summary) -> RepositoryResult<()>;

    /// Insert a batch of new summaries.
    ///
    /// Every element is validated before anything is written.
    ///
    /// # Returns
    /// * `Ok(usize)` - All summaries inserted
    /// * `Err(RepositoryError::PartialWriteError)` - Some inserted, count attached
    /// * `Err(RepositoryError::QueryError)` - None inserted
    async fn create_summaries(
        &self,
        typ: SummaryType,
        summaries: Vec<Summary>,
    ) -> RepositoryResult<usize>;

    /// Flag a summary as outdated, creating it if needed.
    ///
    /// # Returns
    /// * `Ok(DateTime)` - The effective `outdated_since`
    async fn set_outdated(
        &self,
        typ: SummaryType,
        user_id: &str,
        reason: &str,
    ) -> RepositoryResult<DateTime<Utc>> {
        validate_user_id(user_id, "set_outdated")?;

        let mut summary = self
            .get_summary(typ, user_id)
            .await?
            .unwrap_or_else(|| Summary::new(typ, user_id));
        let since = summary.set_outdated(reason, Utc::now());
        self.upsert_summary(typ, &summary).await?;
        Ok(since)
    }

    /// Users whose summary has been outdated since at or before now,
    /// oldest pending first.
    async fn get_outdated_user_ids(
        &self,
        typ: SummaryType,
        pagination: &Pagination,
    ) -> RepositoryResult<Vec<String>>;

    /// Users whose summary has a stale schema version, least recently
    /// updated first.
    async fn get_migratable_user_ids(
        &self,
        typ: SummaryType,
        pagination: &Pagination,
    ) -> RepositoryResult<Vec<String>>;

    /// Distinct users having a summary of this type.
    async fn distinct_summary_ids(&self, typ: SummaryType) -> RepositoryResult<Vec<String>>;

    /// Delete a summary.
    ///
    /// # Returns
    /// * `Ok(bool)` - Whether a document existed
    async fn delete_summary(&self, typ: SummaryType, user_id: &str) -> RepositoryResult<bool>;
}
