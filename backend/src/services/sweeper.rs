//! Batch maintenance over many users.
//!
//! Sweeps pick a page of users needing work and recompute them with bounded
//! concurrency. A failing user is logged and reported; it never aborts the
//! rest of the page.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::db::models::{Pagination, MAX_PAGE_SIZE};
use crate::db::repository::RepositoryResult;
use crate::models::{reasons, Summary};
use crate::services::summarizer::Summarizer;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Users whose summary was recomputed and stored.
    pub processed: usize,
    /// Users whose summary was deleted because no data remains.
    pub deleted: usize,
    /// Users whose recompute failed.
    pub failed: Vec<String>,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.processed + self.deleted + self.failed.len()
    }
}

/// Recompute one page of outdated summaries.
pub async fn process_outdated(
    summarizer: &Summarizer,
    pagination: &Pagination,
) -> RepositoryResult<SweepReport> {
    let user_ids = summarizer.get_outdated_user_ids(pagination).await?;
    Ok(run_sweep(summarizer, user_ids, "outdated").await)
}

/// Recompute one page of summaries stored with an older schema version.
pub async fn process_migrations(
    summarizer: &Summarizer,
    pagination: &Pagination,
) -> RepositoryResult<SweepReport> {
    let user_ids = summarizer.get_migratable_user_ids(pagination).await?;
    Ok(run_sweep(summarizer, user_ids, "migration").await)
}

/// Create outdated summaries for users that have data but no summary yet.
///
/// # Returns
/// * `Ok(usize)` - Number of summaries created
pub async fn backfill_summaries(summarizer: &Summarizer) -> RepositoryResult<usize> {
    let typ = summarizer.summary_type();
    let repo = summarizer.repository();

    let existing: BTreeSet<String> = repo.distinct_summary_ids(typ).await?.into_iter().collect();
    let missing: Vec<String> = repo
        .distinct_data_user_ids(typ)
        .await?
        .into_iter()
        .filter(|user_id| !existing.contains(user_id))
        .collect();

    let now = Utc::now();
    let mut created = 0;
    for chunk in missing.chunks(MAX_PAGE_SIZE) {
        let summaries = chunk
            .iter()
            .map(|user_id| {
                let mut summary = Summary::new(typ, user_id.as_str());
                summary.set_outdated(reasons::BACKFILL, now);
                summary
            })
            .collect();
        created += repo.create_summaries(typ, summaries).await?;
    }

    if created > 0 {
        info!("Backfilled {} {} summaries", created, typ);
    }
    Ok(created)
}

async fn run_sweep(summarizer: &Summarizer, user_ids: Vec<String>, kind: &str) -> SweepReport {
    let concurrency = summarizer.config().sweep_concurrency.max(1);
    let results: Vec<_> = stream::iter(user_ids)
        .map(|user_id| async move {
            let result = summarizer.update_summary(&user_id).await;
            (user_id, result)
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut report = SweepReport::default();
    for (user_id, result) in results {
        match result {
            Ok(Some(_)) => report.processed += 1,
            Ok(None) => report.deleted += 1,
            Err(err) => {
                warn!(
                    "{} {} sweep failed for user {}: {}",
                    summarizer.summary_type(),
                    kind,
                    user_id,
                    err
                );
                report.failed.push(user_id);
            }
        }
    }
    report.failed.sort();

    if report.total() > 0 {
        info!(
            "{} {} sweep: {} processed, {} deleted, {} failed",
            summarizer.summary_type(),
            kind,
            report.processed,
            report.deleted,
            report.failed.len()
        );
    }
    report
}
