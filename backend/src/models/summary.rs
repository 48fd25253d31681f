//! Per-user summary document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::glucose::GlucoseThresholds;
use super::period::PeriodMap;
use super::summary_type::SummaryType;

/// Version of the summary layout produced by this code. Summaries stored
/// with any other version are rebuilt by the migration sweep.
pub const SCHEMA_VERSION: i32 = 5;

/// Well-known reasons a summary gets flagged as outdated. Callers may pass
/// any other string.
pub mod reasons {
    pub const DATA_ADDED: &str = "data added";
    pub const UPLOAD_COMPLETED: &str = "upload completed";
    pub const SCHEMA_MIGRATION: &str = "schema migration";
    pub const BACKFILL: &str = "backfill";
}

/// Sorted set of reason strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasonSet(BTreeSet<String>);

impl ReasonSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the reason was not present yet.
    pub fn insert(&mut self, reason: impl Into<String>) -> bool {
        self.0.insert(reason.into())
    }

    pub fn merge(&mut self, other: &ReasonSet) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn contains(&self, reason: &str) -> bool {
        self.0.contains(reason)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ReasonSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryConfig {
    pub schema_version: i32,
    #[serde(flatten)]
    pub thresholds: GlucoseThresholds,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            thresholds: GlucoseThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dates {
    pub first_data: Option<DateTime<Utc>>,
    pub last_data: Option<DateTime<Utc>>,
    pub last_updated_date: Option<DateTime<Utc>>,
    pub last_upload_date: Option<DateTime<Utc>>,
    pub outdated_since: Option<DateTime<Utc>>,
    pub outdated_reason: ReasonSet,
    pub last_updated_reason: ReasonSet,
}

impl Dates {
    /// Forget the processed data range, keeping the reason bookkeeping.
    pub fn reset_data_range(&mut self) {
        self.first_data = None;
        self.last_data = None;
        self.last_updated_date = None;
        self.last_upload_date = None;
    }
}

/// Statistics of one user for one summary type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub user_id: String,
    #[serde(rename = "type")]
    pub summary_type: SummaryType,
    pub config: SummaryConfig,
    pub dates: Dates,
    #[serde(default)]
    pub periods: PeriodMap,
    #[serde(default)]
    pub offset_periods: PeriodMap,
}

impl Summary {
    pub fn new(summary_type: SummaryType, user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            summary_type,
            config: SummaryConfig::default(),
            dates: Dates::default(),
            periods: PeriodMap::new(),
            offset_periods: PeriodMap::new(),
        }
    }

    /// Flag the summary as needing a recompute.
    ///
    /// The reason is added to the pending set and an already pending
    /// `outdated_since` is never pushed later. Returns the effective
    /// `outdated_since`.
    pub fn set_outdated(&mut self, reason: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        self.dates.outdated_reason.insert(reason);
        let since = match self.dates.outdated_since {
            Some(pending) => pending.min(now),
            None => now,
        };
        self.dates.outdated_since = Some(since);
        since
    }

    pub fn is_outdated(&self, now: DateTime<Utc>) -> bool {
        self.dates.outdated_since.is_some_and(|since| since <= now)
    }

    pub fn is_migratable(&self) -> bool {
        self.config.schema_version != SCHEMA_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_set_outdated_keeps_pending_timestamp() {
        let mut s = Summary::new(SummaryType::Cgm, "user-1");
        let first = s.set_outdated(reasons::DATA_ADDED, now());
        let second = s.set_outdated(reasons::UPLOAD_COMPLETED, now() + Duration::minutes(10));

        assert_eq!(first, now());
        assert_eq!(second, now());
        assert_eq!(s.dates.outdated_reason.len(), 2);
    }

    #[test]
    fn test_set_outdated_reasons_do_not_duplicate() {
        let mut s = Summary::new(SummaryType::Bgm, "user-1");
        s.set_outdated(reasons::DATA_ADDED, now());
        s.set_outdated(reasons::DATA_ADDED, now());
        assert_eq!(s.dates.outdated_reason.len(), 1);
    }

    #[test]
    fn test_reasons_serialize_sorted() {
        let reasons: ReasonSet = ["upload completed", "backfill", "data added"]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&reasons).unwrap();
        assert_eq!(json, r#"["backfill","data added","upload completed"]"#);
    }

    #[test]
    fn test_migratable_on_version_mismatch() {
        let mut s = Summary::new(SummaryType::Continuous, "user-1");
        assert!(!s.is_migratable());
        s.config.schema_version = SCHEMA_VERSION - 1;
        assert!(s.is_migratable());
    }

    #[test]
    fn test_summary_document_shape() {
        let mut s = Summary::new(SummaryType::Cgm, "user-1");
        s.set_outdated(reasons::DATA_ADDED, now());
        let value = serde_json::to_value(&s).unwrap();

        assert_eq!(value["type"], "cgm");
        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["config"]["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(value["config"]["veryLow"], 3.0);
        assert_eq!(value["dates"]["outdatedReason"][0], "data added");
    }
}
