//! Statistic kinds a summary can be computed for.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::glucose::DatumKind;

/// Closed set of summary statistic types.
///
/// The tag selects which bucket payload and period implementation a
/// summarizer uses; see [`crate::models::BucketData`] and
/// [`crate::models::Period`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SummaryType {
    /// Continuous glucose monitor statistics (cbg records).
    #[serde(rename = "cgm")]
    Cgm,
    /// Blood glucose meter statistics (smbg records).
    #[serde(rename = "bgm")]
    Bgm,
    /// Realtime vs deferred upload statistics over all glucose records.
    #[serde(rename = "con")]
    Continuous,
}

/// How values are weighted when accumulating glucose ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Weighting {
    /// Each record counts for the minutes it covers.
    Minutes,
    /// Each record counts once.
    #[default]
    Records,
}

impl SummaryType {
    pub const ALL: [SummaryType; 3] = [SummaryType::Cgm, SummaryType::Bgm, SummaryType::Continuous];

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryType::Cgm => "cgm",
            SummaryType::Bgm => "bgm",
            SummaryType::Continuous => "con",
        }
    }

    /// Whether a raw datum of `kind` contributes to this summary type.
    pub fn accepts(&self, kind: DatumKind) -> bool {
        match self {
            SummaryType::Cgm => kind == DatumKind::Cbg,
            SummaryType::Bgm => kind == DatumKind::Smbg,
            SummaryType::Continuous => true,
        }
    }

    pub fn weighting(&self) -> Weighting {
        match self {
            SummaryType::Cgm => Weighting::Minutes,
            SummaryType::Bgm | SummaryType::Continuous => Weighting::Records,
        }
    }
}

impl fmt::Display for SummaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummaryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cgm" => Ok(Self::Cgm),
            "bgm" => Ok(Self::Bgm),
            "con" | "continuous" => Ok(Self::Continuous),
            _ => Err(format!("Unknown summary type: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_type_from_str() {
        assert_eq!(SummaryType::from_str("cgm").unwrap(), SummaryType::Cgm);
        assert_eq!(SummaryType::from_str("BGM").unwrap(), SummaryType::Bgm);
        assert_eq!(
            SummaryType::from_str("con").unwrap(),
            SummaryType::Continuous
        );
        assert!(SummaryType::from_str("pump").is_err());
    }

    #[test]
    fn test_summary_type_serializes_as_short_tag() {
        let json = serde_json::to_string(&SummaryType::Continuous).unwrap();
        assert_eq!(json, "\"con\"");
    }

    #[test]
    fn test_accepts_datum_kinds() {
        assert!(SummaryType::Cgm.accepts(DatumKind::Cbg));
        assert!(!SummaryType::Cgm.accepts(DatumKind::Smbg));
        assert!(SummaryType::Bgm.accepts(DatumKind::Smbg));
        assert!(SummaryType::Continuous.accepts(DatumKind::Cbg));
        assert!(SummaryType::Continuous.accepts(DatumKind::Smbg));
    }
}
