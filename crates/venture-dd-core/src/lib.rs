//! Evidence-weighted due-diligence scoring for early-stage initiatives.
//!
//! Facts and their supporting evidence flow through the dimension scorer,
//! the gate engine and the conviction scorer into a decision memo. Cohort
//! tiering and the investable/watchlist lenses run over the whole scored pool.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

pub mod audit;
pub mod decision;
pub mod evidence;
pub mod facts;
pub mod gates;
pub mod pipeline;
pub mod rubric;
pub mod scoring;
pub mod tiering;

pub use audit::{source_audit, SourceAudit, SourceCoverage};
pub use decision::{
    conviction_confidence, conviction_score, decide, team_fit_labels, Decision, Memo,
    TeamCapability,
};
pub use evidence::{
    canonicalize_url, component_confidence_from_evidence, enrich_evidence, evidence_ref,
    qualifying_evidence, source_diversity, EvidenceInput, EvidenceItem, EvidenceKey, SourceType,
};
pub use facts::{
    classify_investability, merge_fact, parse_fact_row, prepare_fact, upsert_fact, DimensionFact,
    FactBody, FactInput, FactKind, FactRepository, FinanceFact, Investability, LegalFact,
    MarketFact, MemoryFactStore, Provenance, TeamFact, TechFact,
};
pub use gates::{evaluate_gates, remediation_for, GateName, GateOutcome, GateReport, GateStatus};
pub use pipeline::{assess_initiative, assess_many, Assessment, BatchFailure, BatchReport};
pub use rubric::DdRubric;
pub use scoring::{
    score_initiative, score_team_fit, AiSuggestion, ComponentScorer, DimensionScore, MarketStage,
    NoAiScorer, ScoreComponent, ScoreSet, StoredSuggestion, SuggestionTable,
};
pub use tiering::{
    assign_tier, percentile_rank, rank_lenses, recompute_tiers, tier_change, CohortStats,
    RankedEntry, RankingLenses, Tier, TierCandidate, TierChange, TierRecord,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DdError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("malformed evidence: {0}")]
    EvidenceMalformed(String),
    #[error("upstream collection failure: {0}")]
    UpstreamCollection(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("scoring error: {0}")]
    Scoring(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct InitiativeId(pub Ulid);

impl InitiativeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for InitiativeId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for InitiativeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InitiativeId {
    type Err = DdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(value.trim())
            .map(Self)
            .map_err(|err| DdError::Validation(format!("invalid initiative id `{value}`: {err}")))
    }
}

/// Scored dimensions. `TeamFit` holds the product/tech/sales fit components,
/// which feed gates and the decision memo but never the team score itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    TeamDd,
    TeamFit,
    TechDd,
    MarketDd,
    ExecutionDd,
    LegalDd,
}

impl Dimension {
    pub const ALL: [Self; 6] = [
        Self::TeamDd,
        Self::TeamFit,
        Self::TechDd,
        Self::MarketDd,
        Self::ExecutionDd,
        Self::LegalDd,
    ];

    /// Dimensions that contribute to the conviction score.
    pub const CONVICTION: [Self; 5] = [
        Self::TeamDd,
        Self::TechDd,
        Self::MarketDd,
        Self::ExecutionDd,
        Self::LegalDd,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TeamDd => "team_dd",
            Self::TeamFit => "team_fit",
            Self::TechDd => "tech_dd",
            Self::MarketDd => "market_dd",
            Self::ExecutionDd => "execution_dd",
            Self::LegalDd => "legal_dd",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "team_dd" => Some(Self::TeamDd),
            "team_fit" => Some(Self::TeamFit),
            "tech_dd" => Some(Self::TechDd),
            "market_dd" => Some(Self::MarketDd),
            "execution_dd" => Some(Self::ExecutionDd),
            "legal_dd" => Some(Self::LegalDd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Initiative {
    pub initiative_id: InitiativeId,
    pub name: String,
    pub university: Option<String>,
    pub classification: Option<String>,
}

pub(crate) fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.min(max).max(min)
}

pub(crate) fn stable_hash(input: &str) -> u64 {
    // FNV-1a keeps references identical across runs and platforms.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut total = 0.0;
    let mut count = 0_usize;
    for value in values {
        total += value;
        count += 1;
    }
    (count > 0).then(|| total / count as f64)
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`DdError::Validation`] when parsing fails or the timestamp is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, DdError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| DdError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(DdError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`DdError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, DdError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| DdError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
pub(crate) mod test_support {
    use time::OffsetDateTime;

    pub fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    pub fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    pub fn must_utc(value: &str) -> OffsetDateTime {
        must_ok(super::parse_rfc3339_utc(value))
    }

    pub fn as_of() -> OffsetDateTime {
        must_utc("2026-03-01T12:00:00Z")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{must_ok, must_utc};
    use super::*;

    #[test]
    fn initiative_id_round_trips_through_display() {
        let id = InitiativeId::new();
        let parsed: InitiativeId = must_ok(id.to_string().parse());
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_non_utc_timestamps() {
        assert!(parse_rfc3339_utc("2026-02-07T12:00:00+02:00").is_err());
        assert_eq!(
            must_ok(format_rfc3339(must_utc("2026-02-07T12:00:00Z"))),
            "2026-02-07T12:00:00Z"
        );
    }

    #[test]
    fn dimension_labels_parse_back() {
        for dimension in Dimension::ALL {
            assert_eq!(Dimension::parse(dimension.as_str()), Some(dimension));
        }
        assert_eq!(Dimension::parse("finance_dd"), None);
    }
}
