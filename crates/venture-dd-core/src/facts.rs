//! Fact store model: one current fact per (initiative, dimension), merged in
//! place on every upsert.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::evidence::{
    component_confidence_from_evidence, enrich_evidence, EvidenceInput, EvidenceItem,
    EvidenceKey, SourceType,
};
use crate::rubric::DdRubric;
use crate::{DdError, InitiativeId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Team,
    Tech,
    Market,
    Legal,
    Finance,
}

impl FactKind {
    pub const ALL: [Self; 5] = [
        Self::Team,
        Self::Tech,
        Self::Market,
        Self::Legal,
        Self::Finance,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Tech => "tech",
            Self::Market => "market",
            Self::Legal => "legal",
            Self::Finance => "finance",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "team" => Some(Self::Team),
            "tech" => Some(Self::Tech),
            "market" => Some(Self::Market),
            "legal" => Some(Self::Legal),
            "finance" => Some(Self::Finance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TeamFact {
    pub commitment_level: f64,
    pub key_roles: Vec<String>,
    pub references_count: u32,
    pub founder_risk_flags: Vec<String>,
    pub investable_segment: Option<String>,
    pub is_investable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TechFact {
    pub github_org: Option<String>,
    pub github_repo: Option<String>,
    pub repo_count: u32,
    pub contributor_count: u32,
    pub commit_velocity_90d: f64,
    pub ci_present: bool,
    pub test_signal: f64,
    pub benchmark_artifacts: u32,
    pub prototype_stage: Option<String>,
    pub ip_indicators: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarketFact {
    pub customer_interviews: u32,
    pub lois: u32,
    pub pilots: u32,
    pub paid_pilots: u32,
    pub pricing_evidence: bool,
    pub buyer_persona_clarity: f64,
    pub sam_som_quality: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LegalFact {
    pub entity_status: Option<String>,
    pub ip_ownership_status: Option<String>,
    pub founder_agreements: bool,
    pub licensing_constraints: bool,
    pub compliance_flags: Vec<String>,
    pub legal_risk_score: f64,
}

impl LegalFact {
    #[must_use]
    pub fn entity_known(&self) -> bool {
        is_known_status(self.entity_status.as_deref())
    }

    #[must_use]
    pub fn ip_known(&self) -> bool {
        is_known_status(self.ip_ownership_status.as_deref())
    }

    #[must_use]
    pub fn critical_conflicts(&self) -> usize {
        self.compliance_flags
            .iter()
            .filter(|flag| flag.to_lowercase().contains("critical"))
            .count()
    }
}

fn is_known_status(value: Option<&str>) -> bool {
    value
        .map(str::trim)
        .is_some_and(|status| !status.is_empty() && !status.eq_ignore_ascii_case("unknown"))
}

/// Finance observations are tracked and surfaced but never scored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FinanceFact {
    pub burn_monthly: Option<f64>,
    pub runway_months: Option<f64>,
    pub funding_dependence: Option<String>,
    pub cap_table_summary: Option<String>,
    pub dilution_risk: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "dimension", rename_all = "snake_case")]
pub enum FactBody {
    Team(TeamFact),
    Tech(TechFact),
    Market(MarketFact),
    Legal(LegalFact),
    Finance(FinanceFact),
}

impl FactBody {
    #[must_use]
    pub fn kind(&self) -> FactKind {
        match self {
            Self::Team(_) => FactKind::Team,
            Self::Tech(_) => FactKind::Tech,
            Self::Market(_) => FactKind::Market,
            Self::Legal(_) => FactKind::Legal,
            Self::Finance(_) => FactKind::Finance,
        }
    }

    /// Validates numeric ranges of observed quantities.
    ///
    /// # Errors
    /// Returns [`DdError::Validation`] when a field is outside its range.
    pub fn validate(&self) -> Result<(), DdError> {
        let bounded: Vec<(&str, f64, f64)> = match self {
            Self::Team(fact) => vec![("commitment_level", fact.commitment_level, 5.0)],
            Self::Tech(fact) => vec![
                ("commit_velocity_90d", fact.commit_velocity_90d, f64::MAX),
                ("test_signal", fact.test_signal, f64::MAX),
            ],
            Self::Market(fact) => vec![
                ("buyer_persona_clarity", fact.buyer_persona_clarity, 5.0),
                ("sam_som_quality", fact.sam_som_quality, 5.0),
            ],
            Self::Legal(fact) => vec![("legal_risk_score", fact.legal_risk_score, 5.0)],
            Self::Finance(fact) => [
                ("burn_monthly", fact.burn_monthly),
                ("runway_months", fact.runway_months),
                ("dilution_risk", fact.dilution_risk),
            ]
            .into_iter()
            .filter_map(|(name, value)| value.map(|value| (name, value, f64::MAX)))
            .collect(),
        };

        for (name, value, max) in bounded {
            if !value.is_finite() || value < 0.0 || value > max {
                return Err(DdError::Validation(format!(
                    "{}.{name} MUST be in [0, {max}]",
                    self.kind().as_str()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provenance {
    pub source_type: Option<SourceType>,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DimensionFact {
    pub initiative_id: InitiativeId,
    pub body: FactBody,
    pub evidence: Vec<EvidenceItem>,
    pub confidence: f64,
    pub provenance: Provenance,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DimensionFact {
    #[must_use]
    pub fn kind(&self) -> FactKind {
        self.body.kind()
    }
}

/// Producer payload for one (initiative, dimension) observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactInput {
    pub initiative_id: InitiativeId,
    #[serde(flatten)]
    pub body: FactBody,
    #[serde(default)]
    pub evidence: Vec<EvidenceInput>,
    #[serde(default)]
    pub source_type: Option<SourceType>,
    #[serde(default)]
    pub source_url: Option<String>,
}

impl FactInput {
    #[must_use]
    pub fn new(initiative_id: InitiativeId, body: FactBody) -> Self {
        Self {
            initiative_id,
            body,
            evidence: Vec::new(),
            source_type: None,
            source_url: None,
        }
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: Vec<EvidenceInput>) -> Self {
        self.evidence = evidence;
        self
    }
}

/// Decodes one producer row. Malformed or failed evidence entries are
/// dropped and returned alongside the parsed input so the caller can warn.
///
/// # Errors
/// Returns [`DdError::EvidenceMalformed`] when the fact envelope itself
/// cannot be decoded, or [`DdError::Validation`] when it is out of range.
pub fn parse_fact_row(row: &Value) -> Result<(FactInput, Vec<DdError>), DdError> {
    let mut envelope = row.clone();
    let raw_evidence = match envelope.as_object_mut() {
        Some(object) => object.remove("evidence").unwrap_or(Value::Null),
        None => {
            return Err(DdError::EvidenceMalformed(
                "fact row MUST be a JSON object".to_string(),
            ))
        }
    };

    let mut input: FactInput = serde_json::from_value(envelope)
        .map_err(|err| DdError::EvidenceMalformed(format!("invalid fact row: {err}")))?;
    input.body.validate()?;

    let mut skipped = Vec::new();
    let entries = match raw_evidence {
        Value::Array(entries) => entries,
        Value::Null => Vec::new(),
        other => {
            skipped.push(DdError::EvidenceMalformed(format!(
                "evidence MUST be an array, got {other}"
            )));
            Vec::new()
        }
    };

    for (index, entry) in entries.into_iter().enumerate() {
        if let Some(error) = entry.get("error").and_then(Value::as_str) {
            let source = entry
                .get("source_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            skipped.push(DdError::UpstreamCollection(format!(
                "{source} returned no evidence: {error}"
            )));
            continue;
        }
        match serde_json::from_value::<EvidenceInput>(entry) {
            Ok(evidence) if !evidence.snippet.trim().is_empty() => input.evidence.push(evidence),
            Ok(_) => skipped.push(DdError::EvidenceMalformed(format!(
                "evidence[{index}] has an empty snippet"
            ))),
            Err(err) => skipped.push(DdError::EvidenceMalformed(format!(
                "evidence[{index}]: {err}"
            ))),
        }
    }

    Ok((input, skipped))
}

/// Case-insensitive union preserving first-seen order. Blank entries are dropped.
#[must_use]
pub fn merge_list_field(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    existing
        .iter()
        .chain(incoming)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .filter(|value| seen.insert(value.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// De-duplicates on (source_type, url, snippet). An incoming duplicate
/// replaces the stored entry at its original position.
#[must_use]
pub fn merge_evidence(existing: &[EvidenceItem], incoming: &[EvidenceItem]) -> Vec<EvidenceItem> {
    let mut merged: Vec<EvidenceItem> = Vec::with_capacity(existing.len() + incoming.len());
    let mut positions: BTreeMap<EvidenceKey, usize> = BTreeMap::new();

    for item in existing.iter().chain(incoming) {
        let key = item.key();
        if let Some(position) = positions.get(&key) {
            merged[*position] = item.clone();
        } else {
            positions.insert(key, merged.len());
            merged.push(item.clone());
        }
    }
    merged
}

fn merge_body(existing: &FactBody, incoming: &FactBody) -> Result<FactBody, DdError> {
    let merged = match (existing, incoming) {
        (FactBody::Team(old), FactBody::Team(new)) => FactBody::Team(TeamFact {
            key_roles: merge_list_field(&old.key_roles, &new.key_roles),
            founder_risk_flags: merge_list_field(&old.founder_risk_flags, &new.founder_risk_flags),
            ..new.clone()
        }),
        (FactBody::Tech(old), FactBody::Tech(new)) => FactBody::Tech(TechFact {
            ip_indicators: merge_list_field(&old.ip_indicators, &new.ip_indicators),
            ..new.clone()
        }),
        (FactBody::Legal(old), FactBody::Legal(new)) => FactBody::Legal(LegalFact {
            compliance_flags: merge_list_field(&old.compliance_flags, &new.compliance_flags),
            ..new.clone()
        }),
        (FactBody::Market(_), FactBody::Market(_)) | (FactBody::Finance(_), FactBody::Finance(_)) => {
            incoming.clone()
        }
        _ => {
            return Err(DdError::Validation(format!(
                "cannot merge {} fact into {} fact",
                incoming.kind().as_str(),
                existing.kind().as_str()
            )))
        }
    };
    Ok(merged)
}

/// Pure merge of an incoming fact into the stored one: scalars overwrite,
/// list fields union, evidence de-duplicates, confidence is the incoming value.
///
/// # Errors
/// Returns [`DdError::Validation`] when the facts belong to different
/// initiatives or dimensions.
pub fn merge_fact(existing: &DimensionFact, incoming: &DimensionFact) -> Result<DimensionFact, DdError> {
    if existing.initiative_id != incoming.initiative_id {
        return Err(DdError::Validation(
            "cannot merge facts of different initiatives".to_string(),
        ));
    }

    Ok(DimensionFact {
        initiative_id: incoming.initiative_id,
        body: merge_body(&existing.body, &incoming.body)?,
        evidence: merge_evidence(&existing.evidence, &incoming.evidence),
        confidence: incoming.confidence,
        provenance: Provenance {
            source_type: incoming
                .provenance
                .source_type
                .clone()
                .or_else(|| existing.provenance.source_type.clone()),
            source_url: incoming
                .provenance
                .source_url
                .clone()
                .or_else(|| existing.provenance.source_url.clone()),
        },
        updated_at: incoming.updated_at,
    })
}

/// Builds the record to persist: merges with the stored fact, rescores the
/// merged evidence as one set and recomputes confidence from it.
///
/// # Errors
/// Returns [`DdError::Validation`] when the input is out of range or does
/// not match the stored fact.
pub fn prepare_fact(
    existing: Option<&DimensionFact>,
    input: &FactInput,
    rubric: &DdRubric,
    as_of: OffsetDateTime,
) -> Result<DimensionFact, DdError> {
    input.body.validate()?;

    let incoming = DimensionFact {
        initiative_id: input.initiative_id,
        body: input.body.clone(),
        evidence: enrich_evidence(&input.evidence, &rubric.quality_weights, as_of),
        confidence: 0.0,
        provenance: Provenance {
            source_type: input.source_type.clone(),
            source_url: input.source_url.clone(),
        },
        updated_at: as_of,
    };

    let mut merged = match existing {
        Some(existing) => merge_fact(existing, &incoming)?,
        None => DimensionFact {
            body: merge_body(&incoming.body, &incoming.body)?,
            evidence: merge_evidence(&[], &incoming.evidence),
            ..incoming
        },
    };

    let inputs: Vec<EvidenceInput> = merged.evidence.iter().map(EvidenceItem::to_input).collect();
    merged.evidence = enrich_evidence(&inputs, &rubric.quality_weights, as_of);
    let cited: Vec<&EvidenceItem> = merged.evidence.iter().collect();
    merged.confidence = component_confidence_from_evidence(
        &cited,
        rubric.quality_threshold,
        rubric.no_evidence_confidence_penalty,
    );
    Ok(merged)
}

/// Lookup and overwrite by natural key (initiative, dimension).
pub trait FactRepository {
    type Error: From<DdError>;

    /// Loads the current fact for one dimension of an initiative.
    ///
    /// # Errors
    /// Returns the repository error when the backing store fails.
    fn find_fact(
        &self,
        initiative_id: InitiativeId,
        kind: FactKind,
    ) -> Result<Option<DimensionFact>, Self::Error>;

    /// Inserts or overwrites the fact row for its (initiative, dimension).
    ///
    /// # Errors
    /// Returns the repository error when the backing store fails.
    fn save_fact(&mut self, fact: &DimensionFact) -> Result<(), Self::Error>;

    /// Loads every current fact of an initiative.
    ///
    /// # Errors
    /// Returns the repository error when the backing store fails.
    fn facts_for(&self, initiative_id: InitiativeId) -> Result<Vec<DimensionFact>, Self::Error> {
        let mut facts = Vec::new();
        for kind in FactKind::ALL {
            if let Some(fact) = self.find_fact(initiative_id, kind)? {
                facts.push(fact);
            }
        }
        Ok(facts)
    }
}

/// The only mutation path for fact rows.
///
/// # Errors
/// Returns the repository error, or a converted [`DdError`] when the input
/// is invalid.
pub fn upsert_fact<R: FactRepository>(
    repo: &mut R,
    input: &FactInput,
    rubric: &DdRubric,
    as_of: OffsetDateTime,
) -> Result<DimensionFact, R::Error> {
    let existing = repo.find_fact(input.initiative_id, input.body.kind())?;
    let fact = prepare_fact(existing.as_ref(), input, rubric, as_of)?;
    repo.save_fact(&fact)?;
    Ok(fact)
}

#[derive(Debug, Clone, Default)]
pub struct MemoryFactStore {
    facts: BTreeMap<(InitiativeId, FactKind), DimensionFact>,
}

impl MemoryFactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

impl FactRepository for MemoryFactStore {
    type Error = DdError;

    fn find_fact(
        &self,
        initiative_id: InitiativeId,
        kind: FactKind,
    ) -> Result<Option<DimensionFact>, DdError> {
        Ok(self.facts.get(&(initiative_id, kind)).cloned())
    }

    fn save_fact(&mut self, fact: &DimensionFact) -> Result<(), DdError> {
        self.facts
            .insert((fact.initiative_id, fact.kind()), fact.clone());
        Ok(())
    }
}

const INVESTABLE_TERMS: [&str; 18] = [
    "ai",
    "autonomous",
    "robot",
    "rocket",
    "aerospace",
    "drone",
    "biotech",
    "medtech",
    "quantum",
    "prototype",
    "engineering",
    "hardware",
    "software",
    "satellite",
    "battery",
    "fusion",
    "spinout",
    "startup",
];

const NON_INVESTABLE_TERMS: [&str; 11] = [
    "chapter",
    "club",
    "association",
    "network",
    "society",
    "committee",
    "sports",
    "choir",
    "debate",
    "consulting",
    "festival",
];

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Investability {
    pub segment: String,
    pub is_investable: bool,
    pub reason: String,
}

fn count_terms(words: &BTreeSet<String>, terms: &[&str]) -> usize {
    terms
        .iter()
        .filter(|term| {
            words
                .iter()
                .any(|word| word == *term || word.strip_suffix('s') == Some(**term))
        })
        .count()
}

/// Separates venture-like initiatives from clubs and chapters.
#[must_use]
pub fn classify_investability(
    name: &str,
    description: &str,
    categories: &[String],
    technologies: &[String],
) -> Investability {
    let text = [name, description]
        .into_iter()
        .chain(categories.iter().map(String::as_str))
        .chain(technologies.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let words: BTreeSet<String> = text
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect();
    let positive = count_terms(&words, &INVESTABLE_TERMS);
    let negative = count_terms(&words, &NON_INVESTABLE_TERMS);

    let (segment, is_investable, reason) = if negative >= 2 && positive <= 1 {
        (
            "non_investable_club",
            false,
            "Club/chapter/association signals dominate technical venture signals.",
        )
    } else if positive >= 2 {
        (
            "spinout_candidate",
            true,
            "Technical venture signals indicate spinout potential.",
        )
    } else if positive == 1 && negative == 0 {
        (
            "watchlist_emerging",
            false,
            "Some venture potential but evidence is still too shallow.",
        )
    } else {
        (
            "watchlist_general",
            false,
            "Insufficient technical venture evidence.",
        )
    };

    Investability {
        segment: segment.to_string(),
        is_investable,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{as_of, must_ok};
    use proptest::prelude::*;

    fn team_input(id: InitiativeId, roles: &[&str], evidence: Vec<EvidenceInput>) -> FactInput {
        FactInput::new(
            id,
            FactBody::Team(TeamFact {
                commitment_level: 4.2,
                key_roles: roles.iter().map(|role| (*role).to_string()).collect(),
                references_count: 3,
                ..TeamFact::default()
            }),
        )
        .with_evidence(evidence)
    }

    fn team_evidence() -> Vec<EvidenceInput> {
        vec![
            EvidenceInput::new(
                SourceType::PeopleMarkdown,
                "https://example.org/team/",
                "John Smith CTO with 5 years deep-tech engineering experience",
            ),
            EvidenceInput::new(
                SourceType::ManualDd,
                "file:///tmp/team.md",
                "Technical lead confirmed, product owner confirmed, full-time commitment 2026",
            ),
        ]
    }

    #[test]
    fn list_fields_union_case_insensitively() {
        let merged = merge_list_field(
            &["Founder".to_string(), "CTO".to_string()],
            &["cto".to_string(), " ".to_string(), "Sales Lead".to_string()],
        );
        assert_eq!(merged, vec!["Founder", "CTO", "Sales Lead"]);
    }

    #[test]
    fn upsert_twice_keeps_one_row_without_duplicate_evidence() {
        let mut store = MemoryFactStore::new();
        let id = InitiativeId::new();
        let rubric = DdRubric::v1();
        let input = team_input(id, &["Founder", "CTO"], team_evidence());

        let first = must_ok(upsert_fact(&mut store, &input, &rubric, as_of()));
        let second = must_ok(upsert_fact(&mut store, &input, &rubric, as_of()));

        assert_eq!(store.len(), 1);
        assert_eq!(second.evidence.len(), 2);
        assert_eq!(first, second);
        let keys: BTreeSet<EvidenceKey> = second.evidence.iter().map(EvidenceItem::key).collect();
        assert_eq!(keys.len(), second.evidence.len());
    }

    #[test]
    fn scalar_fields_overwrite_and_evidence_accumulates() {
        let mut store = MemoryFactStore::new();
        let id = InitiativeId::new();
        let rubric = DdRubric::v1();
        must_ok(upsert_fact(
            &mut store,
            &team_input(id, &["CTO"], team_evidence()),
            &rubric,
            as_of(),
        ));

        let mut update = team_input(
            id,
            &["Sales Lead"],
            vec![EvidenceInput::new(
                SourceType::Openalex,
                "https://openalex.org/A1",
                "Sales lead joined with 3 signed LOIs",
            )],
        );
        if let FactBody::Team(team) = &mut update.body {
            team.references_count = 5;
        }
        let merged = must_ok(upsert_fact(&mut store, &update, &rubric, as_of()));

        let FactBody::Team(team) = &merged.body else {
            panic!("expected team body");
        };
        assert_eq!(team.references_count, 5);
        assert_eq!(team.key_roles, vec!["CTO", "Sales Lead"]);
        assert_eq!(merged.evidence.len(), 3);
    }

    #[test]
    fn confidence_tracks_merged_evidence() {
        let mut store = MemoryFactStore::new();
        let id = InitiativeId::new();
        let rubric = DdRubric::v1();
        let fact = must_ok(upsert_fact(
            &mut store,
            &team_input(id, &["CTO"], Vec::new()),
            &rubric,
            as_of(),
        ));
        assert!((fact.confidence - rubric.no_evidence_confidence_penalty).abs() < 1e-9);

        let fact = must_ok(upsert_fact(
            &mut store,
            &team_input(id, &["CTO"], team_evidence()),
            &rubric,
            as_of(),
        ));
        assert!(fact.confidence > rubric.no_evidence_confidence_penalty);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let id = InitiativeId::new();
        let rubric = DdRubric::v1();
        let team = must_ok(prepare_fact(None, &team_input(id, &[], Vec::new()), &rubric, as_of()));
        let market = FactInput::new(id, FactBody::Market(MarketFact::default()));
        assert!(matches!(
            prepare_fact(Some(&team), &market, &rubric, as_of()),
            Err(DdError::Validation(_))
        ));
    }

    #[test]
    fn parse_fact_row_skips_bad_evidence() {
        let id = InitiativeId::new();
        let row = serde_json::json!({
            "initiative_id": id.to_string(),
            "dimension": "tech",
            "ci_present": true,
            "benchmark_artifacts": 2,
            "evidence": [
                {"source_type": "github_api", "source_url": "https://github.com/x", "snippet": "CI green"},
                {"source_type": "github_api", "snippet": 42},
                {"source_type": "openalex", "error": "timeout"},
                {"source_type": "manual_dd", "snippet": "   "}
            ]
        });

        let (input, skipped) = must_ok(parse_fact_row(&row));
        assert_eq!(input.evidence.len(), 1);
        assert_eq!(skipped.len(), 3);
        assert!(skipped
            .iter()
            .any(|err| matches!(err, DdError::UpstreamCollection(_))));
        let FactBody::Tech(tech) = input.body else {
            panic!("expected tech body");
        };
        assert!(tech.ci_present);
    }

    #[test]
    fn parse_fact_row_rejects_out_of_range_values() {
        let row = serde_json::json!({
            "initiative_id": InitiativeId::new().to_string(),
            "dimension": "legal",
            "legal_risk_score": 9.0
        });
        assert!(matches!(parse_fact_row(&row), Err(DdError::Validation(_))));
        assert!(matches!(
            parse_fact_row(&serde_json::json!([1, 2])),
            Err(DdError::EvidenceMalformed(_))
        ));
    }

    #[test]
    fn legal_status_helpers() {
        let legal = LegalFact {
            entity_status: Some("incorporated".to_string()),
            ip_ownership_status: Some("Unknown".to_string()),
            compliance_flags: vec!["critical_conflict: founder dispute".to_string()],
            ..LegalFact::default()
        };
        assert!(legal.entity_known());
        assert!(!legal.ip_known());
        assert_eq!(legal.critical_conflicts(), 1);
    }

    #[test]
    fn investability_segments() {
        let spinout = classify_investability(
            "DeepTech Spinout",
            "Autonomous drone hardware startup",
            &[],
            &["AI".to_string()],
        );
        assert!(spinout.is_investable);
        assert_eq!(spinout.segment, "spinout_candidate");

        let club = classify_investability(
            "General Student Club",
            "Debate society and networking chapter",
            &[],
            &[],
        );
        assert!(!club.is_investable);
        assert_eq!(club.segment, "non_investable_club");

        let emerging = classify_investability("Rocket Lab", "", &[], &[]);
        assert_eq!(emerging.segment, "watchlist_emerging");
        assert!(!emerging.is_investable);
    }

    proptest! {
        #[test]
        fn merging_is_idempotent(
            roles in proptest::collection::vec("[a-zA-Z ]{0,12}", 0..6),
            references in 0_u32..10,
        ) {
            let id = InitiativeId::new();
            let rubric = DdRubric::v1();
            let input = FactInput::new(
                id,
                FactBody::Team(TeamFact {
                    key_roles: roles,
                    references_count: references,
                    ..TeamFact::default()
                }),
            )
            .with_evidence(team_evidence());

            let once = must_ok(prepare_fact(None, &input, &rubric, as_of()));
            let twice = must_ok(prepare_fact(Some(&once), &input, &rubric, as_of()));
            prop_assert_eq!(once, twice);
        }
    }
}
