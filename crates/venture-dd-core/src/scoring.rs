//! Dimension scorer: rule values from facts, an optional AI side channel,
//! and weighted per-dimension averages with evidence-derived confidence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::evidence::{component_confidence_from_evidence, source_diversity, EvidenceItem};
use crate::facts::{DimensionFact, FactBody, FinanceFact, LegalFact, MarketFact, TeamFact, TechFact};
use crate::rubric::DdRubric;
use crate::{clamp, DdError, Dimension, InitiativeId};

pub const NO_FACT_AUDIT: &str = "no_fact:zero_by_default";
pub const NO_EVIDENCE_AUDIT: &str = "no_evidence:fact_fields_only";

#[must_use]
pub fn known_components(dimension: Dimension) -> &'static [&'static str] {
    match dimension {
        Dimension::TeamDd => &[
            "named_operators",
            "technical_leadership",
            "commitment",
            "founder_risk",
        ],
        Dimension::TeamFit => &["product_fit", "tech_fit", "sales_fit"],
        Dimension::TechDd => &["quality", "performance", "scalability", "moat_signal"],
        Dimension::MarketDd => &[
            "validation_stage",
            "icp_pricing_clarity",
            "sales_cycle_realism",
        ],
        Dimension::ExecutionDd => &["tech_outcomes", "market_outcomes"],
        Dimension::LegalDd => &["entity_ip_basics", "compliance_risk_penalty"],
    }
}

fn regex(pattern: &str) -> Option<Regex> {
    Regex::new(pattern).ok()
}

static TECH_LEAD_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    regex(r"\b(?:cto|chief technology officer|tech(?:nical)? lead|engineering lead|lead engineer|research lead)\b")
});
static PRODUCT_ROLE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    regex(r"\b(?:cpo|product lead|product owner|product manager|head of product)\b")
});
static SALES_ROLE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    regex(r"\b(?:sales lead|head of sales|business development|bd lead|cco|commercial lead)\b")
});
static PERFORMANCE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| regex(r"\b(?:benchmarks?|latency|throughput|accuracy)\b"));
static TECH_OUTCOME_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    regex(r"\b(?:benchmarks?|prototypes?|field tests?|released?|deployed|shipped|latency|accuracy|ci)\b")
});
static MARKET_OUTCOME_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    regex(r"\b(?:lois?|letters? of intent|pilots?|paid|contracts?|revenue|signed|customer interviews?)\b")
});

static STAGE_PATTERNS: LazyLock<Vec<(MarketStage, Option<Regex>)>> = LazyLock::new(|| {
    vec![
        (
            MarketStage::RepeatRevenue,
            regex(r"\b(?:repeat revenue|recurring revenue|renewals?|arr|mrr)\b"),
        ),
        (
            MarketStage::PaidPilot,
            regex(r"\b(?:paid pilots?|commercial contracts?|paying customers?)\b"),
        ),
        (MarketStage::Pilot, regex(r"\b(?:pilots?|poc|proof of concept)\b")),
        (MarketStage::Loi, regex(r"\b(?:lois?|letters? of intent)\b")),
        (
            MarketStage::Interviews,
            regex(r"\b(?:interviews?|discovery calls?|customer discovery)\b"),
        ),
    ]
});
static ZERO_COUNT_SUFFIX_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| regex(r"^(?:\s+counts?)?\s*[:=-]\s*0\b"));

fn is_match(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

/// Qualitative market validation ladder.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum MarketStage {
    #[default]
    None,
    Interviews,
    Loi,
    Pilot,
    PaidPilot,
    RepeatRevenue,
}

impl MarketStage {
    pub const LADDER: [Self; 6] = [
        Self::None,
        Self::Interviews,
        Self::Loi,
        Self::Pilot,
        Self::PaidPilot,
        Self::RepeatRevenue,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Interviews => "interviews",
            Self::Loi => "loi",
            Self::Pilot => "pilot",
            Self::PaidPilot => "paid_pilot",
            Self::RepeatRevenue => "repeat_revenue",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "none" => Some(Self::None),
            "interviews" => Some(Self::Interviews),
            "loi" => Some(Self::Loi),
            "pilot" => Some(Self::Pilot),
            "paid_pilot" => Some(Self::PaidPilot),
            "repeat_revenue" => Some(Self::RepeatRevenue),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_counts(market: &MarketFact) -> Self {
        if market.paid_pilots > 0 {
            Self::PaidPilot
        } else if market.pilots > 0 {
            Self::Pilot
        } else if market.lois > 0 {
            Self::Loi
        } else if market.customer_interviews > 0 {
            Self::Interviews
        } else {
            Self::None
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn rank(self) -> f64 {
        Self::LADDER
            .iter()
            .position(|stage| *stage == self)
            .unwrap_or_default() as f64
    }
}

fn negated_or_zero(text: &str, start: usize, end: usize) -> bool {
    let prefix = text[..start].trim_end();
    let negated = prefix.ends_with(" no") || prefix == "no" || prefix.ends_with(" zero");
    let zero_count = ZERO_COUNT_SUFFIX_RE
        .as_ref()
        .is_some_and(|re| re.is_match(&text[end..]));
    negated || zero_count
}

/// Highest stage named in free text. Mentions negated ("no pilot") or
/// reported with a zero count ("pilot count: 0") are ignored, together with
/// any lower-stage phrase nested inside them ("pilot" in "no paid pilot").
#[must_use]
pub fn stage_from_text(text: &str) -> MarketStage {
    let lower = text.to_lowercase();
    let mut suppressed: Vec<(usize, usize)> = Vec::new();
    for (stage, pattern) in STAGE_PATTERNS.iter() {
        let Some(pattern) = pattern else { continue };
        for found in pattern.find_iter(&lower) {
            let (start, end) = (found.start(), found.end());
            let nested = suppressed
                .iter()
                .any(|(from, to)| start >= *from && end <= *to);
            if nested || negated_or_zero(&lower, start, end) {
                suppressed.push((start, end));
            } else {
                return *stage;
            }
        }
    }
    MarketStage::None
}

/// Monotone max of the count-implied and the keyword-inferred stage.
#[must_use]
pub fn infer_market_stage(market: &MarketFact, evidence: &[EvidenceItem]) -> MarketStage {
    let from_text = evidence
        .iter()
        .map(|item| stage_from_text(&item.snippet))
        .max()
        .unwrap_or_default();
    MarketStage::from_counts(market).max(from_text)
}

#[must_use]
pub fn stage_to_score(stage: MarketStage, rubric: &DdRubric) -> f64 {
    rubric.validation_stage_scores.score_for(stage)
}

/// Outcome of the optional AI scorer for one component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AiSuggestion {
    Suggested {
        value: f64,
        rationale: String,
        model: String,
    },
    Unavailable,
}

/// Pluggable AI scorer. Absence degrades to rule-only scoring.
pub trait ComponentScorer: Sync {
    fn suggest(
        &self,
        initiative_id: InitiativeId,
        dimension: Dimension,
        component_key: &str,
    ) -> AiSuggestion;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoAiScorer;

impl ComponentScorer for NoAiScorer {
    fn suggest(&self, _: InitiativeId, _: Dimension, _: &str) -> AiSuggestion {
        AiSuggestion::Unavailable
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredSuggestion {
    pub initiative_id: InitiativeId,
    pub dimension: Dimension,
    pub component_key: String,
    pub value: f64,
    pub rationale: String,
    pub model: String,
}

/// Suggestions recorded ahead of time, served by natural key.
#[derive(Debug, Clone, Default)]
pub struct SuggestionTable {
    entries: BTreeMap<(InitiativeId, Dimension, String), StoredSuggestion>,
}

impl SuggestionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, suggestion: StoredSuggestion) {
        self.entries.insert(
            (
                suggestion.initiative_id,
                suggestion.dimension,
                suggestion.component_key.clone(),
            ),
            suggestion,
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<StoredSuggestion> for SuggestionTable {
    fn from_iter<I: IntoIterator<Item = StoredSuggestion>>(iter: I) -> Self {
        let mut table = Self::new();
        for suggestion in iter {
            table.insert(suggestion);
        }
        table
    }
}

impl ComponentScorer for SuggestionTable {
    fn suggest(
        &self,
        initiative_id: InitiativeId,
        dimension: Dimension,
        component_key: &str,
    ) -> AiSuggestion {
        self.entries
            .get(&(initiative_id, dimension, component_key.to_string()))
            .map_or(AiSuggestion::Unavailable, |stored| AiSuggestion::Suggested {
                value: stored.value,
                rationale: stored.rationale.clone(),
                model: stored.model.clone(),
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreComponent {
    pub dimension: Dimension,
    pub component_key: String,
    pub raw_value: f64,
    pub normalized_value: f64,
    pub weight: f64,
    pub weighted_contribution: f64,
    pub rule_value: f64,
    pub ai_suggested_value: Option<f64>,
    pub final_value: f64,
    pub ai_used: bool,
    pub manual_review_flag: bool,
    pub audit_reason: Option<String>,
    pub confidence: f64,
    pub evidence_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DimensionScore {
    pub dimension: Dimension,
    pub score: f64,
    pub confidence: f64,
    pub qualifying_evidence: usize,
    pub source_classes: usize,
    pub components: Vec<ScoreComponent>,
}

impl DimensionScore {
    #[must_use]
    pub fn component(&self, key: &str) -> Option<&ScoreComponent> {
        self.components
            .iter()
            .find(|component| component.component_key == key)
    }

    #[must_use]
    pub fn evidence_refs(&self) -> Vec<String> {
        self.components
            .iter()
            .flat_map(|component| component.evidence_refs.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Every dimension score of one initiative for one scoring run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreSet {
    pub initiative_id: InitiativeId,
    pub rubric_version: u32,
    pub market_stage: MarketStage,
    pub dimensions: BTreeMap<Dimension, DimensionScore>,
}

impl ScoreSet {
    #[must_use]
    pub fn dimension(&self, dimension: Dimension) -> Option<&DimensionScore> {
        self.dimensions.get(&dimension)
    }

    #[must_use]
    pub fn score(&self, dimension: Dimension) -> f64 {
        self.dimension(dimension).map_or(1.0, |scored| scored.score)
    }

    #[must_use]
    pub fn confidence(&self, dimension: Dimension) -> f64 {
        self.dimension(dimension).map_or(0.0, |scored| scored.confidence)
    }

    /// Final value of a team-fit component (`product_fit`, `tech_fit`, `sales_fit`).
    #[must_use]
    pub fn fit(&self, key: &str) -> f64 {
        self.dimension(Dimension::TeamFit)
            .and_then(|scored| scored.component(key))
            .map_or(1.0, |component| component.normalized_value)
    }

    #[must_use]
    pub fn components(&self) -> Vec<&ScoreComponent> {
        self.dimensions
            .values()
            .flat_map(|scored| scored.components.iter())
            .collect()
    }
}

/// Read-only view over an initiative's current facts.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactView<'a> {
    pub team: Option<(&'a TeamFact, &'a [EvidenceItem])>,
    pub tech: Option<(&'a TechFact, &'a [EvidenceItem])>,
    pub market: Option<(&'a MarketFact, &'a [EvidenceItem])>,
    pub legal: Option<(&'a LegalFact, &'a [EvidenceItem])>,
    pub finance: Option<(&'a FinanceFact, &'a [EvidenceItem])>,
}

impl<'a> FactView<'a> {
    #[must_use]
    pub fn new(facts: &'a [DimensionFact]) -> Self {
        let mut view = Self::default();
        for fact in facts {
            let evidence = fact.evidence.as_slice();
            match &fact.body {
                FactBody::Team(body) => view.team = Some((body, evidence)),
                FactBody::Tech(body) => view.tech = Some((body, evidence)),
                FactBody::Market(body) => view.market = Some((body, evidence)),
                FactBody::Legal(body) => view.legal = Some((body, evidence)),
                FactBody::Finance(body) => view.finance = Some((body, evidence)),
            }
        }
        view
    }

    fn team_evidence(&self) -> &'a [EvidenceItem] {
        self.team.map_or(&[], |(_, evidence)| evidence)
    }

    fn tech_evidence(&self) -> &'a [EvidenceItem] {
        self.tech.map_or(&[], |(_, evidence)| evidence)
    }

    fn market_evidence(&self) -> &'a [EvidenceItem] {
        self.market.map_or(&[], |(_, evidence)| evidence)
    }

    /// Named technical leads among key roles, or one when only the evidence names a lead.
    #[must_use]
    pub fn technical_leads(&self) -> usize {
        let Some((team, evidence)) = self.team else {
            return 0;
        };
        let from_roles = team
            .key_roles
            .iter()
            .filter(|role| is_match(&TECH_LEAD_RE, &role.to_lowercase()))
            .count();
        if from_roles > 0 {
            return from_roles;
        }
        usize::from(
            evidence
                .iter()
                .any(|item| is_match(&TECH_LEAD_RE, &item.snippet.to_lowercase())),
        )
    }

    fn has_role(&self, re: &LazyLock<Option<Regex>>) -> bool {
        let Some((team, evidence)) = self.team else {
            return false;
        };
        team.key_roles
            .iter()
            .map(|role| role.to_lowercase())
            .chain(evidence.iter().map(|item| item.snippet.to_lowercase()))
            .any(|text| is_match(re, &text))
    }

    #[must_use]
    pub fn market_stage(&self) -> MarketStage {
        self.market
            .map_or(MarketStage::None, |(market, evidence)| {
                infer_market_stage(market, evidence)
            })
    }
}

struct RuleOutcome<'a> {
    raw_value: f64,
    rule_value: f64,
    cited: Vec<&'a EvidenceItem>,
}

impl<'a> RuleOutcome<'a> {
    fn new(raw_value: f64, rule_value: f64, cited: &'a [EvidenceItem]) -> Self {
        Self {
            raw_value,
            rule_value: clamp(rule_value, 1.0, 5.0),
            cited: cited.iter().collect(),
        }
    }

    fn citing(raw_value: f64, rule_value: f64, cited: Vec<&'a EvidenceItem>) -> Self {
        Self {
            raw_value,
            rule_value: clamp(rule_value, 1.0, 5.0),
            cited,
        }
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn prototype_ladder(stage: Option<&str>) -> f64 {
    match stage.map(|value| value.trim().to_lowercase()).as_deref() {
        Some("concept") => 2.0,
        Some("prototype") => 3.0,
        Some("mvp" | "pilot") => 3.5,
        Some("beta") => 4.0,
        Some("production" | "deployed") => 5.0,
        _ => 1.0,
    }
}

fn outcome_hits<'a>(
    evidence: &'a [EvidenceItem],
    re: &LazyLock<Option<Regex>>,
    threshold: f64,
) -> Vec<&'a EvidenceItem> {
    evidence
        .iter()
        .filter(|item| item.quality >= threshold)
        .filter(|item| is_match(re, &item.snippet.to_lowercase()))
        .collect()
}

#[allow(clippy::too_many_lines, clippy::cast_precision_loss)]
fn rule_for<'a>(
    dimension: Dimension,
    key: &str,
    facts: &FactView<'a>,
    stage: MarketStage,
    rubric: &DdRubric,
) -> Result<Option<RuleOutcome<'a>>, DdError> {
    let outcome = match (dimension, key) {
        (Dimension::TeamDd, "named_operators") => facts.team.map(|(team, evidence)| {
            let references = f64::from(team.references_count);
            RuleOutcome::new(references, 1.0 + references.min(4.0), evidence)
        }),
        (Dimension::TeamDd, "technical_leadership") => facts.team.map(|(_, evidence)| {
            let leads = facts.technical_leads() as f64;
            let rule = match facts.technical_leads() {
                0 => 1.5,
                1 => 4.5,
                _ => 5.0,
            };
            RuleOutcome::new(leads, rule, evidence)
        }),
        (Dimension::TeamDd, "commitment") => facts.team.map(|(team, evidence)| {
            RuleOutcome::new(team.commitment_level, team.commitment_level, evidence)
        }),
        (Dimension::TeamDd, "founder_risk") => facts.team.map(|(team, evidence)| {
            let flags = team.founder_risk_flags.len() as f64;
            RuleOutcome::new(flags, 5.0 - flags, evidence)
        }),
        (Dimension::TeamFit, "tech_fit") => facts.team.map(|(_, team_evidence)| {
            let lead = facts.technical_leads() > 0;
            let tech = facts.tech.map(|(tech, _)| tech);
            let velocity = tech.map_or(0.0, |tech| tech.commit_velocity_90d);
            let rule = 1.0
                + 1.5 * flag(lead)
                + (velocity / 20.0).min(1.0)
                + 0.5 * flag(tech.is_some_and(|tech| tech.ci_present))
                + 0.5 * flag(tech.is_some_and(|tech| tech.benchmark_artifacts > 0))
                + 0.5 * flag(tech.is_some_and(|tech| tech.contributor_count >= 3));
            let cited = team_evidence.iter().chain(facts.tech_evidence()).collect();
            RuleOutcome::citing(velocity, rule, cited)
        }),
        (Dimension::TeamFit, "product_fit") => facts.team.map(|(_, team_evidence)| {
            let persona = facts.market.map_or(1.0, |(market, _)| market.buyer_persona_clarity);
            let prototype = facts
                .tech
                .map_or(1.0, |(tech, _)| prototype_ladder(tech.prototype_stage.as_deref()));
            let rule = 1.0
                + 1.5 * flag(facts.has_role(&PRODUCT_ROLE_RE))
                + (0.5 * (clamp(persona, 1.0, 5.0) - 1.0)).min(2.0)
                + 0.5 * flag(prototype >= 3.0);
            let cited = team_evidence.iter().chain(facts.market_evidence()).collect();
            RuleOutcome::citing(persona, rule, cited)
        }),
        (Dimension::TeamFit, "sales_fit") => facts.team.map(|(_, team_evidence)| {
            let market = facts.market.map(|(market, _)| market);
            let interviews = market.map_or(0.0, |market| f64::from(market.customer_interviews));
            let commitments = market.map_or(0.0, |market| {
                f64::from(market.lois + market.pilots + market.paid_pilots)
            });
            let rule = 1.0
                + 1.5 * flag(facts.has_role(&SALES_ROLE_RE))
                + (interviews / 10.0).min(1.0)
                + 0.5 * flag(market.is_some_and(|market| market.pricing_evidence))
                + 0.5 * commitments.min(2.0);
            let cited = team_evidence.iter().chain(facts.market_evidence()).collect();
            RuleOutcome::citing(interviews, rule, cited)
        }),
        (Dimension::TechDd, "quality") => facts.tech.map(|(tech, evidence)| {
            let rule = 1.0
                + flag(tech.ci_present)
                + (tech.test_signal / 2.0).min(1.5)
                + (tech.commit_velocity_90d / 20.0).min(1.5);
            RuleOutcome::new(tech.commit_velocity_90d, rule, evidence)
        }),
        (Dimension::TechDd, "performance") => facts.tech.map(|(tech, evidence)| {
            let artifacts = f64::from(tech.benchmark_artifacts);
            let measured = evidence
                .iter()
                .any(|item| is_match(&PERFORMANCE_RE, &item.snippet.to_lowercase()));
            RuleOutcome::new(artifacts, 1.0 + (1.5 * artifacts).min(3.0) + flag(measured), evidence)
        }),
        (Dimension::TechDd, "scalability") => facts.tech.map(|(tech, evidence)| {
            let contributors = f64::from(tech.contributor_count);
            let rule = 0.6 * prototype_ladder(tech.prototype_stage.as_deref())
                + 0.4 * (1.0 + contributors.min(4.0));
            RuleOutcome::new(contributors, rule, evidence)
        }),
        (Dimension::TechDd, "moat_signal") => facts.tech.map(|(tech, evidence)| {
            let indicators = tech.ip_indicators.len() as f64;
            let patent = tech
                .ip_indicators
                .iter()
                .any(|indicator| indicator.to_lowercase().contains("patent"));
            RuleOutcome::new(indicators, 1.0 + indicators.min(3.0) + flag(patent), evidence)
        }),
        (Dimension::MarketDd, "validation_stage") => facts.market.map(|(_, evidence)| {
            RuleOutcome::new(stage.rank(), stage_to_score(stage, rubric), evidence)
        }),
        (Dimension::MarketDd, "icp_pricing_clarity") => facts.market.map(|(market, evidence)| {
            let pricing = if market.pricing_evidence { 4.0 } else { 1.5 };
            let rule = 0.5 * clamp(market.buyer_persona_clarity, 1.0, 5.0) + 0.5 * pricing;
            RuleOutcome::new(market.buyer_persona_clarity, rule, evidence)
        }),
        (Dimension::MarketDd, "sales_cycle_realism") => facts.market.map(|(market, evidence)| {
            RuleOutcome::new(market.sam_som_quality, market.sam_som_quality, evidence)
        }),
        (Dimension::ExecutionDd, "tech_outcomes") => facts.tech.map(|(tech, evidence)| {
            let hits = outcome_hits(evidence, &TECH_OUTCOME_RE, rubric.quality_threshold);
            let count = hits.len() as f64 + f64::from(tech.benchmark_artifacts);
            RuleOutcome::citing(count, 1.0 + count.min(4.0), hits)
        }),
        (Dimension::ExecutionDd, "market_outcomes") => facts.market.map(|(market, evidence)| {
            let hits = outcome_hits(evidence, &MARKET_OUTCOME_RE, rubric.quality_threshold);
            let count =
                hits.len() as f64 + f64::from(market.lois + market.pilots + market.paid_pilots);
            RuleOutcome::citing(count, 1.0 + count.min(4.0), hits)
        }),
        (Dimension::LegalDd, "entity_ip_basics") => facts.legal.map(|(legal, evidence)| {
            let rule = 1.0
                + 1.5 * flag(legal.entity_known())
                + 1.5 * flag(legal.ip_known())
                + flag(legal.founder_agreements);
            RuleOutcome::new(rule, rule, evidence)
        }),
        (Dimension::LegalDd, "compliance_risk_penalty") => facts.legal.map(|(legal, evidence)| {
            let rule = clamp(6.0 - legal.legal_risk_score, 1.0, 5.0)
                - 0.5 * legal.critical_conflicts() as f64
                - 0.5 * flag(legal.licensing_constraints);
            RuleOutcome::new(legal.legal_risk_score, rule, evidence)
        }),
        _ => {
            return Err(DdError::Scoring(format!(
                "no rule for component `{key}` of {}",
                dimension.as_str()
            )))
        }
    };
    Ok(outcome)
}

/// Rule value reconciled with an optional AI suggestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub final_value: f64,
    pub ai_suggested_value: Option<f64>,
    pub ai_used: bool,
    pub manual_review_flag: bool,
    pub audit_reason: Option<String>,
}

/// The rule value stands unless the AI value disagrees by more than
/// `tolerance`, in which case the AI value wins and is flagged for review.
#[must_use]
pub fn resolve_component(rule_value: f64, suggestion: &AiSuggestion, tolerance: f64) -> Resolution {
    match suggestion {
        AiSuggestion::Unavailable => Resolution {
            final_value: rule_value,
            ai_suggested_value: None,
            ai_used: false,
            manual_review_flag: false,
            audit_reason: None,
        },
        AiSuggestion::Suggested { value, model, .. } => {
            let gap = (value - rule_value).abs();
            if gap > tolerance {
                Resolution {
                    final_value: *value,
                    ai_suggested_value: Some(*value),
                    ai_used: true,
                    manual_review_flag: true,
                    audit_reason: Some(format!(
                        "rule_ai_disagreement: rule={rule_value:.2} ai={value:.2} gap={gap:.2} tolerance={tolerance:.2} model={model}"
                    )),
                }
            } else {
                Resolution {
                    final_value: rule_value,
                    ai_suggested_value: Some(*value),
                    ai_used: true,
                    manual_review_flag: false,
                    audit_reason: None,
                }
            }
        }
    }
}

fn join_audit(parts: [Option<String>; 2]) -> Option<String> {
    let joined: Vec<String> = parts.into_iter().flatten().collect();
    (!joined.is_empty()).then(|| joined.join("; "))
}

/// Scores one dimension as the weighted average of its rubric components.
///
/// # Errors
/// Returns [`DdError::Scoring`] when the rubric names a component without a rule.
pub fn score_dimension(
    initiative_id: InitiativeId,
    dimension: Dimension,
    facts: &FactView<'_>,
    stage: MarketStage,
    rubric: &DdRubric,
    scorer: &dyn ComponentScorer,
) -> Result<DimensionScore, DdError> {
    let mut components = Vec::new();
    let mut cited: BTreeMap<&str, &EvidenceItem> = BTreeMap::new();
    let mut weight_total = 0.0;
    let mut contribution_total = 0.0;

    for (key, weight) in rubric.components(dimension) {
        let rule = rule_for(dimension, key, facts, stage, rubric)?;
        let (raw_value, rule_value, evidence, base_audit) = match rule {
            Some(outcome) => {
                let audit = outcome
                    .cited
                    .is_empty()
                    .then(|| NO_EVIDENCE_AUDIT.to_string());
                (outcome.raw_value, outcome.rule_value, outcome.cited, audit)
            }
            None => (
                0.0,
                rubric.no_evidence_floor,
                Vec::new(),
                Some(NO_FACT_AUDIT.to_string()),
            ),
        };

        let suggestion = scorer.suggest(initiative_id, dimension, key);
        let resolution = resolve_component(rule_value, &suggestion, rubric.ai_tolerance);
        if resolution.manual_review_flag {
            tracing::warn!(
                initiative_id = %initiative_id,
                dimension = dimension.as_str(),
                component = key.as_str(),
                rule_value,
                ai_value = resolution.final_value,
                "rule and AI values disagree beyond tolerance; flagged for manual review"
            );
        }

        let normalized_value = clamp(resolution.final_value, 1.0, 5.0);
        let confidence = component_confidence_from_evidence(
            &evidence,
            rubric.quality_threshold,
            rubric.no_evidence_confidence_penalty,
        );
        for item in evidence.iter().copied() {
            cited.insert(item.evidence_ref.as_str(), item);
        }

        weight_total += weight;
        contribution_total += normalized_value * weight;
        components.push(ScoreComponent {
            dimension,
            component_key: key.clone(),
            raw_value,
            normalized_value,
            weight: *weight,
            weighted_contribution: normalized_value * weight,
            rule_value,
            ai_suggested_value: resolution.ai_suggested_value,
            final_value: resolution.final_value,
            ai_used: resolution.ai_used,
            manual_review_flag: resolution.manual_review_flag,
            audit_reason: join_audit([base_audit, resolution.audit_reason]),
            confidence,
            evidence_refs: evidence.iter().map(|item| item.evidence_ref.clone()).collect(),
        });
    }

    if weight_total <= 0.0 {
        return Err(DdError::Scoring(format!(
            "{} has no weighted components",
            dimension.as_str()
        )));
    }

    let cited: Vec<&EvidenceItem> = cited.into_values().collect();
    let qualifying: Vec<&EvidenceItem> = cited
        .iter()
        .copied()
        .filter(|item| item.quality >= rubric.quality_threshold)
        .collect();

    Ok(DimensionScore {
        dimension,
        score: contribution_total / weight_total,
        confidence: component_confidence_from_evidence(
            &cited,
            rubric.quality_threshold,
            rubric.no_evidence_confidence_penalty,
        ),
        qualifying_evidence: qualifying.len(),
        source_classes: source_diversity(qualifying.iter().copied()),
        components,
    })
}

/// Product, tech and sales fit from the team fact alone.
///
/// # Errors
/// Returns [`DdError::Scoring`] when a fit component has no rule.
pub fn score_team_fit(
    initiative_id: InitiativeId,
    facts: &[DimensionFact],
    rubric: &DdRubric,
    scorer: &dyn ComponentScorer,
) -> Result<DimensionScore, DdError> {
    let view = FactView::new(facts);
    let stage = view.market_stage();
    score_dimension(initiative_id, Dimension::TeamFit, &view, stage, rubric, scorer)
}

/// Scores every dimension, team fit included, for one initiative.
///
/// # Errors
/// Returns [`DdError::Validation`] when a fact belongs to another initiative,
/// or [`DdError::Scoring`] when a component has no rule.
pub fn score_initiative(
    initiative_id: InitiativeId,
    facts: &[DimensionFact],
    rubric: &DdRubric,
    scorer: &dyn ComponentScorer,
) -> Result<ScoreSet, DdError> {
    if let Some(stray) = facts.iter().find(|fact| fact.initiative_id != initiative_id) {
        return Err(DdError::Validation(format!(
            "{} fact belongs to initiative {}, not {initiative_id}",
            stray.kind().as_str(),
            stray.initiative_id
        )));
    }

    let view = FactView::new(facts);
    let stage = view.market_stage();
    let mut dimensions = BTreeMap::new();
    for dimension in Dimension::ALL {
        let scored = score_dimension(initiative_id, dimension, &view, stage, rubric, scorer)?;
        dimensions.insert(dimension, scored);
    }

    Ok(ScoreSet {
        initiative_id,
        rubric_version: rubric.rubric_version,
        market_stage: stage,
        dimensions,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::evidence::{EvidenceInput, SourceType};
    use crate::facts::{prepare_fact, FactInput};
    use crate::test_support::{as_of, must_ok, must_some};

    pub(crate) fn fact(input: FactInput) -> DimensionFact {
        must_ok(prepare_fact(None, &input, &DdRubric::v1(), as_of()))
    }

    pub(crate) fn techcore_facts(id: InitiativeId, market: MarketFact, market_snippet: &str) -> Vec<DimensionFact> {
        vec![
            fact(
                FactInput::new(
                    id,
                    FactBody::Team(TeamFact {
                        commitment_level: 4.2,
                        key_roles: vec!["Founder".to_string(), "CTO".to_string()],
                        references_count: 3,
                        investable_segment: Some("spinout_candidate".to_string()),
                        is_investable: true,
                        ..TeamFact::default()
                    }),
                )
                .with_evidence(vec![
                    EvidenceInput::new(
                        SourceType::PeopleMarkdown,
                        "https://example.org/team",
                        "John Smith CTO with 5 years deep-tech engineering experience",
                    ),
                    EvidenceInput::new(
                        SourceType::ManualDd,
                        "file:///tmp/team.md",
                        "Technical lead confirmed, product owner confirmed, full-time commitment 2026",
                    ),
                ]),
            ),
            fact(
                FactInput::new(
                    id,
                    FactBody::Tech(TechFact {
                        github_org: Some("example".to_string()),
                        github_repo: Some("core".to_string()),
                        repo_count: 1,
                        contributor_count: 5,
                        commit_velocity_90d: 24.0,
                        ci_present: true,
                        test_signal: 3.0,
                        benchmark_artifacts: 1,
                        prototype_stage: Some("prototype".to_string()),
                        ip_indicators: vec!["patent_hint".to_string()],
                    }),
                )
                .with_evidence(vec![
                    EvidenceInput::new(
                        SourceType::GithubApi,
                        "https://github.com/example/core",
                        "Commits in 90 days: 24 with CI checks and benchmarks",
                    ),
                    EvidenceInput::new(
                        SourceType::PublicSignals,
                        "https://example.org/tech",
                        "Prototype benchmark target met with low latency and high throughput",
                    ),
                ]),
            ),
            fact(
                FactInput::new(id, FactBody::Market(market)).with_evidence(vec![
                    EvidenceInput::new(SourceType::ManualDd, "file:///tmp/market.csv", market_snippet),
                    EvidenceInput::new(
                        SourceType::PublicSignals,
                        "https://example.org/market",
                        "Pricing and buyer persona are defined for enterprise customer pipeline",
                    ),
                ]),
            ),
            fact(
                FactInput::new(
                    id,
                    FactBody::Legal(LegalFact {
                        entity_status: Some("incorporated".to_string()),
                        ip_ownership_status: Some("team_owned".to_string()),
                        founder_agreements: true,
                        licensing_constraints: false,
                        compliance_flags: Vec::new(),
                        legal_risk_score: 2.0,
                    }),
                )
                .with_evidence(vec![
                    EvidenceInput::new(
                        SourceType::ManualDd,
                        "file:///tmp/legal.pdf",
                        "Entity registered, IP assignment signed, founder agreement in place 2026",
                    ),
                    EvidenceInput::new(
                        SourceType::PublicSignals,
                        "https://example.org/legal",
                        "No unresolved critical legal conflict reported",
                    ),
                ]),
            ),
        ]
    }

    pub(crate) fn market(interviews: u32, lois: u32, pilots: u32, paid: u32) -> MarketFact {
        MarketFact {
            customer_interviews: interviews,
            lois,
            pilots,
            paid_pilots: paid,
            pricing_evidence: true,
            buyer_persona_clarity: 3.8,
            sam_som_quality: 3.4,
        }
    }

    pub(crate) fn market_snippet(interviews: u32, lois: u32, pilots: u32, paid: u32) -> String {
        format!(
            "Customer interviews logged: {interviews}; LOI count: {lois}; pilot count: {pilots}; paid pilot count: {paid}"
        )
    }

    fn score(facts: &[DimensionFact], id: InitiativeId) -> ScoreSet {
        must_ok(score_initiative(id, facts, &DdRubric::v1(), &NoAiScorer))
    }

    #[test]
    fn stage_text_ignores_negated_and_zero_mentions() {
        assert_eq!(stage_from_text(&market_snippet(8, 0, 0, 0)), MarketStage::Interviews);
        assert_eq!(stage_from_text(&market_snippet(10, 1, 0, 0)), MarketStage::Loi);
        assert_eq!(
            stage_from_text("Customer interviews logged: 5 with no LOI and no pilot yet"),
            MarketStage::Interviews
        );
        assert_eq!(stage_from_text("ARR crossed 200k"), MarketStage::RepeatRevenue);
        assert_eq!(stage_from_text("Nothing to report"), MarketStage::None);
    }

    #[test]
    fn negated_phrase_hides_nested_lower_stages() {
        assert_eq!(stage_from_text("no paid pilot yet"), MarketStage::None);
        assert_eq!(stage_from_text("paid pilot count: 0"), MarketStage::None);
        assert_eq!(
            stage_from_text("no paid pilot yet, one unpaid pilot running"),
            MarketStage::Pilot
        );
        assert_eq!(
            stage_from_text("Signed LOI, no paying customers"),
            MarketStage::Loi
        );
    }

    #[test]
    fn stage_is_max_of_counts_and_text() {
        let counts = market(0, 0, 1, 0);
        let evidence = fact(
            FactInput::new(InitiativeId::new(), FactBody::Market(counts.clone())).with_evidence(vec![
                EvidenceInput::new(SourceType::ManualDd, "", "Signed a letter of intent"),
            ]),
        )
        .evidence;
        assert_eq!(infer_market_stage(&counts, &evidence), MarketStage::Pilot);
        assert_eq!(infer_market_stage(&market(0, 0, 0, 0), &evidence), MarketStage::Loi);
    }

    #[test]
    fn market_dd_is_monotonic_in_stage() {
        let id = InitiativeId::new();
        let mut previous = 0.0;
        let mut stages = Vec::new();
        for (interviews, lois, pilots, paid) in [(8, 0, 0, 0), (10, 1, 0, 0), (14, 2, 1, 1)] {
            let facts = techcore_facts(
                id,
                market(interviews, lois, pilots, paid),
                &market_snippet(interviews, lois, pilots, paid),
            );
            let scored = score(&facts, id);
            assert!(scored.score(Dimension::MarketDd) > previous);
            previous = scored.score(Dimension::MarketDd);
            stages.push(scored.market_stage.as_str());
        }
        assert_eq!(stages, vec!["interviews", "loi", "paid_pilot"]);
    }

    #[test]
    fn market_dd_rises_with_each_validation_step() {
        let id = InitiativeId::new();
        let ladder: Vec<(f64, &str)> = [(8, 0, 0, 0), (8, 1, 0, 0), (8, 1, 0, 1)]
            .into_iter()
            .map(|(interviews, lois, pilots, paid)| {
                let facts = techcore_facts(
                    id,
                    market(interviews, lois, pilots, paid),
                    &market_snippet(interviews, lois, pilots, paid),
                );
                let scored = score(&facts, id);
                (scored.score(Dimension::MarketDd), scored.market_stage.as_str())
            })
            .collect();

        let labels: Vec<&str> = ladder.iter().map(|(_, stage)| *stage).collect();
        assert_eq!(labels, vec!["interviews", "loi", "paid_pilot"]);
        assert!(ladder[0].0 < ladder[1].0, "{ladder:?}");
        assert!(ladder[1].0 < ladder[2].0, "{ladder:?}");
    }

    #[test]
    fn team_fit_marks_tech_strong_and_sales_weak() {
        let id = InitiativeId::new();
        let weak_market = MarketFact {
            customer_interviews: 5,
            pricing_evidence: false,
            buyer_persona_clarity: 2.2,
            sam_som_quality: 2.0,
            ..MarketFact::default()
        };
        let facts = techcore_facts(
            id,
            weak_market,
            "Customer interviews logged: 5 with no LOI and no pilot yet",
        );
        let scored = score(&facts, id);
        assert!(scored.fit("tech_fit") >= 4.0);
        assert!(scored.fit("sales_fit") < 3.0);
        assert!(scored.fit("tech_fit") > scored.fit("sales_fit"));

        let fit_only = must_ok(score_team_fit(id, &facts, &DdRubric::v1(), &NoAiScorer));
        assert_eq!(Some(&fit_only), scored.dimension(Dimension::TeamFit));
    }

    #[test]
    fn missing_facts_fall_back_to_floor() {
        let id = InitiativeId::new();
        let scored = score(&[], id);
        let legal = must_some(scored.dimension(Dimension::LegalDd));
        assert!((legal.score - 1.0).abs() < f64::EPSILON);
        assert!((legal.confidence - 0.12).abs() < 1e-9);
        assert!(legal
            .components
            .iter()
            .all(|component| component.audit_reason.as_deref() == Some(NO_FACT_AUDIT)));
    }

    #[test]
    fn ai_within_tolerance_keeps_rule_value() {
        let suggestion = AiSuggestion::Suggested {
            value: 3.5,
            rationale: "close".to_string(),
            model: "m".to_string(),
        };
        let resolved = resolve_component(3.0, &suggestion, 0.75);
        assert!((resolved.final_value - 3.0).abs() < f64::EPSILON);
        assert!(resolved.ai_used);
        assert!(!resolved.manual_review_flag);
    }

    #[test]
    fn ai_beyond_tolerance_wins_and_is_audited() {
        let suggestion = AiSuggestion::Suggested {
            value: 4.5,
            rationale: "strong pilot".to_string(),
            model: "m".to_string(),
        };
        let resolved = resolve_component(2.0, &suggestion, 0.75);
        assert!((resolved.final_value - 4.5).abs() < f64::EPSILON);
        assert!(resolved.manual_review_flag);
        let audit = must_some(resolved.audit_reason);
        assert!(audit.contains("rule=2.00"));
        assert!(audit.contains("ai=4.50"));
        assert!(audit.contains("gap=2.50"));

        let unavailable = resolve_component(2.0, &AiSuggestion::Unavailable, 0.75);
        assert!(!unavailable.ai_used);
        assert!((unavailable.final_value - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn suggestion_table_feeds_components() {
        let id = InitiativeId::new();
        let facts = techcore_facts(id, market(8, 0, 0, 0), &market_snippet(8, 0, 0, 0));
        let table: SuggestionTable = [StoredSuggestion {
            initiative_id: id,
            dimension: Dimension::MarketDd,
            component_key: "validation_stage".to_string(),
            value: 4.4,
            rationale: "paid pilot mentioned in call notes".to_string(),
            model: "reviewer-v1".to_string(),
        }]
        .into_iter()
        .collect();

        let scored = must_ok(score_initiative(id, &facts, &DdRubric::v1(), &table));
        let component = must_some(
            must_some(scored.dimension(Dimension::MarketDd)).component("validation_stage"),
        );
        assert!(component.manual_review_flag);
        assert!((component.final_value - 4.4).abs() < f64::EPSILON);
        assert!((component.rule_value - 1.8).abs() < f64::EPSILON);
    }

    #[test]
    fn dimension_score_is_weighted_average() {
        let id = InitiativeId::new();
        let facts = techcore_facts(id, market(8, 0, 0, 0), &market_snippet(8, 0, 0, 0));
        let scored = score(&facts, id);
        for dimension in Dimension::ALL {
            let dim = must_some(scored.dimension(dimension));
            let weights: f64 = dim.components.iter().map(|c| c.weight).sum();
            let contributions: f64 = dim.components.iter().map(|c| c.weighted_contribution).sum();
            assert!((dim.score - contributions / weights).abs() < 1e-9);
            assert!((1.0..=5.0).contains(&dim.score));
            assert!((0.0..=1.0).contains(&dim.confidence));
        }
    }

    #[test]
    fn rescoring_is_bit_identical() {
        let id = InitiativeId::new();
        let facts = techcore_facts(id, market(10, 1, 0, 0), &market_snippet(10, 1, 0, 0));
        assert_eq!(score(&facts, id), score(&facts, id));
    }

    #[test]
    fn rejects_foreign_facts() {
        let facts = techcore_facts(InitiativeId::new(), market(1, 0, 0, 0), "x");
        assert!(matches!(
            score_initiative(InitiativeId::new(), &facts, &DdRubric::v1(), &NoAiScorer),
            Err(DdError::Validation(_))
        ));
    }
}
