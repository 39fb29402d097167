//! Evidence quality model: per-snippet specificity, recency, source
//! reliability and independence, plus the aggregate helpers used by the
//! scorer and the gates.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::rubric::QualityWeights;
use crate::{clamp, mean, stable_hash};

pub const MAX_SNIPPET_CHARS: usize = 320;

const BOILERPLATE_TERMS: [&str; 10] = [
    "about us",
    "privacy policy",
    "terms of use",
    "cookie policy",
    "all rights reserved",
    "impressum",
    "legal notice",
    "contact us",
    "newsletter",
    "follow us",
];

static HARD_TOKEN_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:benchmarks?|latency|accuracy|prototypes?|field tests?|pilots?|paid|lois?|contracts?|customers?|founded|cto|product lead|sales lead|ci|tests?)\b",
    )
    .ok()
});

static NUMBER_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b\d{1,4}\b").ok());

static YEAR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b20\d{2}\b").ok());

static TEMPORAL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(?:today|this year|current|recent|latest)\b").ok());

fn is_match(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

/// Evidence producer vocabulary. Unknown producers are kept verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    ManualDd,
    GithubApi,
    PeopleMarkdown,
    PublicSignals,
    WebsiteEnrichment,
    SeedMarkdown,
    Openalex,
    SemanticScholar,
    Huggingface,
    LinkedinSafe,
    ResearchgateSafe,
    Other(String),
}

impl SourceType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ManualDd => "manual_dd",
            Self::GithubApi => "github_api",
            Self::PeopleMarkdown => "people_markdown",
            Self::PublicSignals => "public_signals",
            Self::WebsiteEnrichment => "website_enrichment",
            Self::SeedMarkdown => "seed_markdown",
            Self::Openalex => "openalex",
            Self::SemanticScholar => "semantic_scholar",
            Self::Huggingface => "huggingface",
            Self::LinkedinSafe => "linkedin_safe",
            Self::ResearchgateSafe => "researchgate_safe",
            Self::Other(value) => value,
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "manual_dd" => Self::ManualDd,
            "github_api" => Self::GithubApi,
            "people_markdown" => Self::PeopleMarkdown,
            "public_signals" => Self::PublicSignals,
            "website_enrichment" => Self::WebsiteEnrichment,
            "seed_markdown" => Self::SeedMarkdown,
            "openalex" => Self::Openalex,
            "semantic_scholar" => Self::SemanticScholar,
            "huggingface" => Self::Huggingface,
            "linkedin_safe" => Self::LinkedinSafe,
            "researchgate_safe" => Self::ResearchgateSafe,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn reliability(&self) -> f64 {
        match self {
            Self::ManualDd => 1.0,
            Self::GithubApi => 0.9,
            Self::PeopleMarkdown => 0.8,
            Self::PublicSignals => 0.6,
            Self::WebsiteEnrichment => 0.5,
            Self::SeedMarkdown => 0.4,
            _ => 0.5,
        }
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Other(value) if value.is_empty())
    }

    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::GithubApi | Self::Openalex | Self::SemanticScholar | Self::Huggingface
        )
    }

    #[must_use]
    pub fn is_manual(&self) -> bool {
        matches!(
            self,
            Self::ManualDd | Self::PeopleMarkdown | Self::LinkedinSafe | Self::ResearchgateSafe
        )
    }
}

impl From<String> for SourceType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<SourceType> for String {
    fn from(value: SourceType) -> Self {
        value.as_str().to_string()
    }
}

impl Display for SourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw evidence as emitted by a producer, before quality scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceInput {
    pub source_type: SourceType,
    #[serde(default)]
    pub source_url: String,
    pub snippet: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub fetched_at: Option<OffsetDateTime>,
}

impl EvidenceInput {
    #[must_use]
    pub fn new(source_type: SourceType, source_url: &str, snippet: &str) -> Self {
        Self {
            source_type,
            source_url: source_url.to_string(),
            snippet: snippet.to_string(),
            confidence: None,
            fetched_at: None,
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub evidence_ref: String,
    pub source_type: SourceType,
    pub source_url: String,
    pub snippet: String,
    pub specificity: f64,
    pub recency: f64,
    pub reliability: f64,
    pub independence: f64,
    pub quality: f64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplied_confidence: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
}

impl EvidenceItem {
    #[must_use]
    pub fn to_input(&self) -> EvidenceInput {
        EvidenceInput {
            source_type: self.source_type.clone(),
            source_url: self.source_url.clone(),
            snippet: self.snippet.clone(),
            confidence: self.supplied_confidence,
            fetched_at: Some(self.fetched_at),
        }
    }

    #[must_use]
    pub fn key(&self) -> EvidenceKey {
        EvidenceKey {
            source_type: self.source_type.clone(),
            source_url: self.source_url.clone(),
            snippet: self.snippet.clone(),
        }
    }
}

/// Natural de-duplication key of an evidence item within one fact.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EvidenceKey {
    pub source_type: SourceType,
    pub source_url: String,
    pub snippet: String,
}

#[must_use]
pub fn evidence_ref(key: &EvidenceKey) -> String {
    let hash = stable_hash(&format!(
        "{}\u{1f}{}\u{1f}{}",
        key.source_type, key.source_url, key.snippet
    ));
    format!("ev_{hash:016x}")
}

/// Lowercases scheme and host, drops query and fragment, strips a trailing
/// slash and assumes `https://` when no scheme is present.
#[must_use]
pub fn canonicalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let (scheme, rest) = match trimmed.split_once("://") {
        Some((scheme, rest)) => (scheme.to_lowercase(), rest),
        None => ("https".to_string(), trimmed),
    };
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let (host, path) = match rest.find('/') {
        Some(index) => (&rest[..index], &rest[index..]),
        None => (rest, ""),
    };
    let path = path.trim_end_matches('/');

    format!("{scheme}://{}{path}", host.to_lowercase())
}

#[must_use]
pub fn normalize_snippet(raw: &str) -> String {
    raw.trim().chars().take(MAX_SNIPPET_CHARS).collect()
}

#[must_use]
pub fn specificity_score(snippet: &str) -> f64 {
    let text = snippet.trim().to_lowercase();
    if text.is_empty() {
        return 0.0;
    }

    let length = text.chars().count();
    let mut score = 0.35;
    if length > 40 {
        score += 0.15;
    }
    if length > 120 {
        score += 0.15;
    }
    if is_match(&NUMBER_RE, &text) {
        score += 0.10;
    }
    if is_match(&HARD_TOKEN_RE, &text) {
        score += 0.25;
    }
    if BOILERPLATE_TERMS.iter().any(|term| text.contains(term)) {
        score -= 0.35;
    }

    clamp(score, 0.0, 1.0)
}

#[must_use]
pub fn recency_score(snippet: &str, as_of: OffsetDateTime) -> f64 {
    let text = snippet.trim().to_lowercase();
    if text.is_empty() {
        return 0.0;
    }
    if is_match(&TEMPORAL_RE, &text) {
        return 0.9;
    }

    let newest = YEAR_RE.as_ref().and_then(|re| {
        re.find_iter(&text)
            .filter_map(|found| found.as_str().parse::<i32>().ok())
            .max()
    });
    let Some(newest) = newest else {
        return 0.5;
    };

    match (as_of.year() - newest).max(0) {
        0..=1 => 0.9,
        2 => 0.75,
        3..=4 => 0.55,
        _ => 0.35,
    }
}

/// Independence of one item given every source type cited by the same fact.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn independence_for(source_type: &SourceType, all: &[SourceType]) -> f64 {
    let known: Vec<&SourceType> = all.iter().filter(|source| !source.is_unknown()).collect();
    let unique: BTreeSet<&SourceType> = known.iter().copied().collect();
    if source_type.is_unknown() || unique.len() <= 1 {
        return 0.35;
    }

    let same = known.iter().filter(|source| **source == source_type).count();
    clamp(1.0 - same as f64 / known.len().max(1) as f64, 0.35, 1.0)
}

#[must_use]
pub fn score_evidence_quality(
    specificity: f64,
    recency: f64,
    reliability: f64,
    independence: f64,
    weights: &QualityWeights,
) -> f64 {
    clamp(
        weights.specificity * specificity
            + weights.recency * recency
            + weights.source_reliability * reliability
            + weights.independence * clamp(independence, 0.0, 1.0),
        0.0,
        1.0,
    )
}

/// Scores a batch of evidence belonging to one fact. Independence is judged
/// against the whole batch, so callers pass the merged list.
#[must_use]
pub fn enrich_evidence(
    inputs: &[EvidenceInput],
    weights: &QualityWeights,
    as_of: OffsetDateTime,
) -> Vec<EvidenceItem> {
    let all_sources: Vec<SourceType> = inputs.iter().map(|input| input.source_type.clone()).collect();

    inputs
        .iter()
        .map(|input| {
            let key = EvidenceKey {
                source_type: input.source_type.clone(),
                source_url: canonicalize_url(&input.source_url),
                snippet: normalize_snippet(&input.snippet),
            };
            let specificity = specificity_score(&key.snippet);
            let recency = recency_score(&key.snippet, as_of);
            let reliability = key.source_type.reliability();
            let independence = independence_for(&key.source_type, &all_sources);
            let quality =
                score_evidence_quality(specificity, recency, reliability, independence, weights);
            let confidence = clamp(input.confidence.unwrap_or(quality), 0.0, 1.0);

            EvidenceItem {
                evidence_ref: evidence_ref(&key),
                source_type: key.source_type,
                source_url: key.source_url,
                snippet: key.snippet,
                specificity,
                recency,
                reliability,
                independence,
                quality,
                confidence,
                supplied_confidence: input.confidence.map(|value| clamp(value, 0.0, 1.0)),
                fetched_at: input.fetched_at.unwrap_or(as_of),
            }
        })
        .collect()
}

#[must_use]
pub fn qualifying_evidence(items: &[EvidenceItem], threshold: f64) -> Vec<&EvidenceItem> {
    items.iter().filter(|item| item.quality >= threshold).collect()
}

#[must_use]
pub fn source_diversity<'a>(items: impl IntoIterator<Item = &'a EvidenceItem>) -> usize {
    items
        .into_iter()
        .filter(|item| !item.source_type.is_unknown())
        .map(|item| &item.source_type)
        .collect::<BTreeSet<_>>()
        .len()
}

/// Mean quality of qualifying evidence plus a diversity bonus, or the
/// configured no-evidence penalty when nothing qualifies.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn component_confidence_from_evidence(
    items: &[&EvidenceItem],
    threshold: f64,
    no_evidence_penalty: f64,
) -> f64 {
    let qualified: Vec<&EvidenceItem> = items
        .iter()
        .copied()
        .filter(|item| item.quality >= threshold)
        .collect();
    let Some(avg_quality) = mean(qualified.iter().map(|item| item.quality)) else {
        return clamp(no_evidence_penalty, 0.0, 1.0);
    };

    let diversity_bonus = 0.08 * source_diversity(qualified.iter().copied()).min(3) as f64;
    clamp(avg_quality + diversity_bonus, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::as_of;
    use proptest::prelude::*;

    fn item(source_type: SourceType, quality: f64, snippet: &str) -> EvidenceItem {
        EvidenceItem {
            evidence_ref: String::new(),
            source_type,
            source_url: "https://example.org".to_string(),
            snippet: snippet.to_string(),
            specificity: quality,
            recency: 0.5,
            reliability: 0.5,
            independence: 0.5,
            quality,
            confidence: quality,
            supplied_confidence: None,
            fetched_at: as_of(),
        }
    }

    #[test]
    fn canonical_urls_drop_noise() {
        assert_eq!(
            canonicalize_url("HTTPS://Example.ORG/Team/?utm=1#top"),
            "https://example.org/Team"
        );
        assert_eq!(canonicalize_url("example.org/"), "https://example.org");
        assert_eq!(canonicalize_url("  "), "");
    }

    #[test]
    fn snippets_are_truncated() {
        let long = "x".repeat(500);
        assert_eq!(normalize_snippet(&long).chars().count(), MAX_SNIPPET_CHARS);
    }

    #[test]
    fn specificity_rewards_hard_signals() {
        let plain = specificity_score("A student team building things");
        let hard = specificity_score("Prototype benchmark hit 12 ms latency in field test");
        assert!(hard > plain);
        assert!((specificity_score("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn recency_buckets_follow_year_delta() {
        let now = as_of();
        assert!((recency_score("Latest release notes", now) - 0.9).abs() < f64::EPSILON);
        assert!((recency_score("Founded 2025", now) - 0.9).abs() < f64::EPSILON);
        assert!((recency_score("Founded 2024", now) - 0.75).abs() < f64::EPSILON);
        assert!((recency_score("Founded 2022", now) - 0.55).abs() < f64::EPSILON);
        assert!((recency_score("Founded 2015", now) - 0.35).abs() < f64::EPSILON);
        assert!((recency_score("No date here", now) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn reliability_lookup_defaults_to_half() {
        assert!((SourceType::ManualDd.reliability() - 1.0).abs() < f64::EPSILON);
        assert!((SourceType::parse("seed_markdown").reliability() - 0.4).abs() < f64::EPSILON);
        assert!((SourceType::parse("openalex").reliability() - 0.5).abs() < f64::EPSILON);
        assert!((SourceType::parse("rss").reliability() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn independence_floors_single_source_sets() {
        let single = [SourceType::GithubApi, SourceType::GithubApi];
        assert!((independence_for(&SourceType::GithubApi, &single) - 0.35).abs() < f64::EPSILON);

        let mixed = [
            SourceType::GithubApi,
            SourceType::ManualDd,
            SourceType::ManualDd,
            SourceType::ManualDd,
        ];
        assert!((independence_for(&SourceType::GithubApi, &mixed) - 0.75).abs() < 1e-9);
        assert!((independence_for(&SourceType::ManualDd, &mixed) - 0.35).abs() < 1e-9);
    }

    #[test]
    fn confidence_defaults_to_quality() {
        let inputs = [
            EvidenceInput::new(SourceType::ManualDd, "file:///tmp/a.md", "CTO confirmed 2026"),
            EvidenceInput::new(SourceType::GithubApi, "https://github.com/x", "CI on main")
                .with_confidence(0.2),
        ];
        let items = enrich_evidence(&inputs, &QualityWeights::default(), as_of());
        assert!((items[0].confidence - items[0].quality).abs() < f64::EPSILON);
        assert!((items[1].confidence - 0.2).abs() < f64::EPSILON);
        assert_eq!(items[0].evidence_ref, evidence_ref(&items[0].key()));
    }

    #[test]
    fn no_qualifying_evidence_returns_penalty() {
        let weak = item(SourceType::SeedMarkdown, 0.2, "club");
        assert!((component_confidence_from_evidence(&[&weak], 0.55, 0.12) - 0.12).abs() < 1e-9);
    }

    #[test]
    fn diversity_bonus_caps_at_three_sources() {
        let items = [
            item(SourceType::ManualDd, 0.6, "a"),
            item(SourceType::GithubApi, 0.6, "b"),
            item(SourceType::PublicSignals, 0.6, "c"),
            item(SourceType::Openalex, 0.6, "d"),
        ];
        let refs: Vec<&EvidenceItem> = items.iter().collect();
        let confidence = component_confidence_from_evidence(&refs, 0.55, 0.12);
        assert!((confidence - (0.6 + 0.24)).abs() < 1e-9);
    }

    const SAFE_WORDS: [&str; 6] = ["robotics", "team", "builds", "satellite", "drones", "lab"];

    proptest! {
        #[test]
        fn boilerplate_always_lowers_specificity(
            words in proptest::collection::vec(proptest::sample::select(SAFE_WORDS.to_vec()), 1..12),
            number in proptest::option::of(0_u32..9999),
            phrase in proptest::sample::select(BOILERPLATE_TERMS.to_vec()),
        ) {
            let mut base = words.join(" ");
            if let Some(number) = number {
                base.push_str(&format!(" {number}"));
            }
            let with_phrase = format!("{base} {phrase}");
            prop_assert!(specificity_score(&with_phrase) < specificity_score(&base));
        }

        #[test]
        fn diversity_never_exceeds_distinct_sources(
            sources in proptest::collection::vec(0_usize..5, 0..20),
        ) {
            let vocab = [
                SourceType::ManualDd,
                SourceType::GithubApi,
                SourceType::PublicSignals,
                SourceType::Openalex,
                SourceType::SeedMarkdown,
            ];
            let items: Vec<EvidenceItem> = sources
                .iter()
                .map(|index| item(vocab[*index].clone(), 0.7, "x"))
                .collect();
            let distinct: BTreeSet<usize> = sources.iter().copied().collect();
            prop_assert!(source_diversity(&items) <= distinct.len());
        }

        #[test]
        fn adding_a_new_source_never_lowers_confidence(
            quality in 0.55_f64..0.9,
            count in 1_usize..6,
        ) {
            let base: Vec<EvidenceItem> = (0..count)
                .map(|_| item(SourceType::ManualDd, quality, "x"))
                .collect();
            let mut diverse = base.clone();
            diverse.push(item(SourceType::GithubApi, quality, "y"));

            let base_refs: Vec<&EvidenceItem> = base.iter().collect();
            let diverse_refs: Vec<&EvidenceItem> = diverse.iter().collect();
            prop_assert!(
                component_confidence_from_evidence(&diverse_refs, 0.55, 0.12)
                    >= component_confidence_from_evidence(&base_refs, 0.55, 0.12)
            );
        }
    }
}
