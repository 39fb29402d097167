//! Cohort tiering over the scored pool and the investable/watchlist lenses.
//!
//! Tiers are relative to whatever pool is passed in, so recomputation is never
//! idempotent across pool changes. Callers must hand over the full current pool.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rubric::TierPolicy;
use crate::{Dimension, InitiativeId};

const UNKNOWN_UNIVERSITY: &str = "Unknown";
const UNCLASSIFIED: &str = "unclassified";

/// Ordered best to worst, so `S < A` holds for the derived ordering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Tier {
    S,
    A,
    B,
    C,
    X,
}

impl Tier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S => "S",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::X => "X",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "S" => Some(Self::S),
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "X" => Some(Self::X),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TierChange {
    New,
    Stable,
    Upgraded,
    Downgraded,
}

impl TierChange {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Stable => "stable",
            Self::Upgraded => "upgraded",
            Self::Downgraded => "downgraded",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "stable" => Some(Self::Stable),
            "upgraded" => Some(Self::Upgraded),
            "downgraded" => Some(Self::Downgraded),
            _ => None,
        }
    }
}

/// One scored initiative as seen by the tiering run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierCandidate {
    pub initiative_id: InitiativeId,
    pub name: String,
    pub university: Option<String>,
    pub classification: Option<String>,
    pub composite: f64,
    pub confidence: f64,
    pub dimension_scores: BTreeMap<Dimension, f64>,
    pub dimension_confidences: BTreeMap<Dimension, f64>,
    pub previous_tier: Option<Tier>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CohortStats {
    pub pool_size: usize,
    pub tier_distribution: BTreeMap<Tier, usize>,
    pub university_breakdown: BTreeMap<String, BTreeMap<Tier, usize>>,
    pub classification_distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierRecord {
    pub initiative_id: InitiativeId,
    pub tier: Tier,
    pub rationale: String,
    pub composite_percentile: f64,
    pub dimension_percentiles: BTreeMap<Dimension, f64>,
    pub previous_tier: Option<Tier>,
    pub tier_change: TierChange,
    pub change_reason: String,
    pub cohort_stats: CohortStats,
}

/// Percentile of `value` within `values`, ties sharing the midpoint rank.
///
/// Rounded to one decimal place. An empty pool yields `0.0`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percentile_rank(values: &[f64], value: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let below = values.iter().filter(|candidate| **candidate < value).count() as f64;
    let equal = values.iter().filter(|candidate| **candidate == value).count() as f64;
    let raw = (below + 0.5 * equal) / values.len() as f64 * 100.0;
    (raw * 10.0).round() / 10.0
}

fn low_confidence_dimensions(candidate: &TierCandidate, floor: f64) -> usize {
    Dimension::CONVICTION
        .iter()
        .filter(|dimension| {
            candidate
                .dimension_confidences
                .get(dimension)
                .copied()
                .unwrap_or(0.0)
                < floor
        })
        .count()
}

/// Tier for one candidate together with its rationale.
#[must_use]
pub fn assign_tier(candidate: &TierCandidate, policy: &TierPolicy) -> (Tier, String) {
    let low = low_confidence_dimensions(candidate, policy.low_confidence_floor);
    if low >= policy.low_confidence_dimensions_for_x {
        return (
            Tier::X,
            format!(
                "Insufficient data: low confidence on {}+ dimensions",
                policy.low_confidence_dimensions_for_x
            ),
        );
    }

    let matched = policy.thresholds.iter().find(|threshold| {
        candidate.composite >= threshold.min_composite
            && candidate.confidence >= threshold.min_confidence
    });
    let (raw, mut rationale) = match matched {
        Some(threshold) => (
            threshold.tier,
            format!(
                "Composite {:.2} >= {}, confidence {:.2} >= {}",
                candidate.composite,
                threshold.min_composite,
                candidate.confidence,
                threshold.min_confidence
            ),
        ),
        None => (
            Tier::C,
            format!("Composite {:.2} below all thresholds", candidate.composite),
        ),
    };

    let capped = candidate.classification.as_deref().filter(|classification| {
        policy
            .capped_classifications
            .iter()
            .any(|capped| capped == classification)
    });
    if let Some(classification) = capped {
        if raw < policy.cap_tier {
            rationale.push_str(&format!(
                " Capped at {} due to {classification} classification",
                policy.cap_tier.as_str()
            ));
            return (policy.cap_tier, rationale);
        }
    }
    (raw, rationale)
}

/// Delta against the tier from the previous run.
#[must_use]
pub fn tier_change(previous: Option<Tier>, current: Tier) -> (TierChange, String) {
    match previous {
        None => (TierChange::New, "First scoring".to_string()),
        Some(previous) if previous == current => (TierChange::Stable, String::new()),
        Some(previous) if current < previous => (
            TierChange::Upgraded,
            format!("Improved from {} to {}", previous.as_str(), current.as_str()),
        ),
        Some(previous) => (
            TierChange::Downgraded,
            format!("Declined from {} to {}", previous.as_str(), current.as_str()),
        ),
    }
}

/// Assigns tiers to the whole pool.
///
/// Every returned record carries the same cohort snapshot. An empty pool
/// yields no records.
#[must_use]
pub fn recompute_tiers(pool: &[TierCandidate], policy: &TierPolicy) -> Vec<TierRecord> {
    if pool.is_empty() {
        return Vec::new();
    }

    let mut ordered: Vec<&TierCandidate> = pool.iter().collect();
    ordered.sort_by_key(|candidate| candidate.initiative_id);

    let composites: Vec<f64> = ordered.iter().map(|candidate| candidate.composite).collect();
    let dimension_values: BTreeMap<Dimension, Vec<f64>> = Dimension::CONVICTION
        .iter()
        .map(|dimension| {
            let values = ordered
                .iter()
                .map(|candidate| dimension_value(candidate, *dimension))
                .collect();
            (*dimension, values)
        })
        .collect();

    let mut stats = CohortStats {
        pool_size: ordered.len(),
        ..CohortStats::default()
    };
    let mut records = Vec::with_capacity(ordered.len());

    for candidate in ordered {
        let (tier, rationale) = assign_tier(candidate, policy);
        let (change, change_reason) = tier_change(candidate.previous_tier, tier);
        let dimension_percentiles = dimension_values
            .iter()
            .map(|(dimension, values)| {
                (
                    *dimension,
                    percentile_rank(values, dimension_value(candidate, *dimension)),
                )
            })
            .collect();

        *stats.tier_distribution.entry(tier).or_default() += 1;
        let university = candidate
            .university
            .clone()
            .unwrap_or_else(|| UNKNOWN_UNIVERSITY.to_string());
        *stats
            .university_breakdown
            .entry(university)
            .or_default()
            .entry(tier)
            .or_default() += 1;
        let classification = candidate
            .classification
            .clone()
            .unwrap_or_else(|| UNCLASSIFIED.to_string());
        *stats
            .classification_distribution
            .entry(classification)
            .or_default() += 1;

        records.push(TierRecord {
            initiative_id: candidate.initiative_id,
            tier,
            rationale,
            composite_percentile: percentile_rank(&composites, candidate.composite),
            dimension_percentiles,
            previous_tier: candidate.previous_tier,
            tier_change: change,
            change_reason,
            cohort_stats: CohortStats::default(),
        });
    }

    for record in &mut records {
        record.cohort_stats = stats.clone();
    }
    records
}

fn dimension_value(candidate: &TierCandidate, dimension: Dimension) -> f64 {
    candidate
        .dimension_scores
        .get(&dimension)
        .copied()
        .unwrap_or(1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedEntry {
    pub initiative_id: InitiativeId,
    pub initiative_name: String,
    pub is_investable: bool,
    pub segment: String,
    pub conviction_score: f64,
    pub gates_pass_all: bool,
    pub tier: Option<Tier>,
    #[serde(default)]
    pub rank: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RankingLenses {
    pub investable: Vec<RankedEntry>,
    pub watchlist: Vec<RankedEntry>,
}

/// Splits entries on the fact-derived investability flag, independent of
/// tier, and orders each lens by conviction.
#[must_use]
pub fn rank_lenses(entries: Vec<RankedEntry>, top_n: Option<usize>) -> RankingLenses {
    let (mut investable, mut watchlist): (Vec<_>, Vec<_>) =
        entries.into_iter().partition(|entry| entry.is_investable);
    for lens in [&mut investable, &mut watchlist] {
        lens.sort_by(|left, right| {
            right
                .conviction_score
                .total_cmp(&left.conviction_score)
                .then_with(|| left.initiative_name.cmp(&right.initiative_name))
                .then_with(|| left.initiative_id.cmp(&right.initiative_id))
        });
        if let Some(limit) = top_n {
            lens.truncate(limit);
        }
        for (position, entry) in lens.iter_mut().enumerate() {
            entry.rank = position + 1;
        }
    }
    RankingLenses {
        investable,
        watchlist,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::DdRubric;
    use proptest::prelude::*;

    fn candidate(
        composite: f64,
        confidence: f64,
        classification: Option<&str>,
        university: Option<&str>,
    ) -> TierCandidate {
        let dimensions = |value: f64| {
            Dimension::CONVICTION
                .iter()
                .map(|dimension| (*dimension, value))
                .collect::<BTreeMap<_, _>>()
        };
        TierCandidate {
            initiative_id: InitiativeId::new(),
            name: "candidate".to_string(),
            university: university.map(str::to_string),
            classification: classification.map(str::to_string),
            composite,
            confidence,
            dimension_scores: dimensions(composite),
            dimension_confidences: dimensions(confidence),
            previous_tier: None,
        }
    }

    fn policy() -> TierPolicy {
        DdRubric::v1().tiers
    }

    #[test]
    fn ties_share_the_midpoint_rank() {
        let values = [1.0, 2.0, 2.0, 3.0];
        assert!((percentile_rank(&values, 2.0) - 50.0).abs() < 1e-9);
        assert!((percentile_rank(&values, 3.0) - 87.5).abs() < 1e-9);
        assert!((percentile_rank(&values, 1.0) - 12.5).abs() < 1e-9);
        assert!((percentile_rank(&[1.0, 2.0, 3.0], 2.0) - 50.0).abs() < 1e-9);
        assert!((percentile_rank(&[], 2.0)).abs() < 1e-9);
    }

    #[test]
    fn thresholds_are_walked_best_first() {
        let policy = policy();
        assert_eq!(assign_tier(&candidate(4.1, 0.8, None, None), &policy).0, Tier::S);
        assert_eq!(assign_tier(&candidate(4.1, 0.4, None, None), &policy).0, Tier::A);
        assert_eq!(assign_tier(&candidate(2.6, 0.3, None, None), &policy).0, Tier::B);
        let (tier, rationale) = assign_tier(&candidate(2.0, 0.2, None, None), &policy);
        assert_eq!(tier, Tier::C);
        assert_eq!(rationale, "Composite 2.00 >= 0, confidence 0.20 >= 0");
    }

    #[test]
    fn classification_cap_only_downgrades() {
        let policy = policy();
        let (tier, rationale) =
            assign_tier(&candidate(4.1, 0.8, Some("student_club"), None), &policy);
        assert_eq!(tier, Tier::B);
        assert!(rationale.ends_with(" Capped at B due to student_club classification"));

        let (tier, rationale) =
            assign_tier(&candidate(2.0, 0.2, Some("student_club"), None), &policy);
        assert_eq!(tier, Tier::C);
        assert!(!rationale.contains("Capped"));
    }

    #[test]
    fn four_low_confidence_dimensions_force_x() {
        let policy = policy();
        let mut weak = candidate(4.5, 0.9, None, None);
        for dimension in [
            Dimension::TeamDd,
            Dimension::TechDd,
            Dimension::MarketDd,
            Dimension::ExecutionDd,
        ] {
            weak.dimension_confidences.insert(dimension, 0.05);
        }
        let (tier, rationale) = assign_tier(&weak, &policy);
        assert_eq!(tier, Tier::X);
        assert_eq!(rationale, "Insufficient data: low confidence on 4+ dimensions");

        weak.dimension_confidences.insert(Dimension::ExecutionDd, 0.5);
        assert_eq!(assign_tier(&weak, &policy).0, Tier::S);
    }

    #[test]
    fn tier_deltas_follow_tier_order() {
        assert_eq!(tier_change(None, Tier::B), (TierChange::New, "First scoring".to_string()));
        assert_eq!(tier_change(Some(Tier::B), Tier::B), (TierChange::Stable, String::new()));
        assert_eq!(
            tier_change(Some(Tier::B), Tier::A),
            (TierChange::Upgraded, "Improved from B to A".to_string())
        );
        assert_eq!(
            tier_change(Some(Tier::A), Tier::X),
            (TierChange::Downgraded, "Declined from A to X".to_string())
        );
    }

    #[test]
    fn pool_records_share_one_cohort_snapshot() {
        let policy = policy();
        let mut pool = vec![
            candidate(4.1, 0.8, Some("spinout_candidate"), Some("TUM")),
            candidate(2.1, 0.4, Some("student_club"), Some("TUM")),
            candidate(3.3, 0.4, None, None),
        ];
        pool[1].previous_tier = Some(Tier::A);
        let records = recompute_tiers(&pool, &policy);

        assert_eq!(records.len(), 3);
        let stats = &records[0].cohort_stats;
        assert!(records.iter().all(|record| &record.cohort_stats == stats));
        assert_eq!(stats.pool_size, 3);
        assert_eq!(stats.tier_distribution.values().sum::<usize>(), 3);
        assert_eq!(stats.university_breakdown["TUM"].values().sum::<usize>(), 2);
        assert_eq!(stats.university_breakdown["Unknown"][&Tier::A], 1);
        assert_eq!(stats.classification_distribution["unclassified"], 1);

        let club = records
            .iter()
            .find(|record| record.initiative_id == pool[1].initiative_id);
        let club = crate::test_support::must_some(club);
        assert_eq!(club.tier, Tier::C);
        assert_eq!(club.tier_change, TierChange::Downgraded);
        assert!((club.composite_percentile - 16.7).abs() < 1e-9);
    }

    #[test]
    fn empty_pool_yields_no_tiers() {
        assert!(recompute_tiers(&[], &policy()).is_empty());
    }

    fn entry(name: &str, conviction: f64, is_investable: bool) -> RankedEntry {
        RankedEntry {
            initiative_id: InitiativeId::new(),
            initiative_name: name.to_string(),
            is_investable,
            segment: if is_investable {
                "spinout_candidate".to_string()
            } else {
                "non_investable_club".to_string()
            },
            conviction_score: conviction,
            gates_pass_all: is_investable,
            tier: None,
            rank: 0,
        }
    }

    #[test]
    fn lenses_split_on_investability_not_tier() {
        let mut club = entry("General Student Club", 2.1, false);
        club.tier = Some(Tier::S);
        let lenses = rank_lenses(vec![club, entry("DeepTech Spinout", 4.1, true)], None);

        assert_eq!(lenses.investable.len(), 1);
        assert_eq!(lenses.investable[0].initiative_name, "DeepTech Spinout");
        assert_eq!(lenses.investable[0].rank, 1);
        assert!(lenses
            .watchlist
            .iter()
            .any(|row| row.initiative_name == "General Student Club"));
    }

    #[test]
    fn lenses_sort_by_conviction_and_respect_top_n() {
        let lenses = rank_lenses(
            vec![
                entry("b", 3.0, true),
                entry("a", 4.0, true),
                entry("c", 2.0, true),
            ],
            Some(2),
        );
        let names: Vec<_> = lenses
            .investable
            .iter()
            .map(|row| row.initiative_name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    proptest! {
        #[test]
        fn percentiles_stay_within_bounds(
            values in proptest::collection::vec(0.0_f64..5.0, 1..30),
            value in 0.0_f64..5.0,
        ) {
            let rank = percentile_rank(&values, value);
            prop_assert!((0.0..=100.0).contains(&rank));
        }

        #[test]
        fn cap_never_upgrades(composite in 0.0_f64..5.0, confidence in 0.0_f64..1.0) {
            let policy = policy();
            let plain = assign_tier(&candidate(composite, confidence, None, None), &policy).0;
            let capped = assign_tier(
                &candidate(composite, confidence, Some("dormant"), None),
                &policy,
            )
            .0;
            prop_assert!(capped >= plain);
        }
    }
}
