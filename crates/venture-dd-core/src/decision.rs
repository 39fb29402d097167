//! Conviction scoring and the invest / monitor / pass memo.

use serde::{Deserialize, Serialize};

use crate::gates::{GateName, GateReport};
use crate::rubric::{DdRubric, DecisionPolicy};
use crate::scoring::{MarketStage, ScoreSet};
use crate::{clamp, Dimension, InitiativeId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Invest,
    Monitor,
    Pass,
}

impl Decision {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invest => "invest",
            Self::Monitor => "monitor",
            Self::Pass => "pass",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "invest" => Some(Self::Invest),
            "monitor" => Some(Self::Monitor),
            "pass" => Some(Self::Pass),
            _ => None,
        }
    }

    fn next_actions(self) -> Vec<String> {
        let actions: &[&str] = match self {
            Self::Invest => &[
                "Run founder diligence focused on technical execution depth",
                "Confirm one paid customer path with clear decision owner",
                "Complete legal/IP verification checklist",
                "Agree a 30-day support sprint with specific outcomes",
            ],
            Self::Monitor => &[
                "Define two milestone proofs (one tech, one market)",
                "Support conversion from LOI to pilot",
                "Re-score after milestone evidence is added",
            ],
            Self::Pass => &[
                "Document blockers and required evidence",
                "Revisit only after explicit gate resolution",
            ],
        };
        actions.iter().map(|action| (*action).to_string()).collect()
    }
}

/// Weighted average of the five conviction dimensions.
#[must_use]
pub fn conviction_score(scores: &ScoreSet, rubric: &DdRubric) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for dimension in Dimension::CONVICTION {
        let weight = rubric.conviction_weights.weight_for(dimension);
        weighted += weight * scores.score(dimension);
        total += weight;
    }
    if total <= 0.0 {
        return 1.0;
    }
    clamp(weighted / total, 1.0, 5.0)
}

/// Dimension confidences weighted by conviction weight and by how much
/// qualifying evidence backs each dimension.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn conviction_confidence(scores: &ScoreSet, rubric: &DdRubric) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for dimension in Dimension::CONVICTION {
        let support = 1.0
            + scores
                .dimension(dimension)
                .map_or(0.0, |scored| scored.qualifying_evidence as f64);
        let weight = rubric.conviction_weights.weight_for(dimension) * support;
        weighted += weight * scores.confidence(dimension);
        total += weight;
    }
    if total <= 0.0 {
        return 0.0;
    }
    clamp(weighted / total, 0.0, 1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamCapability {
    pub product_fit: f64,
    pub tech_fit: f64,
    pub sales_fit: f64,
    pub strong_in: Vec<String>,
    pub need_help_in: Vec<String>,
    pub support_priority: String,
}

#[must_use]
pub fn team_fit_labels(scores: &ScoreSet, policy: &DecisionPolicy) -> TeamCapability {
    let fits = [
        ("product", scores.fit("product_fit")),
        ("tech", scores.fit("tech_fit")),
        ("sales", scores.fit("sales_fit")),
    ];
    let label = |keep: &dyn Fn(f64) -> bool| -> Vec<String> {
        fits.iter()
            .filter(|(_, value)| keep(*value))
            .map(|(name, _)| (*name).to_string())
            .collect()
    };
    let strong_in = label(&|value| value >= policy.strong_fit_min);
    let need_help_in = label(&|value| value < policy.need_help_below);

    let support_priority = if fits[1].1 < policy.need_help_below {
        "tech".to_string()
    } else {
        need_help_in
            .first()
            .cloned()
            .unwrap_or_else(|| "none".to_string())
    };

    TeamCapability {
        product_fit: fits[0].1,
        tech_fit: fits[1].1,
        sales_fit: fits[2].1,
        strong_in,
        need_help_in,
        support_priority,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memo {
    pub initiative_id: InitiativeId,
    pub decision: Decision,
    pub check_size_band: String,
    pub conviction_score: f64,
    pub conviction_confidence: f64,
    pub market_stage: MarketStage,
    pub gates_pass_all: bool,
    pub blocking_gates: Vec<GateName>,
    pub rationale: String,
    pub top_risks: Vec<String>,
    pub next_actions: Vec<String>,
    pub recommendation: String,
    pub team: TeamCapability,
}

fn gate_list(gates: &[GateName]) -> String {
    gates
        .iter()
        .map(|gate| gate.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Maps conviction, gates, team fit and market stage to a decision memo.
#[must_use]
pub fn decide(scores: &ScoreSet, gates: &GateReport, rubric: &DdRubric) -> Memo {
    let policy = &rubric.decision;
    let conviction = conviction_score(scores, rubric);
    let confidence = conviction_confidence(scores, rubric);
    let team = team_fit_labels(scores, policy);
    let stage = scores.market_stage;
    let blocking = gates.blocking();

    let decision = if gates.pass_all
        && conviction >= policy.invest_min_conviction
        && team.tech_fit >= policy.invest_min_tech_fit
        && policy.invest_stages.contains(&stage)
    {
        Decision::Invest
    } else if gates.pass_all && conviction >= policy.monitor_min_conviction {
        Decision::Monitor
    } else {
        Decision::Pass
    };

    let check_size_band = match decision {
        Decision::Invest => policy.check_size_bands.invest.clone(),
        Decision::Monitor => policy.check_size_bands.monitor.clone(),
        Decision::Pass => policy.check_size_bands.pass.clone(),
    };

    let mut rationale = format!(
        "Conviction {conviction:.2}/5, confidence {confidence:.2}, team-fit (P/T/S) {:.2}/{:.2}/{:.2}, market stage {}. Gate pass={}.",
        team.product_fit,
        team.tech_fit,
        team.sales_fit,
        stage.as_str(),
        gates.pass_all
    );
    if !blocking.is_empty() {
        rationale.push_str(&format!(" Blocking gates: {}.", gate_list(&blocking)));
    }

    let mut top_risks = Vec::new();
    if !blocking.is_empty() {
        top_risks.push(format!("Gate blockers: {}", gate_list(&blocking)));
    }
    if team.tech_fit < policy.need_help_below {
        top_risks.push("Critical tech capability gap".to_string());
    }
    if stage <= MarketStage::Interviews {
        top_risks.push("Insufficient market validation stage".to_string());
    }
    if scores.score(Dimension::LegalDd) < policy.legal_shallow_below {
        top_risks.push("Legal readiness remains shallow".to_string());
    }

    let recommendation = format!(
        "{} ({check_size_band}); support priority: {}",
        decision.as_str(),
        team.support_priority
    );

    Memo {
        initiative_id: scores.initiative_id,
        decision,
        check_size_band,
        conviction_score: conviction,
        conviction_confidence: confidence,
        market_stage: stage,
        gates_pass_all: gates.pass_all,
        blocking_gates: blocking,
        rationale,
        top_risks,
        next_actions: decision.next_actions(),
        recommendation,
        team,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{DimensionFact, FactBody};
    use crate::gates::evaluate_gates;
    use crate::scoring::tests::{market, market_snippet, techcore_facts};
    use crate::scoring::{score_initiative, NoAiScorer};
    use crate::test_support::must_ok;

    fn memo_for(facts: &[DimensionFact], id: InitiativeId, rubric: &DdRubric) -> Memo {
        let scores = must_ok(score_initiative(id, facts, rubric, &NoAiScorer));
        let gates = evaluate_gates(&scores, facts, rubric);
        decide(&scores, &gates, rubric)
    }

    #[test]
    fn paid_pilot_techcore_is_an_investment() {
        let id = InitiativeId::new();
        let rubric = DdRubric::v1();
        let mut facts = techcore_facts(id, market(14, 2, 1, 1), &market_snippet(14, 2, 1, 1));
        for fact in &mut facts {
            if let FactBody::Team(team) = &mut fact.body {
                team.references_count = 5;
                team.key_roles.push("Lead Engineer".to_string());
            }
        }
        let memo = memo_for(&facts, id, &rubric);

        assert_eq!(memo.decision, Decision::Invest, "{}", memo.rationale);
        assert_eq!(memo.check_size_band, "100k-250k");
        assert_eq!(memo.next_actions.len(), 4);
        assert!(memo.rationale.starts_with("Conviction "));
        assert!(memo.rationale.contains("market stage paid_pilot. Gate pass=true."));
        assert!(memo.top_risks.is_empty());
    }

    #[test]
    fn blocked_gates_force_pass_with_blockers_listed() {
        let id = InitiativeId::new();
        let rubric = DdRubric::v1();
        let facts = techcore_facts(id, market(8, 0, 0, 0), &market_snippet(8, 0, 0, 0));
        let memo = memo_for(&facts, id, &rubric);

        assert_eq!(memo.decision, Decision::Pass);
        assert_eq!(memo.check_size_band, "none");
        assert!(memo.rationale.ends_with("Blocking gates: C."));
        assert_eq!(memo.top_risks[0], "Gate blockers: C");
        assert!(memo
            .top_risks
            .contains(&"Insufficient market validation stage".to_string()));
    }

    #[test]
    fn loi_stage_is_monitor_not_invest() {
        let id = InitiativeId::new();
        let rubric = DdRubric::v1();
        let facts = techcore_facts(id, market(10, 1, 0, 0), &market_snippet(10, 1, 0, 0));
        let memo = memo_for(&facts, id, &rubric);

        assert!(memo.gates_pass_all, "{}", memo.rationale);
        assert_eq!(memo.decision, Decision::Monitor);
        assert_eq!(memo.check_size_band, "optionality_only");
        assert_eq!(memo.next_actions.len(), 3);
    }

    #[test]
    fn empty_pool_member_scores_floor_and_low_confidence() {
        let id = InitiativeId::new();
        let rubric = DdRubric::v1();
        let scores = must_ok(score_initiative(id, &[], &rubric, &NoAiScorer));
        assert!((conviction_score(&scores, &rubric) - 1.0).abs() < 1e-9);
        assert!((conviction_confidence(&scores, &rubric) - 0.12).abs() < 1e-9);

        let team = team_fit_labels(&scores, &rubric.decision);
        assert_eq!(team.support_priority, "tech");
        assert_eq!(team.need_help_in, vec!["product", "tech", "sales"]);
    }

    #[test]
    fn rescoring_reproduces_conviction() {
        let id = InitiativeId::new();
        let rubric = DdRubric::v1();
        let facts = techcore_facts(id, market(14, 2, 1, 1), &market_snippet(14, 2, 1, 1));
        let first = memo_for(&facts, id, &rubric);
        let second = memo_for(&facts, id, &rubric);
        assert_eq!(first.conviction_score.to_bits(), second.conviction_score.to_bits());
        assert_eq!(first, second);
    }
}
