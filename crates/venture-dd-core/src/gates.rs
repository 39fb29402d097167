use serde::{Deserialize, Serialize};

use crate::evidence::{qualifying_evidence, source_diversity, EvidenceItem};
use crate::facts::DimensionFact;
use crate::rubric::DdRubric;
use crate::scoring::{FactView, ScoreSet};
use crate::{Dimension, InitiativeId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum GateName {
    A,
    B,
    C,
    D,
}

impl GateName {
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::D];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pass,
    Fail,
}

impl GateStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateOutcome {
    pub gate_name: GateName,
    pub status: GateStatus,
    pub reason: String,
    pub reason_codes: Vec<String>,
    pub evidence_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateReport {
    pub initiative_id: InitiativeId,
    pub gates: Vec<GateOutcome>,
    pub pass_all: bool,
}

impl GateReport {
    #[must_use]
    pub fn blocking(&self) -> Vec<GateName> {
        self.gates
            .iter()
            .filter(|gate| gate.status == GateStatus::Fail)
            .map(|gate| gate.gate_name)
            .collect()
    }

    #[must_use]
    pub fn gate(&self, name: GateName) -> Option<&GateOutcome> {
        self.gates.iter().find(|gate| gate.gate_name == name)
    }
}

struct Check {
    gate_name: GateName,
    reason_codes: Vec<String>,
    evidence_refs: Vec<String>,
}

impl Check {
    fn new(gate_name: GateName, evidence: &[&EvidenceItem]) -> Self {
        Self {
            gate_name,
            reason_codes: Vec::new(),
            evidence_refs: evidence.iter().map(|item| item.evidence_ref.clone()).collect(),
        }
    }

    fn require(&mut self, condition: bool, token: &str) {
        if !condition {
            self.reason_codes.push(token.to_string());
        }
    }

    fn finish(self) -> GateOutcome {
        let status = if self.reason_codes.is_empty() {
            GateStatus::Pass
        } else {
            GateStatus::Fail
        };
        let reason = if self.reason_codes.is_empty() {
            "all_thresholds_met".to_string()
        } else {
            self.reason_codes.join(",")
        };
        GateOutcome {
            gate_name: self.gate_name,
            status,
            reason,
            reason_codes: self.reason_codes,
            evidence_refs: self.evidence_refs,
        }
    }
}

fn at_least(count: usize, minimum: u32) -> bool {
    u32::try_from(count).map_or(true, |count| count >= minimum)
}

/// Recomputes gates A-D from the latest scores and current facts.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn evaluate_gates(scores: &ScoreSet, facts: &[DimensionFact], rubric: &DdRubric) -> GateReport {
    let view = FactView::new(facts);
    let threshold = rubric.quality_threshold;
    let thresholds = &rubric.gates;

    let team_evidence = view
        .team
        .map_or_else(Vec::new, |(_, evidence)| qualifying_evidence(evidence, threshold));
    let mut gate_a = Check::new(GateName::A, &team_evidence);
    gate_a.require(view.team.is_some(), "team_fact_missing");
    gate_a.require(
        scores.score(Dimension::TeamDd) >= thresholds.gate_a.team_dd_min,
        "team_dd_below_threshold",
    );
    gate_a.require(
        scores.fit("tech_fit") >= thresholds.gate_a.team_tech_fit_min,
        "team_tech_fit_below_threshold",
    );
    gate_a.require(
        view.team.is_some_and(|(team, _)| {
            team.references_count >= thresholds.gate_a.min_named_operators
        }),
        "named_operators_below_minimum",
    );
    gate_a.require(
        at_least(view.technical_leads(), thresholds.gate_a.min_technical_leads),
        "technical_lead_missing",
    );
    gate_a.require(
        at_least(team_evidence.len(), thresholds.gate_a.min_qualifying_evidence),
        "qualifying_evidence_below_minimum",
    );

    let tech_evidence = view
        .tech
        .map_or_else(Vec::new, |(_, evidence)| qualifying_evidence(evidence, threshold));
    let mut gate_b = Check::new(GateName::B, &tech_evidence);
    gate_b.require(view.tech.is_some(), "tech_fact_missing");
    gate_b.require(
        scores.score(Dimension::TechDd) >= thresholds.gate_b.tech_dd_min,
        "tech_dd_below_threshold",
    );
    gate_b.require(
        at_least(
            source_diversity(tech_evidence.iter().copied()),
            thresholds.gate_b.min_source_classes,
        ),
        "source_classes_below_minimum",
    );
    gate_b.require(
        at_least(tech_evidence.len(), thresholds.gate_b.min_qualifying_evidence),
        "qualifying_evidence_below_minimum",
    );
    if thresholds.gate_b.require_hard_proof_artifact {
        gate_b.require(
            view.tech.is_some_and(|(tech, _)| tech.benchmark_artifacts > 0),
            "hard_proof_artifact_missing",
        );
    }

    let market_evidence = view
        .market
        .map_or_else(Vec::new, |(_, evidence)| qualifying_evidence(evidence, threshold));
    let mut gate_c = Check::new(GateName::C, &market_evidence);
    gate_c.require(view.market.is_some(), "market_fact_missing");
    gate_c.require(
        scores.score(Dimension::MarketDd) >= thresholds.gate_c.market_dd_min,
        "market_dd_below_threshold",
    );
    gate_c.require(
        scores.market_stage >= thresholds.gate_c.min_stage,
        "market_stage_below_minimum",
    );
    gate_c.require(
        at_least(
            source_diversity(market_evidence.iter().copied()),
            thresholds.gate_c.min_source_classes,
        ),
        "source_classes_below_minimum",
    );
    gate_c.require(
        at_least(market_evidence.len(), thresholds.gate_c.min_qualifying_evidence),
        "qualifying_evidence_below_minimum",
    );

    let legal_evidence = view
        .legal
        .map_or_else(Vec::new, |(_, evidence)| qualifying_evidence(evidence, threshold));
    let mut gate_d = Check::new(GateName::D, &legal_evidence);
    gate_d.require(view.legal.is_some(), "legal_fact_missing");
    gate_d.require(
        scores.score(Dimension::LegalDd) >= thresholds.gate_d.legal_dd_min,
        "legal_dd_below_threshold",
    );
    if thresholds.gate_d.require_entity_known {
        gate_d.require(
            view.legal.is_some_and(|(legal, _)| legal.entity_known()),
            "entity_status_unknown",
        );
    }
    if thresholds.gate_d.require_ip_known {
        gate_d.require(
            view.legal.is_some_and(|(legal, _)| legal.ip_known()),
            "ip_status_unknown",
        );
    }
    gate_d.require(
        view.legal.map_or(true, |(legal, _)| {
            legal.legal_risk_score <= thresholds.gate_d.max_legal_risk_score
        }),
        "legal_risk_above_maximum",
    );
    if thresholds.gate_d.forbid_critical_conflict {
        gate_d.require(
            view.legal
                .map_or(true, |(legal, _)| legal.critical_conflicts() == 0),
            "critical_conflict_unresolved",
        );
    }
    gate_d.require(
        at_least(legal_evidence.len(), thresholds.gate_d.min_qualifying_evidence),
        "qualifying_evidence_below_minimum",
    );

    let gates: Vec<GateOutcome> = [gate_a, gate_b, gate_c, gate_d]
        .into_iter()
        .map(Check::finish)
        .collect();
    let pass_all = gates.iter().all(|gate| gate.status == GateStatus::Pass);

    GateReport {
        initiative_id: scores.initiative_id,
        gates,
        pass_all,
    }
}

/// Concrete next step for a gate failure token.
#[must_use]
pub fn remediation_for(token: &str) -> &'static str {
    match token {
        "team_fact_missing" => "Import a team fact with named operators and key roles.",
        "team_dd_below_threshold" => "Strengthen team evidence: references, commitment and founder risk review.",
        "team_tech_fit_below_threshold" => "Add a named technical lead and verifiable engineering signals (CI, benchmarks, active commits).",
        "named_operators_below_minimum" => "Collect at least two named operator references.",
        "technical_lead_missing" => "Identify and verify a CTO or technical lead.",
        "qualifying_evidence_below_minimum" => "Add specific, recent, independently sourced evidence snippets.",
        "tech_fact_missing" => "Import a tech fact from code-hosting or manual DD.",
        "tech_dd_below_threshold" => "Gather proof of engineering quality, performance and scalability.",
        "source_classes_below_minimum" => "Corroborate with a second independent source class.",
        "hard_proof_artifact_missing" => "Obtain a benchmark, field test or demo artifact.",
        "market_fact_missing" => "Import a market fact with interview, LOI and pilot counts.",
        "market_dd_below_threshold" => "Clarify ICP, pricing and sales-cycle assumptions.",
        "market_stage_below_minimum" => "Convert discovery interviews into at least one LOI.",
        "legal_fact_missing" => "Import a legal fact covering entity, IP and agreements.",
        "legal_dd_below_threshold" => "Complete entity, IP assignment and founder agreement review.",
        "entity_status_unknown" => "Confirm the legal entity registration status.",
        "ip_status_unknown" => "Confirm IP ownership and university assignment terms.",
        "legal_risk_above_maximum" => "Run a legal risk review and document mitigations.",
        "critical_conflict_unresolved" => "Resolve the critical legal conflict before any commitment.",
        _ => "Review the gate inputs manually.",
    }
}
