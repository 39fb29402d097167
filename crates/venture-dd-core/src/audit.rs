//! Per-initiative evidence coverage and the gaps that block a confident call.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::facts::DimensionFact;
use crate::gates::{remediation_for, GateName, GateReport, GateStatus};
use crate::rubric::DdRubric;
use crate::scoring::FactView;
use crate::{clamp, mean};

/// Floor for initiative-wide qualifying evidence; gate minima above it win.
const MIN_QUALIFYING_ITEMS: u32 = 3;

/// Audit minima derived from the gate thresholds so the audit never reports
/// a pass where a gate would block.
fn audit_minima(rubric: &DdRubric) -> (u32, usize, usize) {
    let gates = &rubric.gates;
    let qualifying = [
        MIN_QUALIFYING_ITEMS,
        gates.gate_a.min_qualifying_evidence,
        gates.gate_b.min_qualifying_evidence,
        gates.gate_c.min_qualifying_evidence,
        gates.gate_d.min_qualifying_evidence,
    ]
    .into_iter()
    .max()
    .unwrap_or(MIN_QUALIFYING_ITEMS);
    let source_types = gates
        .gate_b
        .min_source_classes
        .max(gates.gate_c.min_source_classes);
    (
        gates.gate_a.min_named_operators,
        usize::try_from(qualifying).unwrap_or(usize::MAX),
        usize::try_from(source_types).unwrap_or(usize::MAX),
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceCoverage {
    pub evidence_items: usize,
    pub qualifying_evidence_items: usize,
    pub quality_threshold: f64,
    pub avg_quality: f64,
    pub avg_reliability: f64,
    pub source_types: Vec<String>,
    pub has_external_sources: bool,
    pub has_manual_sources: bool,
    pub gate_blockers: Vec<GateName>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAudit {
    pub coverage: SourceCoverage,
    pub missing_critical_facts: Vec<String>,
    pub recommended_next_steps: Vec<String>,
    /// Remediation text for every failed gate reason code.
    pub gate_remediation: Vec<String>,
}

fn next_step_for(token: &str) -> Option<&'static str> {
    let step = match token {
        "no_named_operators" => "Add named founders and operators through a manual team fact.",
        "no_technical_lead" => "Confirm at least one technical lead and role continuity.",
        "no_tech_proof_artifact" => "Attach benchmark, prototype or demo artifact links.",
        "no_market_validation" => "Import customer interview and LOI or pilot evidence.",
        "no_external_sources" => "Collect code-hosting or scholarly evidence for the initiative.",
        "no_manual_sources" => "Add high-trust manual DD evidence for team, market and legal facts.",
        "entity_unknown" => "Add legal evidence confirming entity status.",
        "ip_unknown" => "Add IP ownership evidence and assignment status.",
        "low_qualifying_evidence" => "Increase high-specificity evidence items above the quality threshold.",
        "low_source_diversity" => "Add at least one additional independent source class.",
        _ => return None,
    };
    Some(step)
}

/// Audits evidence coverage for one initiative's facts.
///
/// Without a gate report every gate counts as a blocker.
#[must_use]
pub fn source_audit(
    facts: &[DimensionFact],
    gates: Option<&GateReport>,
    rubric: &DdRubric,
) -> SourceAudit {
    let view = FactView::new(facts);
    let (min_named_operators, min_qualifying, min_source_types) = audit_minima(rubric);
    let evidence: Vec<_> = facts.iter().flat_map(|fact| fact.evidence.iter()).collect();
    let threshold = rubric.quality_threshold;
    let qualifying = evidence
        .iter()
        .filter(|item| item.quality >= threshold)
        .count();
    let source_types: BTreeSet<&str> = evidence
        .iter()
        .filter(|item| !item.source_type.is_unknown())
        .map(|item| item.source_type.as_str())
        .collect();
    let has_external = evidence.iter().any(|item| item.source_type.is_external());
    let has_manual = evidence.iter().any(|item| item.source_type.is_manual());

    let gate_blockers = match gates {
        Some(report) => GateName::ALL
            .into_iter()
            .filter(|name| {
                !report
                    .gate(*name)
                    .is_some_and(|outcome| outcome.status == GateStatus::Pass)
            })
            .collect(),
        None => GateName::ALL.to_vec(),
    };

    let mut missing = BTreeSet::new();
    if !view
        .team
        .is_some_and(|(team, _)| team.references_count >= min_named_operators)
    {
        missing.insert("no_named_operators");
    }
    if view.technical_leads() == 0 {
        missing.insert("no_technical_lead");
    }
    if !view.tech.is_some_and(|(tech, _)| tech.benchmark_artifacts > 0) {
        missing.insert("no_tech_proof_artifact");
    }
    if !view
        .market
        .is_some_and(|(market, _)| market.lois + market.pilots + market.paid_pilots > 0)
    {
        missing.insert("no_market_validation");
    }
    if !view.legal.is_some_and(|(legal, _)| legal.entity_known()) {
        missing.insert("entity_unknown");
    }
    if !view.legal.is_some_and(|(legal, _)| legal.ip_known()) {
        missing.insert("ip_unknown");
    }
    if qualifying < min_qualifying {
        missing.insert("low_qualifying_evidence");
    }
    if source_types.len() < min_source_types {
        missing.insert("low_source_diversity");
    }
    if !has_external {
        missing.insert("no_external_sources");
    }
    if !has_manual {
        missing.insert("no_manual_sources");
    }

    let recommended_next_steps = missing
        .iter()
        .filter_map(|token| next_step_for(token))
        .map(str::to_string)
        .collect();

    let mut gate_remediation = Vec::new();
    if let Some(report) = gates {
        for outcome in report.gates.iter().filter(|outcome| outcome.status == GateStatus::Fail) {
            for code in &outcome.reason_codes {
                gate_remediation.push(format!(
                    "Gate {}: {}",
                    outcome.gate_name.as_str(),
                    remediation_for(code)
                ));
            }
        }
    }

    SourceAudit {
        coverage: SourceCoverage {
            evidence_items: evidence.len(),
            qualifying_evidence_items: qualifying,
            quality_threshold: threshold,
            avg_quality: clamp(
                mean(evidence.iter().map(|item| item.quality)).unwrap_or(0.0),
                0.0,
                1.0,
            ),
            avg_reliability: clamp(
                mean(evidence.iter().map(|item| item.reliability)).unwrap_or(0.0),
                0.0,
                1.0,
            ),
            source_types: source_types.into_iter().map(str::to_string).collect(),
            has_external_sources: has_external,
            has_manual_sources: has_manual,
            gate_blockers,
        },
        missing_critical_facts: missing.into_iter().map(str::to_string).collect(),
        recommended_next_steps,
        gate_remediation,
    }
}
