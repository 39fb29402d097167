use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scoring::{known_components, MarketStage};
use crate::tiering::Tier;
use crate::{DdError, Dimension};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityWeights {
    pub specificity: f64,
    pub recency: f64,
    pub source_reliability: f64,
    pub independence: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            specificity: 0.50,
            recency: 0.20,
            source_reliability: 0.20,
            independence: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConvictionWeights {
    pub team_dd: f64,
    pub tech_dd: f64,
    pub market_dd: f64,
    pub execution_dd: f64,
    pub legal_dd: f64,
}

impl Default for ConvictionWeights {
    fn default() -> Self {
        Self {
            team_dd: 0.32,
            tech_dd: 0.28,
            market_dd: 0.25,
            execution_dd: 0.10,
            legal_dd: 0.05,
        }
    }
}

impl ConvictionWeights {
    #[must_use]
    pub fn weight_for(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::TeamDd => self.team_dd,
            Dimension::TechDd => self.tech_dd,
            Dimension::MarketDd => self.market_dd,
            Dimension::ExecutionDd => self.execution_dd,
            Dimension::LegalDd => self.legal_dd,
            Dimension::TeamFit => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageScores {
    pub none: f64,
    pub interviews: f64,
    pub loi: f64,
    pub pilot: f64,
    pub paid_pilot: f64,
    pub repeat_revenue: f64,
}

impl Default for StageScores {
    fn default() -> Self {
        Self {
            none: 1.0,
            interviews: 1.8,
            loi: 2.8,
            pilot: 3.6,
            paid_pilot: 4.4,
            repeat_revenue: 5.0,
        }
    }
}

impl StageScores {
    #[must_use]
    pub fn score_for(&self, stage: MarketStage) -> f64 {
        match stage {
            MarketStage::None => self.none,
            MarketStage::Interviews => self.interviews,
            MarketStage::Loi => self.loi,
            MarketStage::Pilot => self.pilot,
            MarketStage::PaidPilot => self.paid_pilot,
            MarketStage::RepeatRevenue => self.repeat_revenue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateAThresholds {
    pub team_dd_min: f64,
    pub team_tech_fit_min: f64,
    pub min_named_operators: u32,
    pub min_technical_leads: u32,
    pub min_qualifying_evidence: u32,
}

impl Default for GateAThresholds {
    fn default() -> Self {
        Self {
            team_dd_min: 3.2,
            team_tech_fit_min: 3.5,
            min_named_operators: 2,
            min_technical_leads: 1,
            min_qualifying_evidence: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateBThresholds {
    pub tech_dd_min: f64,
    pub min_source_classes: u32,
    pub min_qualifying_evidence: u32,
    pub require_hard_proof_artifact: bool,
}

impl Default for GateBThresholds {
    fn default() -> Self {
        Self {
            tech_dd_min: 3.0,
            min_source_classes: 2,
            min_qualifying_evidence: 2,
            require_hard_proof_artifact: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateCThresholds {
    pub market_dd_min: f64,
    pub min_stage: MarketStage,
    pub min_source_classes: u32,
    pub min_qualifying_evidence: u32,
}

impl Default for GateCThresholds {
    fn default() -> Self {
        Self {
            market_dd_min: 3.0,
            min_stage: MarketStage::Loi,
            min_source_classes: 2,
            min_qualifying_evidence: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateDThresholds {
    pub legal_dd_min: f64,
    pub require_entity_known: bool,
    pub require_ip_known: bool,
    pub max_legal_risk_score: f64,
    pub forbid_critical_conflict: bool,
    pub min_qualifying_evidence: u32,
}

impl Default for GateDThresholds {
    fn default() -> Self {
        Self {
            legal_dd_min: 2.5,
            require_entity_known: true,
            require_ip_known: true,
            max_legal_risk_score: 3.5,
            forbid_critical_conflict: true,
            min_qualifying_evidence: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateThresholds {
    pub gate_a: GateAThresholds,
    pub gate_b: GateBThresholds,
    pub gate_c: GateCThresholds,
    pub gate_d: GateDThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckSizeBands {
    pub invest: String,
    pub monitor: String,
    pub pass: String,
}

impl Default for CheckSizeBands {
    fn default() -> Self {
        Self {
            invest: "100k-250k".to_string(),
            monitor: "optionality_only".to_string(),
            pass: "none".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecisionPolicy {
    pub invest_min_conviction: f64,
    pub invest_min_tech_fit: f64,
    pub monitor_min_conviction: f64,
    pub invest_stages: Vec<MarketStage>,
    pub strong_fit_min: f64,
    pub need_help_below: f64,
    pub legal_shallow_below: f64,
    pub check_size_bands: CheckSizeBands,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            invest_min_conviction: 4.2,
            invest_min_tech_fit: 3.8,
            monitor_min_conviction: 3.2,
            invest_stages: vec![
                MarketStage::Pilot,
                MarketStage::PaidPilot,
                MarketStage::RepeatRevenue,
            ],
            strong_fit_min: 4.0,
            need_help_below: 3.0,
            legal_shallow_below: 2.8,
            check_size_bands: CheckSizeBands::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierThreshold {
    pub tier: Tier,
    pub min_composite: f64,
    pub min_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TierPolicy {
    pub thresholds: Vec<TierThreshold>,
    pub capped_classifications: Vec<String>,
    pub cap_tier: Tier,
    pub low_confidence_floor: f64,
    pub low_confidence_dimensions_for_x: usize,
}

impl Default for TierPolicy {
    fn default() -> Self {
        let threshold = |tier, min_composite, min_confidence| TierThreshold {
            tier,
            min_composite,
            min_confidence,
        };
        Self {
            thresholds: vec![
                threshold(Tier::S, 3.8, 0.50),
                threshold(Tier::A, 3.2, 0.35),
                threshold(Tier::B, 2.5, 0.25),
                threshold(Tier::C, 0.0, 0.0),
            ],
            capped_classifications: vec!["student_club".to_string(), "dormant".to_string()],
            cap_tier: Tier::B,
            low_confidence_floor: 0.10,
            low_confidence_dimensions_for_x: 4,
        }
    }
}

/// Immutable scoring configuration threaded through every scoring call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DdRubric {
    pub rubric_version: u32,
    pub team_dd: BTreeMap<String, f64>,
    pub team_fit: BTreeMap<String, f64>,
    pub tech_dd: BTreeMap<String, f64>,
    pub market_dd: BTreeMap<String, f64>,
    pub execution_dd: BTreeMap<String, f64>,
    pub legal_dd: BTreeMap<String, f64>,
    pub conviction_weights: ConvictionWeights,
    pub validation_stage_scores: StageScores,
    pub quality_threshold: f64,
    pub no_evidence_floor: f64,
    pub no_evidence_confidence_penalty: f64,
    pub ai_tolerance: f64,
    pub quality_weights: QualityWeights,
    pub gates: GateThresholds,
    pub decision: DecisionPolicy,
    pub tiers: TierPolicy,
}

impl Default for DdRubric {
    fn default() -> Self {
        Self::v1()
    }
}

fn weights(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries
        .iter()
        .map(|(key, weight)| ((*key).to_string(), *weight))
        .collect()
}

impl DdRubric {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            rubric_version: 1,
            team_dd: weights(&[
                ("named_operators", 0.30),
                ("technical_leadership", 0.30),
                ("commitment", 0.25),
                ("founder_risk", 0.15),
            ]),
            team_fit: weights(&[("product_fit", 1.0), ("tech_fit", 1.0), ("sales_fit", 1.0)]),
            tech_dd: weights(&[
                ("quality", 0.35),
                ("performance", 0.25),
                ("scalability", 0.25),
                ("moat_signal", 0.15),
            ]),
            market_dd: weights(&[
                ("validation_stage", 0.60),
                ("icp_pricing_clarity", 0.25),
                ("sales_cycle_realism", 0.15),
            ]),
            execution_dd: weights(&[("tech_outcomes", 0.50), ("market_outcomes", 0.50)]),
            legal_dd: weights(&[
                ("entity_ip_basics", 0.70),
                ("compliance_risk_penalty", 0.30),
            ]),
            conviction_weights: ConvictionWeights::default(),
            validation_stage_scores: StageScores::default(),
            quality_threshold: 0.55,
            no_evidence_floor: 1.0,
            no_evidence_confidence_penalty: 0.12,
            ai_tolerance: 0.75,
            quality_weights: QualityWeights::default(),
            gates: GateThresholds::default(),
            decision: DecisionPolicy::default(),
            tiers: TierPolicy::default(),
        }
    }

    #[must_use]
    pub fn components(&self, dimension: Dimension) -> &BTreeMap<String, f64> {
        match dimension {
            Dimension::TeamDd => &self.team_dd,
            Dimension::TeamFit => &self.team_fit,
            Dimension::TechDd => &self.tech_dd,
            Dimension::MarketDd => &self.market_dd,
            Dimension::ExecutionDd => &self.execution_dd,
            Dimension::LegalDd => &self.legal_dd,
        }
    }

    /// Validates weights, thresholds and the stage ladder.
    ///
    /// # Errors
    /// Returns [`DdError::Configuration`] when one or more rubric fields are
    /// outside allowed bounds or a component key is not recognized.
    pub fn validate(&self) -> Result<(), DdError> {
        if self.rubric_version == 0 {
            return Err(DdError::Configuration(
                "rubric_version MUST be >= 1".to_string(),
            ));
        }

        for dimension in Dimension::ALL {
            let components = self.components(dimension);
            if components.is_empty() {
                return Err(DdError::Configuration(format!(
                    "{} MUST declare at least one component",
                    dimension.as_str()
                )));
            }
            let known = known_components(dimension);
            for (key, weight) in components {
                if !known.contains(&key.as_str()) {
                    return Err(DdError::Configuration(format!(
                        "unknown component `{key}` for {}",
                        dimension.as_str()
                    )));
                }
                if !weight.is_finite() || *weight <= 0.0 {
                    return Err(DdError::Configuration(format!(
                        "{}.{key} weight MUST be a positive number",
                        dimension.as_str()
                    )));
                }
            }
        }

        for (name, value) in [
            ("quality_threshold", self.quality_threshold),
            (
                "no_evidence_confidence_penalty",
                self.no_evidence_confidence_penalty,
            ),
            ("tiers.low_confidence_floor", self.tiers.low_confidence_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DdError::Configuration(format!(
                    "{name} MUST be in [0.0, 1.0]"
                )));
            }
        }

        if !(1.0..=5.0).contains(&self.no_evidence_floor) {
            return Err(DdError::Configuration(
                "no_evidence_floor MUST be in [1.0, 5.0]".to_string(),
            ));
        }

        if !self.ai_tolerance.is_finite() || self.ai_tolerance < 0.0 {
            return Err(DdError::Configuration(
                "ai_tolerance MUST be >= 0.0".to_string(),
            ));
        }

        let conviction = [
            self.conviction_weights.team_dd,
            self.conviction_weights.tech_dd,
            self.conviction_weights.market_dd,
            self.conviction_weights.execution_dd,
            self.conviction_weights.legal_dd,
        ];
        if conviction.iter().any(|weight| !weight.is_finite() || *weight < 0.0)
            || conviction.iter().sum::<f64>() <= 0.0
        {
            return Err(DdError::Configuration(
                "conviction_weights MUST be non-negative with a positive sum".to_string(),
            ));
        }

        let quality = [
            self.quality_weights.specificity,
            self.quality_weights.recency,
            self.quality_weights.source_reliability,
            self.quality_weights.independence,
        ];
        if quality.iter().any(|weight| !weight.is_finite() || *weight < 0.0)
            || quality.iter().sum::<f64>() <= 0.0
        {
            return Err(DdError::Configuration(
                "quality_weights MUST be non-negative with a positive sum".to_string(),
            ));
        }

        let ladder: Vec<f64> = MarketStage::LADDER
            .iter()
            .map(|stage| self.validation_stage_scores.score_for(*stage))
            .collect();
        if ladder.iter().any(|score| !(1.0..=5.0).contains(score)) {
            return Err(DdError::Configuration(
                "validation_stage_scores MUST be in [1.0, 5.0]".to_string(),
            ));
        }
        if ladder.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(DdError::Configuration(
                "validation_stage_scores MUST increase strictly along the stage ladder"
                    .to_string(),
            ));
        }

        if self.decision.monitor_min_conviction > self.decision.invest_min_conviction {
            return Err(DdError::Configuration(
                "decision.monitor_min_conviction cannot exceed invest_min_conviction".to_string(),
            ));
        }

        if self.tiers.thresholds.is_empty() {
            return Err(DdError::Configuration(
                "tiers.thresholds MUST declare at least one tier".to_string(),
            ));
        }
        if self
            .tiers
            .thresholds
            .iter()
            .any(|threshold| threshold.tier == Tier::X)
        {
            return Err(DdError::Configuration(
                "tier X is reserved for low-confidence pools".to_string(),
            ));
        }
        if self
            .tiers
            .thresholds
            .windows(2)
            .any(|pair| pair[0].tier >= pair[1].tier)
        {
            return Err(DdError::Configuration(
                "tiers.thresholds MUST be ordered from best to worst tier".to_string(),
            ));
        }

        Ok(())
    }

    /// Decodes and validates a rubric from JSON.
    ///
    /// # Errors
    /// Returns [`DdError::Configuration`] when JSON decoding fails
    /// or decoded values violate rubric constraints.
    pub fn from_json(value: &Value) -> Result<Self, DdError> {
        let rubric: Self = serde_json::from_value(value.clone()).map_err(|err| {
            DdError::Configuration(format!("invalid rubric JSON payload: {err}"))
        })?;
        rubric.validate()?;
        Ok(rubric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::must_ok;

    #[test]
    fn v1_rubric_is_valid() {
        must_ok(DdRubric::v1().validate());
    }

    #[test]
    fn rejects_unknown_component_keys() {
        let mut rubric = DdRubric::v1();
        rubric.tech_dd.insert("vibes".to_string(), 0.2);
        assert!(matches!(
            rubric.validate(),
            Err(DdError::Configuration(message)) if message.contains("vibes")
        ));
    }

    #[test]
    fn rejects_non_monotone_stage_table() {
        let mut rubric = DdRubric::v1();
        rubric.validation_stage_scores.pilot = 2.0;
        assert!(rubric.validate().is_err());
    }

    #[test]
    fn rejects_zero_weights() {
        let mut rubric = DdRubric::v1();
        rubric.legal_dd.insert("entity_ip_basics".to_string(), 0.0);
        assert!(rubric.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_v1_defaults() {
        let rubric = must_ok(DdRubric::from_json(&serde_json::json!({
            "ai_tolerance": 0.5,
            "gates": { "gate_a": { "team_tech_fit_min": 3.0 } }
        })));
        assert!((rubric.ai_tolerance - 0.5).abs() < f64::EPSILON);
        assert!((rubric.gates.gate_a.team_tech_fit_min - 3.0).abs() < f64::EPSILON);
        assert_eq!(rubric.gates.gate_a.min_named_operators, 2);
        assert_eq!(rubric.team_dd, DdRubric::v1().team_dd);
    }

    #[test]
    fn malformed_json_is_a_configuration_error() {
        assert!(matches!(
            DdRubric::from_json(&serde_json::json!({ "quality_threshold": "high" })),
            Err(DdError::Configuration(_))
        ));
    }
}
