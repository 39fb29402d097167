//! Per-initiative assessment: score, gate, decide.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::decision::{decide, Memo};
use crate::facts::DimensionFact;
use crate::gates::{evaluate_gates, GateReport};
use crate::rubric::DdRubric;
use crate::scoring::{score_initiative, ComponentScorer, ScoreSet};
use crate::{DdError, InitiativeId};

/// Everything derived for one initiative in a scoring run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assessment {
    pub scores: ScoreSet,
    pub gates: GateReport,
    pub memo: Memo,
}

impl Assessment {
    #[must_use]
    pub fn initiative_id(&self) -> InitiativeId {
        self.scores.initiative_id
    }
}

/// Scores, gates and decides one initiative. Nothing is persisted here, so
/// a failure leaves no partial output behind.
///
/// # Errors
/// Returns the scoring error for this initiative.
pub fn assess_initiative(
    initiative_id: InitiativeId,
    facts: &[DimensionFact],
    rubric: &DdRubric,
    scorer: &dyn ComponentScorer,
) -> Result<Assessment, DdError> {
    let scores = score_initiative(initiative_id, facts, rubric, scorer)?;
    let gates = evaluate_gates(&scores, facts, rubric);
    let memo = decide(&scores, &gates, rubric);
    Ok(Assessment {
        scores,
        gates,
        memo,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchFailure {
    pub initiative_id: InitiativeId,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn record_success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, initiative_id: InitiativeId, message: impl Into<String>) {
        self.processed += 1;
        self.failed += 1;
        self.failures.push(BatchFailure {
            initiative_id,
            message: message.into(),
        });
    }
}

/// Assesses a pool of initiatives on the rayon pool.
///
/// Results keep the input order. One initiative failing never affects its
/// siblings; the failure is recorded in the report instead.
#[must_use]
pub fn assess_many(
    pool: &[(InitiativeId, Vec<DimensionFact>)],
    rubric: &DdRubric,
    scorer: &dyn ComponentScorer,
) -> (Vec<Assessment>, BatchReport) {
    let results: Vec<(InitiativeId, Result<Assessment, DdError>)> = pool
        .par_iter()
        .map(|(initiative_id, facts)| {
            (
                *initiative_id,
                assess_initiative(*initiative_id, facts, rubric, scorer),
            )
        })
        .collect();

    let mut report = BatchReport::default();
    let mut assessments = Vec::with_capacity(results.len());
    for (initiative_id, result) in results {
        match result {
            Ok(assessment) => {
                report.record_success();
                assessments.push(assessment);
            }
            Err(err) => report.record_failure(initiative_id, err.to_string()),
        }
    }
    (assessments, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Decision;
    use crate::scoring::tests::{market, market_snippet, techcore_facts};
    use crate::scoring::NoAiScorer;
    use crate::test_support::must_ok;

    #[test]
    fn assessment_links_scores_gates_and_memo() {
        let id = InitiativeId::new();
        let rubric = DdRubric::v1();
        let facts = techcore_facts(id, market(10, 1, 0, 0), &market_snippet(10, 1, 0, 0));
        let assessment = must_ok(assess_initiative(id, &facts, &rubric, &NoAiScorer));

        assert_eq!(assessment.initiative_id(), id);
        assert_eq!(assessment.gates.initiative_id, id);
        assert_eq!(assessment.memo.gates_pass_all, assessment.gates.pass_all);
        assert_eq!(assessment.memo.decision, Decision::Monitor);
    }

    #[test]
    fn one_bad_initiative_does_not_abort_the_batch() {
        let rubric = DdRubric::v1();
        let good = InitiativeId::new();
        let bad = InitiativeId::new();
        let good_facts = techcore_facts(good, market(14, 2, 1, 1), &market_snippet(14, 2, 1, 1));
        let pool = vec![
            (good, good_facts.clone()),
            (bad, good_facts),
            (InitiativeId::new(), Vec::new()),
        ];

        let (assessments, report) = assess_many(&pool, &rubric, &NoAiScorer);
        assert_eq!(report.processed, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].initiative_id, bad);
        assert_eq!(assessments.len(), 2);
        assert_eq!(assessments[0].initiative_id(), good);
    }

    #[test]
    fn parallel_assessment_matches_sequential() {
        let rubric = DdRubric::v1();
        let pool: Vec<_> = (0..6)
            .map(|index| {
                let id = InitiativeId::new();
                let paid = u32::from(index % 2 == 0);
                let facts = techcore_facts(
                    id,
                    market(8 + index, index, paid, paid),
                    &market_snippet(8 + index, index, paid, paid),
                );
                (id, facts)
            })
            .collect();

        let (parallel, _) = assess_many(&pool, &rubric, &NoAiScorer);
        let sequential: Vec<_> = pool
            .iter()
            .map(|(id, facts)| must_ok(assess_initiative(*id, facts, &rubric, &NoAiScorer)))
            .collect();
        assert_eq!(parallel, sequential);
    }
}
