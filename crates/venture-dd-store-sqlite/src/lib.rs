#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use ulid::Ulid;
use venture_dd_core::rubric::TierPolicy;
use venture_dd_core::scoring::known_components;
use venture_dd_core::{
    assess_many, format_rfc3339, now_utc, parse_fact_row, parse_rfc3339_utc, rank_lenses,
    recompute_tiers, source_audit, upsert_fact, Assessment, BatchReport, ComponentScorer,
    DdError, DdRubric, Dimension, DimensionFact, EvidenceItem, FactBody, FactKind,
    FactRepository, FactInput, FinanceFact, GateName, GateOutcome, GateReport, GateStatus,
    Initiative, InitiativeId, Memo, NoAiScorer, Provenance, RankedEntry, RankingLenses,
    ScoreComponent, ScoreSet, SourceAudit, SourceType, StoredSuggestion, SuggestionTable, Tier,
    TierCandidate, TierChange, TierRecord,
};

const DD_MIGRATION_VERSION: i64 = 1;

const SCHEMA_DD_V1: &str = r"
CREATE TABLE IF NOT EXISTS dd_rubrics (
  rubric_version INTEGER PRIMARY KEY,
  rubric_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS initiatives (
  initiative_id TEXT PRIMARY KEY,
  name TEXT NOT NULL CHECK (length(trim(name)) > 0),
  university TEXT,
  classification TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dd_facts (
  initiative_id TEXT NOT NULL,
  dimension TEXT NOT NULL CHECK (
    dimension IN ('team', 'tech', 'market', 'legal', 'finance')
  ),
  body_json TEXT NOT NULL,
  confidence REAL NOT NULL CHECK (confidence BETWEEN 0.0 AND 1.0),
  source_type TEXT,
  source_url TEXT,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (initiative_id, dimension),
  FOREIGN KEY (initiative_id) REFERENCES initiatives(initiative_id)
);

CREATE TABLE IF NOT EXISTS dd_evidence_items (
  initiative_id TEXT NOT NULL,
  dimension TEXT NOT NULL,
  position INTEGER NOT NULL CHECK (position >= 0),
  evidence_ref TEXT NOT NULL,
  source_type TEXT NOT NULL,
  source_url TEXT NOT NULL,
  snippet TEXT NOT NULL,
  specificity REAL NOT NULL CHECK (specificity BETWEEN 0.0 AND 1.0),
  recency REAL NOT NULL CHECK (recency BETWEEN 0.0 AND 1.0),
  reliability REAL NOT NULL CHECK (reliability BETWEEN 0.0 AND 1.0),
  independence REAL NOT NULL CHECK (independence BETWEEN 0.0 AND 1.0),
  quality REAL NOT NULL CHECK (quality BETWEEN 0.0 AND 1.0),
  confidence REAL NOT NULL CHECK (confidence BETWEEN 0.0 AND 1.0),
  supplied_confidence REAL CHECK (
    supplied_confidence BETWEEN 0.0 AND 1.0 OR supplied_confidence IS NULL
  ),
  fetched_at TEXT NOT NULL,
  PRIMARY KEY (initiative_id, dimension, evidence_ref),
  FOREIGN KEY (initiative_id, dimension)
    REFERENCES dd_facts(initiative_id, dimension) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS dd_ai_suggestions (
  initiative_id TEXT NOT NULL,
  dimension TEXT NOT NULL CHECK (
    dimension IN ('team_dd', 'team_fit', 'tech_dd', 'market_dd', 'execution_dd', 'legal_dd')
  ),
  component_key TEXT NOT NULL,
  suggested_value REAL NOT NULL CHECK (suggested_value BETWEEN 1.0 AND 5.0),
  rationale TEXT NOT NULL,
  model TEXT NOT NULL,
  recorded_at TEXT NOT NULL,
  PRIMARY KEY (initiative_id, dimension, component_key),
  FOREIGN KEY (initiative_id) REFERENCES initiatives(initiative_id)
);

CREATE TABLE IF NOT EXISTS dd_scores (
  score_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  score_id TEXT NOT NULL UNIQUE,
  run_id TEXT NOT NULL,
  initiative_id TEXT NOT NULL,
  rubric_version INTEGER NOT NULL,
  market_stage TEXT NOT NULL CHECK (
    market_stage IN ('none', 'interviews', 'loi', 'pilot', 'paid_pilot', 'repeat_revenue')
  ),
  team_dd REAL NOT NULL CHECK (team_dd BETWEEN 1.0 AND 5.0),
  tech_dd REAL NOT NULL CHECK (tech_dd BETWEEN 1.0 AND 5.0),
  market_dd REAL NOT NULL CHECK (market_dd BETWEEN 1.0 AND 5.0),
  execution_dd REAL NOT NULL CHECK (execution_dd BETWEEN 1.0 AND 5.0),
  legal_dd REAL NOT NULL CHECK (legal_dd BETWEEN 1.0 AND 5.0),
  conviction_score REAL NOT NULL CHECK (conviction_score BETWEEN 1.0 AND 5.0),
  conviction_confidence REAL NOT NULL CHECK (conviction_confidence BETWEEN 0.0 AND 1.0),
  scores_json TEXT NOT NULL,
  scored_at TEXT NOT NULL,
  FOREIGN KEY (initiative_id) REFERENCES initiatives(initiative_id),
  FOREIGN KEY (rubric_version) REFERENCES dd_rubrics(rubric_version)
);

CREATE TRIGGER IF NOT EXISTS trg_dd_scores_no_update
BEFORE UPDATE ON dd_scores
BEGIN
  SELECT RAISE(FAIL, 'dd_scores is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_dd_scores_no_delete
BEFORE DELETE ON dd_scores
BEGIN
  SELECT RAISE(FAIL, 'dd_scores is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_dd_scores_initiative_seq
  ON dd_scores(initiative_id, score_seq);

CREATE TABLE IF NOT EXISTS dd_score_components (
  initiative_id TEXT NOT NULL,
  dimension TEXT NOT NULL,
  component_key TEXT NOT NULL,
  score_id TEXT NOT NULL,
  raw_value REAL NOT NULL,
  normalized_value REAL NOT NULL CHECK (normalized_value BETWEEN 1.0 AND 5.0),
  weight REAL NOT NULL CHECK (weight >= 0.0),
  weighted_contribution REAL NOT NULL,
  rule_value REAL NOT NULL,
  ai_suggested_value REAL,
  final_value REAL NOT NULL,
  ai_used INTEGER NOT NULL CHECK (ai_used IN (0, 1)),
  manual_review_flag INTEGER NOT NULL CHECK (manual_review_flag IN (0, 1)),
  audit_reason TEXT,
  confidence REAL NOT NULL CHECK (confidence BETWEEN 0.0 AND 1.0),
  evidence_refs_json TEXT NOT NULL DEFAULT '[]',
  updated_at TEXT NOT NULL,
  PRIMARY KEY (initiative_id, dimension, component_key),
  FOREIGN KEY (score_id) REFERENCES dd_scores(score_id)
);

CREATE TABLE IF NOT EXISTS dd_gates (
  initiative_id TEXT NOT NULL,
  gate_name TEXT NOT NULL CHECK (gate_name IN ('A', 'B', 'C', 'D')),
  status TEXT NOT NULL CHECK (status IN ('pass', 'fail')),
  reason TEXT NOT NULL,
  reason_codes_json TEXT NOT NULL DEFAULT '[]',
  evidence_refs_json TEXT NOT NULL DEFAULT '[]',
  score_id TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (initiative_id, gate_name),
  FOREIGN KEY (score_id) REFERENCES dd_scores(score_id)
);

CREATE TABLE IF NOT EXISTS dd_memos (
  memo_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  memo_id TEXT NOT NULL UNIQUE,
  run_id TEXT NOT NULL,
  initiative_id TEXT NOT NULL,
  score_id TEXT NOT NULL,
  decision TEXT NOT NULL CHECK (decision IN ('invest', 'monitor', 'pass')),
  check_size_band TEXT NOT NULL,
  memo_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  FOREIGN KEY (score_id) REFERENCES dd_scores(score_id)
);

CREATE TRIGGER IF NOT EXISTS trg_dd_memos_no_update
BEFORE UPDATE ON dd_memos
BEGIN
  SELECT RAISE(FAIL, 'dd_memos is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_dd_memos_no_delete
BEFORE DELETE ON dd_memos
BEGIN
  SELECT RAISE(FAIL, 'dd_memos is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_dd_memos_initiative_seq
  ON dd_memos(initiative_id, memo_seq);

CREATE TABLE IF NOT EXISTS dd_tiers (
  initiative_id TEXT PRIMARY KEY,
  score_id TEXT NOT NULL,
  tier TEXT NOT NULL CHECK (tier IN ('S', 'A', 'B', 'C', 'X')),
  rationale TEXT NOT NULL,
  composite_percentile REAL NOT NULL CHECK (composite_percentile BETWEEN 0.0 AND 100.0),
  dimension_percentiles_json TEXT NOT NULL,
  previous_tier TEXT CHECK (previous_tier IN ('S', 'A', 'B', 'C', 'X') OR previous_tier IS NULL),
  tier_change TEXT NOT NULL CHECK (tier_change IN ('new', 'stable', 'upgraded', 'downgraded')),
  change_reason TEXT NOT NULL,
  cohort_stats_json TEXT NOT NULL,
  computed_at TEXT NOT NULL,
  FOREIGN KEY (score_id) REFERENCES dd_scores(score_id)
);
";

pub struct SqliteDdStore {
    conn: Connection,
}

/// One appended score row together with the full score set it was built from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRecord {
    pub score_id: String,
    pub run_id: String,
    pub initiative_id: InitiativeId,
    pub rubric_version: u32,
    pub conviction_score: f64,
    pub conviction_confidence: f64,
    pub scores: ScoreSet,
    #[serde(with = "time::serde::rfc3339")]
    pub scored_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRunReport {
    pub run_id: String,
    pub rubric_version: u32,
    pub ai_enabled: bool,
    #[serde(flatten)]
    pub batch: BatchReport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestReport {
    pub fact: DimensionFact,
    pub skipped_evidence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierListing {
    pub initiative_name: String,
    #[serde(flatten)]
    pub record: TierRecord,
}

/// One flat row of the team capability export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityRow {
    pub initiative_id: InitiativeId,
    pub initiative_name: String,
    pub decision: String,
    pub product_fit: f64,
    pub tech_fit: f64,
    pub sales_fit: f64,
    pub strong_in: Vec<String>,
    pub need_help_in: Vec<String>,
    pub support_priority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExplainReport {
    pub initiative: Initiative,
    pub score: Option<ScoreRecord>,
    pub components: Vec<ScoreComponent>,
    pub gates: Option<GateReport>,
    pub memo: Option<Memo>,
    pub tier: Option<TierRecord>,
    pub finance: Option<FinanceFact>,
}

impl SqliteDdStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_DD_V1)
            .context("failed to apply dd schema")?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![DD_MIGRATION_VERSION, timestamp(now_utc())?],
            )
            .context("failed to register dd schema migration")?;

        self.insert_rubric_if_absent(&DdRubric::v1())?;
        Ok(())
    }

    /// Registers a rubric version. Stored versions are immutable: registering
    /// identical parameters again is a no-op, different parameters under an
    /// existing version are rejected.
    ///
    /// # Errors
    /// Returns an error when the rubric is invalid or its version is already
    /// stored with different parameters.
    pub fn upsert_rubric(&self, rubric: &DdRubric) -> Result<()> {
        rubric
            .validate()
            .map_err(|err| anyhow!("invalid rubric configuration: {err}"))?;

        if self.insert_rubric_if_absent(rubric)? {
            return Ok(());
        }

        let version = rubric.rubric_version;
        match self.get_rubric(version)? {
            Some(stored) if stored == *rubric => Ok(()),
            Some(_) => Err(anyhow!(
                "rubric version {version} already stored with different parameters; bump rubric_version"
            )),
            None => Err(anyhow!("rubric version {version} vanished during registration")),
        }
    }

    fn insert_rubric_if_absent(&self, rubric: &DdRubric) -> Result<bool> {
        let payload = serde_json::to_string(rubric).context("failed to serialize rubric")?;
        let inserted = self
            .conn
            .execute(
                "INSERT INTO dd_rubrics(rubric_version, rubric_json, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(rubric_version) DO NOTHING",
                params![i64::from(rubric.rubric_version), payload, timestamp(now_utc())?],
            )
            .context("failed to insert rubric")?;

        Ok(inserted > 0)
    }

    pub fn get_rubric(&self, version: u32) -> Result<Option<DdRubric>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT rubric_json FROM dd_rubrics WHERE rubric_version = ?1",
                params![i64::from(version)],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query rubric")?;

        json.map(|json| {
            let value: Value = serde_json::from_str(&json).context("invalid stored rubric JSON")?;
            DdRubric::from_json(&value)
                .map_err(|err| anyhow!("failed to parse rubric {version}: {err}"))
        })
        .transpose()
    }

    pub fn get_rubrics(&self) -> Result<BTreeMap<u32, DdRubric>> {
        let mut stmt = self
            .conn
            .prepare("SELECT rubric_version, rubric_json FROM dd_rubrics ORDER BY rubric_version ASC")?;

        let mut rows = stmt.query([])?;
        let mut map = BTreeMap::new();

        while let Some(row) = rows.next()? {
            let version_i64: i64 = row.get(0)?;
            let version = u32::try_from(version_i64)
                .with_context(|| format!("invalid rubric_version: {version_i64}"))?;
            let json: String = row.get(1)?;
            let value: Value = serde_json::from_str(&json).context("invalid stored rubric JSON")?;
            let rubric = DdRubric::from_json(&value)
                .map_err(|err| anyhow!("failed to parse rubric {version}: {err}"))?;
            map.insert(version, rubric);
        }

        Ok(map)
    }

    pub fn upsert_initiative(&self, initiative: &Initiative) -> Result<()> {
        if initiative.name.trim().is_empty() {
            return Err(anyhow!("initiative name MUST be non-empty"));
        }
        let now = timestamp(now_utc())?;
        self.conn
            .execute(
                "INSERT INTO initiatives(initiative_id, name, university, classification, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(initiative_id) DO UPDATE SET
                   name = excluded.name,
                   university = excluded.university,
                   classification = excluded.classification,
                   updated_at = excluded.updated_at",
                params![
                    initiative.initiative_id.to_string(),
                    initiative.name.trim(),
                    initiative.university,
                    initiative.classification,
                    now
                ],
            )
            .context("failed to upsert initiative")?;
        Ok(())
    }

    pub fn get_initiative(&self, initiative_id: InitiativeId) -> Result<Option<Initiative>> {
        self.conn
            .query_row(
                "SELECT initiative_id, name, university, classification
                 FROM initiatives WHERE initiative_id = ?1",
                params![initiative_id.to_string()],
                parse_initiative_row,
            )
            .optional()
            .context("failed to load initiative")
    }

    pub fn list_initiatives(&self) -> Result<Vec<Initiative>> {
        let mut stmt = self.conn.prepare(
            "SELECT initiative_id, name, university, classification
             FROM initiatives ORDER BY name ASC, initiative_id ASC",
        )?;
        let rows = stmt.query_map([], parse_initiative_row)?;
        collect_rows(rows)
    }

    /// Merges one producer fact into the stored record.
    pub fn upsert_fact(
        &mut self,
        input: &FactInput,
        rubric: &DdRubric,
        as_of: OffsetDateTime,
    ) -> Result<DimensionFact> {
        if self.get_initiative(input.initiative_id)?.is_none() {
            return Err(anyhow!("unknown initiative {}", input.initiative_id));
        }
        upsert_fact(self, input, rubric, as_of)
    }

    /// Decodes one producer row and merges it. Malformed evidence entries and
    /// upstream collection failures are skipped with a warning.
    pub fn ingest_fact(
        &mut self,
        row: &Value,
        rubric: &DdRubric,
        as_of: OffsetDateTime,
    ) -> Result<IngestReport> {
        let (input, skipped) =
            parse_fact_row(row).map_err(|err| anyhow!("rejected fact row: {err}"))?;
        for issue in &skipped {
            match issue {
                DdError::UpstreamCollection(message) => warn!(
                    initiative_id = %input.initiative_id,
                    dimension = input.body.kind().as_str(),
                    "{message}; treating as zero additional evidence"
                ),
                other => warn!(
                    initiative_id = %input.initiative_id,
                    dimension = input.body.kind().as_str(),
                    "skipping evidence entry: {other}"
                ),
            }
        }
        let fact = self.upsert_fact(&input, rubric, as_of)?;
        Ok(IngestReport {
            fact,
            skipped_evidence: skipped.iter().map(ToString::to_string).collect(),
        })
    }

    pub fn record_ai_suggestion(&self, suggestion: &StoredSuggestion) -> Result<()> {
        if !suggestion.value.is_finite() || !(1.0..=5.0).contains(&suggestion.value) {
            return Err(anyhow!("AI suggested value MUST be in [1, 5]"));
        }
        if !known_components(suggestion.dimension).contains(&suggestion.component_key.as_str()) {
            return Err(anyhow!(
                "unknown component `{}` for {}",
                suggestion.component_key,
                suggestion.dimension.as_str()
            ));
        }
        if suggestion.model.trim().is_empty() {
            return Err(anyhow!("AI suggestion model MUST be non-empty"));
        }
        if self.get_initiative(suggestion.initiative_id)?.is_none() {
            return Err(anyhow!("unknown initiative {}", suggestion.initiative_id));
        }

        self.conn
            .execute(
                "INSERT INTO dd_ai_suggestions(
                    initiative_id, dimension, component_key, suggested_value, rationale, model, recorded_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(initiative_id, dimension, component_key) DO UPDATE SET
                   suggested_value = excluded.suggested_value,
                   rationale = excluded.rationale,
                   model = excluded.model,
                   recorded_at = excluded.recorded_at",
                params![
                    suggestion.initiative_id.to_string(),
                    suggestion.dimension.as_str(),
                    suggestion.component_key,
                    suggestion.value,
                    suggestion.rationale,
                    suggestion.model,
                    timestamp(now_utc())?
                ],
            )
            .context("failed to record AI suggestion")?;
        Ok(())
    }

    /// Every recorded AI suggestion, ready to serve as a component scorer.
    pub fn load_suggestions(&self) -> Result<SuggestionTable> {
        let mut stmt = self.conn.prepare(
            "SELECT initiative_id, dimension, component_key, suggested_value, rationale, model
             FROM dd_ai_suggestions",
        )?;
        let rows = stmt.query_map([], |row| {
            let dimension_raw: String = row.get(1)?;
            Ok(StoredSuggestion {
                initiative_id: parse_initiative_id(0, &row.get::<_, String>(0)?)?,
                dimension: Dimension::parse(&dimension_raw).ok_or_else(|| {
                    invalid_data(1, Type::Text, format!("invalid dimension: {dimension_raw}"))
                })?,
                component_key: row.get(2)?,
                value: row.get(3)?,
                rationale: row.get(4)?,
                model: row.get(5)?,
            })
        })?;
        Ok(collect_rows(rows)?.into_iter().collect())
    }

    /// Scores, gates and decides the selected initiatives (all when empty).
    ///
    /// Assessment runs in parallel; persistence is sequential with one
    /// transaction per initiative, so a failure never leaves a partial
    /// initiative behind and never aborts its siblings.
    pub fn score_batch(
        &mut self,
        selection: &[InitiativeId],
        rubric: &DdRubric,
        use_ai: bool,
    ) -> Result<ScoreRunReport> {
        rubric
            .validate()
            .map_err(|err| anyhow!("invalid rubric configuration: {err}"))?;
        self.upsert_rubric(rubric)?;

        let ids: Vec<InitiativeId> = if selection.is_empty() {
            self.list_initiatives()?
                .into_iter()
                .map(|initiative| initiative.initiative_id)
                .collect()
        } else {
            selection.to_vec()
        };

        let run_id = Ulid::new().to_string();
        let mut report = BatchReport::default();
        let mut pool = Vec::with_capacity(ids.len());
        for initiative_id in ids {
            let loaded = match self.get_initiative(initiative_id) {
                Ok(Some(_)) => self.facts_for(initiative_id),
                Ok(None) => Err(anyhow!("unknown initiative {initiative_id}")),
                Err(err) => Err(err),
            };
            match loaded {
                Ok(facts) => pool.push((initiative_id, facts)),
                Err(err) => {
                    warn!(initiative_id = %initiative_id, "skipping initiative: {err:#}");
                    report.record_failure(initiative_id, format!("{err:#}"));
                }
            }
        }

        let scorer: Box<dyn ComponentScorer> = if use_ai {
            Box::new(self.load_suggestions()?)
        } else {
            Box::new(NoAiScorer)
        };
        let (assessments, assessed) = assess_many(&pool, rubric, scorer.as_ref());

        for failure in assessed.failures {
            warn!(initiative_id = %failure.initiative_id, "scoring failed: {}", failure.message);
            report.record_failure(failure.initiative_id, failure.message);
        }

        for assessment in &assessments {
            let initiative_id = assessment.initiative_id();
            match self.persist_assessment(assessment, &run_id) {
                Ok(score_id) => {
                    debug!(
                        initiative_id = %initiative_id,
                        score_id = %score_id,
                        conviction = assessment.memo.conviction_score,
                        decision = assessment.memo.decision.as_str(),
                        "initiative scored"
                    );
                    report.record_success();
                }
                Err(err) => {
                    warn!(initiative_id = %initiative_id, "failed to persist assessment: {err:#}");
                    report.record_failure(initiative_id, format!("{err:#}"));
                }
            }
        }

        info!(
            run_id = %run_id,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            "score batch finished"
        );

        Ok(ScoreRunReport {
            run_id,
            rubric_version: rubric.rubric_version,
            ai_enabled: use_ai,
            batch: report,
        })
    }

    fn persist_assessment(&mut self, assessment: &Assessment, run_id: &str) -> Result<String> {
        let scores = &assessment.scores;
        let memo = &assessment.memo;
        let initiative_id = scores.initiative_id.to_string();
        let score_id = Ulid::new().to_string();
        let now = timestamp(now_utc())?;

        let tx = self
            .conn
            .transaction()
            .context("failed to start score transaction")?;

        tx.execute(
            "INSERT INTO dd_scores(
                score_id, run_id, initiative_id, rubric_version, market_stage,
                team_dd, tech_dd, market_dd, execution_dd, legal_dd,
                conviction_score, conviction_confidence, scores_json, scored_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                score_id,
                run_id,
                initiative_id,
                i64::from(scores.rubric_version),
                scores.market_stage.as_str(),
                scores.score(Dimension::TeamDd),
                scores.score(Dimension::TechDd),
                scores.score(Dimension::MarketDd),
                scores.score(Dimension::ExecutionDd),
                scores.score(Dimension::LegalDd),
                memo.conviction_score,
                memo.conviction_confidence,
                serde_json::to_string(scores).context("failed to serialize score set")?,
                now
            ],
        )
        .context("failed to append score")?;

        for component in scores.components() {
            upsert_component(&tx, &initiative_id, &score_id, component, &now)?;
        }
        // Every component produced by this run now carries its score_id.
        tx.execute(
            "DELETE FROM dd_score_components WHERE initiative_id = ?1 AND score_id <> ?2",
            params![initiative_id, score_id],
        )
        .context("failed to prune stale score components")?;
        for gate in &assessment.gates.gates {
            upsert_gate(&tx, &initiative_id, &score_id, gate, &now)?;
        }

        tx.execute(
            "INSERT INTO dd_memos(
                memo_id, run_id, initiative_id, score_id, decision, check_size_band, memo_json, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Ulid::new().to_string(),
                run_id,
                initiative_id,
                score_id,
                memo.decision.as_str(),
                memo.check_size_band,
                serde_json::to_string(memo).context("failed to serialize memo")?,
                now
            ],
        )
        .context("failed to append memo")?;

        tx.commit().context("failed to commit score transaction")?;
        Ok(score_id)
    }

    pub fn latest_score(&self, initiative_id: InitiativeId) -> Result<Option<ScoreRecord>> {
        self.conn
            .query_row(
                "SELECT score_id, run_id, initiative_id, rubric_version,
                        conviction_score, conviction_confidence, scores_json, scored_at
                 FROM dd_scores
                 WHERE initiative_id = ?1
                 ORDER BY score_seq DESC
                 LIMIT 1",
                params![initiative_id.to_string()],
                parse_score_row,
            )
            .optional()
            .context("failed to load latest score")
    }

    /// Latest score of every scored initiative.
    pub fn latest_scores(&self) -> Result<Vec<ScoreRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.score_id, s.run_id, s.initiative_id, s.rubric_version,
                    s.conviction_score, s.conviction_confidence, s.scores_json, s.scored_at
             FROM dd_scores s
             WHERE s.score_seq = (
               SELECT MAX(inner_scores.score_seq) FROM dd_scores inner_scores
               WHERE inner_scores.initiative_id = s.initiative_id
             )
             ORDER BY s.initiative_id ASC",
        )?;
        let rows = stmt.query_map([], parse_score_row)?;
        collect_rows(rows)
    }

    pub fn score_history(&self, initiative_id: InitiativeId) -> Result<Vec<ScoreRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT score_id, run_id, initiative_id, rubric_version,
                    conviction_score, conviction_confidence, scores_json, scored_at
             FROM dd_scores WHERE initiative_id = ?1 ORDER BY score_seq ASC",
        )?;
        let rows = stmt.query_map(params![initiative_id.to_string()], parse_score_row)?;
        collect_rows(rows)
    }

    pub fn components_for(&self, initiative_id: InitiativeId) -> Result<Vec<ScoreComponent>> {
        let mut stmt = self.conn.prepare(
            "SELECT dimension, component_key, raw_value, normalized_value, weight,
                    weighted_contribution, rule_value, ai_suggested_value, final_value,
                    ai_used, manual_review_flag, audit_reason, confidence, evidence_refs_json
             FROM dd_score_components
             WHERE initiative_id = ?1
             ORDER BY dimension ASC, component_key ASC",
        )?;
        let rows = stmt.query_map(params![initiative_id.to_string()], parse_component_row)?;
        collect_rows(rows)
    }

    pub fn gates_for(&self, initiative_id: InitiativeId) -> Result<Option<GateReport>> {
        let mut stmt = self.conn.prepare(
            "SELECT gate_name, status, reason, reason_codes_json, evidence_refs_json
             FROM dd_gates WHERE initiative_id = ?1 ORDER BY gate_name ASC",
        )?;
        let rows = stmt.query_map(params![initiative_id.to_string()], parse_gate_row)?;
        let gates = collect_rows(rows)?;
        if gates.is_empty() {
            return Ok(None);
        }
        let pass_all = GateName::ALL.iter().all(|name| {
            gates
                .iter()
                .any(|gate| gate.gate_name == *name && gate.status == GateStatus::Pass)
        });
        Ok(Some(GateReport {
            initiative_id,
            gates,
            pass_all,
        }))
    }

    pub fn latest_memo(&self, initiative_id: InitiativeId) -> Result<Option<Memo>> {
        self.conn
            .query_row(
                "SELECT memo_json FROM dd_memos
                 WHERE initiative_id = ?1
                 ORDER BY memo_seq DESC
                 LIMIT 1",
                params![initiative_id.to_string()],
                |row| json_column(row, 0),
            )
            .optional()
            .context("failed to load latest memo")
    }

    /// Recomputes tiers for the full scored pool and swaps them in atomically.
    pub fn recompute_tiers(&mut self, policy: &TierPolicy) -> Result<Vec<TierRecord>> {
        let latest = self.latest_scores()?;
        if latest.is_empty() {
            info!("no scored initiatives; tier recomputation skipped");
            return Ok(Vec::new());
        }

        let previous: BTreeMap<InitiativeId, Tier> = self
            .list_tiers()?
            .into_iter()
            .map(|listing| (listing.record.initiative_id, listing.record.tier))
            .collect();

        let mut candidates = Vec::with_capacity(latest.len());
        let mut score_ids = BTreeMap::new();
        for score in &latest {
            let Some(initiative) = self.get_initiative(score.initiative_id)? else {
                continue;
            };
            let conviction = Dimension::CONVICTION;
            candidates.push(TierCandidate {
                initiative_id: score.initiative_id,
                name: initiative.name,
                university: initiative.university,
                classification: initiative.classification,
                composite: score.conviction_score,
                confidence: score.conviction_confidence,
                dimension_scores: conviction
                    .iter()
                    .map(|dimension| (*dimension, score.scores.score(*dimension)))
                    .collect(),
                dimension_confidences: conviction
                    .iter()
                    .map(|dimension| (*dimension, score.scores.confidence(*dimension)))
                    .collect(),
                previous_tier: previous.get(&score.initiative_id).copied(),
            });
            score_ids.insert(score.initiative_id, score.score_id.clone());
        }

        let records = recompute_tiers(&candidates, policy);
        let now = timestamp(now_utc())?;

        let tx = self
            .conn
            .transaction()
            .context("failed to start tier transaction")?;
        tx.execute("DELETE FROM dd_tiers", [])
            .context("failed to clear previous tiers")?;
        for record in &records {
            let score_id = score_ids
                .get(&record.initiative_id)
                .ok_or_else(|| anyhow!("missing score for {}", record.initiative_id))?;
            insert_tier(&tx, record, score_id, &now)?;
        }
        tx.commit().context("failed to commit tier transaction")?;

        if let Some(first) = records.first() {
            let distribution = first
                .cohort_stats
                .tier_distribution
                .iter()
                .map(|(tier, count)| format!("{}={count}", tier.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            info!(ranked = records.len(), tiers = %distribution, "tiers recomputed");
        }
        Ok(records)
    }

    pub fn list_tiers(&self) -> Result<Vec<TierListing>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.initiative_id, t.tier, t.rationale, t.composite_percentile,
                    t.dimension_percentiles_json, t.previous_tier, t.tier_change,
                    t.change_reason, t.cohort_stats_json, i.name
             FROM dd_tiers t
             JOIN initiatives i ON i.initiative_id = t.initiative_id
             ORDER BY t.tier ASC, t.composite_percentile DESC, i.name ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TierListing {
                record: parse_tier_row(row)?,
                initiative_name: row.get(9)?,
            })
        })?;
        collect_rows(rows)
    }

    /// Investable and watchlist lenses over the latest scores.
    pub fn rankings(&self, top_n: Option<usize>) -> Result<RankingLenses> {
        let tiers: BTreeMap<InitiativeId, Tier> = self
            .list_tiers()?
            .into_iter()
            .map(|listing| (listing.record.initiative_id, listing.record.tier))
            .collect();

        let mut entries = Vec::new();
        for score in self.latest_scores()? {
            let Some(initiative) = self.get_initiative(score.initiative_id)? else {
                continue;
            };
            let team = match self.find_fact(score.initiative_id, FactKind::Team)? {
                Some(DimensionFact {
                    body: FactBody::Team(team),
                    ..
                }) => Some(team),
                _ => None,
            };
            let gates_pass_all = self
                .gates_for(score.initiative_id)?
                .is_some_and(|report| report.pass_all);
            entries.push(RankedEntry {
                initiative_id: score.initiative_id,
                initiative_name: initiative.name,
                is_investable: team.as_ref().is_some_and(|team| team.is_investable),
                segment: team
                    .and_then(|team| team.investable_segment)
                    .unwrap_or_else(|| "watchlist_general".to_string()),
                conviction_score: score.conviction_score,
                gates_pass_all,
                tier: tiers.get(&score.initiative_id).copied(),
                rank: 0,
            });
        }

        let lenses = rank_lenses(entries, top_n);
        info!(
            investable = lenses.investable.len(),
            watchlist = lenses.watchlist.len(),
            "rankings built"
        );
        Ok(lenses)
    }

    pub fn team_capability_matrix(&self) -> Result<Vec<CapabilityRow>> {
        let mut rows = Vec::new();
        for initiative in self.list_initiatives()? {
            let Some(memo) = self.latest_memo(initiative.initiative_id)? else {
                continue;
            };
            rows.push(CapabilityRow {
                initiative_id: initiative.initiative_id,
                initiative_name: initiative.name,
                decision: memo.decision.as_str().to_string(),
                product_fit: memo.team.product_fit,
                tech_fit: memo.team.tech_fit,
                sales_fit: memo.team.sales_fit,
                strong_in: memo.team.strong_in,
                need_help_in: memo.team.need_help_in,
                support_priority: memo.team.support_priority,
            });
        }
        Ok(rows)
    }

    pub fn source_audit(
        &self,
        initiative_id: InitiativeId,
        rubric: &DdRubric,
    ) -> Result<SourceAudit> {
        let facts = self.facts_for(initiative_id)?;
        let gates = self.gates_for(initiative_id)?;
        Ok(source_audit(&facts, gates.as_ref(), rubric))
    }

    pub fn explain(&self, initiative_id: InitiativeId) -> Result<Option<ExplainReport>> {
        let Some(initiative) = self.get_initiative(initiative_id)? else {
            return Ok(None);
        };
        let tier = self
            .list_tiers()?
            .into_iter()
            .map(|listing| listing.record)
            .find(|record| record.initiative_id == initiative_id);
        let finance = match self.find_fact(initiative_id, FactKind::Finance)? {
            Some(DimensionFact {
                body: FactBody::Finance(finance),
                ..
            }) => Some(finance),
            _ => None,
        };

        Ok(Some(ExplainReport {
            initiative,
            score: self.latest_score(initiative_id)?,
            components: self.components_for(initiative_id)?,
            gates: self.gates_for(initiative_id)?,
            memo: self.latest_memo(initiative_id)?,
            tier,
            finance,
        }))
    }

    fn evidence_for(&self, initiative_id: InitiativeId, kind: FactKind) -> Result<Vec<EvidenceItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT evidence_ref, source_type, source_url, snippet, specificity, recency,
                    reliability, independence, quality, confidence, supplied_confidence, fetched_at
             FROM dd_evidence_items
             WHERE initiative_id = ?1 AND dimension = ?2
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(
            params![initiative_id.to_string(), kind.as_str()],
            parse_evidence_row,
        )?;
        collect_rows(rows)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl FactRepository for SqliteDdStore {
    type Error = anyhow::Error;

    fn find_fact(&self, initiative_id: InitiativeId, kind: FactKind) -> Result<Option<DimensionFact>> {
        let row = self
            .conn
            .query_row(
                "SELECT body_json, confidence, source_type, source_url, updated_at
                 FROM dd_facts WHERE initiative_id = ?1 AND dimension = ?2",
                params![initiative_id.to_string(), kind.as_str()],
                |row| {
                    let body: FactBody = json_column(row, 0)?;
                    let source_type: Option<String> = row.get(2)?;
                    let updated_at = parse_timestamp(4, &row.get::<_, String>(4)?)?;
                    Ok((
                        body,
                        row.get::<_, f64>(1)?,
                        Provenance {
                            source_type: source_type.as_deref().map(SourceType::parse),
                            source_url: row.get(3)?,
                        },
                        updated_at,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to load {} fact", kind.as_str()))?;

        let Some((body, confidence, provenance, updated_at)) = row else {
            return Ok(None);
        };
        if body.kind() != kind {
            return Err(anyhow!(
                "stored {} fact decodes as {}",
                kind.as_str(),
                body.kind().as_str()
            ));
        }

        Ok(Some(DimensionFact {
            initiative_id,
            body,
            evidence: self.evidence_for(initiative_id, kind)?,
            confidence,
            provenance,
            updated_at,
        }))
    }

    fn save_fact(&mut self, fact: &DimensionFact) -> Result<()> {
        let initiative_id = fact.initiative_id.to_string();
        let dimension = fact.kind().as_str();

        let tx = self
            .conn
            .transaction()
            .context("failed to start fact transaction")?;

        tx.execute(
            "INSERT INTO dd_facts(
                initiative_id, dimension, body_json, confidence, source_type, source_url, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(initiative_id, dimension) DO UPDATE SET
               body_json = excluded.body_json,
               confidence = excluded.confidence,
               source_type = excluded.source_type,
               source_url = excluded.source_url,
               updated_at = excluded.updated_at",
            params![
                initiative_id,
                dimension,
                serde_json::to_string(&fact.body).context("failed to serialize fact body")?,
                fact.confidence,
                fact.provenance.source_type.as_ref().map(SourceType::as_str),
                fact.provenance.source_url,
                timestamp(fact.updated_at)?
            ],
        )
        .context("failed to upsert fact")?;

        tx.execute(
            "DELETE FROM dd_evidence_items WHERE initiative_id = ?1 AND dimension = ?2",
            params![initiative_id, dimension],
        )
        .context("failed to clear fact evidence")?;

        for (position, item) in fact.evidence.iter().enumerate() {
            tx.execute(
                "INSERT INTO dd_evidence_items(
                    initiative_id, dimension, position, evidence_ref, source_type, source_url,
                    snippet, specificity, recency, reliability, independence, quality,
                    confidence, supplied_confidence, fetched_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    initiative_id,
                    dimension,
                    i64::try_from(position).context("evidence position overflow")?,
                    item.evidence_ref,
                    item.source_type.as_str(),
                    item.source_url,
                    item.snippet,
                    item.specificity,
                    item.recency,
                    item.reliability,
                    item.independence,
                    item.quality,
                    item.confidence,
                    item.supplied_confidence,
                    timestamp(item.fetched_at)?
                ],
            )
            .context("failed to insert evidence item")?;
        }

        tx.commit().context("failed to commit fact transaction")?;
        Ok(())
    }
}

fn upsert_component(
    tx: &Transaction<'_>,
    initiative_id: &str,
    score_id: &str,
    component: &ScoreComponent,
    now: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO dd_score_components(
            initiative_id, dimension, component_key, score_id, raw_value, normalized_value,
            weight, weighted_contribution, rule_value, ai_suggested_value, final_value,
            ai_used, manual_review_flag, audit_reason, confidence, evidence_refs_json, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
         ON CONFLICT(initiative_id, dimension, component_key) DO UPDATE SET
           score_id = excluded.score_id,
           raw_value = excluded.raw_value,
           normalized_value = excluded.normalized_value,
           weight = excluded.weight,
           weighted_contribution = excluded.weighted_contribution,
           rule_value = excluded.rule_value,
           ai_suggested_value = excluded.ai_suggested_value,
           final_value = excluded.final_value,
           ai_used = excluded.ai_used,
           manual_review_flag = excluded.manual_review_flag,
           audit_reason = excluded.audit_reason,
           confidence = excluded.confidence,
           evidence_refs_json = excluded.evidence_refs_json,
           updated_at = excluded.updated_at",
        params![
            initiative_id,
            component.dimension.as_str(),
            component.component_key,
            score_id,
            component.raw_value,
            component.normalized_value,
            component.weight,
            component.weighted_contribution,
            component.rule_value,
            component.ai_suggested_value,
            component.final_value,
            bool_to_sql(component.ai_used),
            bool_to_sql(component.manual_review_flag),
            component.audit_reason,
            component.confidence,
            serde_json::to_string(&component.evidence_refs)
                .context("failed to serialize evidence refs")?,
            now
        ],
    )
    .with_context(|| {
        format!(
            "failed to upsert component {}.{}",
            component.dimension.as_str(),
            component.component_key
        )
    })?;
    Ok(())
}

fn upsert_gate(
    tx: &Transaction<'_>,
    initiative_id: &str,
    score_id: &str,
    gate: &GateOutcome,
    now: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO dd_gates(
            initiative_id, gate_name, status, reason, reason_codes_json, evidence_refs_json,
            score_id, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(initiative_id, gate_name) DO UPDATE SET
           status = excluded.status,
           reason = excluded.reason,
           reason_codes_json = excluded.reason_codes_json,
           evidence_refs_json = excluded.evidence_refs_json,
           score_id = excluded.score_id,
           updated_at = excluded.updated_at",
        params![
            initiative_id,
            gate.gate_name.as_str(),
            gate.status.as_str(),
            gate.reason,
            serde_json::to_string(&gate.reason_codes).context("failed to serialize reason codes")?,
            serde_json::to_string(&gate.evidence_refs)
                .context("failed to serialize gate evidence refs")?,
            score_id,
            now
        ],
    )
    .with_context(|| format!("failed to upsert gate {}", gate.gate_name.as_str()))?;
    Ok(())
}

fn insert_tier(tx: &Transaction<'_>, record: &TierRecord, score_id: &str, now: &str) -> Result<()> {
    tx.execute(
        "INSERT INTO dd_tiers(
            initiative_id, score_id, tier, rationale, composite_percentile,
            dimension_percentiles_json, previous_tier, tier_change, change_reason,
            cohort_stats_json, computed_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.initiative_id.to_string(),
            score_id,
            record.tier.as_str(),
            record.rationale,
            record.composite_percentile,
            serde_json::to_string(&record.dimension_percentiles)
                .context("failed to serialize dimension percentiles")?,
            record.previous_tier.map(Tier::as_str),
            record.tier_change.as_str(),
            record.change_reason,
            serde_json::to_string(&record.cohort_stats).context("failed to serialize cohort stats")?,
            now
        ],
    )
    .with_context(|| format!("failed to insert tier for {}", record.initiative_id))?;
    Ok(())
}

fn parse_initiative_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Initiative> {
    Ok(Initiative {
        initiative_id: parse_initiative_id(0, &row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        university: row.get(2)?,
        classification: row.get(3)?,
    })
}

fn parse_score_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScoreRecord> {
    let rubric_version_i64: i64 = row.get(3)?;
    let rubric_version = u32::try_from(rubric_version_i64).map_err(|_| {
        invalid_data(
            3,
            Type::Integer,
            format!("invalid rubric_version: {rubric_version_i64}"),
        )
    })?;

    Ok(ScoreRecord {
        score_id: row.get(0)?,
        run_id: row.get(1)?,
        initiative_id: parse_initiative_id(2, &row.get::<_, String>(2)?)?,
        rubric_version,
        conviction_score: row.get(4)?,
        conviction_confidence: row.get(5)?,
        scores: json_column(row, 6)?,
        scored_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
    })
}

fn parse_component_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScoreComponent> {
    let dimension_raw: String = row.get(0)?;
    let dimension = Dimension::parse(&dimension_raw).ok_or_else(|| {
        invalid_data(0, Type::Text, format!("invalid dimension: {dimension_raw}"))
    })?;

    Ok(ScoreComponent {
        dimension,
        component_key: row.get(1)?,
        raw_value: row.get(2)?,
        normalized_value: row.get(3)?,
        weight: row.get(4)?,
        weighted_contribution: row.get(5)?,
        rule_value: row.get(6)?,
        ai_suggested_value: row.get(7)?,
        final_value: row.get(8)?,
        ai_used: row.get::<_, i64>(9)? == 1,
        manual_review_flag: row.get::<_, i64>(10)? == 1,
        audit_reason: row.get(11)?,
        confidence: row.get(12)?,
        evidence_refs: json_column(row, 13)?,
    })
}

fn parse_gate_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GateOutcome> {
    let gate_raw: String = row.get(0)?;
    let status_raw: String = row.get(1)?;

    Ok(GateOutcome {
        gate_name: GateName::parse(&gate_raw)
            .ok_or_else(|| invalid_data(0, Type::Text, format!("invalid gate_name: {gate_raw}")))?,
        status: GateStatus::parse(&status_raw)
            .ok_or_else(|| invalid_data(1, Type::Text, format!("invalid status: {status_raw}")))?,
        reason: row.get(2)?,
        reason_codes: json_column(row, 3)?,
        evidence_refs: json_column(row, 4)?,
    })
}

fn parse_tier_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TierRecord> {
    let tier_raw: String = row.get(1)?;
    let previous_raw: Option<String> = row.get(5)?;
    let change_raw: String = row.get(6)?;

    let tier = Tier::parse(&tier_raw)
        .ok_or_else(|| invalid_data(1, Type::Text, format!("invalid tier: {tier_raw}")))?;
    let previous_tier = previous_raw
        .as_deref()
        .map(|raw| {
            Tier::parse(raw)
                .ok_or_else(|| invalid_data(5, Type::Text, format!("invalid previous_tier: {raw}")))
        })
        .transpose()?;
    let tier_change = TierChange::parse(&change_raw).ok_or_else(|| {
        invalid_data(6, Type::Text, format!("invalid tier_change: {change_raw}"))
    })?;

    Ok(TierRecord {
        initiative_id: parse_initiative_id(0, &row.get::<_, String>(0)?)?,
        tier,
        rationale: row.get(2)?,
        composite_percentile: row.get(3)?,
        dimension_percentiles: json_column(row, 4)?,
        previous_tier,
        tier_change,
        change_reason: row.get(7)?,
        cohort_stats: json_column(row, 8)?,
    })
}

fn parse_evidence_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EvidenceItem> {
    Ok(EvidenceItem {
        evidence_ref: row.get(0)?,
        source_type: SourceType::parse(&row.get::<_, String>(1)?),
        source_url: row.get(2)?,
        snippet: row.get(3)?,
        specificity: row.get(4)?,
        recency: row.get(5)?,
        reliability: row.get(6)?,
        independence: row.get(7)?,
        quality: row.get(8)?,
        confidence: row.get(9)?,
        supplied_confidence: row.get(10)?,
        fetched_at: parse_timestamp(11, &row.get::<_, String>(11)?)?,
    })
}

fn parse_initiative_id(column: usize, raw: &str) -> rusqlite::Result<InitiativeId> {
    raw.parse()
        .map_err(|err: DdError| invalid_data(column, Type::Text, err.to_string()))
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<OffsetDateTime> {
    parse_rfc3339_utc(raw).map_err(|err| invalid_data(column, Type::Text, err.to_string()))
}

fn json_column<T: DeserializeOwned>(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw)
        .map_err(|err| invalid_data(column, Type::Text, format!("invalid JSON column: {err}")))
}

fn invalid_data(column: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        ty,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn timestamp(value: OffsetDateTime) -> Result<String> {
    format_rfc3339(value).map_err(|err| anyhow!(err.to_string()))
}

fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
