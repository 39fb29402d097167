//! `vdd` command surface over the due-diligence store.
//!
//! Every command prints JSON on stdout. Logs go to stderr and are filtered
//! through `VDD_LOG`.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::Serialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{info, warn};
use venture_dd_core::{
    classify_investability, now_utc, parse_rfc3339_utc, DdRubric, Dimension, Initiative,
    InitiativeId, StoredSuggestion,
};
use venture_dd_store_sqlite::SqliteDdStore;

#[derive(Debug, Parser)]
#[command(name = "vdd")]
#[command(about = "Venture due-diligence scoring CLI")]
pub struct Cli {
    #[arg(long, default_value = "./venture_dd.sqlite3")]
    db: PathBuf,

    /// Optional TOML file layered over the built-in v1 rubric.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Creates or upgrades the database schema.
    Init,
    Initiative {
        #[command(subcommand)]
        command: InitiativeCommand,
    },
    Facts {
        #[command(subcommand)]
        command: FactsCommand,
    },
    Ai {
        #[command(subcommand)]
        command: AiCommand,
    },
    Score(ScoreArgs),
    Gates(InitiativeArgs),
    Tiers(TiersArgs),
    Rank(RankArgs),
    Memo(InitiativeArgs),
    Explain(InitiativeArgs),
    Matrix,
    Audit(InitiativeArgs),
}

#[derive(Debug, Subcommand)]
pub enum InitiativeCommand {
    Add(InitiativeAddArgs),
    List,
}

#[derive(Debug, Args)]
pub struct InitiativeAddArgs {
    #[arg(long)]
    name: String,
    /// Reuses an existing id to update the initiative in place.
    #[arg(long)]
    initiative_id: Option<String>,
    #[arg(long)]
    university: Option<String>,
    #[arg(long)]
    classification: Option<String>,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long = "category")]
    categories: Vec<String>,
    #[arg(long = "technology")]
    technologies: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum FactsCommand {
    /// Imports a JSON array (or a single object) of producer fact rows.
    Import(FactsImportArgs),
}

#[derive(Debug, Args)]
pub struct FactsImportArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum AiCommand {
    Suggest(AiSuggestArgs),
}

#[derive(Debug, Args)]
pub struct AiSuggestArgs {
    #[arg(long)]
    initiative_id: String,
    #[arg(long)]
    dimension: String,
    #[arg(long)]
    component: String,
    #[arg(long)]
    value: f64,
    #[arg(long)]
    model: String,
    #[arg(long, default_value = "")]
    rationale: String,
}

#[derive(Debug, Args)]
pub struct ScoreArgs {
    /// Restricts the run to these initiatives; all when omitted.
    #[arg(long = "initiative-id")]
    initiative_ids: Vec<String>,
    /// Serves recorded AI suggestions to the component resolver.
    #[arg(long)]
    use_ai: bool,
}

#[derive(Debug, Args)]
pub struct InitiativeArgs {
    #[arg(long)]
    initiative_id: String,
}

#[derive(Debug, Args)]
pub struct TiersArgs {
    #[arg(long)]
    recompute: bool,
}

#[derive(Debug, Args)]
pub struct RankArgs {
    #[arg(long)]
    top_n: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RejectedRow {
    index: usize,
    message: String,
}

#[derive(Debug, Serialize)]
struct ImportSummary {
    rows: usize,
    imported: usize,
    skipped_evidence: usize,
    rejected: Vec<RejectedRow>,
}

/// Runs a parsed command line against the `--db` store.
///
/// # Errors
/// Returns an error when tracing, configuration, the store or the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(cli.quiet, cli.verbose)?;
    let rubric = load_rubric(cli.config.as_deref())?;

    let mut store = SqliteDdStore::open(&cli.db)?;
    store.migrate()?;
    run_command(cli.command, &mut store, &rubric)
}

fn init_tracing(quiet: bool, verbose: bool) -> Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("VDD_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

/// Layers the v1 defaults, an optional TOML file and `VDD_*` variables.
///
/// `VDD_QUALITY_THRESHOLD` maps to `quality_threshold`, and
/// `VDD_GATES__GATE_C__MIN_STAGE` to `gates.gate_c.min_stage`.
#[must_use]
pub fn rubric_figment(config: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(DdRubric::v1()));
    if let Some(path) = config {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("VDD_").ignore(&["LOG"]).split("__"))
}

/// Extracts and validates the layered rubric.
///
/// # Errors
/// Returns an error when a layer cannot be decoded or the rubric is invalid.
pub fn load_rubric(config: Option<&Path>) -> Result<DdRubric> {
    let rubric: DdRubric = rubric_figment(config)
        .extract()
        .context("failed to load rubric configuration")?;
    rubric
        .validate()
        .map_err(|err| anyhow!("invalid rubric configuration: {err}"))?;
    Ok(rubric)
}

fn run_command(command: Command, store: &mut SqliteDdStore, rubric: &DdRubric) -> Result<()> {
    match command {
        Command::Init => {
            store.upsert_rubric(rubric)?;
            let versions: Vec<u32> = store.get_rubrics()?.into_keys().collect();
            print_json(&json!({
                "status": "ok",
                "rubric_version": rubric.rubric_version,
                "stored_rubric_versions": versions,
            }))
        }
        Command::Initiative { command } => run_initiative(command, store),
        Command::Facts {
            command: FactsCommand::Import(args),
        } => run_facts_import(&args, store, rubric),
        Command::Ai {
            command: AiCommand::Suggest(args),
        } => {
            let dimension = Dimension::parse(&args.dimension)
                .ok_or_else(|| anyhow!("unknown dimension `{}`", args.dimension))?;
            let suggestion = StoredSuggestion {
                initiative_id: parse_initiative_id(&args.initiative_id)?,
                dimension,
                component_key: args.component,
                value: args.value,
                rationale: args.rationale,
                model: args.model,
            };
            store.record_ai_suggestion(&suggestion)?;
            print_json(&suggestion)
        }
        Command::Score(args) => {
            let selection = args
                .initiative_ids
                .iter()
                .map(|raw| parse_initiative_id(raw))
                .collect::<Result<Vec<_>>>()?;
            let report = store.score_batch(&selection, rubric, args.use_ai)?;
            print_json(&report)
        }
        Command::Gates(args) => {
            let initiative_id = parse_initiative_id(&args.initiative_id)?;
            let gates = store.gates_for(initiative_id)?.ok_or_else(|| not_scored(initiative_id))?;
            print_json(&gates)
        }
        Command::Tiers(args) => {
            if args.recompute {
                store.recompute_tiers(&rubric.tiers)?;
            }
            print_json(&store.list_tiers()?)
        }
        Command::Rank(args) => print_json(&store.rankings(args.top_n)?),
        Command::Memo(args) => {
            let initiative_id = parse_initiative_id(&args.initiative_id)?;
            let memo = store.latest_memo(initiative_id)?.ok_or_else(|| not_scored(initiative_id))?;
            print_json(&memo)
        }
        Command::Explain(args) => {
            let initiative_id = parse_initiative_id(&args.initiative_id)?;
            let report = store
                .explain(initiative_id)?
                .ok_or_else(|| anyhow!("initiative not found: {initiative_id}"))?;
            print_json(&report)
        }
        Command::Matrix => print_json(&store.team_capability_matrix()?),
        Command::Audit(args) => {
            let initiative_id = parse_initiative_id(&args.initiative_id)?;
            if store.get_initiative(initiative_id)?.is_none() {
                return Err(anyhow!("initiative not found: {initiative_id}"));
            }
            print_json(&store.source_audit(initiative_id, rubric)?)
        }
    }
}

fn run_initiative(command: InitiativeCommand, store: &SqliteDdStore) -> Result<()> {
    match command {
        InitiativeCommand::Add(args) => {
            let initiative_id = match args.initiative_id.as_deref() {
                Some(raw) => parse_initiative_id(raw)?,
                None => InitiativeId::new(),
            };
            let investability = classify_investability(
                &args.name,
                &args.description,
                &args.categories,
                &args.technologies,
            );
            let initiative = Initiative {
                initiative_id,
                name: args.name,
                university: args.university,
                classification: args
                    .classification
                    .or_else(|| Some(investability.segment.clone())),
            };
            store.upsert_initiative(&initiative)?;
            info!(initiative_id = %initiative_id, segment = %investability.segment, "initiative saved");
            print_json(&json!({
                "initiative": initiative,
                "investability": investability,
            }))
        }
        InitiativeCommand::List => print_json(&store.list_initiatives()?),
    }
}

fn run_facts_import(args: &FactsImportArgs, store: &mut SqliteDdStore, rubric: &DdRubric) -> Result<()> {
    let as_of = parse_optional_utc(args.as_of.as_deref())?;
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read fact rows from {}", args.file.display()))?;
    let rows = match serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("invalid JSON in {}", args.file.display()))?
    {
        Value::Array(rows) => rows,
        row @ Value::Object(_) => vec![row],
        other => return Err(anyhow!("fact rows MUST be a JSON array or object, got {other}")),
    };

    let mut summary = ImportSummary {
        rows: rows.len(),
        imported: 0,
        skipped_evidence: 0,
        rejected: Vec::new(),
    };
    for (index, row) in rows.iter().enumerate() {
        match store.ingest_fact(row, rubric, as_of) {
            Ok(report) => {
                summary.imported += 1;
                summary.skipped_evidence += report.skipped_evidence.len();
            }
            Err(err) => {
                warn!(row = index, "rejected fact row: {err:#}");
                summary.rejected.push(RejectedRow {
                    index,
                    message: format!("{err:#}"),
                });
            }
        }
    }

    info!(
        rows = summary.rows,
        imported = summary.imported,
        rejected = summary.rejected.len(),
        "fact import finished"
    );
    print_json(&summary)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn not_scored(initiative_id: InitiativeId) -> anyhow::Error {
    anyhow!("no score found for initiative {initiative_id}; run `vdd score` first")
}

fn parse_initiative_id(raw: &str) -> Result<InitiativeId> {
    raw.parse().map_err(|err| anyhow!("{err}"))
}

fn parse_optional_utc(raw: Option<&str>) -> Result<OffsetDateTime> {
    match raw {
        Some(value) => parse_rfc3339_utc(value).map_err(|err| anyhow!(err.to_string())),
        None => Ok(now_utc()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_nested_commands() {
        let cli = match Cli::try_parse_from([
            "vdd",
            "--db",
            "/tmp/x.sqlite3",
            "score",
            "--initiative-id",
            "01J0SQQP7M70P6Y3R4T8D8G8M2",
            "--use-ai",
        ]) {
            Ok(value) => value,
            Err(err) => panic!("failed to parse: {err}"),
        };
        match cli.command {
            Command::Score(args) => {
                assert_eq!(args.initiative_ids.len(), 1);
                assert!(args.use_ai);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["vdd", "-v", "--quiet", "matrix"]).is_err());
    }

    #[test]
    fn bad_initiative_ids_are_rejected() {
        assert!(parse_initiative_id("not-a-ulid").is_err());
        assert!(parse_optional_utc(Some("2026-03-01T12:00:00+02:00")).is_err());
    }
}
