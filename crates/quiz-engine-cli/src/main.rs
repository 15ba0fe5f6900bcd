use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use quiz_engine_api::{
    AddCategoryRequest, AnswerResult, NewItem, QuizEngineApi, RecordResultsRequest,
};
use quiz_engine_core::{CategoryId, ItemId, LearnerId, StrategyInput};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "qz")]
#[command(about = "Quiz recommendation engine CLI")]
struct Cli {
    #[arg(long, env = "QUIZ_ENGINE_DB", default_value = "./quiz_engine.sqlite3")]
    db: PathBuf,

    /// Fixed RNG seed for reproducible selections.
    #[arg(long, env = "QUIZ_ENGINE_SEED")]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Category {
        #[command(subcommand)]
        command: CategoryCommand,
    },
    Item {
        #[command(subcommand)]
        command: ItemCommand,
    },
    Response {
        #[command(subcommand)]
        command: ResponseCommand,
    },
    Learner {
        #[command(subcommand)]
        command: LearnerCommand,
    },
    Strategy {
        #[command(subcommand)]
        command: StrategyCommand,
    },
    Similarity {
        #[command(subcommand)]
        command: SimilarityCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum CategoryCommand {
    Add {
        #[arg(long)]
        name: String,
    },
    List,
}

#[derive(Debug, Subcommand)]
enum ItemCommand {
    Add(ItemAddArgs),
    List {
        #[arg(long)]
        category: Option<i64>,
    },
}

#[derive(Debug, Args)]
struct ItemAddArgs {
    /// Opaque media reference, e.g. a path or URL to an audio clip.
    #[arg(long)]
    media: String,
    #[arg(long)]
    answer: String,
    #[arg(long)]
    category: i64,
}

#[derive(Debug, Subcommand)]
enum ResponseCommand {
    Record(ResponseRecordArgs),
}

#[derive(Debug, Args)]
struct ResponseRecordArgs {
    #[arg(long)]
    learner: i64,
    /// `<item-id>:correct` or `<item-id>:incorrect`; repeat once per answered item.
    #[arg(long = "result", required = true, value_parser = parse_answer)]
    results: Vec<AnswerResult>,
    /// RFC3339 UTC timestamp; defaults to now.
    #[arg(long)]
    at: Option<String>,
}

#[derive(Debug, Subcommand)]
enum LearnerCommand {
    Stats {
        #[arg(long)]
        learner: i64,
    },
}

#[derive(Debug, Subcommand)]
enum StrategyCommand {
    List,
    Run(StrategyRunArgs),
}

#[derive(Debug, Args)]
struct StrategyRunArgs {
    name: String,
    #[arg(long)]
    learner: Option<i64>,
    #[arg(long)]
    category: Option<i64>,
}

#[derive(Debug, Subcommand)]
enum SimilarityCommand {
    Items {
        #[arg(long)]
        a: i64,
        #[arg(long)]
        b: i64,
    },
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn emit<T>(value: &T) -> Result<()>
where
    T: serde::Serialize,
{
    emit_json(serde_json::to_value(value).context("failed to serialize command output")?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    debug!(db = %cli.db.display(), seeded = cli.seed.is_some(), "qz starting");
    let api = QuizEngineApi::new(cli.db).with_seed(cli.seed);
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Category { command } => run_category(command, &api),
        Command::Item { command } => run_item(command, &api),
        Command::Response { command } => run_response(command, &api),
        Command::Learner { command } => run_learner(command, &api),
        Command::Strategy { command } => run_strategy(command, &api),
        Command::Similarity { command } => run_similarity(command, &api),
    }
}

fn run_db(command: DbCommand, api: &QuizEngineApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit(&api.migrate(args.dry_run)?),
    }
}

fn run_category(command: CategoryCommand, api: &QuizEngineApi) -> Result<()> {
    match command {
        CategoryCommand::Add { name } => emit(&api.add_category(AddCategoryRequest { name })?),
        CategoryCommand::List => emit(&api.list_categories()?),
    }
}

fn run_item(command: ItemCommand, api: &QuizEngineApi) -> Result<()> {
    match command {
        ItemCommand::Add(args) => emit(&api.add_item(NewItem {
            media: args.media,
            correct_answer: args.answer,
            category_id: CategoryId(args.category),
        })?),
        ItemCommand::List { category } => emit(&api.list_items(category.map(CategoryId))?),
    }
}

fn run_response(command: ResponseCommand, api: &QuizEngineApi) -> Result<()> {
    match command {
        ResponseCommand::Record(args) => {
            let answered_at = args.at.as_deref().map(parse_rfc3339).transpose()?;
            emit(&api.record_results(RecordResultsRequest {
                learner_id: LearnerId(args.learner),
                results: args.results,
                answered_at,
            })?)
        }
    }
}

fn run_learner(command: LearnerCommand, api: &QuizEngineApi) -> Result<()> {
    match command {
        LearnerCommand::Stats { learner } => emit(&api.learner_stats(LearnerId(learner))?),
    }
}

/// Error outcomes are printed like completed ones; `status` tells them apart.
fn run_strategy(command: StrategyCommand, api: &QuizEngineApi) -> Result<()> {
    match command {
        StrategyCommand::List => emit(&api.list_strategies()),
        StrategyCommand::Run(args) => {
            let input = StrategyInput {
                learner_id: args.learner.map(LearnerId),
                category_id: args.category.map(CategoryId),
            };
            emit(&api.run_strategy(&args.name, input)?)
        }
    }
}

fn run_similarity(command: SimilarityCommand, api: &QuizEngineApi) -> Result<()> {
    match command {
        SimilarityCommand::Items { a, b } => emit(&api.item_similarity(ItemId(a), ItemId(b))?),
    }
}

fn parse_answer(value: &str) -> Result<AnswerResult> {
    let (item, verdict) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("expected <item-id>:correct|incorrect, got `{value}`"))?;
    let item_id = item.trim().parse::<i64>().with_context(|| format!("invalid item id: {item}"))?;
    let correct = match verdict.trim() {
        "correct" | "1" | "true" => true,
        "incorrect" | "0" | "false" => false,
        other => return Err(anyhow!("unknown verdict `{other}`; use correct or incorrect")),
    };
    Ok(AnswerResult { item_id: ItemId(item_id), correct })
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 UTC timestamp: {value}"))?;

    if parsed.offset() != time::UtcOffset::UTC {
        return Err(anyhow!("timestamp MUST use UTC offset Z (received: {value})"));
    }

    Ok(parsed)
}
