mod config;
mod logging;
mod model_file;

use std::path::PathBuf;
use std::sync::Arc;

use cascadia_core::{
    DependencyEdges, Error as CoreError, build_dependency_report, model_json_schema,
};
use cascadia_engine::{
    Session, StatementGenerator, Strategy, StrategyChoice, SyncOptions, plan_schema,
};
use cascadia_store::{Dialect, PostgresStore, Store, render};
use clap::{Args, Parser, Subcommand, ValueEnum};
use config::{CliConfig, LogFormat};
use logging::init_logging;
use model_file::load_model;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum CliError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("logging error: {0}")]
    Logging(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Parser, Debug)]
#[command(name = "cascadia", version, about = "Constraint-aware schema tooling")]
struct Cli {
    /// Configuration file (defaults to ./cascadia.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter directive, overrides [log].level.
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Log output format, overrides [log].format.
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a model file and summarize it.
    Check(ModelArgs),
    /// Print the dependency order of a model's entity types.
    Graph(GraphArgs),
    /// Print the DDL that creates a model's schema.
    Ddl(DdlArgs),
    /// Print the JSON Schema for model files.
    Schema,
    /// Create a model's tables in PostgreSQL.
    Sync(SyncArgs),
    /// Drop a model's tables from PostgreSQL, children first.
    Drop(StoreArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Model definition (.toml or .json).
    model: PathBuf,
}

#[derive(Args, Debug)]
struct GraphArgs {
    #[command(flatten)]
    model: ModelArgs,
    /// Which associations count as dependencies.
    #[arg(long, value_enum, default_value_t = EdgesArg::Constrained)]
    edges: EdgesArg,
}

#[derive(Args, Debug)]
struct DdlArgs {
    #[command(flatten)]
    model: ModelArgs,
    #[arg(long, value_enum, default_value_t = StrategyArg::Native)]
    strategy: StrategyArg,
    #[arg(long, value_enum, default_value_t = DialectArg::Postgres)]
    dialect: DialectArg,
}

#[derive(Args, Debug)]
struct StoreArgs {
    #[command(flatten)]
    model: ModelArgs,
    /// PostgreSQL connection string, overrides [store].url.
    #[arg(long, value_name = "CONNECTION_STRING")]
    url: Option<String>,
    /// Enforcement strategy, overrides [store].strategy.
    #[arg(long)]
    strategy: Option<StrategyChoice>,
}

#[derive(Args, Debug)]
struct SyncArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Drop and re-create every table.
    #[arg(long, default_value_t = false)]
    force: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EdgesArg {
    All,
    Constrained,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Native,
    Emulated,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DialectArg {
    Postgres,
    Generic,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    init_logging(&config.log)?;

    match cli.command {
        Command::Check(args) => run_check(args),
        Command::Graph(args) => run_graph(args),
        Command::Ddl(args) => run_ddl(args),
        Command::Schema => print_json(&model_json_schema()),
        Command::Sync(args) => run_sync(args, &config).await,
        Command::Drop(args) => run_drop(args, &config).await,
    }
}

fn run_check(args: ModelArgs) -> Result<(), CliError> {
    let model = load_model(&args.model)?;
    let registry = model.into_registry()?;
    let constrained = build_dependency_report(&registry, DependencyEdges::Constrained);
    let constrained_associations = registry
        .associations()
        .iter()
        .filter(|assoc| assoc.is_constrained())
        .count();

    tracing::info!(event = "model_checked", path = %args.model.display());
    print_json(&serde_json::json!({
        "entities": constrained.summary.nodes,
        "associations": registry.associations().len(),
        "constrained_associations": constrained_associations,
        "constraint_cycle": constrained.cycle,
    }))
}

fn run_graph(args: GraphArgs) -> Result<(), CliError> {
    let registry = load_model(&args.model.model)?.into_registry()?;
    let edges = match args.edges {
        EdgesArg::All => DependencyEdges::All,
        EdgesArg::Constrained => DependencyEdges::Constrained,
    };
    print_json(&build_dependency_report(&registry, edges))
}

fn run_ddl(args: DdlArgs) -> Result<(), CliError> {
    let registry = load_model(&args.model.model)?.into_registry()?;
    let strategy = match args.strategy {
        StrategyArg::Native => Strategy::Native,
        StrategyArg::Emulated => Strategy::Emulated,
    };
    let dialect = match args.dialect {
        DialectArg::Postgres => Dialect::Postgres,
        DialectArg::Generic => Dialect::Generic,
    };

    for statement in plan_schema(&registry, StatementGenerator::new(strategy))? {
        println!("{};", render(&statement, dialect).sql);
    }
    Ok(())
}

async fn open_session(args: &StoreArgs, config: &CliConfig) -> Result<Session, CliError> {
    let model = load_model(&args.model.model)?;
    let url = config.store.resolve_url(args.url.clone())?;
    let mut session_config = config.store.session_config();
    if let Some(strategy) = args.strategy {
        session_config = session_config.with_strategy(strategy);
    }

    let store: Arc<dyn Store> =
        Arc::new(PostgresStore::connect(&url, config.store.max_connections).await?);
    tracing::info!(event = "store_connected", engine = store.engine());
    Ok(Session::from_definition(store, session_config, &model)?)
}

async fn run_sync(args: SyncArgs, config: &CliConfig) -> Result<(), CliError> {
    let session = open_session(&args.store, config).await?;
    let options = SyncOptions { force: args.force };
    let reports = session.sync_all(options).await?;
    tracing::info!(event = "sync_finished", tables = reports.len());
    print_json(&reports)
}

async fn run_drop(args: StoreArgs, config: &CliConfig) -> Result<(), CliError> {
    let session = open_session(&args, config).await?;
    session.drop_all().await?;
    tracing::info!(event = "drop_finished");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
