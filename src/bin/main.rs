//! Quarry CLI - compile and run analytic queries
//!
//! Usage:
//!   quarry explain --model <model.toml> --query <query.json> [--dialect <dialect>]
//!   quarry run --config <quarry.toml> --model <model.toml> --query <query.json>
//!   quarry validate --model <model.toml>
//!   quarry list --model <model.toml>
//!
//! Examples:
//!   quarry explain --model demos/players.toml --query demos/top_ratings.json --dialect tsql
//!   RUST_LOG=quarry=debug quarry run --config quarry.toml --model demos/players.toml --query q.json

use clap::{Parser, Subcommand, ValueEnum};
use quarry::config::Settings;
use quarry::engine::Engine;
use quarry::metadata::{ColumnKind, MetadataModel, DEFAULT_MAX_RESOLUTION_DEPTH};
use quarry::query::{QueryBuilder, QueryRequest};
use quarry::sql::Dialect;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Quarry - compile analytic queries over a metadata model to SQL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SQL a query compiles to
    Explain {
        /// Path to the metadata model (TOML)
        #[arg(short, long)]
        model: PathBuf,

        /// Path to the query request (JSON)
        #[arg(short, long)]
        query: PathBuf,

        /// SQL dialect to generate
        #[arg(short, long, default_value = "duckdb")]
        dialect: DialectArg,

        /// Output format
        #[arg(short, long, default_value = "sql")]
        output: OutputFormat,
    },

    /// Execute a query and print its rows as JSON
    Run {
        /// Path to the settings file
        #[arg(short, long, default_value = "quarry.toml")]
        config: PathBuf,

        /// Path to the metadata model (TOML)
        #[arg(short, long)]
        model: PathBuf,

        /// Path to the query request (JSON)
        #[arg(short, long)]
        query: PathBuf,
    },

    /// Validate a metadata model without compiling anything
    Validate {
        /// Path to the metadata model (TOML)
        #[arg(short, long)]
        model: PathBuf,
    },

    /// List the tables and columns of a metadata model
    List {
        /// Path to the metadata model (TOML)
        #[arg(short, long)]
        model: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum DialectArg {
    Duckdb,
    Postgres,
    Mysql,
    Tsql,
    Snowflake,
    Sqlite,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Duckdb => Dialect::DuckDb,
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Snowflake => Dialect::Snowflake,
            DialectArg::Sqlite => Dialect::Sqlite,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Output SQL only
    Sql,
    /// Output SQL with parameters and shape comments
    Verbose,
    /// Output the compiled query as JSON
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Explain {
            model,
            query,
            dialect,
            output,
        } => cmd_explain(&model, &query, dialect.into(), output),
        Commands::Run {
            config,
            model,
            query,
        } => cmd_run(&config, &model, &query).await,
        Commands::Validate { model } => cmd_validate(&model),
        Commands::List { model } => cmd_list(&model),
    }
}

fn read(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(s) => Some(s),
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            None
        }
    }
}

fn load_model(path: &Path) -> Option<MetadataModel> {
    load_model_with_depth(path, DEFAULT_MAX_RESOLUTION_DEPTH)
}

fn load_model_with_depth(path: &Path, max_depth: usize) -> Option<MetadataModel> {
    let source = read(path)?;
    match MetadataModel::from_toml_str_with_depth(&source, max_depth) {
        Ok(model) => Some(model),
        Err(e) => {
            eprintln!("Invalid model '{}': {}", path.display(), e);
            None
        }
    }
}

fn load_request(path: &Path) -> Option<QueryRequest> {
    let source = read(path)?;
    match QueryRequest::from_json(&source) {
        Ok(request) => Some(request),
        Err(e) => {
            eprintln!("Invalid query '{}': {}", path.display(), e);
            None
        }
    }
}

fn cmd_explain(model: &Path, query: &Path, dialect: Dialect, output: OutputFormat) -> ExitCode {
    let (Some(model), Some(request)) = (load_model(model), load_request(query)) else {
        return ExitCode::FAILURE;
    };

    let compiled = QueryBuilder::from(request)
        .build(&model)
        .and_then(|q| quarry::generator::SqlGenerator::new(&model, dialect).compile(&q));

    match compiled {
        Ok(compiled) => {
            match output {
                OutputFormat::Sql => {
                    println!("{};", compiled.main.sql);
                    if let Some(count) = &compiled.count {
                        println!();
                        println!("{};", count.sql);
                    }
                }
                OutputFormat::Verbose => {
                    println!("-- Quarry Compiled SQL");
                    println!("-- Dialect: {}", compiled.dialect);
                    println!("-- Data source: {}", compiled.data_source);
                    println!(
                        "-- Shape: {}",
                        if compiled.nested { "nested" } else { "single pass" }
                    );
                    for (i, param) in compiled.main.params.iter().enumerate() {
                        println!("-- ${} = {}", i + 1, param);
                    }
                    println!();
                    println!("{};", compiled.main.sql);
                    if let Some(count) = &compiled.count {
                        println!();
                        println!("-- Count");
                        println!("{};", count.sql);
                    }
                }
                OutputFormat::Json => match serde_json::to_string_pretty(&compiled) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("Serialization error: {}", e);
                        return ExitCode::FAILURE;
                    }
                },
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn cmd_run(config: &Path, model: &Path, query: &Path) -> ExitCode {
    let settings = match Settings::from_file(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let depth = settings.compiler.max_resolution_depth;
    let (Some(model), Some(request)) = (load_model_with_depth(model, depth), load_request(query))
    else {
        return ExitCode::FAILURE;
    };
    let model = Arc::new(model);

    let engine = match Engine::from_settings(model, &settings) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Engine error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let query = match QueryBuilder::from(request).build(engine.model()) {
        Ok(q) => q,
        Err(e) => {
            eprintln!("Query error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match engine.execute(&query).await {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Serialization error: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Execution error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_validate(model: &Path) -> ExitCode {
    match load_model(model) {
        Some(m) => {
            println!(
                "OK: {} is valid ({} tables)",
                model.display(),
                m.tables().len()
            );
            ExitCode::SUCCESS
        }
        None => ExitCode::FAILURE,
    }
}

fn cmd_list(path: &Path) -> ExitCode {
    let Some(model) = load_model(path) else {
        return ExitCode::FAILURE;
    };

    println!("File: {}", path.display());
    for table in model.tables() {
        println!();
        println!("{} (data source: {})", table.name, table.data_source);
        for column in &table.columns {
            let kind = match &column.kind {
                ColumnKind::Metric { .. } => "metric",
                ColumnKind::Dimension => "dimension",
                ColumnKind::TimeDimension { .. } => "time dimension",
            };
            println!("  - {} ({})", column.name, kind);
        }
        for join in &table.joins {
            println!("  -> {} ({})", join.name, join.table);
        }
    }

    ExitCode::SUCCESS
}
