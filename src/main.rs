use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tgcp_rows::config::{Config, OutputFormat};
use tgcp_rows::gcp::client::GcpClient;
use tgcp_rows::query::{self, QueryContext, QueryResult};
use tgcp_rows::resource::{get_registry, get_table, TableSchema};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Query GCP resources as flat, typed rows
#[derive(Parser, Debug)]
#[command(name = "tgcp-rows", version = tgcp_rows::VERSION, about, long_about = None)]
struct Args {
    /// GCP project to use
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// GCP zone to use ("all" for every zone)
    #[arg(short, long, global = true)]
    zone: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available tables
    Tables,
    /// Show the columns of a table
    Describe { table: String },
    /// Fetch the rows of a table
    Query {
        table: String,

        /// Equality qualifier, e.g. -q name=my-vm (repeatable)
        #[arg(short = 'q', long = "qual", value_name = "COLUMN=VALUE")]
        qualifiers: Vec<String>,

        /// Output format (defaults to the configured one)
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter = std::env::var("RUST_LOG").ok().map(EnvFilter::new);
    let tracing_level = match (level.to_tracing_level(), &env_filter) {
        (Some(level), _) => level,
        (None, Some(_)) => Level::TRACE,
        (None, None) => return Ok(None),
    };

    let log_path = get_log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let builder = tracing_subscriber::fmt()
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    // RUST_LOG wins over --log-level when set
    match env_filter {
        Some(filter) => builder.with_env_filter(filter).init(),
        None => builder.with_max_level(tracing_level).init(),
    }

    tracing::info!("tgcp-rows started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("tgcp-rows").join("tgcp-rows.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".tgcp-rows").join("tgcp-rows.log");
    }
    PathBuf::from("tgcp-rows.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = setup_logging(args.log_level)?;

    // Fail fast on broken table definitions
    let registry = get_registry()?;
    tracing::info!("Loaded {} tables", registry.len());

    match &args.command {
        Command::Tables => {
            for table in registry.tables() {
                println!("{:<28} {}", table.name, table.description);
            }
            Ok(())
        },
        Command::Describe { table } => {
            describe(get_table(table)?);
            Ok(())
        },
        Command::Query {
            table,
            qualifiers,
            output,
        } => run_query(&args, table, qualifiers, *output).await,
    }
}

fn describe(table: &TableSchema) {
    println!("{}", table.name);
    if !table.description.is_empty() {
        println!("  {}", table.description);
    }
    if !table.key_columns.is_empty() {
        println!("  key columns: {}", table.key_columns.join(", "));
    }
    println!();
    for column in table.columns() {
        println!(
            "  {:<28} {:<10} {:<36} {}",
            column.name,
            column.column_type.to_string(),
            column.source.to_string(),
            column.description
        );
    }
}

/// Parse `column=value` qualifiers, typed by the column they target
fn parse_qualifiers(table: &TableSchema, raw: &[String]) -> Result<HashMap<String, Value>> {
    let mut qualifiers = HashMap::new();
    for qual in raw {
        let Some((name, value)) = qual.split_once('=') else {
            bail!("Invalid qualifier '{}', expected COLUMN=VALUE", qual);
        };
        let name = name.trim();
        let Some(column) = table.column(name) else {
            bail!("Table {} has no column '{}'", table.name, name);
        };
        let value = column
            .column_type
            .coerce(Value::String(value.to_string()))
            .with_context(|| format!("Invalid qualifier value for '{}'", name))?;
        qualifiers.insert(name.to_string(), value);
    }
    Ok(qualifiers)
}

async fn run_query(
    args: &Args,
    table_name: &str,
    raw_qualifiers: &[String],
    output: Option<OutputFormat>,
) -> Result<()> {
    let config = Config::load();
    let table = get_table(table_name)?;
    let qualifiers = parse_qualifiers(table, raw_qualifiers)?;

    let Some(project) = args.project.clone().or_else(|| config.effective_project()) else {
        bail!("No GCP project configured. Set GOOGLE_CLOUD_PROJECT or use --project flag");
    };
    let zone = args.zone.clone().unwrap_or_else(|| config.effective_zone());
    tracing::info!("Using project: {}, zone: {}", project, zone);

    let client = GcpClient::new(&project, &zone).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling query");
            on_interrupt.cancel();
        }
    });

    let ctx = QueryContext::new(&table.name, qualifiers, config.query_settings(), cancel);
    let mut result = query::execute(&client, table, &ctx).await?;
    // Qualifiers are equality predicates: drop rows the operation could not
    // filter upstream
    result.rows.retain(|row| row.matches(ctx.qualifiers()));

    print_result(table, &result, output.unwrap_or(config.output))?;

    for row in &result.rows {
        for err in &row.errors {
            eprintln!("warning: {}", err.message);
        }
    }
    for err in &result.dropped {
        eprintln!("warning: row dropped: {}", err.message);
    }
    Ok(())
}

fn print_result(table: &TableSchema, result: &QueryResult, format: OutputFormat) -> Result<()> {
    let rows: Vec<Map<String, Value>> = result.rows.iter().map(|r| r.to_map()).collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&rows)?),
        OutputFormat::Table => print_table(table, result),
    }
    Ok(())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_table(table: &TableSchema, result: &QueryResult) {
    let headers: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.cells.iter().map(|(_, v)| display_value(v)).collect())
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .filter_map(|row| row.get(i))
                .map(|c| c.chars().count())
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: Vec<&str>| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
    };

    println!("{}", line(headers.clone()));
    for row in &cells {
        println!("{}", line(row.iter().map(|s| s.as_str()).collect()));
    }
    println!("\n{} rows", result.rows.len());
}
