use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bigdata_bench::config::{self, DatabaseConfig};
use bigdata_bench::connection::DatabaseURL;
use bigdata_bench::coordinator::{self, RunSummary};
use bigdata_bench::executor::ExecutorConfig;
use bigdata_bench::results::ResultsStore;
use bigdata_bench::runner::{self, RunContext};
use bigdata_bench::template::QueryTemplate;
use bigdata_bench::timer::Timer;

/// Benchmark randomized SQL across databases and concurrency levels.
///
/// Results are appended to a CSV file consumed by the visualization layer.
#[derive(Parser)]
#[command(name = "bigdata-bench")]
struct Cli {
    /// Databases to benchmark; each name must match an entry in the
    /// configuration file.
    databases: Vec<String>,

    /// SQL LIKE pattern selecting the tables to benchmark.
    #[arg(short = 't', long, default_value = "%")]
    table_like: String,

    /// Upper bound for the {row} placeholder, i.e. the maximum number of
    /// rows a generated query asks for.
    #[arg(short = 'r', long, default_value_t = 10_000)]
    rows: u64,

    /// Benchmark iterations to perform per worker.
    #[arg(short = 'i', long, default_value_t = 1)]
    iterations: u32,

    /// Number of simulated concurrent users.
    #[arg(short = 'u', long, default_value_t = 1)]
    users: u32,

    /// Per-attempt query timeout in seconds; also the sentinel time recorded
    /// for failed queries.
    #[arg(long, default_value_t = 600)]
    timeout: u64,

    /// Attempts per query before recording a failure.
    #[arg(long, default_value_t = 6)]
    max_attempts: u32,

    /// Fixed delay between retry attempts, in milliseconds.
    #[arg(long, default_value_t = 0)]
    retry_delay_ms: u64,

    /// Database configuration file.
    #[arg(short = 'c', long, default_value = "config.json")]
    config: PathBuf,

    /// CSV file of query templates (database, query_id, name,
    /// query_template).
    #[arg(short = 'q', long, default_value = "queries/queries.csv")]
    queries: PathBuf,

    /// CSV file the benchmark results are appended to; created on first use.
    #[arg(long, default_value = "csv/big_data_benchmarking.csv")]
    results_file: PathBuf,
}

impl Cli {
    fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            timeout: Duration::from_secs(self.timeout),
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if cli.databases.is_empty() {
        warn!("no databases specified; nothing to do");
        return Ok(());
    }

    let configs = config::load(&cli.config)?;
    for database in &cli.databases {
        if !configs.contains_key(database) {
            bail!("no configuration found for database: {database}");
        }
    }
    if !cli.queries.exists() {
        bail!("queries file does not exist: {}", cli.queries.display());
    }
    let templates = QueryTemplate::load_csv(&cli.queries)?;
    info!(
        results_file = %cli.results_file.display(),
        templates = templates.len(),
        "loaded configuration"
    );

    let timer = Timer::start();
    let mut unclean = 0u32;
    for database in &cli.databases {
        info!(%database, "############ benchmarking ############");
        match run_database(database, &configs[database], &cli, &templates).await {
            Ok(Some(summary)) if !summary.is_clean() => {
                error!(
                    %database,
                    failed_workers = summary.failures.len(),
                    "benchmark finished with worker failures"
                );
                unclean += 1;
            }
            Ok(_) => {}
            Err(error) => {
                error!(%database, %error, "benchmark failed");
                unclean += 1;
            }
        }
    }
    info!(
        elapsed = format_args!("{:.3} sec", timer.elapsed_secs()),
        "finished benchmarking"
    );

    if unclean > 0 {
        bail!(
            "{unclean} of {} database runs reported failures",
            cli.databases.len()
        );
    }
    Ok(())
}

/// Runs one database's full benchmark: discover and describe tables, filter
/// the templates to this dialect, then fan out across the configured number
/// of simulated users.
async fn run_database(
    database: &str,
    attributes: &DatabaseConfig,
    cli: &Cli,
    templates: &[QueryTemplate],
) -> anyhow::Result<Option<RunSummary>> {
    let url: DatabaseURL = attributes.url.parse()?;
    info!(%database, dialect = %url.database_type(), "discovering tables");

    let mut conn = url.connect().await?;
    let tables =
        runner::discover_tables(&mut conn, &attributes.table_name_query, &cli.table_like).await?;
    if tables.is_empty() {
        warn!(%database, table_like = %cli.table_like, "no tables matched; skipping");
        return Ok(None);
    }
    let descriptors = runner::describe_tables(&mut conn, tables).await;
    drop(conn);
    if descriptors.is_empty() {
        warn!(%database, "no tables could be described; skipping");
        return Ok(None);
    }

    let queries: Vec<QueryTemplate> = templates
        .iter()
        .filter(|t| t.database == database)
        .cloned()
        .collect();
    if queries.is_empty() {
        warn!(%database, "no query templates for this database; skipping");
        return Ok(None);
    }

    let store = ResultsStore::open(&cli.results_file)?;
    let ctx = RunContext {
        database: database.to_owned(),
        tables: Arc::new(descriptors),
        queries: Arc::new(queries),
        datatypes_query: attributes.datatypes_query.clone(),
        max_rows: cli.rows,
        iterations: cli.iterations,
        concurrency_factor: cli.users,
        executor: cli.executor_config(),
    };

    let timer = Timer::start();
    let summary = coordinator::run_concurrent(ctx, url, store).await?;
    info!(
        %database,
        elapsed = format_args!("{:.3} sec", timer.elapsed_secs()),
        records = summary.records,
        successes = summary.successes,
        timeouts = summary.timeouts,
        errors = summary.errors,
        "benchmark complete"
    );
    Ok(Some(summary))
}
