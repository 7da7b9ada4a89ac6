//! The per-worker benchmark loop.
//!
//! Each worker runs `iterations` full passes over every (table, query)
//! combination: fetch the table's column metadata fresh, build a randomized
//! query from each template, execute it under the configured bounds, and
//! record exactly one result per attempt. A batch of results is sent to the
//! coordinator's writer task at the end of every iteration.

use std::fmt::{self, Display};
use std::sync::Arc;

use anyhow::anyhow;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::builder::{quote_ident, ColumnMetadata, QueryBuilder};
use crate::connection::{Connector, DatabaseError, QueryableConnection};
use crate::executor::{ExecutorConfig, QueryExecutor, QueryOutcome};
use crate::results::{ResultRecord, ERROR_SENTINEL, TIMEOUT_SENTINEL};
use crate::template::QueryTemplate;

/// Coarse size bucket derived from a table's row count. Buckets follow the
/// bins [0, 1e5, 1e6, 1e7, 1e9), right-closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SizeCategory {
    Small,
    Medium,
    Large,
    #[serde(rename = "X-Large")]
    XLarge,
}

impl SizeCategory {
    pub fn from_row_count(rows: u64) -> Self {
        match rows {
            0..=100_000 => SizeCategory::Small,
            100_001..=1_000_000 => SizeCategory::Medium,
            1_000_001..=10_000_000 => SizeCategory::Large,
            _ => SizeCategory::XLarge,
        }
    }
}

impl Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeCategory::Small => f.write_str("Small"),
            SizeCategory::Medium => f.write_str("Medium"),
            SizeCategory::Large => f.write_str("Large"),
            SizeCategory::XLarge => f.write_str("X-Large"),
        }
    }
}

/// A table under benchmark. Computed once per database run and shared
/// read-only by every worker.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub table_name: String,
    pub table_row_count: u64,
    pub table_size_category: SizeCategory,
}

impl TableDescriptor {
    pub fn new(table_name: impl Into<String>, table_row_count: u64) -> Self {
        Self {
            table_name: table_name.into(),
            table_row_count,
            table_size_category: SizeCategory::from_row_count(table_row_count),
        }
    }
}

/// Discovers table names via the dialect's `table_name_query`, which embeds
/// the caller's SQL `LIKE` pattern at `{table_like}`.
pub async fn discover_tables(
    conn: &mut impl QueryableConnection,
    table_name_query: &str,
    table_like: &str,
) -> Result<Vec<String>, DatabaseError> {
    let sql = table_name_query.replace("{table_like}", table_like);
    debug!(%sql, "discovering tables");
    let mut names: Vec<String> = conn
        .query_text(&sql)
        .await?
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    Ok(names)
}

/// Counts and buckets each table. A table that cannot be counted (dropped
/// mid-run, permissions) is skipped with a warning.
pub async fn describe_tables(
    conn: &mut impl QueryableConnection,
    tables: Vec<String>,
) -> Vec<TableDescriptor> {
    let mut descriptors = Vec::with_capacity(tables.len());
    for table_name in tables {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&table_name));
        match fetch_count(conn, &sql).await {
            Ok(count) => {
                let descriptor = TableDescriptor::new(table_name, count);
                info!(
                    table = %descriptor.table_name,
                    rows = descriptor.table_row_count,
                    category = %descriptor.table_size_category,
                    "described table"
                );
                descriptors.push(descriptor);
            }
            Err(error) => {
                warn!(table = %table_name, %error, "failed to count rows; skipping table");
            }
        }
    }
    descriptors
}

async fn fetch_count(
    conn: &mut impl QueryableConnection,
    sql: &str,
) -> Result<u64, DatabaseError> {
    conn.query_text(sql)
        .await?
        .first()
        .and_then(|row| row.first())
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| DatabaseError::UnexpectedResult(format!("no scalar count from: {sql}")))
}

/// Read-only inputs shared by every worker of one database run.
#[derive(Clone)]
pub struct RunContext {
    pub database: String,
    pub tables: Arc<Vec<TableDescriptor>>,
    pub queries: Arc<Vec<QueryTemplate>>,
    /// Introspection statement with a `{table_name}` slot, returning
    /// (column_name, data_type) rows.
    pub datatypes_query: String,
    /// Upper bound for the `{row}` placeholder.
    pub max_rows: u64,
    pub iterations: u32,
    /// Number of simulated concurrent users; tagged onto every record.
    pub concurrency_factor: u32,
    pub executor: ExecutorConfig,
}

/// One simulated user: runs the full iteration loop independently of its
/// siblings, over its own connections.
pub struct BenchmarkRunner<C: Connector> {
    worker: u32,
    ctx: RunContext,
    connector: C,
    sender: UnboundedSender<Vec<ResultRecord>>,
    rng: StdRng,
}

impl<C: Connector + Clone> BenchmarkRunner<C> {
    pub fn new(
        worker: u32,
        ctx: RunContext,
        connector: C,
        sender: UnboundedSender<Vec<ResultRecord>>,
    ) -> Self {
        Self {
            worker,
            ctx,
            connector,
            sender,
            rng: StdRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut executor = QueryExecutor::new(self.connector.clone(), self.ctx.executor);
        let tables = Arc::clone(&self.ctx.tables);
        let queries = Arc::clone(&self.ctx.queries);
        for iteration in 1..=self.ctx.iterations {
            info!(
                worker = self.worker,
                iteration,
                database = %self.ctx.database,
                "============ starting iteration ============"
            );
            let mut batch = Vec::new();
            for table in tables.iter() {
                let columns = match self.fetch_columns(&table.table_name).await {
                    Ok(columns) => columns,
                    Err(error) => {
                        warn!(
                            worker = self.worker,
                            iteration,
                            table = %table.table_name,
                            %error,
                            "failed to fetch column metadata; skipping table"
                        );
                        continue;
                    }
                };
                let builder = QueryBuilder::new(&table.table_name, &columns, self.ctx.max_rows);
                for query in queries.iter() {
                    batch.push(
                        self.run_query(&mut executor, &builder, table, query, iteration)
                            .await,
                    );
                }
            }
            self.sender
                .send(batch)
                .map_err(|_| anyhow!("results writer hung up"))?;
        }
        Ok(())
    }

    /// Builds and executes one query; failures of any kind become a sentinel
    /// record rather than aborting the iteration.
    async fn run_query(
        &mut self,
        executor: &mut QueryExecutor<C>,
        builder: &QueryBuilder,
        table: &TableDescriptor,
        query: &QueryTemplate,
        iteration: u32,
    ) -> ResultRecord {
        let sql = match self.resolve(builder, query) {
            Ok(sql) => sql,
            Err(error) => {
                warn!(
                    worker = self.worker,
                    iteration,
                    table = %table.table_name,
                    query_id = query.query_id,
                    %error,
                    "failed to build query"
                );
                return self.record(table, query, iteration, &QueryOutcome::Error, None);
            }
        };
        debug!(worker = self.worker, %sql);
        let outcome = executor.execute(&sql).await;
        match &outcome {
            QueryOutcome::Success { elapsed, .. } => info!(
                worker = self.worker,
                iteration,
                query_id = query.query_id,
                time = format_args!("{:.6} sec", elapsed.as_secs_f64()),
                "query completed"
            ),
            QueryOutcome::Timeout => warn!(
                worker = self.worker,
                iteration,
                table = %table.table_name,
                query_id = query.query_id,
                "query timed out"
            ),
            QueryOutcome::Error => warn!(
                worker = self.worker,
                iteration,
                table = %table.table_name,
                query_id = query.query_id,
                "query failed"
            ),
        }
        self.record(table, query, iteration, &outcome, Some(sql))
    }

    fn resolve(&mut self, builder: &QueryBuilder, query: &QueryTemplate) -> anyhow::Result<String> {
        let values = builder.build(query.placeholders(), &mut self.rng)?;
        Ok(query.render(&values)?)
    }

    fn record(
        &self,
        table: &TableDescriptor,
        query: &QueryTemplate,
        iteration: u32,
        outcome: &QueryOutcome,
        sql: Option<String>,
    ) -> ResultRecord {
        let query_executed = match outcome {
            QueryOutcome::Success { .. } => {
                sql.unwrap_or_else(|| ERROR_SENTINEL.to_owned())
            }
            QueryOutcome::Timeout => TIMEOUT_SENTINEL.to_owned(),
            QueryOutcome::Error => ERROR_SENTINEL.to_owned(),
        };
        ResultRecord {
            database: self.ctx.database.clone(),
            query_id: query.query_id,
            name: query.name.clone(),
            query_executed,
            rows: outcome.rows(),
            time: outcome.elapsed_secs(self.ctx.executor.timeout),
            iteration,
            concurrency_factor: self.ctx.concurrency_factor,
            table_name: table.table_name.clone(),
            table_row_count: table.table_row_count,
            table_size_category: table.table_size_category,
        }
    }

    /// Metadata is fetched on a fresh connection each time; dialect catalogs
    /// are cheap to query and may change between iterations.
    async fn fetch_columns(&self, table_name: &str) -> Result<Vec<ColumnMetadata>, DatabaseError> {
        let mut conn = self.connector.connect().await?;
        let sql = self.ctx.datatypes_query.replace("{table_name}", table_name);
        let columns: Vec<ColumnMetadata> = conn
            .query_text(&sql)
            .await?
            .into_iter()
            .filter_map(|row| {
                let mut values = row.into_iter();
                match (values.next(), values.next()) {
                    (Some(column_name), Some(data_type)) => {
                        Some(ColumnMetadata::new(column_name, data_type))
                    }
                    _ => None,
                }
            })
            .collect();
        if columns.is_empty() {
            return Err(DatabaseError::UnexpectedResult(format!(
                "no columns reported for table {table_name}"
            )));
        }
        Ok(columns)
    }
}
