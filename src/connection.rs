//! Connection plumbing shared by every component that talks to a target
//! database.
//!
//! A [`DatabaseURL`] is parsed from a connection string and opens a
//! [`DatabaseConnection`], an enum wrapper around either a MySQL or a
//! PostgreSQL connection. Benchmark code is written against the
//! [`QueryableConnection`] and [`Connector`] traits so that the execution and
//! retry logic can be exercised without a live database.

use std::fmt::{self, Display};
use std::str::FromStr;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use thiserror::Error;
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::warn;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("MySQL error: {0}")]
    MySQL(#[from] mysql_async::Error),

    #[error("PostgreSQL error: {0}")]
    PostgreSQL(#[from] tokio_postgres::Error),

    #[error("invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("unexpected result shape: {0}")]
    UnexpectedResult(String),
}

/// The SQL dialect family a connection string targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    MySQL,
    PostgreSQL,
}

impl Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseType::MySQL => f.write_str("mysql"),
            DatabaseType::PostgreSQL => f.write_str("postgresql"),
        }
    }
}

/// URL for a target database. Parsed once at startup; each worker clones it
/// and opens its own connections from it.
#[derive(Debug, Clone)]
pub enum DatabaseURL {
    MySQL(mysql_async::Opts),
    PostgreSQL(tokio_postgres::Config),
}

impl FromStr for DatabaseURL {
    type Err = DatabaseError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        if url.starts_with("mysql://") {
            Ok(Self::MySQL(
                mysql_async::Opts::from_url(url).map_err(mysql_async::Error::from)?,
            ))
        } else if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(Self::PostgreSQL(url.parse::<tokio_postgres::Config>()?))
        } else {
            Err(DatabaseError::InvalidUrl(
                "expected a mysql:// or postgresql:// scheme".to_owned(),
            ))
        }
    }
}

impl DatabaseURL {
    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabaseURL::MySQL(_) => DatabaseType::MySQL,
            DatabaseURL::PostgreSQL(_) => DatabaseType::PostgreSQL,
        }
    }

    pub async fn connect(&self) -> Result<DatabaseConnection, DatabaseError> {
        match self {
            DatabaseURL::MySQL(opts) => Ok(DatabaseConnection::MySQL(
                mysql_async::Conn::new(opts.clone()).await?,
            )),
            DatabaseURL::PostgreSQL(config) => {
                let (client, connection) = config.connect(NoTls).await?;
                // The connection task drives the socket; it terminates when
                // the client half is dropped.
                let handle = tokio::spawn(async move {
                    if let Err(error) = connection.await {
                        warn!(%error, "PostgreSQL connection exited with error");
                    }
                });
                Ok(DatabaseConnection::PostgreSQL(client, handle))
            }
        }
    }
}

/// An enum wrapper around either a MySQL or PostgreSQL connection.
pub enum DatabaseConnection {
    MySQL(mysql_async::Conn),
    PostgreSQL(tokio_postgres::Client, tokio::task::JoinHandle<()>),
}

/// The two query shapes the benchmark needs: row counting for timed
/// benchmark statements, and text rows for catalog introspection. Everything
/// goes over the text protocol so arbitrary tables can be queried without
/// knowing their types.
#[async_trait]
pub trait QueryableConnection: Send {
    /// Runs `sql` and returns the number of rows it produced.
    async fn query_row_count(&mut self, sql: &str) -> Result<u64, DatabaseError>;

    /// Runs `sql` and returns every value rendered as text. NULL becomes the
    /// empty string.
    async fn query_text(&mut self, sql: &str) -> Result<Vec<Vec<String>>, DatabaseError>;
}

#[async_trait]
impl QueryableConnection for DatabaseConnection {
    async fn query_row_count(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        match self {
            DatabaseConnection::MySQL(conn) => {
                let rows: Vec<mysql_async::Row> = conn.query(sql).await?;
                Ok(rows.len() as u64)
            }
            DatabaseConnection::PostgreSQL(client, _) => {
                let messages = client.simple_query(sql).await?;
                Ok(messages
                    .iter()
                    .filter(|m| matches!(m, SimpleQueryMessage::Row(_)))
                    .count() as u64)
            }
        }
    }

    async fn query_text(&mut self, sql: &str) -> Result<Vec<Vec<String>>, DatabaseError> {
        match self {
            DatabaseConnection::MySQL(conn) => {
                let rows: Vec<mysql_async::Row> = conn.query(sql).await?;
                Ok(rows
                    .iter()
                    .map(|row| {
                        (0..row.len())
                            .map(|i| mysql_value_to_text(row.as_ref(i)))
                            .collect()
                    })
                    .collect())
            }
            DatabaseConnection::PostgreSQL(client, _) => {
                let mut out = Vec::new();
                for message in client.simple_query(sql).await? {
                    if let SimpleQueryMessage::Row(row) = message {
                        out.push(
                            (0..row.len())
                                .map(|i| row.get(i).unwrap_or_default().to_owned())
                                .collect(),
                        );
                    }
                }
                Ok(out)
            }
        }
    }
}

fn mysql_value_to_text(value: Option<&mysql_async::Value>) -> String {
    use mysql_async::Value;
    match value {
        None | Some(Value::NULL) => String::new(),
        Some(Value::Bytes(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
        Some(other) => other.as_sql(true),
    }
}

/// A source of fresh connections. Each worker owns one connector; the
/// executor discards and reopens connections through it after failed
/// attempts.
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: QueryableConnection + 'static;

    async fn connect(&self) -> Result<Self::Conn, DatabaseError>;
}

#[async_trait]
impl Connector for DatabaseURL {
    type Conn = DatabaseConnection;

    async fn connect(&self) -> Result<DatabaseConnection, DatabaseError> {
        DatabaseURL::connect(self).await
    }
}
