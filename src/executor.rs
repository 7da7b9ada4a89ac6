//! Bounded query execution: one SQL statement, a timeout ceiling, and a
//! retry ceiling.
//!
//! A timed-out or errored attempt leaves the connection in an unknown state,
//! so the executor discards it and opens a fresh one before the next attempt.
//! Whatever happens, the caller always receives a terminal [`QueryOutcome`];
//! driver faults never escape.

use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::connection::{Connector, QueryableConnection};
use crate::timer::Timer;

/// Bounds applied to every query execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Ceiling for a single attempt; also the sentinel time recorded for
    /// failed queries.
    pub timeout: Duration,
    /// Total attempts before giving up.
    pub max_attempts: u32,
    /// Fixed delay between attempts. No backoff.
    pub retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            max_attempts: 6,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Terminal outcome of one bounded query execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Success { rows: u64, elapsed: Duration },
    Timeout,
    Error,
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, QueryOutcome::Success { .. })
    }

    /// Rows returned, with the failure sentinel of zero.
    pub fn rows(&self) -> u64 {
        match self {
            QueryOutcome::Success { rows, .. } => *rows,
            _ => 0,
        }
    }

    /// Elapsed seconds, with the configured ceiling as the failure sentinel.
    pub fn elapsed_secs(&self, ceiling: Duration) -> f64 {
        match self {
            QueryOutcome::Success { elapsed, .. } => elapsed.as_secs_f64(),
            _ => ceiling.as_secs_f64(),
        }
    }
}

enum FailureKind {
    TimedOut,
    Errored,
}

/// Executes statements over connections drawn from a [`Connector`]. A healthy
/// connection is kept and reused across queries; any failed attempt discards
/// it.
pub struct QueryExecutor<C: Connector> {
    connector: C,
    config: ExecutorConfig,
    conn: Option<C::Conn>,
}

impl<C: Connector> QueryExecutor<C> {
    pub fn new(connector: C, config: ExecutorConfig) -> Self {
        Self {
            connector,
            config,
            conn: None,
        }
    }

    /// Runs `sql`, retrying up to `max_attempts` times on timeout or error.
    pub async fn execute(&mut self, sql: &str) -> QueryOutcome {
        let mut last_failure = FailureKind::Errored;
        for attempt in 1..=self.config.max_attempts.max(1) {
            if attempt > 1 && !self.config.retry_delay.is_zero() {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            let mut conn = match self.conn.take() {
                Some(conn) => conn,
                None => match self.connector.connect().await {
                    Ok(conn) => conn,
                    Err(error) => {
                        warn!(%error, attempt, "failed to open connection");
                        last_failure = FailureKind::Errored;
                        continue;
                    }
                },
            };
            let timer = Timer::start();
            match timeout(self.config.timeout, conn.query_row_count(sql)).await {
                Ok(Ok(rows)) => {
                    self.conn = Some(conn);
                    return QueryOutcome::Success {
                        rows,
                        elapsed: timer.elapsed(),
                    };
                }
                Ok(Err(error)) => {
                    warn!(%error, attempt, "query attempt failed");
                    last_failure = FailureKind::Errored;
                }
                Err(_) => {
                    warn!(
                        attempt,
                        timeout_secs = self.config.timeout.as_secs_f64(),
                        "query attempt timed out; discarding connection"
                    );
                    last_failure = FailureKind::TimedOut;
                }
            }
            // The connection's state is unknown after a failed attempt.
            drop(conn);
        }
        match last_failure {
            FailureKind::TimedOut => QueryOutcome::Timeout,
            FailureKind::Errored => QueryOutcome::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::testing::{FakeConnector, FakeResponse};

    fn config(timeout_secs: u64, max_attempts: u32) -> ExecutorConfig {
        ExecutorConfig {
            timeout: Duration::from_secs(timeout_secs),
            max_attempts,
            retry_delay: Duration::ZERO,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_query_times_out_and_discards_connection() {
        // Query simulated to hang 5s against a 2s ceiling.
        let connector =
            FakeConnector::new(|_| FakeResponse::Hang(Duration::from_secs(5)));
        let mut executor = QueryExecutor::new(connector.clone(), config(2, 3));

        let outcome = executor.execute("SELECT * FROM slow").await;
        assert_eq!(outcome, QueryOutcome::Timeout);
        assert_eq!(outcome.rows(), 0);
        assert_eq!(outcome.elapsed_secs(Duration::from_secs(2)), 2.0);
        // Every attempt opened a fresh connection; none were reused.
        assert_eq!(connector.connects(), 3);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connector = FakeConnector::new({
            let calls = Arc::clone(&calls);
            move |_| {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    FakeResponse::Fail("transient".to_owned())
                } else {
                    FakeResponse::Rows(7)
                }
            }
        });
        let mut executor = QueryExecutor::new(connector.clone(), config(10, 6));

        let outcome = executor.execute("SELECT * FROM flaky").await;
        assert!(outcome.is_success());
        assert_eq!(outcome.rows(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(connector.connects(), 3);
    }

    #[tokio::test]
    async fn exhausted_errors_return_error_outcome() {
        let connector = FakeConnector::new(|_| FakeResponse::Fail("boom".to_owned()));
        let mut executor = QueryExecutor::new(connector.clone(), config(10, 4));

        let outcome = executor.execute("SELECT * FROM broken").await;
        assert_eq!(outcome, QueryOutcome::Error);
        assert_eq!(outcome.rows(), 0);
        assert_eq!(outcome.elapsed_secs(Duration::from_secs(10)), 10.0);
        assert_eq!(connector.connects(), 4);
    }

    #[tokio::test]
    async fn healthy_connection_is_reused_across_queries() {
        let connector = FakeConnector::new(|_| FakeResponse::Rows(1));
        let mut executor = QueryExecutor::new(connector.clone(), config(10, 3));

        assert!(executor.execute("SELECT 1").await.is_success());
        assert!(executor.execute("SELECT 2").await.is_success());
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn connect_failures_consume_attempts() {
        let connector =
            FakeConnector::new(|_| FakeResponse::Rows(1)).failing_connects(5);
        let mut executor = QueryExecutor::new(connector.clone(), config(10, 5));

        let outcome = executor.execute("SELECT 1").await;
        assert_eq!(outcome, QueryOutcome::Error);
        assert_eq!(connector.connects(), 5);
        assert_eq!(connector.queries(), 0);
    }
}
