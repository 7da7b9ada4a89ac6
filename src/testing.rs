//! Scripted in-memory connections for exercising the executor, runner, and
//! coordinator without a live database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::connection::{Connector, DatabaseError, QueryableConnection};

/// Response scripted for a single query.
pub(crate) enum FakeResponse {
    /// Succeed with this many rows.
    Rows(u64),
    /// Succeed with these text rows.
    Text(Vec<Vec<String>>),
    /// Sleep this long before succeeding with zero rows.
    Hang(Duration),
    /// Fail with a driver error.
    Fail(String),
}

type Script = dyn Fn(&str) -> FakeResponse + Send + Sync;

struct FakeState {
    script: Box<Script>,
    connects: AtomicUsize,
    queries: AtomicUsize,
    connect_failures: AtomicUsize,
}

/// A [`Connector`] whose connections answer queries from a script closure.
#[derive(Clone)]
pub(crate) struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub(crate) fn new(script: impl Fn(&str) -> FakeResponse + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(FakeState {
                script: Box::new(script),
                connects: AtomicUsize::new(0),
                queries: AtomicUsize::new(0),
                connect_failures: AtomicUsize::new(0),
            }),
        }
    }

    /// Makes the next `n` connection attempts fail.
    pub(crate) fn failing_connects(self, n: usize) -> Self {
        self.state.connect_failures.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn queries(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeConnection {
    state: Arc<FakeState>,
}

#[async_trait]
impl Connector for FakeConnector {
    type Conn = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection, DatabaseError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .state
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(DatabaseError::UnexpectedResult(
                "connection refused".to_owned(),
            ));
        }
        Ok(FakeConnection {
            state: Arc::clone(&self.state),
        })
    }
}

impl FakeConnection {
    async fn respond(&mut self, sql: &str) -> Result<Vec<Vec<String>>, DatabaseError> {
        self.state.queries.fetch_add(1, Ordering::SeqCst);
        match (self.state.script)(sql) {
            FakeResponse::Rows(n) => Ok((0..n).map(|i| vec![i.to_string()]).collect()),
            FakeResponse::Text(rows) => Ok(rows),
            FakeResponse::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(Vec::new())
            }
            FakeResponse::Fail(message) => Err(DatabaseError::UnexpectedResult(message)),
        }
    }
}

#[async_trait]
impl QueryableConnection for FakeConnection {
    async fn query_row_count(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        Ok(self.respond(sql).await?.len() as u64)
    }

    async fn query_text(&mut self, sql: &str) -> Result<Vec<Vec<String>>, DatabaseError> {
        self.respond(sql).await
    }
}
