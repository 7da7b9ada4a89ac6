//! The durable results store: an append-only CSV file, one row per query
//! attempt.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::runner::SizeCategory;

/// `query_executed` sentinel for attempts that exhausted their timeout.
pub const TIMEOUT_SENTINEL: &str = "Timeout!";
/// `query_executed` sentinel for attempts that failed for any other reason.
pub const ERROR_SENTINEL: &str = "Error!";

/// One benchmark attempt, as persisted to the results CSV. Merges the query
/// outcome with the descriptor of the table it ran against.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    pub database: String,
    pub query_id: u32,
    pub name: String,
    /// The fully resolved SQL text, or a failure sentinel.
    pub query_executed: String,
    pub rows: u64,
    /// Elapsed seconds; the configured timeout ceiling on failure.
    pub time: f64,
    pub iteration: u32,
    pub concurrency_factor: u32,
    pub table_name: String,
    pub table_row_count: u64,
    pub table_size_category: SizeCategory,
}

impl ResultRecord {
    pub fn is_timeout(&self) -> bool {
        self.query_executed == TIMEOUT_SENTINEL
    }

    pub fn is_error(&self) -> bool {
        self.query_executed == ERROR_SENTINEL
    }

    pub fn is_success(&self) -> bool {
        !self.is_timeout() && !self.is_error()
    }
}

/// Append-only CSV store. The header is written only when the file is
/// created (or empty); reopening an existing store appends data rows, so
/// repeated runs against the same file accumulate without repeating the
/// header.
pub struct ResultsStore {
    writer: csv::Writer<File>,
}

impl ResultsStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let write_header = !path.exists() || fs::metadata(path)?.len() == 0;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open results file {}", path.display()))?;
        Ok(Self {
            writer: csv::WriterBuilder::new()
                .has_headers(write_header)
                .from_writer(file),
        })
    }

    /// Appends one batch of records and flushes, so the batch lands as a
    /// single durable write unit.
    pub fn append(&mut self, records: &[ResultRecord]) -> anyhow::Result<()> {
        for record in records {
            self.writer.serialize(record)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
