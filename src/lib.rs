//! Database benchmarking harness.
//!
//! Generates randomized SQL from placeholder templates against arbitrary
//! tables, times each execution under a bounded timeout/retry policy, and
//! appends one result row per attempt to a CSV store for later
//! visualization. A benchmark pass runs the full iteration loop on N
//! independent workers to simulate N concurrent users.
//!
//! Data flows leaf to root: table metadata feeds [`builder::QueryBuilder`],
//! whose output renders a [`template::QueryTemplate`] into SQL; the
//! [`executor::QueryExecutor`] turns that into a terminal outcome; the
//! [`runner::BenchmarkRunner`] records outcomes; and the [`coordinator`]
//! fans runners out across workers and funnels their batches into the
//! [`results::ResultsStore`].

pub mod builder;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod executor;
pub mod results;
pub mod runner;
pub mod template;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;
