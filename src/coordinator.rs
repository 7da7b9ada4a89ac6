//! Fans one database's benchmark out across N simulated users.
//!
//! Each worker is an independent [`BenchmarkRunner`] task running the full
//! iteration loop over its own connections. Result batches from every worker
//! flow over an unbounded channel to a single writer task, which owns the
//! results store; that serializes the append without any locking in the
//! workers. Workers that terminate uncleanly are collected into the run's
//! failure summary, never silently dropped.

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use hdrhistogram::Histogram;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{error, info};

use crate::connection::Connector;
use crate::results::{ResultRecord, ResultsStore};
use crate::runner::{BenchmarkRunner, RunContext};

/// Summary of one database's benchmark pass across all workers.
#[derive(Debug)]
pub struct RunSummary {
    pub workers: u32,
    pub records: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub errors: u64,
    /// One entry per worker that did not terminate cleanly.
    pub failures: Vec<String>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Spawns `ctx.concurrency_factor` workers plus the results-writer task,
/// waits for all of them, and reports the combined summary.
pub async fn run_concurrent<C>(
    ctx: RunContext,
    connector: C,
    store: ResultsStore,
) -> anyhow::Result<RunSummary>
where
    C: Connector + Clone + 'static,
    C::Conn: Send,
{
    let workers = ctx.concurrency_factor.max(1);
    let (sender, receiver) = unbounded_channel();
    let mut handles: FuturesUnordered<_> = (0..workers)
        .map(|worker| {
            tokio::spawn(
                BenchmarkRunner::new(worker, ctx.clone(), connector.clone(), sender.clone()).run(),
            )
        })
        .collect();
    // Writer sees the channel close once every worker has dropped its sender.
    drop(sender);
    let writer = tokio::spawn(results_writer(receiver, store));

    let mut failures = Vec::new();
    while let Some(joined) = handles.next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                error!(%error, "benchmark worker failed");
                failures.push(error.to_string());
            }
            Err(join_error) => {
                error!(%join_error, "benchmark worker did not terminate cleanly");
                failures.push(join_error.to_string());
            }
        }
    }

    let tally = writer.await??;
    if tally.latency.len() > 0 {
        info!(
            "latency -\tp50: {:.1} ms\tp90: {:.1} ms\tp99: {:.1} ms",
            us_to_ms(tally.latency.value_at_quantile(0.5)),
            us_to_ms(tally.latency.value_at_quantile(0.9)),
            us_to_ms(tally.latency.value_at_quantile(0.99)),
        );
    }

    Ok(RunSummary {
        workers,
        records: tally.records,
        successes: tally.successes,
        timeouts: tally.timeouts,
        errors: tally.errors,
        failures,
    })
}

fn us_to_ms(us: u64) -> f64 {
    us as f64 / 1000.
}

struct WriterTally {
    records: u64,
    successes: u64,
    timeouts: u64,
    errors: u64,
    latency: Histogram<u64>,
}

/// Receives per-iteration batches from the workers and appends each as one
/// write unit, tallying outcomes and successful-query latencies as it goes.
async fn results_writer(
    mut receiver: UnboundedReceiver<Vec<ResultRecord>>,
    mut store: ResultsStore,
) -> anyhow::Result<WriterTally> {
    let mut tally = WriterTally {
        records: 0,
        successes: 0,
        timeouts: 0,
        errors: 0,
        latency: Histogram::<u64>::new(3).unwrap(),
    };
    while let Some(batch) = receiver.recv().await {
        for record in &batch {
            tally.records += 1;
            if record.is_timeout() {
                tally.timeouts += 1;
            } else if record.is_error() {
                tally.errors += 1;
            } else {
                tally.successes += 1;
                let _ = tally.latency.record((record.time * 1_000_000.0) as u64);
            }
        }
        store.append(&batch)?;
    }
    Ok(tally)
}
