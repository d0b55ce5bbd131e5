//! Stress tests for Trellis.
//!
//! These helpers drive many small write transactions, sequentially or from
//! several threads at once, and report what happened.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use trellis_core::{CoreResult, GraphDatabase, NodeId};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total transactions attempted.
    pub total_ops: usize,
    /// Committed transactions.
    pub successful_ops: usize,
    /// Failed transactions.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total transactions: {}", self.total_ops);
        println!("Committed: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} tx/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Transactions per thread.
    pub transactions: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Nodes created by each transaction; consecutive ones are linked.
    pub nodes_per_transaction: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            transactions: 200,
            threads: 4,
            nodes_per_transaction: 3,
        }
    }
}

fn commit_batch(db: &GraphDatabase, nodes: usize) -> CoreResult<Vec<NodeId>> {
    db.transaction(|tx| {
        let created = (0..nodes)
            .map(|_| tx.create_node())
            .collect::<CoreResult<Vec<_>>>()?;
        for pair in created.windows(2) {
            tx.create_relationship(pair[0], pair[1], "NEXT")?;
        }
        Ok(created)
    })
}

/// Commits `config.transactions` transactions from the calling thread.
pub fn stress_sequential_commits(db: &GraphDatabase, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for _ in 0..config.transactions {
        match commit_batch(db, config.nodes_per_transaction) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Commits `config.transactions` transactions from each of
/// `config.threads` threads, all at once.
pub fn stress_concurrent_commits(db: &GraphDatabase, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.threads {
            scope.spawn(|| {
                for _ in 0..config.transactions {
                    match commit_batch(db, config.nodes_per_transaction) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
