//! Metrics collection for observability
//!
//! Per-ledger Prometheus metrics, each instance owning its registry so
//! multiple ledgers can coexist in one process.
//!
//! # Metrics
//!
//! - `ledger_transactions_committed_total` - transactions committed
//! - `ledger_commits_total` - batches committed
//! - `ledger_reverts_total` - reversals committed
//! - `ledger_metadata_writes_total` - metadata overlay writes
//! - `ledger_commit_duration_seconds` - commit latency histogram

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for one ledger instance.
#[derive(Clone)]
pub struct Metrics {
    /// Transactions committed
    pub transactions_committed: IntCounter,

    /// Batches committed
    pub commits: IntCounter,

    /// Reversals committed
    pub reverts: IntCounter,

    /// Metadata overlay writes
    pub metadata_writes: IntCounter,

    /// Commit latency
    pub commit_duration: Histogram,

    registry: Arc<Registry>,
}

impl Metrics {
    /// Create a collector with its own registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_committed = IntCounter::with_opts(Opts::new(
            "ledger_transactions_committed_total",
            "Transactions committed",
        ))?;
        registry.register(Box::new(transactions_committed.clone()))?;

        let commits = IntCounter::with_opts(Opts::new(
            "ledger_commits_total",
            "Batches committed",
        ))?;
        registry.register(Box::new(commits.clone()))?;

        let reverts = IntCounter::with_opts(Opts::new(
            "ledger_reverts_total",
            "Reversals committed",
        ))?;
        registry.register(Box::new(reverts.clone()))?;

        let metadata_writes = IntCounter::with_opts(Opts::new(
            "ledger_metadata_writes_total",
            "Metadata overlay writes",
        ))?;
        registry.register(Box::new(metadata_writes.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_commit_duration_seconds",
                "Commit latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            transactions_committed,
            commits,
            reverts,
            metadata_writes,
            commit_duration,
            registry,
        })
    }

    /// Registry for scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to create metrics")
    }
}
