//! Storage port
//!
//! The commit and query engines treat persistence as an opaque
//! collaborator behind [`Store`]. Two backends conform:
//!
//! - [`embedded::EmbeddedStore`] — RocksDB, one database per ledger
//! - [`relational::RelationalStore`] — PostgreSQL, one schema per ledger
//!
//! A [`StoreFactory`] constructs the configured backend on first use of
//! a ledger name; the relational pool is shared across ledgers.

use crate::config::{StorageConfig, StorageDriver};
use crate::query::{AccountQuery, TransactionQuery};
use crate::types::{Account, Cursor, MetaTarget, Metadata, Transaction};
use crate::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub mod embedded;
pub mod relational;

pub use embedded::EmbeddedStore;
pub use relational::RelationalStore;

/// Net balance movement of a batch: account → asset → signed delta.
pub type BalanceDeltas = BTreeMap<String, BTreeMap<String, i64>>;

/// One metadata key write, ordered by `meta_id`.
///
/// The ledger assigns `meta_id`s from [`Store::last_metadata_id`] under
/// its commit lock, so overlay writes within a ledger are totally
/// ordered.
#[derive(Debug, Clone)]
pub struct MetaEntry {
    /// Monotone write identifier
    pub meta_id: u64,

    /// Account or transaction the entry attaches to
    pub target: MetaTarget,

    /// Metadata key
    pub key: String,

    /// Opaque JSON value, stored verbatim
    pub value: serde_json::Value,
}

/// Abstract persistence for a single ledger.
///
/// Writes come pre-validated and pre-ordered from the commit engine;
/// the port's only write-side obligation is atomicity. Reads must see
/// either the state before or after any `save_*` call, never a partial
/// one.
#[async_trait]
pub trait Store: Send + Sync {
    /// Transaction with the highest id, if any.
    async fn last_transaction(&self) -> Result<Option<Transaction>>;

    /// Highest metadata write id, 0 when none.
    async fn last_metadata_id(&self) -> Result<u64>;

    /// Atomically append transactions, apply balance deltas, and record
    /// inline metadata entries. On error no state change is visible.
    async fn save_transactions(
        &self,
        txs: &[Transaction],
        deltas: &BalanceDeltas,
        meta: &[MetaEntry],
    ) -> Result<()>;

    /// Number of committed transactions.
    async fn count_transactions(&self) -> Result<u64>;

    /// Filtered page of transactions, descending id.
    async fn find_transactions(&self, query: &TransactionQuery) -> Result<Cursor<Transaction>>;

    /// Transaction by id.
    async fn get_transaction(&self, id: u64) -> Result<Option<Transaction>>;

    /// Atomically apply metadata entries, last writer wins per key.
    async fn save_meta(&self, entries: &[MetaEntry]) -> Result<()>;

    /// Current metadata of a target; empty when none was written.
    async fn get_meta(&self, target: &MetaTarget) -> Result<Metadata>;

    /// Number of materialized accounts.
    async fn count_accounts(&self) -> Result<u64>;

    /// Filtered page of accounts, ascending address.
    async fn find_accounts(&self, query: &AccountQuery) -> Result<Cursor<Account>>;

    /// Per-asset balances of an address; empty when never written.
    async fn aggregate_balances(&self, address: &str) -> Result<BTreeMap<String, i64>>;

    /// Flush and release what can be released eagerly. Shared resources
    /// (the relational pool) outlive individual stores and are closed by
    /// the factory.
    async fn close(&self) -> Result<()>;
}

/// Constructs the configured backend for a ledger name.
pub struct StoreFactory {
    config: StorageConfig,
    pool: OnceCell<PgPool>,
}

impl StoreFactory {
    /// Create a factory over the given storage configuration.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
        }
    }

    /// Build (or connect) storage for one ledger.
    pub async fn make(&self, ledger: &str) -> Result<Arc<dyn Store>> {
        match self.config.driver {
            StorageDriver::Embedded => {
                let store = EmbeddedStore::open(
                    &self.config.dir,
                    &self.config.embedded.db_name,
                    ledger,
                )?;
                Ok(Arc::new(store))
            }
            StorageDriver::Relational => {
                let pool = self.pool().await?;
                let store = RelationalStore::initialize(pool, ledger).await?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Close shared resources. Called once, after every ledger built by
    /// this factory has closed.
    pub async fn close(&self) -> Result<()> {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
        Ok(())
    }

    async fn pool(&self) -> Result<PgPool> {
        let pool = self
            .pool
            .get_or_try_init(|| async {
                tracing::info!(
                    max_connections = self.config.relational.max_connections,
                    "connecting relational storage pool"
                );
                PgPoolOptions::new()
                    .max_connections(self.config.relational.max_connections)
                    .connect(&self.config.relational.conn_string)
                    .await
            })
            .await?;
        Ok(pool.clone())
    }
}
