//! Ledger orchestration layer
//!
//! One `Ledger` per tenant, owning its storage handle for its lifetime.
//! Writes (`commit`, `revert`, `save_meta`) serialize on a single commit
//! mutex held across storage I/O; hash chaining and dense id assignment
//! require strict serialization, so single-ledger write throughput is
//! intentionally bounded to serial commits. Readers never take the
//! mutex and see either the pre-commit or post-commit state.

use crate::clock::Clock;
use crate::crypto::chain_hash;
use crate::metrics::Metrics;
use crate::query::{AccountQuery, TransactionQuery};
use crate::storage::{BalanceDeltas, MetaEntry, Store};
use crate::types::{Account, Cursor, MetaTarget, Metadata, Transaction, WORLD};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Ledger counters, served to the stats endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Stats {
    /// Committed transactions
    pub transactions: u64,

    /// Materialized accounts
    pub accounts: u64,
}

/// A single named ledger.
pub struct Ledger {
    name: String,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    commit_lock: Mutex<()>,
}

impl Ledger {
    /// Create a ledger over its storage handle.
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            store,
            clock,
            metrics: Metrics::default(),
            commit_lock: Mutex::new(()),
        }
    }

    /// Ledger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metrics collector of this instance.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Validate and atomically commit a batch of transactions.
    ///
    /// Returns the committed transactions with assigned id, timestamp
    /// and hash. On any error nothing is persisted.
    pub async fn commit(&self, batch: Vec<Transaction>) -> Result<Vec<Transaction>> {
        let _guard = self.commit_lock.lock().await;
        self.commit_locked(batch).await
    }

    /// Commit body, called with the commit lock held.
    async fn commit_locked(&self, batch: Vec<Transaction>) -> Result<Vec<Transaction>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let timer = self.metrics.commit_duration.start_timer();

        let last = self.store.last_transaction().await?;
        let mut next_id = last.as_ref().map_or(0, |tx| tx.id + 1);
        let mut previous = last.unwrap_or_default();

        self.check_references(&batch).await?;

        // Running per-batch deltas; dropped on any failure.
        let mut overlay = BalanceDeltas::new();
        // Stored balances fetched once per account for the whole batch.
        let mut stored: HashMap<String, BTreeMap<String, i64>> = HashMap::new();

        let mut committed = Vec::with_capacity(batch.len());
        for mut tx in batch {
            if tx.postings.is_empty() {
                return Err(Error::Validation(
                    "transaction has no postings".to_string(),
                ));
            }

            for posting in &tx.postings {
                if posting.amount < 1 {
                    return Err(Error::Validation(format!(
                        "posting amount must be at least 1, got {}",
                        posting.amount
                    )));
                }
                if posting.source == posting.destination {
                    return Err(Error::Validation(format!(
                        "posting source and destination are both {:?}",
                        posting.source
                    )));
                }
                if posting.asset.is_empty() {
                    return Err(Error::Validation("posting asset is empty".to_string()));
                }

                *overlay
                    .entry(posting.source.clone())
                    .or_default()
                    .entry(posting.asset.clone())
                    .or_default() -= posting.amount;
                *overlay
                    .entry(posting.destination.clone())
                    .or_default()
                    .entry(posting.asset.clone())
                    .or_default() += posting.amount;
            }

            for (account, assets) in &overlay {
                if account == WORLD {
                    continue;
                }
                for (asset, delta) in assets {
                    if *delta >= 0 {
                        // Committed balances of non-world accounts are
                        // never negative, so only a net debit can fail.
                        continue;
                    }
                    let available = self.stored_balance(&mut stored, account, asset).await?;
                    if available + delta < 0 {
                        return Err(Error::InsufficientFunds {
                            account: account.clone(),
                            asset: asset.clone(),
                            needed: -delta,
                            available,
                        });
                    }
                }
            }

            tx.id = next_id;
            next_id += 1;
            tx.timestamp = self.clock.timestamp();
            tx.hash = chain_hash(&previous, &tx);

            previous = tx.clone();
            committed.push(tx);
        }

        // Inline metadata is ordered with overlay writes through the
        // same monotone id sequence.
        let mut meta_id = self.store.last_metadata_id().await?;
        let mut meta = Vec::new();
        for tx in &committed {
            for (key, value) in &tx.metadata {
                meta_id += 1;
                meta.push(MetaEntry {
                    meta_id,
                    target: MetaTarget::Transaction(tx.id),
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }

        self.store.save_transactions(&committed, &overlay, &meta).await?;

        self.metrics.commits.inc();
        self.metrics
            .transactions_committed
            .inc_by(committed.len() as u64);
        timer.observe_duration();

        tracing::info!(
            ledger = %self.name,
            count = committed.len(),
            last_id = committed.last().map(|tx| tx.id),
            "batch committed"
        );

        Ok(committed)
    }

    /// Commit the compensating transaction of a committed one.
    ///
    /// The original stays in place untouched. All commit checks apply to
    /// the reversal, including balance validation: a reversal fails if
    /// the funds have since moved on.
    pub async fn revert(&self, id: u64) -> Result<Transaction> {
        let _guard = self.commit_lock.lock().await;

        let original = self
            .store
            .get_transaction(id)
            .await?
            .ok_or(Error::TransactionNotFound(id))?;

        let committed = self.commit_locked(vec![original.reverse()]).await?;
        self.metrics.reverts.inc();

        tracing::info!(ledger = %self.name, reverted = id, "transaction reverted");

        committed
            .into_iter()
            .next()
            .ok_or_else(|| Error::Storage("revert committed no transaction".to_string()))
    }

    /// Overlay metadata onto an account or transaction.
    ///
    /// Last writer wins per key; keys not mentioned keep their value.
    pub async fn save_meta(&self, target: MetaTarget, entries: Metadata) -> Result<()> {
        let _guard = self.commit_lock.lock().await;

        match &target {
            MetaTarget::Account(address) => {
                if address.is_empty() {
                    return Err(Error::Validation(
                        "account metadata target address is empty".to_string(),
                    ));
                }
            }
            MetaTarget::Transaction(id) => {
                self.store
                    .get_transaction(*id)
                    .await?
                    .ok_or(Error::TransactionNotFound(*id))?;
            }
        }

        let mut meta_id = self.store.last_metadata_id().await?;
        let entries: Vec<MetaEntry> = entries
            .into_iter()
            .map(|(key, value)| {
                meta_id += 1;
                MetaEntry {
                    meta_id,
                    target: target.clone(),
                    key,
                    value,
                }
            })
            .collect();

        self.store.save_meta(&entries).await?;
        self.metrics.metadata_writes.inc();

        tracing::debug!(ledger = %self.name, target = %target, "metadata saved");
        Ok(())
    }

    /// Materialized view of an account, zero-valued when never written.
    pub async fn get_account(&self, address: &str) -> Result<Account> {
        Ok(Account {
            address: address.to_string(),
            balances: self.store.aggregate_balances(address).await?,
            metadata: self
                .store
                .get_meta(&MetaTarget::Account(address.to_string()))
                .await?,
        })
    }

    /// Transaction by id.
    pub async fn get_transaction(&self, id: u64) -> Result<Transaction> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or(Error::TransactionNotFound(id))
    }

    /// Transaction with the highest id, or the empty sentinel when the
    /// ledger has none.
    pub async fn get_last_transaction(&self) -> Result<Transaction> {
        Ok(self.store.last_transaction().await?.unwrap_or_default())
    }

    /// Filtered page of transactions, descending id.
    pub async fn find_transactions(
        &self,
        query: TransactionQuery,
    ) -> Result<Cursor<Transaction>> {
        self.store.find_transactions(&query).await
    }

    /// Filtered page of accounts, ascending address.
    pub async fn find_accounts(&self, query: AccountQuery) -> Result<Cursor<Account>> {
        self.store.find_accounts(&query).await
    }

    /// Ledger counters.
    pub async fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            transactions: self.store.count_transactions().await?,
            accounts: self.store.count_accounts().await?,
        })
    }

    /// Release the storage handle.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    async fn check_references(&self, batch: &[Transaction]) -> Result<()> {
        let mut seen = HashSet::new();
        for tx in batch {
            if tx.reference.is_empty() {
                continue;
            }
            if !seen.insert(tx.reference.as_str()) {
                return Err(Error::ConflictingReference(tx.reference.clone()));
            }
            let existing = self
                .store
                .find_transactions(
                    &TransactionQuery::default()
                        .reference(tx.reference.as_str())
                        .limit(1),
                )
                .await?;
            if !existing.data.is_empty() {
                return Err(Error::ConflictingReference(tx.reference.clone()));
            }
        }
        Ok(())
    }

    async fn stored_balance(
        &self,
        cache: &mut HashMap<String, BTreeMap<String, i64>>,
        account: &str,
        asset: &str,
    ) -> Result<i64> {
        if !cache.contains_key(account) {
            let balances = self.store.aggregate_balances(account).await?;
            cache.insert(account.to_string(), balances);
        }
        Ok(cache
            .get(account)
            .and_then(|balances| balances.get(asset))
            .copied()
            .unwrap_or(0))
    }
}
