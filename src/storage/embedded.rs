//! Embedded storage backend using RocksDB
//!
//! One database per ledger, created on demand under the configured
//! directory with a path derived from the ledger name.
//!
//! # Column Families
//!
//! - `transactions` - committed transactions (key: big-endian id)
//! - `references` - reference → id index
//! - `balances` - materialized balances (key: account `\0` asset)
//! - `metadata` - latest value per key (key: kind `\0` target `\0` key)
//! - `accounts` - addresses ever written, for enumeration
//! - `state` - counters (`last_meta_id`)
//!
//! Big-endian ids keep the `transactions` family ordered, so the last
//! transaction is one reverse-iterator step and descending pagination is
//! a plain scan. All writes go through a single `WriteBatch`.

use crate::query::{AccountQuery, TransactionQuery};
use crate::storage::{BalanceDeltas, MetaEntry, Store};
use crate::types::{Account, Cursor, MetaTarget, Metadata, Transaction};
use crate::{Error, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const CF_TRANSACTIONS: &str = "transactions";
const CF_REFERENCES: &str = "references";
const CF_BALANCES: &str = "balances";
const CF_METADATA: &str = "metadata";
const CF_ACCOUNTS: &str = "accounts";
const CF_STATE: &str = "state";

const KEY_LAST_META_ID: &[u8] = b"last_meta_id";

// Addresses and assets are opaque strings; NUL is the one byte they
// cannot contain, so it separates compound keys.
const SEP: u8 = 0;

/// Stored metadata cell: latest value and the write id that set it.
#[derive(Debug, Serialize, Deserialize)]
struct MetaRecord {
    meta_id: u64,
    value: serde_json::Value,
}

/// RocksDB-backed store for one ledger.
pub struct EmbeddedStore {
    db: DB,
}

impl EmbeddedStore {
    /// Open or create the database for a ledger.
    pub fn open(dir: &Path, db_name: &str, ledger: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{db_name}_{ledger}"));

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_compressed()),
            ColumnFamilyDescriptor::new(CF_REFERENCES, Options::default()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_METADATA, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_STATE, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, &path, cf_descriptors)?;

        tracing::info!(ledger, path = %path.display(), "opened embedded store");

        Ok(Self { db })
    }

    fn cf_options_compressed() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Read on every commit, favor decode speed over ratio.
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("column family {name} not found")))
    }

    fn balance_key(account: &str, asset: &str) -> Vec<u8> {
        let mut key = account.as_bytes().to_vec();
        key.push(SEP);
        key.extend_from_slice(asset.as_bytes());
        key
    }

    fn meta_prefix(target: &MetaTarget) -> Vec<u8> {
        let mut key = target.kind().as_bytes().to_vec();
        key.push(SEP);
        key.extend_from_slice(target.id().as_bytes());
        key.push(SEP);
        key
    }

    fn meta_key(target: &MetaTarget, name: &str) -> Vec<u8> {
        let mut key = Self::meta_prefix(target);
        key.extend_from_slice(name.as_bytes());
        key
    }

    fn decode_id(bytes: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = bytes
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::Storage("malformed id key".to_string()))?;
        Ok(u64::from_be_bytes(bytes))
    }

    fn decode_balance(bytes: &[u8]) -> Result<i64> {
        let bytes: [u8; 8] = bytes
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::Storage("malformed balance value".to_string()))?;
        Ok(i64::from_be_bytes(bytes))
    }

    fn balance(&self, account: &str, asset: &str) -> Result<i64> {
        match self
            .db
            .get_cf(self.cf(CF_BALANCES)?, Self::balance_key(account, asset))?
        {
            Some(bytes) => Self::decode_balance(&bytes),
            None => Ok(0),
        }
    }

    fn read_meta(&self, target: &MetaTarget) -> Result<Metadata> {
        let cf = self.cf(CF_METADATA)?;
        let prefix = Self::meta_prefix(target);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut metadata = Metadata::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let record: MetaRecord = serde_json::from_slice(&value)?;
            let name = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            metadata.insert(name, record.value);
        }
        Ok(metadata)
    }

    fn read_transaction(&self, id: u64) -> Result<Option<Transaction>> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, id.to_be_bytes())? {
            Some(bytes) => {
                let mut tx: Transaction = serde_json::from_slice(&bytes)?;
                tx.metadata = self.read_meta(&MetaTarget::Transaction(id))?;
                Ok(Some(tx))
            }
            None => Ok(None),
        }
    }

    fn read_account(&self, address: &str) -> Result<Account> {
        Ok(Account {
            address: address.to_string(),
            balances: self.balances_of(address)?,
            metadata: self.read_meta(&MetaTarget::Account(address.to_string()))?,
        })
    }

    fn balances_of(&self, address: &str) -> Result<BTreeMap<String, i64>> {
        let cf = self.cf(CF_BALANCES)?;
        let mut prefix = address.as_bytes().to_vec();
        prefix.push(SEP);

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut balances = BTreeMap::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let asset = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            balances.insert(asset, Self::decode_balance(&value)?);
        }
        Ok(balances)
    }

    fn apply_meta(&self, batch: &mut WriteBatch, entries: &[MetaEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let meta_cf = self.cf(CF_METADATA)?;
        let accounts_cf = self.cf(CF_ACCOUNTS)?;
        let state_cf = self.cf(CF_STATE)?;

        let mut last_meta_id = 0u64;
        for entry in entries {
            let record = MetaRecord {
                meta_id: entry.meta_id,
                value: entry.value.clone(),
            };
            batch.put_cf(
                meta_cf,
                Self::meta_key(&entry.target, &entry.key),
                serde_json::to_vec(&record)?,
            );
            if let MetaTarget::Account(address) = &entry.target {
                batch.put_cf(accounts_cf, address.as_bytes(), b"");
            }
            last_meta_id = last_meta_id.max(entry.meta_id);
        }
        batch.put_cf(state_cf, KEY_LAST_META_ID, last_meta_id.to_be_bytes());
        Ok(())
    }
}

#[async_trait]
impl Store for EmbeddedStore {
    async fn last_transaction(&self) -> Result<Option<Transaction>> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                self.read_transaction(Self::decode_id(&key)?)
            }
            None => Ok(None),
        }
    }

    async fn last_metadata_id(&self) -> Result<u64> {
        match self.db.get_cf(self.cf(CF_STATE)?, KEY_LAST_META_ID)? {
            Some(bytes) => Self::decode_id(&bytes),
            None => Ok(0),
        }
    }

    async fn save_transactions(
        &self,
        txs: &[Transaction],
        deltas: &BalanceDeltas,
        meta: &[MetaEntry],
    ) -> Result<()> {
        let tx_cf = self.cf(CF_TRANSACTIONS)?;
        let refs_cf = self.cf(CF_REFERENCES)?;
        let balances_cf = self.cf(CF_BALANCES)?;
        let accounts_cf = self.cf(CF_ACCOUNTS)?;

        let mut batch = WriteBatch::default();

        for tx in txs {
            // Metadata lives in its own family; strip it from the record.
            let mut stored = tx.clone();
            stored.metadata = Metadata::new();
            batch.put_cf(tx_cf, tx.id.to_be_bytes(), serde_json::to_vec(&stored)?);

            if !tx.reference.is_empty() {
                batch.put_cf(refs_cf, tx.reference.as_bytes(), tx.id.to_be_bytes());
            }
        }

        for (account, assets) in deltas {
            batch.put_cf(accounts_cf, account.as_bytes(), b"");
            for (asset, delta) in assets {
                let updated = self.balance(account, asset)? + delta;
                batch.put_cf(
                    balances_cf,
                    Self::balance_key(account, asset),
                    updated.to_be_bytes(),
                );
            }
        }

        self.apply_meta(&mut batch, meta)?;

        self.db.write(batch)?;

        tracing::debug!(count = txs.len(), "transactions persisted");
        Ok(())
    }

    async fn count_transactions(&self) -> Result<u64> {
        // Ids are dense, so the count is the last id plus one.
        let cf = self.cf(CF_TRANSACTIONS)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Self::decode_id(&key)? + 1)
            }
            None => Ok(0),
        }
    }

    async fn find_transactions(&self, query: &TransactionQuery) -> Result<Cursor<Transaction>> {
        let page_size = query.page_size();

        // A reference names at most one transaction; resolve it through
        // the index instead of scanning.
        if let Some(reference) = &query.reference {
            let mut data = Vec::new();
            if let Some(bytes) = self.db.get_cf(self.cf(CF_REFERENCES)?, reference.as_bytes())? {
                let id = Self::decode_id(&bytes)?;
                if query.after.map_or(true, |after| id < after) {
                    if let Some(tx) = self.read_transaction(id)? {
                        if query.matches(&tx) {
                            data.push(tx);
                        }
                    }
                }
            }
            return Ok(Cursor::from_fetched(data, page_size, |tx| tx.id.to_string()));
        }

        if query.after == Some(0) {
            return Ok(Cursor::from_fetched(Vec::new(), page_size, |tx: &Transaction| {
                tx.id.to_string()
            }));
        }

        let cf = self.cf(CF_TRANSACTIONS)?;
        let start;
        let iter = match query.after {
            Some(after) => {
                start = (after - 1).to_be_bytes();
                self.db
                    .iterator_cf(cf, IteratorMode::From(&start, Direction::Reverse))
            }
            None => self.db.iterator_cf(cf, IteratorMode::End),
        };

        let mut data = Vec::new();
        for item in iter {
            let (key, value) = item?;
            let mut tx: Transaction = serde_json::from_slice(&value)?;
            if query.matches(&tx) {
                tx.metadata = self.read_meta(&MetaTarget::Transaction(Self::decode_id(&key)?))?;
                data.push(tx);
                if data.len() > page_size {
                    break;
                }
            }
        }

        Ok(Cursor::from_fetched(data, page_size, |tx| tx.id.to_string()))
    }

    async fn get_transaction(&self, id: u64) -> Result<Option<Transaction>> {
        self.read_transaction(id)
    }

    async fn save_meta(&self, entries: &[MetaEntry]) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.apply_meta(&mut batch, entries)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get_meta(&self, target: &MetaTarget) -> Result<Metadata> {
        self.read_meta(target)
    }

    async fn count_accounts(&self) -> Result<u64> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    async fn find_accounts(&self, query: &AccountQuery) -> Result<Cursor<Account>> {
        let page_size = query.page_size();

        // Exact address is a point lookup.
        if let Some(address) = &query.address {
            let mut data = Vec::new();
            let past_token = query
                .after
                .as_deref()
                .map_or(true, |after| address.as_str() > after);
            if past_token
                && self
                    .db
                    .get_cf(self.cf(CF_ACCOUNTS)?, address.as_bytes())?
                    .is_some()
            {
                let account = self.read_account(address)?;
                if meta_key_matches(query, &account) {
                    data.push(account);
                }
            }
            return Ok(Cursor::from_fetched(data, page_size, |a| a.address.clone()));
        }

        let cf = self.cf(CF_ACCOUNTS)?;
        let iter = match &query.after {
            Some(after) => self
                .db
                .iterator_cf(cf, IteratorMode::From(after.as_bytes(), Direction::Forward)),
            None => self.db.iterator_cf(cf, IteratorMode::Start),
        };

        let mut data = Vec::new();
        for item in iter {
            let (key, _) = item?;
            let address = String::from_utf8_lossy(&key).into_owned();
            // From() is inclusive; the token names the last address of
            // the previous page.
            if let Some(after) = &query.after {
                if &address <= after {
                    continue;
                }
            }
            let account = self.read_account(&address)?;
            if meta_key_matches(query, &account) {
                data.push(account);
                if data.len() > page_size {
                    break;
                }
            }
        }

        Ok(Cursor::from_fetched(data, page_size, |a| a.address.clone()))
    }

    async fn aggregate_balances(&self, address: &str) -> Result<BTreeMap<String, i64>> {
        self.balances_of(address)
    }

    async fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn meta_key_matches(query: &AccountQuery, account: &Account) -> bool {
    query
        .meta_key
        .as_deref()
        .map_or(true, |key| account.metadata.contains_key(key))
}
