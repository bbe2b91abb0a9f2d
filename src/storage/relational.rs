//! Relational storage backend using PostgreSQL
//!
//! One logical schema per ledger (`ledger_<name>`) on a connection pool
//! shared across ledgers. Tables mirror the value model: `transactions`,
//! `postings`, `balances`, `metadata`. Atomicity comes from SQL
//! transactions; balances are maintained as a materialized table updated
//! with the batch deltas.
//!
//! Queries use runtime-bound statements with NULL-tolerant predicates so
//! one statement serves every filter combination.

use crate::query::{AccountQuery, TransactionQuery};
use crate::storage::{BalanceDeltas, MetaEntry, Store};
use crate::types::{Account, Cursor, MetaTarget, Metadata, Posting, Transaction};
use crate::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;

/// PostgreSQL-backed store for one ledger.
pub struct RelationalStore {
    pool: PgPool,
    schema: String,
}

impl RelationalStore {
    /// Connect a ledger to its schema, creating it on first use.
    ///
    /// The ledger name is validated upstream by the resolver
    /// (`[A-Za-z0-9_-]`), so quoting the schema identifier is enough.
    pub async fn initialize(pool: PgPool, ledger: &str) -> Result<Self> {
        let store = Self {
            pool,
            schema: format!("ledger_{ledger}"),
        };
        store.migrate().await?;
        tracing::info!(ledger, schema = %store.schema, "initialized relational store");
        Ok(store)
    }

    fn schema_q(&self) -> String {
        format!("\"{}\"", self.schema)
    }

    async fn migrate(&self) -> Result<()> {
        let s = self.schema_q();
        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {s}"),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.transactions (
                    id BIGINT PRIMARY KEY,
                    timestamp TEXT NOT NULL,
                    reference TEXT,
                    hash TEXT NOT NULL
                )"
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS transactions_reference_key
                 ON {s}.transactions (reference) WHERE reference IS NOT NULL"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.postings (
                    txid BIGINT NOT NULL REFERENCES {s}.transactions (id),
                    idx INT NOT NULL,
                    source TEXT NOT NULL,
                    destination TEXT NOT NULL,
                    asset TEXT NOT NULL,
                    amount BIGINT NOT NULL,
                    PRIMARY KEY (txid, idx)
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS postings_source_idx ON {s}.postings (source)"),
            format!(
                "CREATE INDEX IF NOT EXISTS postings_destination_idx
                 ON {s}.postings (destination)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.balances (
                    account TEXT NOT NULL,
                    asset TEXT NOT NULL,
                    amount BIGINT NOT NULL,
                    PRIMARY KEY (account, asset)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.metadata (
                    meta_id BIGINT NOT NULL,
                    kind TEXT NOT NULL,
                    target TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value JSONB NOT NULL,
                    PRIMARY KEY (kind, target, key)
                )"
            ),
        ];

        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn load_postings(&self, id: i64) -> Result<Vec<Posting>> {
        let sql = format!(
            "SELECT source, destination, asset, amount
             FROM {}.postings WHERE txid = $1 ORDER BY idx",
            self.schema_q()
        );
        let rows = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;

        let mut postings = Vec::with_capacity(rows.len());
        for row in rows {
            postings.push(Posting {
                source: row.try_get("source")?,
                destination: row.try_get("destination")?,
                asset: row.try_get("asset")?,
                amount: row.try_get("amount")?,
            });
        }
        Ok(postings)
    }

    async fn load_meta(&self, kind: &str, target: &str) -> Result<Metadata> {
        let sql = format!(
            "SELECT key, value FROM {}.metadata WHERE kind = $1 AND target = $2",
            self.schema_q()
        );
        let rows = sqlx::query(&sql)
            .bind(kind)
            .bind(target)
            .fetch_all(&self.pool)
            .await?;

        let mut metadata = Metadata::new();
        for row in rows {
            metadata.insert(row.try_get("key")?, row.try_get("value")?);
        }
        Ok(metadata)
    }

    async fn load_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let sql = format!(
            "SELECT id, timestamp, reference, hash FROM {}.transactions WHERE id = $1",
            self.schema_q()
        );
        let row = match sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await? {
            Some(row) => row,
            None => return Ok(None),
        };

        let reference: Option<String> = row.try_get("reference")?;
        let tx = Transaction {
            id: id as u64,
            postings: self.load_postings(id).await?,
            reference: reference.unwrap_or_default(),
            timestamp: row.try_get("timestamp")?,
            hash: row.try_get("hash")?,
            metadata: self.load_meta("transaction", &id.to_string()).await?,
        };
        Ok(Some(tx))
    }
}

#[async_trait]
impl Store for RelationalStore {
    async fn last_transaction(&self) -> Result<Option<Transaction>> {
        let sql = format!(
            "SELECT id FROM {}.transactions ORDER BY id DESC LIMIT 1",
            self.schema_q()
        );
        match sqlx::query(&sql).fetch_optional(&self.pool).await? {
            Some(row) => self.load_transaction(row.try_get("id")?).await,
            None => Ok(None),
        }
    }

    async fn last_metadata_id(&self) -> Result<u64> {
        let sql = format!(
            "SELECT COALESCE(MAX(meta_id), 0) FROM {}.metadata",
            self.schema_q()
        );
        let max: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(max as u64)
    }

    async fn save_transactions(
        &self,
        txs: &[Transaction],
        deltas: &BalanceDeltas,
        meta: &[MetaEntry],
    ) -> Result<()> {
        let s = self.schema_q();
        let mut db_tx = self.pool.begin().await?;

        let insert_tx = format!(
            "INSERT INTO {s}.transactions (id, timestamp, reference, hash)
             VALUES ($1, $2, $3, $4)"
        );
        let insert_posting = format!(
            "INSERT INTO {s}.postings (txid, idx, source, destination, asset, amount)
             VALUES ($1, $2, $3, $4, $5, $6)"
        );
        let upsert_balance = format!(
            "INSERT INTO {s}.balances (account, asset, amount) VALUES ($1, $2, $3)
             ON CONFLICT (account, asset)
             DO UPDATE SET amount = balances.amount + EXCLUDED.amount"
        );
        let upsert_meta = format!(
            "INSERT INTO {s}.metadata (meta_id, kind, target, key, value)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (kind, target, key)
             DO UPDATE SET meta_id = EXCLUDED.meta_id, value = EXCLUDED.value"
        );

        for tx in txs {
            let reference = (!tx.reference.is_empty()).then_some(tx.reference.as_str());
            sqlx::query(&insert_tx)
                .bind(tx.id as i64)
                .bind(&tx.timestamp)
                .bind(reference)
                .bind(&tx.hash)
                .execute(&mut *db_tx)
                .await?;

            for (idx, posting) in tx.postings.iter().enumerate() {
                sqlx::query(&insert_posting)
                    .bind(tx.id as i64)
                    .bind(idx as i32)
                    .bind(&posting.source)
                    .bind(&posting.destination)
                    .bind(&posting.asset)
                    .bind(posting.amount)
                    .execute(&mut *db_tx)
                    .await?;
            }
        }

        for (account, assets) in deltas {
            for (asset, delta) in assets {
                sqlx::query(&upsert_balance)
                    .bind(account)
                    .bind(asset)
                    .bind(delta)
                    .execute(&mut *db_tx)
                    .await?;
            }
        }

        for entry in meta {
            sqlx::query(&upsert_meta)
                .bind(entry.meta_id as i64)
                .bind(entry.target.kind())
                .bind(entry.target.id())
                .bind(&entry.key)
                .bind(&entry.value)
                .execute(&mut *db_tx)
                .await?;
        }

        db_tx.commit().await?;

        tracing::debug!(count = txs.len(), "transactions persisted");
        Ok(())
    }

    async fn count_transactions(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}.transactions", self.schema_q());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn find_transactions(&self, query: &TransactionQuery) -> Result<Cursor<Transaction>> {
        let page_size = query.page_size();
        let sql = format!(
            "SELECT DISTINCT t.id FROM {s}.transactions t
             JOIN {s}.postings p ON p.txid = t.id
             WHERE ($1::TEXT IS NULL OR p.source = $1 OR p.destination = $1)
               AND ($2::TEXT IS NULL OR p.source = $2)
               AND ($3::TEXT IS NULL OR p.destination = $3)
               AND ($4::TEXT IS NULL OR t.reference = $4)
               AND ($5::BIGINT IS NULL OR t.id < $5)
             ORDER BY t.id DESC LIMIT $6",
            s = self.schema_q()
        );

        let rows = sqlx::query(&sql)
            .bind(query.account.as_deref())
            .bind(query.source.as_deref())
            .bind(query.destination.as_deref())
            .bind(query.reference.as_deref())
            .bind(query.after.map(|id| id as i64))
            .bind((page_size + 1) as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut data = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            if let Some(tx) = self.load_transaction(id).await? {
                data.push(tx);
            }
        }

        Ok(Cursor::from_fetched(data, page_size, |tx| tx.id.to_string()))
    }

    async fn get_transaction(&self, id: u64) -> Result<Option<Transaction>> {
        self.load_transaction(id as i64).await
    }

    async fn save_meta(&self, entries: &[MetaEntry]) -> Result<()> {
        let upsert_meta = format!(
            "INSERT INTO {}.metadata (meta_id, kind, target, key, value)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (kind, target, key)
             DO UPDATE SET meta_id = EXCLUDED.meta_id, value = EXCLUDED.value",
            self.schema_q()
        );

        let mut db_tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(&upsert_meta)
                .bind(entry.meta_id as i64)
                .bind(entry.target.kind())
                .bind(entry.target.id())
                .bind(&entry.key)
                .bind(&entry.value)
                .execute(&mut *db_tx)
                .await?;
        }
        db_tx.commit().await?;
        Ok(())
    }

    async fn get_meta(&self, target: &MetaTarget) -> Result<Metadata> {
        self.load_meta(target.kind(), &target.id()).await
    }

    async fn count_accounts(&self) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM (
                SELECT account AS address FROM {s}.balances
                UNION SELECT target FROM {s}.metadata WHERE kind = 'account'
             ) a",
            s = self.schema_q()
        );
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn find_accounts(&self, query: &AccountQuery) -> Result<Cursor<Account>> {
        let page_size = query.page_size();
        let sql = format!(
            "SELECT a.address FROM (
                SELECT account AS address FROM {s}.balances
                UNION SELECT target FROM {s}.metadata WHERE kind = 'account'
             ) a
             WHERE ($1::TEXT IS NULL OR a.address = $1)
               AND ($2::TEXT IS NULL OR EXISTS (
                    SELECT 1 FROM {s}.metadata m
                    WHERE m.kind = 'account' AND m.target = a.address AND m.key = $2))
               AND ($3::TEXT IS NULL OR a.address > $3)
             ORDER BY a.address ASC LIMIT $4",
            s = self.schema_q()
        );

        let rows = sqlx::query(&sql)
            .bind(query.address.as_deref())
            .bind(query.meta_key.as_deref())
            .bind(query.after.as_deref())
            .bind((page_size + 1) as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut data = Vec::with_capacity(rows.len());
        for row in rows {
            let address: String = row.try_get("address")?;
            data.push(Account {
                balances: self.aggregate_balances(&address).await?,
                metadata: self.load_meta("account", &address).await?,
                address,
            });
        }

        Ok(Cursor::from_fetched(data, page_size, |a| a.address.clone()))
    }

    async fn aggregate_balances(&self, address: &str) -> Result<BTreeMap<String, i64>> {
        let sql = format!(
            "SELECT asset, amount FROM {}.balances WHERE account = $1",
            self.schema_q()
        );
        let rows = sqlx::query(&sql).bind(address).fetch_all(&self.pool).await?;

        let mut balances = BTreeMap::new();
        for row in rows {
            balances.insert(row.try_get("asset")?, row.try_get("amount")?);
        }
        Ok(balances)
    }

    async fn close(&self) -> Result<()> {
        // The pool is shared across ledgers; the factory closes it.
        Ok(())
    }
}
