//! Double-entry accounting ledger engine
//!
//! Ingests batches of transactions, each a list of postings moving an
//! integer quantity of a named asset between accounts; maintains
//! per-account per-asset balances; assigns dense monotone ids and a
//! SHA-256 hash chain to committed transactions; serves paged read
//! queries; overlays structured metadata; reverts committed
//! transactions with compensating postings.
//!
//! # Architecture
//!
//! - **Single writer per ledger**: commits serialize on one mutex, which
//!   the hash chain and dense ids require
//! - **Storage port**: persistence is an opaque async collaborator with
//!   embedded (RocksDB) and relational (PostgreSQL) backends
//! - **Resolver**: ledger names map to shared live instances with one
//!   init/shutdown boundary
//!
//! # Invariants
//!
//! - Conservation: per asset, balances across all accounts sum to zero
//! - Non-negativity: every account but `world` stays non-negative
//! - Dense ids: committed ids form a gapless `[0, N)` range
//! - Tamper evidence: every hash recomputes from stored fields
//!
//! # Example
//!
//! ```no_run
//! use ledgerd::{Posting, Resolver, StorageConfig, Transaction};
//!
//! #[tokio::main]
//! async fn main() -> ledgerd::Result<()> {
//!     let resolver = Resolver::new(StorageConfig::default());
//!     let ledger = resolver.get("quickstart").await?;
//!
//!     ledger
//!         .commit(vec![Transaction::new(vec![
//!             Posting::new("world", "users-001", 100, "COIN"),
//!         ])])
//!         .await?;
//!
//!     let account = ledger.get_account("users-001").await?;
//!     assert_eq!(account.balances.get("COIN"), Some(&100));
//!
//!     resolver.close_all().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod query;
pub mod resolver;
pub mod storage;
pub mod types;

// Re-exports
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Config, StorageConfig, StorageDriver};
pub use error::{Error, Result};
pub use ledger::{Ledger, Stats};
pub use query::{AccountQuery, TransactionQuery};
pub use resolver::Resolver;
pub use storage::Store;
pub use types::{Account, Cursor, MetaTarget, Metadata, Posting, Transaction, WORLD};
