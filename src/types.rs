//! Core types for the ledger
//!
//! All types are designed for:
//! - Stable JSON serialization (hash chain and wire format share one shape)
//! - Exact arithmetic (integer amounts, no floating point)
//! - Zero-value sentinels (an empty ledger reads as the default transaction)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The conventional issuance/void account.
///
/// It is the only account allowed to hold a negative balance; every unit
/// of every asset in circulation is owed by `world`.
pub const WORLD: &str = "world";

/// Opaque JSON metadata attached to accounts and transactions.
///
/// Values are stored verbatim and never interpreted. A `BTreeMap` keeps
/// key order stable across serializations.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A single transfer of `amount` units of `asset` from `source` to
/// `destination`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Account debited
    pub source: String,

    /// Account credited
    pub destination: String,

    /// Strictly positive quantity
    pub amount: i64,

    /// Asset code, exact match, no normalization
    pub asset: String,
}

impl Posting {
    /// Create a posting.
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        amount: i64,
        asset: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            amount,
            asset: asset.into(),
        }
    }
}

impl fmt::Display for Posting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} {} {}",
            self.source, self.destination, self.amount, self.asset
        )
    }
}

/// An ordered group of postings committed together.
///
/// `id`, `timestamp` and `hash` are assigned by the commit engine; input
/// transactions leave them at their defaults. The default value doubles
/// as the sentinel predecessor of the first transaction in a ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Dense, monotonically increasing per-ledger identifier
    #[serde(rename = "txid")]
    pub id: u64,

    /// Postings applied in order
    #[serde(default)]
    pub postings: Vec<Posting>,

    /// Optional caller-supplied key, unique across the ledger when
    /// non-empty
    #[serde(default)]
    pub reference: String,

    /// Commit time, RFC 3339 UTC
    #[serde(default)]
    pub timestamp: String,

    /// Hex SHA-256 chaining this transaction to its predecessor
    #[serde(default)]
    pub hash: String,

    /// Overlay-writable metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Transaction {
    /// Create an uncommitted transaction from postings.
    pub fn new(postings: Vec<Posting>) -> Self {
        Self {
            postings,
            ..Default::default()
        }
    }

    /// Set the reference on an uncommitted transaction.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Set inline metadata on an uncommitted transaction.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Append a posting.
    pub fn append_posting(&mut self, posting: Posting) {
        self.postings.push(posting);
    }

    /// Build the compensating transaction.
    ///
    /// Postings come back in reversed order with source and destination
    /// swapped. A non-empty reference is carried over prefixed with
    /// `revert_`, which makes a second revert collide on reference
    /// uniqueness. Id, timestamp, hash and metadata are not copied; the
    /// reversal is an ordinary transaction assigned fresh values at
    /// commit.
    pub fn reverse(&self) -> Transaction {
        let postings = self
            .postings
            .iter()
            .rev()
            .map(|p| Posting {
                source: p.destination.clone(),
                destination: p.source.clone(),
                amount: p.amount,
                asset: p.asset.clone(),
            })
            .collect();

        let reference = if self.reference.is_empty() {
            String::new()
        } else {
            format!("revert_{}", self.reference)
        };

        Transaction {
            postings,
            reference,
            ..Default::default()
        }
    }
}

/// Materialized view of an account.
///
/// Accounts exist implicitly: an address that was never written reads as
/// zero balances and empty metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Account address
    pub address: String,

    /// Per-asset balances; absent assets are zero
    #[serde(default)]
    pub balances: BTreeMap<String, i64>,

    /// Overlay-writable metadata
    #[serde(default)]
    pub metadata: Metadata,
}

/// Target of a metadata write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaTarget {
    /// Account metadata, keyed by address
    Account(String),

    /// Transaction metadata, keyed by id
    Transaction(u64),
}

impl MetaTarget {
    /// Parse a target from its wire representation.
    ///
    /// `kind` is `"account"` or `"transaction"`; `id` must be a non-empty
    /// address for accounts and a decimal id for transactions.
    pub fn parse(kind: &str, id: &str) -> crate::Result<Self> {
        match kind {
            "account" => {
                if id.is_empty() {
                    return Err(crate::Error::Validation(
                        "account metadata target address is empty".to_string(),
                    ));
                }
                Ok(MetaTarget::Account(id.to_string()))
            }
            "transaction" => {
                let id = id.parse::<u64>().map_err(|_| {
                    crate::Error::Validation(format!(
                        "transaction metadata target id is not numeric: {id:?}"
                    ))
                })?;
                Ok(MetaTarget::Transaction(id))
            }
            other => Err(crate::Error::Validation(format!(
                "unknown metadata target kind: {other:?}"
            ))),
        }
    }

    /// Target kind as stored (`"account"` / `"transaction"`).
    pub fn kind(&self) -> &'static str {
        match self {
            MetaTarget::Account(_) => "account",
            MetaTarget::Transaction(_) => "transaction",
        }
    }

    /// Target identifier as stored.
    pub fn id(&self) -> String {
        match self {
            MetaTarget::Account(address) => address.clone(),
            MetaTarget::Transaction(id) => id.to_string(),
        }
    }
}

impl fmt::Display for MetaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Immutable snapshot of one page of query results.
#[derive(Debug, Clone, Serialize)]
pub struct Cursor<T> {
    /// Records of this page
    pub data: Vec<T>,

    /// Page size the query ran with
    pub page_size: usize,

    /// Whether more records exist past this page
    pub has_more: bool,

    /// Opaque continuation token, present when `has_more`
    pub next: Option<String>,
}

impl<T> Cursor<T> {
    /// Build a cursor from up to `page_size + 1` fetched records.
    ///
    /// The extra record, when present, is dropped and only signals that
    /// another page exists. `token` extracts the continuation token from
    /// the last record kept.
    pub(crate) fn from_fetched(
        mut data: Vec<T>,
        page_size: usize,
        token: impl Fn(&T) -> String,
    ) -> Self {
        let has_more = data.len() > page_size;
        if has_more {
            data.truncate(page_size);
        }
        let next = if has_more {
            data.last().map(&token)
        } else {
            None
        };
        Self {
            data,
            page_size,
            has_more,
            next,
        }
    }
}
