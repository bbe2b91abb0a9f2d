//! Query filters and pagination
//!
//! Filters are built with chained setters and handed to the storage
//! port, which translates them into whatever scan or SQL shape the
//! backend uses. Results page through opaque continuation tokens in
//! [`crate::types::Cursor`].

use crate::types::Transaction;

/// Page size used when a query does not set one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Upper bound on caller-requested page sizes.
pub const MAX_PAGE_SIZE: usize = 400;

/// Filter over committed transactions.
///
/// All set filters must match. Results are ordered by descending id.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    /// Match transactions where any posting touches this account, as
    /// source or destination
    pub account: Option<String>,

    /// Match transactions where any posting debits this account
    pub source: Option<String>,

    /// Match transactions where any posting credits this account
    pub destination: Option<String>,

    /// Match the transaction bearing this reference
    pub reference: Option<String>,

    /// Only ids strictly below this one (continuation token)
    pub after: Option<u64>,

    /// Requested page size; 0 means [`DEFAULT_PAGE_SIZE`]
    pub limit: usize,
}

impl TransactionQuery {
    /// Filter by account, matching source or destination.
    pub fn account(mut self, address: impl Into<String>) -> Self {
        self.account = Some(address.into());
        self
    }

    /// Filter by posting source.
    pub fn source(mut self, address: impl Into<String>) -> Self {
        self.source = Some(address.into());
        self
    }

    /// Filter by posting destination.
    pub fn destination(mut self, address: impl Into<String>) -> Self {
        self.destination = Some(address.into());
        self
    }

    /// Filter by reference.
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Resume below the given id.
    pub fn after(mut self, id: u64) -> Self {
        self.after = Some(id);
        self
    }

    /// Request a page size.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Effective page size.
    pub fn page_size(&self) -> usize {
        match self.limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }

    /// Whether a transaction passes every set filter.
    ///
    /// Used by the embedded backend, which scans; the relational backend
    /// expresses the same predicate in SQL.
    pub(crate) fn matches(&self, tx: &Transaction) -> bool {
        if let Some(account) = &self.account {
            if !tx
                .postings
                .iter()
                .any(|p| &p.source == account || &p.destination == account)
            {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if !tx.postings.iter().any(|p| &p.source == source) {
                return false;
            }
        }
        if let Some(destination) = &self.destination {
            if !tx.postings.iter().any(|p| &p.destination == destination) {
                return false;
            }
        }
        if let Some(reference) = &self.reference {
            if &tx.reference != reference {
                return false;
            }
        }
        true
    }
}

/// Filter over accounts.
///
/// Results are ordered by ascending address.
#[derive(Debug, Clone, Default)]
pub struct AccountQuery {
    /// Exact address match
    pub address: Option<String>,

    /// Require this metadata key to be present
    pub meta_key: Option<String>,

    /// Only addresses strictly after this one (continuation token)
    pub after: Option<String>,

    /// Requested page size; 0 means [`DEFAULT_PAGE_SIZE`]
    pub limit: usize,
}

impl AccountQuery {
    /// Filter by exact address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Require a metadata key.
    pub fn meta_key(mut self, key: impl Into<String>) -> Self {
        self.meta_key = Some(key.into());
        self
    }

    /// Resume after the given address.
    pub fn after(mut self, address: impl Into<String>) -> Self {
        self.after = Some(address.into());
        self
    }

    /// Request a page size.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Effective page size.
    pub fn page_size(&self) -> usize {
        match self.limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }
}
