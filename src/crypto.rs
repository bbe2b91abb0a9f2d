//! Hash chain for tamper-evident transaction history
//!
//! Every committed transaction carries
//! `hash = hex(SHA-256(J(prev) || J(curr)))` where `J` is a canonical
//! JSON encoding and `prev` is the previous transaction (the zero-value
//! sentinel for the first). Recomputing the chain from stored fields and
//! comparing against stored hashes detects any historical rewrite.
//!
//! # Canonical encoding
//!
//! `J` serializes the fields `hash`, `postings`, `reference`,
//! `timestamp` and `txid` as compact JSON with lexicographically sorted
//! keys, so the encoding is reproducible across implementations.
//! Metadata is deliberately not part of `J`: it stays writable after
//! commit and must not invalidate the chain.

use crate::types::Transaction;
use sha2::{Digest, Sha256};

/// Canonical JSON encoding of a transaction's hashed fields.
///
/// Sorted keys, no insignificant whitespace. Relies on
/// `serde_json::Value` maps being ordered, so the output is stable for
/// equal inputs.
pub fn canonical_json(tx: &Transaction) -> String {
    // json! routes through Value, whose object keys are sorted.
    serde_json::json!({
        "hash": tx.hash,
        "postings": tx.postings,
        "reference": tx.reference,
        "timestamp": tx.timestamp,
        "txid": tx.id,
    })
    .to_string()
}

/// Chain hash of `curr` given its predecessor `prev`.
pub fn chain_hash(prev: &Transaction, curr: &Transaction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(prev).as_bytes());
    hasher.update(canonical_json(curr).as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute and compare the stored hash of `curr` against its
/// predecessor.
pub fn verify_link(prev: &Transaction, curr: &Transaction) -> bool {
    // The stored hash is itself an input to J(curr); blank it before
    // recomputing.
    let mut unhashed = curr.clone();
    unhashed.hash = String::new();
    chain_hash(prev, &unhashed) == curr.hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Posting;

    fn sample() -> Transaction {
        let mut tx = Transaction::new(vec![Posting::new("world", "alice", 100, "GEM")]);
        tx.id = 3;
        tx.timestamp = "2024-01-01T00:00:00Z".to_string();
        tx
    }

    #[test]
    fn test_canonical_json_sorted_keys() {
        let encoded = canonical_json(&sample());
        let hash_pos = encoded.find("\"hash\"").unwrap();
        let postings_pos = encoded.find("\"postings\"").unwrap();
        let txid_pos = encoded.find("\"txid\"").unwrap();
        assert!(hash_pos < postings_pos && postings_pos < txid_pos);
        // Posting keys sort too.
        assert!(encoded.contains(
            r#"{"amount":100,"asset":"GEM","destination":"alice","source":"world"}"#
        ));
    }

    #[test]
    fn test_canonical_json_excludes_metadata() {
        let mut tx = sample();
        let bare = canonical_json(&tx);
        tx.metadata
            .insert("k".to_string(), serde_json::json!("v"));
        assert_eq!(canonical_json(&tx), bare);
    }

    #[test]
    fn test_chain_hash_deterministic() {
        let prev = Transaction::default();
        let curr = sample();
        assert_eq!(chain_hash(&prev, &curr), chain_hash(&prev, &curr));
        assert_eq!(chain_hash(&prev, &curr).len(), 64);
    }

    #[test]
    fn test_chain_hash_sensitive_to_fields() {
        let prev = Transaction::default();
        let curr = sample();
        let base = chain_hash(&prev, &curr);

        let mut changed = curr.clone();
        changed.postings[0].amount = 99;
        assert_ne!(chain_hash(&prev, &changed), base);

        let mut changed = curr.clone();
        changed.id = 4;
        assert_ne!(chain_hash(&prev, &changed), base);

        let mut other_prev = Transaction::default();
        other_prev.id = 1;
        assert_ne!(chain_hash(&other_prev, &curr), base);
    }

    #[test]
    fn test_verify_link() {
        let prev = Transaction::default();
        let mut curr = sample();
        curr.hash = chain_hash(&prev, &curr);
        assert!(verify_link(&prev, &curr));

        curr.postings[0].amount += 1;
        assert!(!verify_link(&prev, &curr));
    }
}
