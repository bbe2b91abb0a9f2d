//! Property-based and end-to-end tests for ledger invariants
//!
//! These tests exercise the full stack (resolver → ledger → embedded
//! storage) and verify the invariants the engine promises:
//! - Conservation: per asset, balances across all accounts sum to zero
//! - Non-negativity: no account but `world` ever goes negative
//! - Dense ids: committed ids form a gapless `[0, N)` range
//! - Hash chain: every stored hash recomputes from stored fields
//! - Atomicity: a failing batch leaves no observable change

use chrono::TimeZone;
use ledgerd::crypto::verify_link;
use ledgerd::{
    AccountQuery, Error, FixedClock, Ledger, MetaTarget, Metadata, Posting, Resolver,
    StorageConfig, Transaction, TransactionQuery, WORLD,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn test_resolver() -> (Resolver, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = StorageConfig::default();
    config.dir = temp_dir.path().to_path_buf();
    let clock = FixedClock(chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    (Resolver::with_clock(config, Arc::new(clock)), temp_dir)
}

async fn open_ledger(resolver: &Resolver) -> Arc<Ledger> {
    resolver.get("test").await.unwrap()
}

fn transfer(source: &str, destination: &str, amount: i64, asset: &str) -> Transaction {
    Transaction::new(vec![Posting::new(source, destination, amount, asset)])
}

/// Walk the whole chain and check every stored link.
async fn assert_chain_valid(ledger: &Ledger, count: u64) {
    let mut previous = Transaction::default();
    for id in 0..count {
        let tx = ledger.get_transaction(id).await.unwrap();
        assert_eq!(tx.id, id, "ids must be dense");
        assert!(verify_link(&previous, &tx), "hash link broken at id {id}");
        previous = tx;
    }
}

/// Sum balances per asset over every account, paging through the
/// account cursor.
async fn balance_totals(ledger: &Ledger) -> BTreeMap<String, i64> {
    let mut totals = BTreeMap::new();
    let mut query = AccountQuery::default().limit(100);
    loop {
        let page = ledger.find_accounts(query.clone()).await.unwrap();
        for account in &page.data {
            for (asset, amount) in &account.balances {
                *totals.entry(asset.clone()).or_insert(0) += amount;
            }
        }
        match page.next {
            Some(token) => query = query.after(token),
            None => break,
        }
    }
    totals
}

// --- End-to-end scenarios ---

#[tokio::test]
async fn test_issue_through_mint() {
    let (resolver, _temp) = test_resolver();
    let ledger = open_ledger(&resolver).await;

    ledger
        .commit(vec![Transaction::new(vec![
            Posting::new(WORLD, "mint", 100, "GEM"),
            Posting::new("mint", "alice", 100, "GEM"),
        ])])
        .await
        .unwrap();

    let world = ledger.get_account(WORLD).await.unwrap();
    assert_eq!(world.balances.get("GEM"), Some(&-100));

    let mint = ledger.get_account("mint").await.unwrap();
    assert_eq!(mint.balances.get("GEM").copied().unwrap_or(0), 0);

    let alice = ledger.get_account("alice").await.unwrap();
    assert_eq!(alice.balances.get("GEM"), Some(&100));

    assert_eq!(ledger.get_last_transaction().await.unwrap().id, 0);
    resolver.close_all().await.unwrap();
}

#[tokio::test]
async fn test_overdraft_rejected_on_empty_ledger() {
    let (resolver, _temp) = test_resolver();
    let ledger = open_ledger(&resolver).await;

    let err = ledger
        .commit(vec![transfer("empty_wallet", WORLD, 1, "COIN")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds { .. }));

    assert_eq!(ledger.stats().await.unwrap().transactions, 0);
    assert!(ledger
        .get_account("empty_wallet")
        .await
        .unwrap()
        .balances
        .is_empty());
    resolver.close_all().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_reference_rejected() {
    let (resolver, _temp) = test_resolver();
    let ledger = open_ledger(&resolver).await;

    let tx = transfer(WORLD, "payments:001", 100, "COIN").with_reference("r1");
    ledger.commit(vec![tx.clone()]).await.unwrap();

    let err = ledger.commit(vec![tx]).await.unwrap_err();
    assert!(matches!(err, Error::ConflictingReference(_)));

    let found = ledger
        .find_transactions(TransactionQuery::default().reference("r1"))
        .await
        .unwrap();
    assert_eq!(found.data.len(), 1);
    assert_eq!(found.data[0].id, 0);
    resolver.close_all().await.unwrap();
}

#[tokio::test]
async fn test_account_metadata_overlay() {
    let (resolver, _temp) = test_resolver();
    let ledger = open_ledger(&resolver).await;

    let target = MetaTarget::parse("account", "users:001").unwrap();
    let mut entries = Metadata::new();
    entries.insert("k".to_string(), json!("old"));
    ledger.save_meta(target.clone(), entries).await.unwrap();

    let mut entries = Metadata::new();
    entries.insert("k".to_string(), json!("new"));
    ledger.save_meta(target, entries).await.unwrap();

    let account = ledger.get_account("users:001").await.unwrap();
    assert_eq!(account.metadata.get("k"), Some(&json!("new")));

    // The overlay is visible through the account cursor too.
    let found = ledger
        .find_accounts(AccountQuery::default().address("users:001"))
        .await
        .unwrap();
    assert_eq!(found.data.len(), 1);
    assert_eq!(found.data[0].metadata.get("k"), Some(&json!("new")));
    resolver.close_all().await.unwrap();
}

#[tokio::test]
async fn test_revert_round_trip() {
    let (resolver, _temp) = test_resolver();
    let ledger = open_ledger(&resolver).await;

    let committed = ledger
        .commit(vec![transfer(WORLD, "payments:001", 100, "COIN")])
        .await
        .unwrap();

    let reverted = ledger.revert(committed[0].id).await.unwrap();
    assert_eq!(
        reverted.postings[0],
        Posting::new("payments:001", WORLD, 100, "COIN")
    );

    assert_eq!(ledger.stats().await.unwrap().transactions, 2);
    assert_eq!(
        ledger
            .get_account(WORLD)
            .await
            .unwrap()
            .balances
            .get("COIN")
            .copied()
            .unwrap_or(0),
        0
    );
    assert_eq!(
        ledger
            .get_account("payments:001")
            .await
            .unwrap()
            .balances
            .get("COIN")
            .copied()
            .unwrap_or(0),
        0
    );
    resolver.close_all().await.unwrap();
}

#[tokio::test]
async fn test_bulk_issuance_keeps_invariants() {
    let (resolver, _temp) = test_resolver();
    let ledger = open_ledger(&resolver).await;

    let total: i64 = 10_000 * 100;
    let mut batch = Vec::new();
    for i in 1..=10_000u64 {
        let user = format!("users:{:03}", i % 100);
        batch.push(Transaction::new(vec![
            Posting::new(WORLD, "mint", 100, "GEM"),
            Posting::new("mint", user, 100, "GEM"),
        ]));

        if i % 1_000 == 0 {
            ledger.commit(std::mem::take(&mut batch)).await.unwrap();
        }
    }

    let world = ledger.get_account(WORLD).await.unwrap();
    assert_eq!(world.balances.get("GEM"), Some(&-total));

    let stats = ledger.stats().await.unwrap();
    assert_eq!(stats.transactions, 10_000);

    assert_chain_valid(&ledger, 10_000).await;

    let totals = balance_totals(&ledger).await;
    assert_eq!(totals.get("GEM"), Some(&0));
    resolver.close_all().await.unwrap();
}

#[tokio::test]
async fn test_failed_batch_leaves_no_trace() {
    let (resolver, _temp) = test_resolver();
    let ledger = open_ledger(&resolver).await;

    ledger
        .commit(vec![transfer(WORLD, "alice", 100, "GEM")])
        .await
        .unwrap();

    // Second transaction of the batch overdraws bob; the whole batch
    // must vanish, including alice's would-be credit.
    let err = ledger
        .commit(vec![
            transfer(WORLD, "alice", 50, "GEM"),
            transfer("bob", "alice", 1, "GEM"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds { .. }));

    assert_eq!(ledger.stats().await.unwrap().transactions, 1);
    let alice = ledger.get_account("alice").await.unwrap();
    assert_eq!(alice.balances.get("GEM"), Some(&100));
    assert_eq!(ledger.get_last_transaction().await.unwrap().id, 0);
    resolver.close_all().await.unwrap();
}

#[tokio::test]
async fn test_transaction_pagination_descending() {
    let (resolver, _temp) = test_resolver();
    let ledger = open_ledger(&resolver).await;

    for _ in 0..25 {
        ledger
            .commit(vec![transfer(WORLD, "alice", 1, "COIN")])
            .await
            .unwrap();
    }

    let first = ledger
        .find_transactions(TransactionQuery::default())
        .await
        .unwrap();
    assert_eq!(first.data.len(), 20);
    assert_eq!(first.data[0].id, 24);
    assert!(first.has_more);

    let rest = ledger
        .find_transactions(
            TransactionQuery::default().after(first.next.unwrap().parse().unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(rest.data.len(), 5);
    assert_eq!(rest.data[0].id, 4);
    assert!(!rest.has_more);
    resolver.close_all().await.unwrap();
}

// --- Property tests ---

fn amount_strategy() -> impl Strategy<Value = i64> {
    1i64..10_000
}

fn user_strategy() -> impl Strategy<Value = String> {
    (0u32..5).prop_map(|i| format!("users:{i:03}"))
}

fn asset_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just("GEM".to_string()), Just("COIN".to_string())]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: accepted operations conserve every asset and never
    /// take a non-world account negative.
    #[test]
    fn prop_conservation_and_non_negativity(
        ops in prop::collection::vec(
            (user_strategy(), user_strategy(), amount_strategy(), asset_strategy()),
            1..40,
        )
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (resolver, _temp) = test_resolver();
            let ledger = open_ledger(&resolver).await;

            for (from, to, amount, asset) in ops {
                // Alternate issuance and user-to-user moves; invalid
                // ones (overdrafts, self transfers) must be rejected
                // without effect.
                let tx = if amount % 2 == 0 {
                    transfer(WORLD, &to, amount, &asset)
                } else {
                    transfer(&from, &to, amount, &asset)
                };
                let _ = ledger.commit(vec![tx]).await;
            }

            let totals = balance_totals(&ledger).await;
            for (asset, total) in &totals {
                prop_assert_eq!(*total, 0, "asset {} does not conserve", asset);
            }

            let mut query = AccountQuery::default().limit(100);
            loop {
                let page = ledger.find_accounts(query.clone()).await.unwrap();
                for account in &page.data {
                    if account.address == WORLD {
                        continue;
                    }
                    for (asset, amount) in &account.balances {
                        prop_assert!(
                            *amount >= 0,
                            "account {} is negative in {}",
                            account.address,
                            asset
                        );
                    }
                }
                match page.next {
                    Some(token) => query = query.after(token),
                    None => break,
                }
            }

            resolver.close_all().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: any accepted sequence of batches yields dense ids and
    /// a verifiable hash chain.
    #[test]
    fn prop_dense_ids_and_hash_chain(
        batches in prop::collection::vec(
            prop::collection::vec((user_strategy(), amount_strategy()), 1..5),
            1..8,
        )
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (resolver, _temp) = test_resolver();
            let ledger = open_ledger(&resolver).await;

            let mut expected = 0u64;
            for batch in batches {
                let txs: Vec<Transaction> = batch
                    .into_iter()
                    .map(|(user, amount)| transfer(WORLD, &user, amount, "GEM"))
                    .collect();
                let committed = ledger.commit(txs).await.unwrap();
                for tx in &committed {
                    prop_assert_eq!(tx.id, expected);
                    expected += 1;
                }
            }

            assert_chain_valid(&ledger, expected).await;
            resolver.close_all().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: metadata reads return the value of the last write.
    #[test]
    fn prop_metadata_last_write_wins(values in prop::collection::vec("[a-z]{1,8}", 1..10)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (resolver, _temp) = test_resolver();
            let ledger = open_ledger(&resolver).await;

            let target = MetaTarget::Account("users:001".to_string());
            let last = values.last().unwrap().clone();
            for value in values {
                let mut entries = Metadata::new();
                entries.insert("k".to_string(), json!(value));
                ledger.save_meta(target.clone(), entries).await.unwrap();
            }

            let account = ledger.get_account("users:001").await.unwrap();
            prop_assert_eq!(account.metadata.get("k"), Some(&json!(last)));
            resolver.close_all().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: reverting a fresh transaction restores every affected
    /// balance.
    #[test]
    fn prop_revert_round_trip(
        amount in amount_strategy(),
        user in user_strategy(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (resolver, _temp) = test_resolver();
            let ledger = open_ledger(&resolver).await;

            let committed = ledger
                .commit(vec![transfer(WORLD, &user, amount, "GEM")])
                .await
                .unwrap();

            let before_world = ledger.get_account(WORLD).await.unwrap().balances;
            ledger.revert(committed[0].id).await.unwrap();

            let world = ledger.get_account(WORLD).await.unwrap();
            prop_assert_eq!(
                world.balances.get("GEM").copied().unwrap_or(0),
                before_world.get("GEM").copied().unwrap_or(0) + amount
            );
            let account = ledger.get_account(&user).await.unwrap();
            prop_assert_eq!(account.balances.get("GEM").copied().unwrap_or(0), 0);

            resolver.close_all().await.unwrap();
            Ok(())
        })?;
    }
}
