//! Property checks over relation creation, wallet splits, and the
//! storage-level marriage lock.

mod common;

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use tokio::runtime::Runtime;

use affiliations_core::{LedgerError, LedgerStore, SplitPolicy, StoreError};
use records::{wallet_id_for, Relation, RelationKind, SplitMode};

use common::kernel;

const GUILD: u64 = 42;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// An even dissolution pays out every coin exactly once, with no two
    /// shares further than one coin apart.
    #[test]
    fn even_dissolution_conserves_coins(balance in 1i64..100_000, member_count in 1usize..8) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (mut kernel, coins) = kernel();
            let members: Vec<u64> = (1..=member_count as u64).collect();
            let rel_id = kernel
                .create_relation(GUILD, RelationKind::Family, &members, true, Some("clan"))
                .unwrap();
            kernel.credit_wallet(&rel_id, balance).unwrap();

            kernel.dissolve_relation(&rel_id, SplitPolicy::Even).await.unwrap();

            let credits = coins.credits.lock().unwrap().clone();
            let total: i64 = credits.iter().map(|(_, amount)| amount).sum();
            prop_assert_eq!(total, balance);

            let max = credits.iter().map(|(_, amount)| *amount).max().unwrap();
            let min = credits.iter().map(|(_, amount)| *amount).min().unwrap();
            prop_assert!(max - min <= 1);
            Ok(())
        })?;
    }

    /// A percent dissolution is exact: A gets floor(balance * pct / 100),
    /// B gets the rest.
    #[test]
    fn percent_dissolution_is_exact(balance in 1i64..100_000, percent in 0u8..=100) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (mut kernel, coins) = kernel();
            let rel_id = kernel
                .create_relation(GUILD, RelationKind::Marriage, &[1, 2], true, None)
                .unwrap();
            kernel.credit_wallet(&rel_id, balance).unwrap();

            let policy = SplitPolicy::Percent { a_id: 1, b_id: 2, percent_for_a: percent };
            kernel.dissolve_relation(&rel_id, policy).await.unwrap();

            let expected_a = balance * percent as i64 / 100;
            prop_assert_eq!(coins.credited_total(1), expected_a);
            prop_assert_eq!(coins.credited_total(2), balance - expected_a);
            Ok(())
        })?;
    }
}

#[test]
fn duo_relations_require_exactly_two_distinct_members() {
    let (mut kernel, _) = kernel();
    let err = kernel
        .create_relation(GUILD, RelationKind::Marriage, &[7, 7], true, None)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidArity { got: 1, .. }));

    let err = kernel
        .create_relation(GUILD, RelationKind::Friendship, &[1, 2, 3], false, None)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidArity { got: 3, .. }));
}

#[test]
fn second_marriage_in_same_guild_is_refused() {
    let (mut kernel, _) = kernel();
    kernel
        .create_relation(GUILD, RelationKind::Marriage, &[1, 2], true, None)
        .unwrap();
    let err = kernel
        .create_relation(GUILD, RelationKind::Marriage, &[2, 3], true, None)
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateMarriage(2)));

    // The same pair in another guild is a different marriage.
    kernel
        .create_relation(GUILD + 1, RelationKind::Marriage, &[2, 3], true, None)
        .unwrap();
}

#[test]
fn invalid_divorce_percent_is_refused_at_creation() {
    let (mut kernel, _) = kernel();
    kernel
        .create_relation(GUILD, RelationKind::Marriage, &[1, 2], true, None)
        .unwrap();
    let err = kernel
        .propose_divorce(GUILD, 1, 2, SplitMode::Percent, 150, None, 600)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidPercent(150)));
}

/// Two writers race to marry user 2 through separate connections to the
/// same database file; the member lock lets exactly one through.
#[test]
fn concurrent_marriage_race_has_one_winner() {
    let file = tempfile::NamedTempFile::new().expect("temp db");
    let path = file.path().to_path_buf();
    LedgerStore::open(&path).expect("migrate");

    let path = Arc::new(path);
    let handles: Vec<_> = [1u64, 3]
        .into_iter()
        .map(|suitor| {
            let path = path.clone();
            thread::spawn(move || {
                let mut store = LedgerStore::open(path.as_ref()).expect("open");
                let rel_id = format!("marriage:{}:{}", suitor.min(2), suitor.max(2));
                let relation = Relation {
                    rel_id: rel_id.clone(),
                    guild_id: GUILD,
                    kind: RelationKind::Marriage,
                    name: None,
                    since: 0,
                    wallet_id: Some(wallet_id_for(&rel_id)),
                };
                store.insert_relation(&relation, &[suitor.min(2), suitor.max(2)], true)
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread"))
        .collect();

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results.iter().any(|result| matches!(
        result,
        Err(StoreError::MarriageConflict { user_id: 2, .. })
    )));

    // The loser's transaction rolled back without leaving partial rows.
    let store = LedgerStore::open(path.as_ref()).expect("reopen");
    let stats = store.stats().expect("stats");
    assert_eq!(stats.marriages, 1);
    assert_eq!(stats.wallets, 1);
}
