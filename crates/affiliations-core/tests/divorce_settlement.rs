//! End-to-end contract lifecycles: marriage proposal through divorce
//! settlement, expiry, settlement resumption, and mixed spends.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use affiliations_core::LedgerError;
use records::{DivorceStatus, MarriageStatus, Penalty, RelationKind, SplitMode, SpendSource};

use common::{kernel, kernel_at_time};

const GUILD: u64 = 42;
const ALICE: u64 = 1;
const BOB: u64 = 2;

#[tokio::test]
async fn marriage_to_divorce_full_lifecycle() {
    let (mut kernel, coins) = kernel();
    coins.set_balance(ALICE, 500);

    let proposal = kernel.propose_marriage(GUILD, ALICE, BOB, "forever").unwrap();
    assert_eq!(proposal.status, MarriageStatus::Pending);

    let accepted = kernel.accept_marriage(&proposal.contract_id, BOB).unwrap();
    assert_eq!(accepted.status, MarriageStatus::Accepted);
    let rel_id = kernel.marriage_between(GUILD, ALICE, BOB).unwrap().unwrap();

    kernel.deposit_from_personal(&rel_id, ALICE, 100).await.unwrap();
    assert_eq!(coins.balance_of(ALICE), 400);
    assert_eq!(kernel.wallet_balance(&rel_id).unwrap(), 100);

    let penalty = Penalty { from: ALICE, to: BOB, coins: 20 };
    let divorce = kernel
        .propose_divorce(GUILD, ALICE, BOB, SplitMode::Equal, 50, Some(penalty), 600)
        .unwrap();

    let after_a = kernel.sign_divorce(&divorce.contract_id, ALICE).await.unwrap();
    assert_eq!(after_a.status, DivorceStatus::AAccepted);
    let after_b = kernel.sign_divorce(&divorce.contract_id, BOB).await.unwrap();
    assert_eq!(after_b.status, DivorceStatus::Completed);

    // Penalty 20 from Alice to Bob, then the 100-coin pool split 50/50.
    assert_eq!(coins.balance_of(ALICE), 400 - 20 + 50);
    assert_eq!(coins.balance_of(BOB), 20 + 50);

    assert!(kernel.marriage_between(GUILD, ALICE, BOB).unwrap().is_none());
    assert!(matches!(
        kernel.wallet_balance(&rel_id).unwrap_err(),
        LedgerError::NotFound(_)
    ));

    let events = kernel.contract_events(&divorce.contract_id).unwrap();
    assert_eq!(events.last().unwrap().message, "divorce completed");
}

#[tokio::test]
async fn signing_twice_does_not_advance_the_contract() {
    let (mut kernel, _) = kernel();
    kernel
        .create_relation(GUILD, RelationKind::Marriage, &[ALICE, BOB], true, None)
        .unwrap();
    let divorce = kernel
        .propose_divorce(GUILD, ALICE, BOB, SplitMode::Equal, 50, None, 600)
        .unwrap();

    kernel.sign_divorce(&divorce.contract_id, ALICE).await.unwrap();
    let err = kernel.sign_divorce(&divorce.contract_id, ALICE).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidRequest(_)));
    assert_eq!(
        kernel.divorce_contract(&divorce.contract_id).unwrap().status,
        DivorceStatus::AAccepted
    );
}

#[tokio::test]
async fn outsiders_cannot_touch_a_contract() {
    let (mut kernel, _) = kernel();
    kernel
        .create_relation(GUILD, RelationKind::Marriage, &[ALICE, BOB], true, None)
        .unwrap();
    let divorce = kernel
        .propose_divorce(GUILD, ALICE, BOB, SplitMode::Equal, 50, None, 600)
        .unwrap();

    let err = kernel.sign_divorce(&divorce.contract_id, 99).await.unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized(99)));
    let err = kernel.reject_divorce(&divorce.contract_id, 99).unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized(99)));
}

#[tokio::test]
async fn expired_contract_flips_lazily_and_blocks_signing() {
    let now = Arc::new(AtomicU64::new(1_000));
    let (mut kernel, _) = kernel_at_time(now.clone());
    kernel
        .create_relation(GUILD, RelationKind::Marriage, &[ALICE, BOB], true, None)
        .unwrap();
    let divorce = kernel
        .propose_divorce(GUILD, ALICE, BOB, SplitMode::Equal, 50, None, 600)
        .unwrap();
    assert_eq!(divorce.expires_at, 1_600);

    now.store(1_601, Ordering::SeqCst);
    let err = kernel.sign_divorce(&divorce.contract_id, ALICE).await.unwrap_err();
    assert!(matches!(err, LedgerError::Expired(_)));
    assert_eq!(
        kernel.divorce_contract(&divorce.contract_id).unwrap().status,
        DivorceStatus::Expired
    );

    // Expired is terminal, so a later signature cannot revive it.
    let err = kernel.sign_divorce(&divorce.contract_id, BOB).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::AlreadyFinalized { status: DivorceStatus::Expired, .. }
    ));
}

#[tokio::test]
async fn settlement_outage_is_resumable_without_double_pay() {
    let (mut kernel, coins) = kernel();
    let rel_id = kernel
        .create_relation(GUILD, RelationKind::Marriage, &[ALICE, BOB], true, None)
        .unwrap();
    kernel.credit_wallet(&rel_id, 100).unwrap();
    let divorce = kernel
        .propose_divorce(GUILD, ALICE, BOB, SplitMode::Equal, 50, None, 600)
        .unwrap();

    kernel.sign_divorce(&divorce.contract_id, ALICE).await.unwrap();
    coins.fail_credits(true);
    let err = kernel.sign_divorce(&divorce.contract_id, BOB).await.unwrap_err();
    assert!(err.is_retryable());

    // Stuck in accepted: the relation survives, the balance is parked as
    // payout rows, and nothing was paid out yet.
    assert_eq!(
        kernel.divorce_contract(&divorce.contract_id).unwrap().status,
        DivorceStatus::Accepted
    );
    assert!(kernel.marriage_between(GUILD, ALICE, BOB).unwrap().is_some());
    assert_eq!(kernel.wallet_balance(&rel_id).unwrap(), 0);
    assert_eq!(coins.credits.lock().unwrap().len(), 0);

    coins.fail_credits(false);
    kernel.resume_settlement(&divorce.contract_id).await.unwrap();
    assert_eq!(
        kernel.divorce_contract(&divorce.contract_id).unwrap().status,
        DivorceStatus::Completed
    );
    assert_eq!(coins.credited_total(ALICE), 50);
    assert_eq!(coins.credited_total(BOB), 50);
    assert!(kernel.marriage_between(GUILD, ALICE, BOB).unwrap().is_none());
}

#[tokio::test]
async fn fully_signed_contract_outlives_its_deadline_and_still_settles() {
    let now = Arc::new(AtomicU64::new(1_000));
    let (mut kernel, coins) = kernel_at_time(now.clone());
    let rel_id = kernel
        .create_relation(GUILD, RelationKind::Marriage, &[ALICE, BOB], true, None)
        .unwrap();
    kernel.credit_wallet(&rel_id, 100).unwrap();
    let divorce = kernel
        .propose_divorce(GUILD, ALICE, BOB, SplitMode::Equal, 50, None, 600)
        .unwrap();

    kernel.sign_divorce(&divorce.contract_id, ALICE).await.unwrap();
    coins.fail_credits(true);
    let err = kernel.sign_divorce(&divorce.contract_id, BOB).await.unwrap_err();
    assert!(err.is_retryable());

    // The deadline passes while payouts are parked. Pokes must not lapse a
    // fully signed contract; its parked balance is still owed.
    now.store(1_601, Ordering::SeqCst);
    let err = kernel.sign_divorce(&divorce.contract_id, ALICE).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidRequest(_)));
    let err = kernel.reject_divorce(&divorce.contract_id, BOB).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidRequest(_)));
    assert_eq!(
        kernel.divorce_contract(&divorce.contract_id).unwrap().status,
        DivorceStatus::Accepted
    );

    coins.fail_credits(false);
    kernel.resume_settlement(&divorce.contract_id).await.unwrap();
    assert_eq!(
        kernel.divorce_contract(&divorce.contract_id).unwrap().status,
        DivorceStatus::Completed
    );
    assert_eq!(coins.credited_total(ALICE), 50);
    assert_eq!(coins.credited_total(BOB), 50);
    assert!(kernel.marriage_between(GUILD, ALICE, BOB).unwrap().is_none());
}

#[tokio::test]
async fn unpayable_penalty_is_forfeited_not_blocking() {
    let (mut kernel, coins) = kernel();
    coins.set_balance(ALICE, 5);
    let rel_id = kernel
        .create_relation(GUILD, RelationKind::Marriage, &[ALICE, BOB], true, None)
        .unwrap();
    kernel.credit_wallet(&rel_id, 40).unwrap();

    let penalty = Penalty { from: ALICE, to: BOB, coins: 20 };
    let divorce = kernel
        .propose_divorce(GUILD, ALICE, BOB, SplitMode::Equal, 50, Some(penalty), 600)
        .unwrap();
    kernel.sign_divorce(&divorce.contract_id, ALICE).await.unwrap();
    kernel.sign_divorce(&divorce.contract_id, BOB).await.unwrap();

    // Alice could not cover the penalty; Bob only receives his pool share.
    assert_eq!(coins.balance_of(ALICE), 5 + 20);
    assert_eq!(coins.balance_of(BOB), 20);
    assert_eq!(
        kernel.divorce_contract(&divorce.contract_id).unwrap().status,
        DivorceStatus::Completed
    );
}

#[tokio::test]
async fn acceptance_after_a_rival_marriage_leaves_the_contract_pending() {
    let (mut kernel, _) = kernel();
    let first = kernel.propose_marriage(GUILD, ALICE, BOB, "").unwrap();
    let rival = kernel.propose_marriage(GUILD, 3, BOB, "").unwrap();

    kernel.accept_marriage(&first.contract_id, BOB).unwrap();
    let err = kernel.accept_marriage(&rival.contract_id, BOB).unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateMarriage(BOB)));
    assert_eq!(
        kernel.marriage_contract(&rival.contract_id).unwrap().status,
        MarriageStatus::Pending
    );
}

#[tokio::test]
async fn spends_drain_the_pool_before_personal_funds() {
    let (mut kernel, coins) = kernel();
    coins.set_balance(ALICE, 50);
    let rel_id = kernel
        .create_relation(GUILD, RelationKind::Marriage, &[ALICE, BOB], true, None)
        .unwrap();
    kernel.credit_wallet(&rel_id, 30).unwrap();

    let source = kernel
        .spend_pool_then_personal(GUILD, ALICE, 60, None)
        .await
        .unwrap();
    assert_eq!(source, SpendSource::Mixed(rel_id.clone()));
    assert_eq!(kernel.wallet_balance(&rel_id).unwrap(), 0);
    assert_eq!(coins.balance_of(ALICE), 20);

    let source = kernel
        .spend_pool_then_personal(GUILD, ALICE, 10, None)
        .await
        .unwrap();
    assert_eq!(source, SpendSource::Personal);
    assert_eq!(coins.balance_of(ALICE), 10);

    let err = kernel
        .spend_pool_then_personal(GUILD, ALICE, 100, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds { needed: 100, pooled: 0, personal: 10 }
    ));
    assert_eq!(coins.balance_of(ALICE), 10);
}

#[tokio::test]
async fn pool_covers_a_small_spend_entirely() {
    let (mut kernel, coins) = kernel();
    let rel_id = kernel
        .create_relation(GUILD, RelationKind::Marriage, &[ALICE, BOB], true, None)
        .unwrap();
    kernel.credit_wallet(&rel_id, 50).unwrap();

    let source = kernel
        .spend_pool_then_personal(GUILD, ALICE, 40, None)
        .await
        .unwrap();
    assert_eq!(source, SpendSource::Shared(rel_id.clone()));
    assert_eq!(kernel.wallet_balance(&rel_id).unwrap(), 10);
    assert!(coins.debits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_personal_leg_refunds_the_pool() {
    let (mut kernel, coins) = kernel();
    coins.set_balance(ALICE, 100);
    let rel_id = kernel
        .create_relation(GUILD, RelationKind::Marriage, &[ALICE, BOB], true, None)
        .unwrap();
    kernel.credit_wallet(&rel_id, 30).unwrap();

    coins.fail_debits(true);
    let err = kernel
        .spend_pool_then_personal(GUILD, ALICE, 60, None)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(kernel.wallet_balance(&rel_id).unwrap(), 30);
    assert_eq!(coins.balance_of(ALICE), 100);
}

#[tokio::test]
async fn contract_history_is_gated_to_members_and_owners() {
    let (mut kernel, _) = kernel();
    kernel
        .create_relation(GUILD, RelationKind::Family, &[ALICE, BOB], true, Some("Dupont"))
        .unwrap();
    let proposal = kernel.propose_marriage(GUILD, ALICE, BOB, "").unwrap();

    let (marriages, divorces) = kernel
        .contract_history(GUILD, "dupont", ALICE, false)
        .unwrap();
    assert_eq!(marriages.len(), 1);
    assert_eq!(marriages[0].contract_id, proposal.contract_id);
    assert!(divorces.is_empty());

    let err = kernel.contract_history(GUILD, "dupont", 99, false).unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized(99)));
    // Platform admins and listed owners both pass the gate.
    assert!(kernel.contract_history(GUILD, "dupont", 99, true).is_ok());
    kernel.add_owner(GUILD, 99).unwrap();
    assert!(kernel.contract_history(GUILD, "dupont", 99, false).is_ok());
}

#[tokio::test]
async fn deposits_require_membership() {
    let (mut kernel, coins) = kernel();
    coins.set_balance(99, 1_000);
    let rel_id = kernel
        .create_relation(GUILD, RelationKind::Marriage, &[ALICE, BOB], true, None)
        .unwrap();

    let err = kernel.deposit_from_personal(&rel_id, 99, 100).await.unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized(99)));
    assert_eq!(coins.balance_of(99), 1_000);
}
