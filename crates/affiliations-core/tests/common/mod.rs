//! Shared fixtures: an in-memory kernel wired to a scriptable coin ledger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use affiliations_core::{CoinError, CoinLedger, FamilyKernel, LedgerStore};
use records::UserId;

/// Coin ledger double: personal balances live in a map, every applied
/// credit/debit is recorded, and either direction can be switched to fail
/// with a transport error mid-test.
#[derive(Default)]
pub struct ScriptedCoins {
    balances: Mutex<HashMap<UserId, i64>>,
    pub credits: Mutex<Vec<(UserId, i64)>>,
    pub debits: Mutex<Vec<(UserId, i64)>>,
    fail_credits: AtomicBool,
    fail_debits: AtomicBool,
}

impl ScriptedCoins {
    pub fn set_balance(&self, user_id: UserId, balance: i64) {
        self.balances.lock().unwrap().insert(user_id, balance);
    }

    pub fn balance_of(&self, user_id: UserId) -> i64 {
        self.balances.lock().unwrap().get(&user_id).copied().unwrap_or(0)
    }

    pub fn fail_credits(&self, fail: bool) {
        self.fail_credits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_debits(&self, fail: bool) {
        self.fail_debits.store(fail, Ordering::SeqCst);
    }

    pub fn credited_total(&self, user_id: UserId) -> i64 {
        self.credits
            .lock()
            .unwrap()
            .iter()
            .filter(|(credited, _)| *credited == user_id)
            .map(|(_, amount)| amount)
            .sum()
    }
}

#[async_trait]
impl CoinLedger for ScriptedCoins {
    async fn balance(&self, user_id: UserId) -> Result<i64, CoinError> {
        Ok(self.balance_of(user_id))
    }

    async fn credit(&self, user_id: UserId, amount: i64) -> Result<(), CoinError> {
        if self.fail_credits.load(Ordering::SeqCst) {
            return Err(CoinError::Transport("scripted outage".to_string()));
        }
        *self.balances.lock().unwrap().entry(user_id).or_insert(0) += amount;
        self.credits.lock().unwrap().push((user_id, amount));
        Ok(())
    }

    async fn debit(&self, user_id: UserId, amount: i64) -> Result<(), CoinError> {
        if self.fail_debits.load(Ordering::SeqCst) {
            return Err(CoinError::Transport("scripted outage".to_string()));
        }
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(user_id).or_insert(0);
        if *balance < amount {
            return Err(CoinError::NotApplied(format!(
                "balance {balance} below {amount}"
            )));
        }
        *balance -= amount;
        drop(balances);
        self.debits.lock().unwrap().push((user_id, amount));
        Ok(())
    }
}

pub fn kernel() -> (FamilyKernel, Arc<ScriptedCoins>) {
    let coins = Arc::new(ScriptedCoins::default());
    let store = LedgerStore::open_in_memory().expect("in-memory store");
    (FamilyKernel::new(store, coins.clone()), coins)
}

#[allow(dead_code)]
pub fn kernel_at_time(
    now: Arc<std::sync::atomic::AtomicU64>,
) -> (FamilyKernel, Arc<ScriptedCoins>) {
    let coins = Arc::new(ScriptedCoins::default());
    let store = LedgerStore::open_in_memory().expect("in-memory store");
    let clock = move || now.load(Ordering::SeqCst);
    (
        FamilyKernel::with_clock(store, coins.clone(), clock),
        coins,
    )
}
