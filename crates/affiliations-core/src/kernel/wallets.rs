//! Pooled wallet operations, including the mixed pool-then-personal spend
//! path used by the casino facade.

use tracing::{debug, warn};

use records::{GuildId, Relation, RelationKind, SpendSource, UserId};

use crate::coins::CoinError;
use crate::LedgerError;

use super::FamilyKernel;

impl FamilyKernel {
    pub fn wallet_balance(&self, rel_id: &str) -> Result<i64, LedgerError> {
        let relation = self.relation(rel_id)?;
        let wallet_id = relation
            .wallet_id
            .as_deref()
            .ok_or_else(|| LedgerError::NotFound(format!("wallet for {rel_id}")))?;
        Ok(self
            .store
            .wallet(wallet_id)?
            .map(|wallet| wallet.balance)
            .unwrap_or(0))
    }

    /// Adds coins to a pooled wallet without touching anyone's personal
    /// balance (rewards, penalty transfers).
    pub fn credit_wallet(&mut self, rel_id: &str, amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let relation = self.relation(rel_id)?;
        let wallet_id = relation
            .wallet_id
            .as_deref()
            .ok_or_else(|| LedgerError::NotFound(format!("wallet for {rel_id}")))?;
        self.store.credit_wallet(wallet_id, amount)?;
        Ok(())
    }

    pub async fn personal_balance(&self, user_id: UserId) -> Result<i64, LedgerError> {
        Ok(self.coins.balance(user_id).await?)
    }

    /// Moves coins from a member's personal balance into the pool. The
    /// external debit goes first; if the local credit then fails, the debit
    /// is compensated so no coin is stranded in flight.
    pub async fn deposit_from_personal(
        &mut self,
        rel_id: &str,
        user_id: UserId,
        amount: i64,
    ) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let relation = self.relation(rel_id)?;
        let wallet_id = relation
            .wallet_id
            .as_deref()
            .ok_or_else(|| LedgerError::NotFound(format!("wallet for {rel_id}")))?
            .to_string();
        if !self.store.is_relation_member(rel_id, user_id)? {
            return Err(LedgerError::Unauthorized(user_id));
        }

        if let Err(err) = self.coins.debit(user_id, amount).await {
            return Err(Self::debit_failure(&self.coins, user_id, amount, 0, err).await);
        }
        if let Err(err) = self.store.credit_wallet(&wallet_id, amount) {
            warn!(rel_id, user_id, amount, %err, "pool credit failed after personal debit, refunding");
            self.coins.credit(user_id, amount).await?;
            return Err(err.into());
        }
        debug!(rel_id, user_id, amount, "deposit into pool");
        Ok(())
    }

    /// Spends `amount` on behalf of a user, draining one pooled wallet first
    /// (preferred relation kind, then marriage, family, friendship, sibling)
    /// and covering the remainder from the personal balance. If the personal
    /// leg fails, the pooled portion is credited back.
    pub async fn spend_pool_then_personal(
        &mut self,
        guild_id: GuildId,
        user_id: UserId,
        amount: i64,
        prefer_type: Option<RelationKind>,
    ) -> Result<SpendSource, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let pool = self.pick_pool(guild_id, user_id, prefer_type)?;
        let (pool_taken, pool_rel) = match pool {
            Some((relation, wallet_id)) => {
                let taken = self.drain_pool(&wallet_id, amount)?;
                (taken, Some(relation.rel_id))
            }
            None => (0, None),
        };

        let remainder = amount - pool_taken;
        if remainder == 0 {
            let rel_id = pool_rel.unwrap_or_default();
            debug!(guild_id, user_id, amount, rel_id, "spend covered by pool");
            return Ok(SpendSource::Shared(rel_id));
        }

        if let Err(err) = self.coins.debit(user_id, remainder).await {
            if pool_taken > 0 {
                if let Some(rel_id) = pool_rel.as_deref() {
                    let relation = self.relation(rel_id)?;
                    if let Some(wallet_id) = relation.wallet_id.as_deref() {
                        self.store.credit_wallet(wallet_id, pool_taken)?;
                    }
                }
            }
            return Err(Self::debit_failure(&self.coins, user_id, amount, pool_taken, err).await);
        }

        debug!(guild_id, user_id, amount, pool_taken, "spend covered");
        Ok(match pool_rel {
            Some(rel_id) if pool_taken > 0 => SpendSource::Mixed(rel_id),
            _ => SpendSource::Personal,
        })
    }

    /// First pooled wallet with coins in it, in preference order.
    fn pick_pool(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        prefer_type: Option<RelationKind>,
    ) -> Result<Option<(Relation, String)>, LedgerError> {
        let relations = self.store.relations_for_user(guild_id, user_id)?;
        let order: Vec<RelationKind> = prefer_type
            .into_iter()
            .chain(RelationKind::SPEND_ORDER)
            .collect();

        for kind in order {
            for relation in relations.iter().filter(|rel| rel.kind == kind) {
                let Some(wallet_id) = relation.wallet_id.as_deref() else {
                    continue;
                };
                let balance = self
                    .store
                    .wallet(wallet_id)?
                    .map(|wallet| wallet.balance)
                    .unwrap_or(0);
                if balance > 0 {
                    return Ok(Some((relation.clone(), wallet_id.to_string())));
                }
            }
        }
        Ok(None)
    }

    /// Takes up to `amount` from the wallet. The conditional debit can lose
    /// a race with a concurrent spend, so the read-then-debit loop retries
    /// against the fresh balance until it sticks or the wallet is empty.
    fn drain_pool(&mut self, wallet_id: &str, amount: i64) -> Result<i64, LedgerError> {
        loop {
            let balance = self
                .store
                .wallet(wallet_id)?
                .map(|wallet| wallet.balance)
                .unwrap_or(0);
            let take = balance.min(amount);
            if take == 0 {
                return Ok(0);
            }
            if self.store.try_debit_wallet(wallet_id, take)? {
                return Ok(take);
            }
        }
    }

    /// Maps a failed personal debit: transport trouble is retryable, a
    /// refusal means the funds were not there. Takes the coins handle rather
    /// than `&self` so the future stays `Send` (`FamilyKernel` is not `Sync`).
    async fn debit_failure(
        coins: &std::sync::Arc<dyn crate::coins::CoinLedger>,
        user_id: UserId,
        needed: i64,
        pooled: i64,
        err: CoinError,
    ) -> LedgerError {
        match err {
            CoinError::Transport(message) => LedgerError::ExternalLedgerUnavailable(message),
            CoinError::NotApplied(_) | CoinError::NoBackend => {
                let personal = coins.balance(user_id).await.unwrap_or(0);
                LedgerError::InsufficientFunds {
                    needed,
                    pooled,
                    personal,
                }
            }
        }
    }
}
