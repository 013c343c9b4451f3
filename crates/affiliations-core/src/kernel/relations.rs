//! Relationship lifecycle: creation with arity and marriage-uniqueness
//! enforcement, family membership, dissolution with settlement-safe payout
//! distribution, and family resolution.

use tracing::{info, warn};

use records::{wallet_id_for, GuildId, Relation, RelationKind, UserId, Wallet};

use crate::store::StoreError;
use crate::LedgerError;

use super::{duo_rel_id, family_rel_id, normalize_members, FamilyKernel, SplitPolicy};

const FAMILY_NAME_MAX: usize = 64;

impl FamilyKernel {
    /// Creates a relation and, for pooling kinds, its shared wallet, in one
    /// storage transaction. The one-marriage-per-person invariant is closed
    /// at the storage layer; a lost race surfaces as `DuplicateMarriage`.
    pub fn create_relation(
        &mut self,
        guild_id: GuildId,
        kind: RelationKind,
        members: &[UserId],
        wants_wallet: bool,
        name: Option<&str>,
    ) -> Result<String, LedgerError> {
        let members = normalize_members(members);
        if kind.is_duo() && members.len() != 2 {
            return Err(LedgerError::InvalidArity {
                kind,
                got: members.len(),
            });
        }
        if members.is_empty() {
            return Err(LedgerError::InvalidArity { kind, got: 0 });
        }
        if wants_wallet && !kind.pools_wallet() {
            return Err(LedgerError::InvalidRequest(format!(
                "{kind} relations do not pool a wallet"
            )));
        }

        let now = self.now();
        let rel_id = match kind {
            RelationKind::Family => family_rel_id(&members, now),
            _ => duo_rel_id(kind, members[0], members[1]),
        };
        let with_wallet = kind.pools_wallet();

        let relation = Relation {
            rel_id: rel_id.clone(),
            guild_id,
            kind,
            name: name
                .filter(|_| kind == RelationKind::Family)
                .map(|name| name.chars().take(FAMILY_NAME_MAX).collect()),
            since: now,
            wallet_id: with_wallet.then(|| wallet_id_for(&rel_id)),
        };

        self.store
            .insert_relation(&relation, &members, with_wallet)
            .map_err(|err| match err {
                StoreError::MarriageConflict { user_id, .. } => {
                    LedgerError::DuplicateMarriage(user_id)
                }
                other => LedgerError::Store(other),
            })?;

        info!(%rel_id, guild_id, %kind, members = members.len(), with_wallet, "relation created");
        Ok(rel_id)
    }

    /// Idempotent: joining a family twice is a no-op. Mirrors membership
    /// into the family wallet when one exists.
    pub fn add_member_to_family(
        &mut self,
        rel_id: &str,
        user_id: UserId,
    ) -> Result<(), LedgerError> {
        let relation = self
            .store
            .relation(rel_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("relation {rel_id}")))?;
        if relation.kind != RelationKind::Family {
            return Err(LedgerError::NotAFamily(rel_id.to_string()));
        }
        self.store
            .add_family_member(rel_id, relation.wallet_id.as_deref(), user_id)?;
        info!(rel_id, user_id, "family member added");
        Ok(())
    }

    pub fn relation(&self, rel_id: &str) -> Result<Relation, LedgerError> {
        self.store
            .relation(rel_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("relation {rel_id}")))
    }

    pub fn relation_members(&self, rel_id: &str) -> Result<Vec<UserId>, LedgerError> {
        Ok(self.store.relation_members(rel_id)?)
    }

    pub fn marriage_between(
        &self,
        guild_id: GuildId,
        a_id: UserId,
        b_id: UserId,
    ) -> Result<Option<String>, LedgerError> {
        Ok(self.store.marriage_between(guild_id, a_id, b_id)?)
    }

    pub fn relations_for_user(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Vec<Relation>, LedgerError> {
        Ok(self.store.relations_for_user(guild_id, user_id)?)
    }

    pub fn wallets_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(Relation, Wallet)>, LedgerError> {
        Ok(self.store.wallets_for_user(user_id)?)
    }

    /// Exact family id first, then case-insensitive name.
    pub fn resolve_family(&self, guild_id: GuildId, key: &str) -> Result<String, LedgerError> {
        self.store
            .resolve_family(guild_id, key)?
            .ok_or_else(|| LedgerError::NotFound(format!("family {key:?}")))
    }

    /// Dissolves a relation, distributing any pooled balance first.
    ///
    /// The wallet balance is converted into durable payout rows before any
    /// external credit goes out; each successful credit retires its row in
    /// its own transaction. An external failure leaves the relation and the
    /// remaining rows intact — the error is retryable and re-running this
    /// operation resumes where it stopped, never double-paying. Only once
    /// every payout is retired are the relation rows deleted.
    pub async fn dissolve_relation(
        &mut self,
        rel_id: &str,
        policy: SplitPolicy,
    ) -> Result<(), LedgerError> {
        let relation = self
            .store
            .relation(rel_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("relation {rel_id}")))?;

        if let Some(wallet_id) = relation.wallet_id.as_deref() {
            let members = self.store.relation_members(rel_id)?;
            let balance = self
                .store
                .wallet(wallet_id)?
                .map(|wallet| wallet.balance)
                .unwrap_or(0);

            let shares = compute_shares(balance, &members, policy)?;
            self.store.begin_dissolution(rel_id, wallet_id, &shares)?;

            for (user_id, amount) in self.store.pending_payouts(rel_id)? {
                if let Err(err) = self.coins.credit(user_id, amount).await {
                    warn!(rel_id, user_id, amount, %err, "payout credit failed, dissolution pending");
                    return Err(LedgerError::ExternalLedgerUnavailable(err.to_string()));
                }
                self.store.mark_payout_paid(rel_id, user_id)?;
            }
        }

        self.store.delete_relation(rel_id)?;
        info!(rel_id, "relation dissolved");
        Ok(())
    }
}

/// Splits `balance` over the members. Even mode hands the remainder out one
/// coin at a time to the lowest user ids; percent mode is exact for its two
/// named parties. The shares always sum to `balance`.
pub(crate) fn compute_shares(
    balance: i64,
    members: &[UserId],
    policy: SplitPolicy,
) -> Result<Vec<(UserId, i64)>, LedgerError> {
    if balance <= 0 || members.is_empty() {
        return Ok(Vec::new());
    }

    match policy {
        SplitPolicy::Even => {
            let count = members.len() as i64;
            let share = balance / count;
            let remainder = balance - share * count;
            Ok(members
                .iter()
                .enumerate()
                .map(|(index, user_id)| {
                    let extra = if (index as i64) < remainder { 1 } else { 0 };
                    (*user_id, share + extra)
                })
                .filter(|(_, amount)| *amount > 0)
                .collect())
        }
        SplitPolicy::Percent {
            a_id,
            b_id,
            percent_for_a,
        } => {
            if percent_for_a > 100 {
                return Err(LedgerError::InvalidPercent(percent_for_a as i64));
            }
            let a_share = balance * percent_for_a as i64 / 100;
            let b_share = balance - a_share;
            Ok([(a_id, a_share), (b_id, b_share)]
                .into_iter()
                .filter(|(_, amount)| *amount > 0)
                .collect())
        }
    }
}
