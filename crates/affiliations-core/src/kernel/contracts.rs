//! Marriage and divorce contract state machines, including divorce
//! settlement (penalty transfer, then pooled-wallet split).

use tracing::{info, warn};

use records::{
    ContractEvent, ContractKind, DivorceContract, DivorceStatus, GuildId, MarriageContract,
    MarriageStatus, Penalty, RelationKind, SplitMode, UserId,
};

use crate::coins::CoinError;
use crate::LedgerError;

use super::{contract_id, FamilyKernel, SplitPolicy};

/// Divorce offers never live shorter than this.
const MIN_DIVORCE_TTL_SECS: u64 = 300;

/// Durable marker in the audit trail: the penalty leg already went through.
/// Settlement retries consult it so the payer is charged at most once.
const PENALTY_SETTLED_NOTE: &str = "penalty transferred";

impl FamilyKernel {
    // -----------------------------------------------------------------------
    // Marriage contracts
    // -----------------------------------------------------------------------

    pub fn propose_marriage(
        &mut self,
        guild_id: GuildId,
        proposer_id: UserId,
        target_id: UserId,
        terms: &str,
    ) -> Result<MarriageContract, LedgerError> {
        if proposer_id == target_id {
            return Err(LedgerError::InvalidRequest(
                "cannot propose marriage to yourself".to_string(),
            ));
        }
        for user_id in [proposer_id, target_id] {
            if self.store.marriage_of(guild_id, user_id)?.is_some() {
                return Err(LedgerError::DuplicateMarriage(user_id));
            }
        }

        let now = self.now();
        let contract = MarriageContract {
            contract_id: contract_id("mar", proposer_id, target_id, now),
            guild_id,
            a_id: proposer_id,
            b_id: target_id,
            terms: terms.to_string(),
            status: MarriageStatus::Pending,
            created_at: now,
            accepted_at: None,
        };
        self.store.insert_marriage_contract(&contract)?;
        self.append_event(
            &contract.contract_id,
            ContractKind::Marriage,
            Some(proposer_id),
            "marriage proposed",
        )?;
        info!(contract_id = %contract.contract_id, guild_id, "marriage proposed");
        Ok(contract)
    }

    /// Only the proposed-to party can accept. Acceptance creates the
    /// marriage relation and its pooled wallet in one storage transaction;
    /// if the target married someone else in the meantime the storage lock
    /// refuses and the contract stays pending.
    pub fn accept_marriage(
        &mut self,
        contract_id: &str,
        actor_id: UserId,
    ) -> Result<MarriageContract, LedgerError> {
        let mut contract = self.marriage_contract(contract_id)?;
        if !contract.is_party(actor_id) || actor_id == contract.a_id {
            return Err(LedgerError::Unauthorized(actor_id));
        }
        if contract.status != MarriageStatus::Pending {
            return Err(LedgerError::InvalidRequest(format!(
                "contract {contract_id} is already {}",
                contract.status.as_str()
            )));
        }

        self.create_relation(
            contract.guild_id,
            RelationKind::Marriage,
            &[contract.a_id, contract.b_id],
            true,
            None,
        )?;

        let now = self.now();
        self.store
            .update_marriage_status(contract_id, MarriageStatus::Accepted, Some(now))?;
        self.append_event(
            contract_id,
            ContractKind::Marriage,
            Some(actor_id),
            "marriage accepted",
        )?;
        contract.status = MarriageStatus::Accepted;
        contract.accepted_at = Some(now);
        info!(contract_id, "marriage accepted");
        Ok(contract)
    }

    /// Either party can withdraw a pending proposal.
    pub fn reject_marriage(
        &mut self,
        contract_id: &str,
        actor_id: UserId,
    ) -> Result<(), LedgerError> {
        let contract = self.marriage_contract(contract_id)?;
        if !contract.is_party(actor_id) {
            return Err(LedgerError::Unauthorized(actor_id));
        }
        if contract.status != MarriageStatus::Pending {
            return Err(LedgerError::InvalidRequest(format!(
                "contract {contract_id} is already {}",
                contract.status.as_str()
            )));
        }
        self.store
            .update_marriage_status(contract_id, MarriageStatus::Rejected, None)?;
        self.append_event(
            contract_id,
            ContractKind::Marriage,
            Some(actor_id),
            "marriage rejected",
        )?;
        Ok(())
    }

    pub fn marriage_contract(&self, contract_id: &str) -> Result<MarriageContract, LedgerError> {
        self.store
            .marriage_contract(contract_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("marriage contract {contract_id}")))
    }

    // -----------------------------------------------------------------------
    // Divorce contracts
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn propose_divorce(
        &mut self,
        guild_id: GuildId,
        proposer_id: UserId,
        spouse_id: UserId,
        split_mode: SplitMode,
        percent_for_a: u8,
        penalty: Option<Penalty>,
        ttl_secs: u64,
    ) -> Result<DivorceContract, LedgerError> {
        if self
            .store
            .marriage_between(guild_id, proposer_id, spouse_id)?
            .is_none()
        {
            return Err(LedgerError::NotFound(format!(
                "marriage between {proposer_id} and {spouse_id}"
            )));
        }
        if split_mode == SplitMode::Percent && percent_for_a > 100 {
            return Err(LedgerError::InvalidPercent(percent_for_a as i64));
        }
        if let Some(penalty) = penalty {
            if penalty.coins <= 0 {
                return Err(LedgerError::InvalidAmount(penalty.coins));
            }
            if penalty.from == penalty.to {
                return Err(LedgerError::InvalidRequest(
                    "penalty payer and recipient must differ".to_string(),
                ));
            }
            let parties = [proposer_id, spouse_id];
            if !parties.contains(&penalty.from) || !parties.contains(&penalty.to) {
                return Err(LedgerError::InvalidRequest(
                    "penalty parties must be the divorcing spouses".to_string(),
                ));
            }
        }

        let now = self.now();
        let contract = DivorceContract {
            contract_id: contract_id("div", proposer_id, spouse_id, now),
            guild_id,
            a_id: proposer_id,
            b_id: spouse_id,
            split_mode,
            percent_for_a,
            penalty,
            status: DivorceStatus::Pending,
            created_at: now,
            expires_at: now + ttl_secs.max(MIN_DIVORCE_TTL_SECS),
        };
        self.store.insert_divorce_contract(&contract)?;
        self.append_event(
            &contract.contract_id,
            ContractKind::Divorce,
            Some(proposer_id),
            "divorce proposed",
        )?;
        info!(contract_id = %contract.contract_id, guild_id, "divorce proposed");
        Ok(contract)
    }

    /// Records one party's signature. Both signatures move the contract to
    /// accepted and trigger settlement; a retryable settlement failure
    /// leaves the contract accepted so `resume_settlement` can finish it.
    pub async fn sign_divorce(
        &mut self,
        contract_id: &str,
        actor_id: UserId,
    ) -> Result<DivorceContract, LedgerError> {
        let contract = self.live_divorce_contract(contract_id)?;
        if !contract.is_party(actor_id) {
            return Err(LedgerError::Unauthorized(actor_id));
        }

        let signing_a = actor_id == contract.a_id;
        let next = match (contract.status, signing_a) {
            (DivorceStatus::Pending, true) => DivorceStatus::AAccepted,
            (DivorceStatus::Pending, false) => DivorceStatus::BAccepted,
            (DivorceStatus::AAccepted, false) | (DivorceStatus::BAccepted, true) => {
                DivorceStatus::Accepted
            }
            (DivorceStatus::AAccepted, true) | (DivorceStatus::BAccepted, false) => {
                return Err(LedgerError::InvalidRequest(format!(
                    "user {actor_id} already signed contract {contract_id}"
                )));
            }
            (DivorceStatus::Accepted, _) => {
                return Err(LedgerError::InvalidRequest(format!(
                    "contract {contract_id} is fully signed and awaiting settlement"
                )));
            }
            (status, _) => {
                return Err(LedgerError::AlreadyFinalized {
                    contract_id: contract_id.to_string(),
                    status,
                });
            }
        };

        self.store.update_divorce_status(contract_id, next)?;
        self.append_event(
            contract_id,
            ContractKind::Divorce,
            Some(actor_id),
            "divorce signed",
        )?;

        let mut contract = contract;
        contract.status = next;
        if next == DivorceStatus::Accepted {
            self.settle_divorce(&contract).await?;
            contract.status = DivorceStatus::Completed;
        }
        Ok(contract)
    }

    pub fn reject_divorce(
        &mut self,
        contract_id: &str,
        actor_id: UserId,
    ) -> Result<(), LedgerError> {
        let contract = self.live_divorce_contract(contract_id)?;
        if !contract.is_party(actor_id) {
            return Err(LedgerError::Unauthorized(actor_id));
        }
        if contract.status == DivorceStatus::Accepted {
            return Err(LedgerError::InvalidRequest(format!(
                "contract {contract_id} is fully signed and awaiting settlement"
            )));
        }
        self.store
            .update_divorce_status(contract_id, DivorceStatus::Rejected)?;
        self.append_event(
            contract_id,
            ContractKind::Divorce,
            Some(actor_id),
            "divorce rejected",
        )?;
        Ok(())
    }

    /// Re-runs settlement for a contract stuck in the accepted state after
    /// an external-ledger failure. Idempotent with respect to the penalty
    /// and every already-paid wallet share.
    pub async fn resume_settlement(&mut self, contract_id: &str) -> Result<(), LedgerError> {
        let contract = self.divorce_contract(contract_id)?;
        if contract.status != DivorceStatus::Accepted {
            return Err(LedgerError::AlreadyFinalized {
                contract_id: contract_id.to_string(),
                status: contract.status,
            });
        }
        self.settle_divorce(&contract).await
    }

    pub fn divorce_contract(&self, contract_id: &str) -> Result<DivorceContract, LedgerError> {
        self.store
            .divorce_contract(contract_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("divorce contract {contract_id}")))
    }

    /// Loads a contract, flipping it to expired first when its deadline has
    /// passed. Expiry is lazy: nothing scans for stale contracts.
    fn live_divorce_contract(
        &mut self,
        contract_id: &str,
    ) -> Result<DivorceContract, LedgerError> {
        let contract = self.divorce_contract(contract_id)?;
        if contract.is_expired_at(self.now()) {
            self.store
                .update_divorce_status(contract_id, DivorceStatus::Expired)?;
            self.append_event(contract_id, ContractKind::Divorce, None, "divorce expired")?;
            return Err(LedgerError::Expired(contract_id.to_string()));
        }
        Ok(contract)
    }

    /// Penalty first, then the pooled-wallet split, then completion.
    ///
    /// Every leg is either durable or compensated before the next one runs,
    /// so a crash or external outage at any point leaves a state this
    /// function can be re-entered from.
    async fn settle_divorce(&mut self, contract: &DivorceContract) -> Result<(), LedgerError> {
        let contract_id = contract.contract_id.as_str();

        if let Some(penalty) = contract.penalty {
            if !self.penalty_already_settled(contract_id)? {
                self.transfer_penalty(contract_id, penalty).await?;
            }
        }

        let marriage = self
            .store
            .marriage_between(contract.guild_id, contract.a_id, contract.b_id)?;
        match marriage {
            Some(rel_id) => {
                let policy = match contract.split_mode {
                    SplitMode::Equal => SplitPolicy::Even,
                    SplitMode::Percent => SplitPolicy::Percent {
                        a_id: contract.a_id,
                        b_id: contract.b_id,
                        percent_for_a: contract.percent_for_a,
                    },
                };
                self.dissolve_relation(&rel_id, policy).await?;
            }
            // Relation already gone (e.g. a prior resume finished the split);
            // settlement still completes.
            None => warn!(contract_id, "no marriage relation left to split"),
        }

        self.store
            .update_divorce_status(contract_id, DivorceStatus::Completed)?;
        self.append_event(contract_id, ContractKind::Divorce, None, "divorce completed")?;
        info!(contract_id, "divorce settled");
        Ok(())
    }

    /// Moves the penalty between personal balances. A refusal on the debit
    /// side means the payer cannot cover it; the penalty is forfeited rather
    /// than blocking the divorce. Transport trouble aborts retryably. A
    /// failed credit after a successful debit is compensated.
    async fn transfer_penalty(
        &mut self,
        contract_id: &str,
        penalty: Penalty,
    ) -> Result<(), LedgerError> {
        match self.coins.debit(penalty.from, penalty.coins).await {
            Ok(()) => {}
            Err(CoinError::Transport(message)) => {
                return Err(LedgerError::ExternalLedgerUnavailable(message));
            }
            Err(err) => {
                warn!(contract_id, from = penalty.from, coins = penalty.coins, %err,
                    "penalty debit refused, forfeiting penalty");
                self.append_event(
                    contract_id,
                    ContractKind::Divorce,
                    None,
                    PENALTY_SETTLED_NOTE,
                )?;
                return Ok(());
            }
        }

        if let Err(err) = self.coins.credit(penalty.to, penalty.coins).await {
            warn!(contract_id, to = penalty.to, coins = penalty.coins, %err,
                "penalty credit failed, refunding payer");
            self.coins.credit(penalty.from, penalty.coins).await?;
            return Err(LedgerError::ExternalLedgerUnavailable(err.to_string()));
        }

        self.append_event(contract_id, ContractKind::Divorce, None, PENALTY_SETTLED_NOTE)?;
        Ok(())
    }

    fn penalty_already_settled(&self, contract_id: &str) -> Result<bool, LedgerError> {
        Ok(self
            .store
            .contract_events(contract_id)?
            .iter()
            .any(|event| event.message == PENALTY_SETTLED_NOTE))
    }

    // -----------------------------------------------------------------------
    // History and audit
    // -----------------------------------------------------------------------

    /// Merged marriage and divorce contracts touching a family's members,
    /// newest first. Readable by family members and guild owners.
    pub fn contract_history(
        &self,
        guild_id: GuildId,
        family_key: &str,
        actor_id: UserId,
        platform_admin: bool,
    ) -> Result<(Vec<MarriageContract>, Vec<DivorceContract>), LedgerError> {
        let rel_id = self.resolve_family(guild_id, family_key)?;
        let members = self.store.relation_members(&rel_id)?;
        if !members.contains(&actor_id) && !self.is_owner(guild_id, actor_id, platform_admin)? {
            return Err(LedgerError::Unauthorized(actor_id));
        }
        Ok(self.store.contracts_for_members(guild_id, &members)?)
    }

    pub fn contract_events(&self, contract_id: &str) -> Result<Vec<ContractEvent>, LedgerError> {
        Ok(self.store.contract_events(contract_id)?)
    }
}
