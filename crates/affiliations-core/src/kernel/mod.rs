//! The ledger kernel: one struct owning the store and the external coin
//! ledger capability, with its operations split per concern.

mod contracts;
mod kinship;
mod relations;
mod wallets;

pub use kinship::TreeOptions;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use records::{
    ContractEvent, ContractKind, GuildId, GuildSettings, LedgerStats, UserId, DEFAULT_THEME,
    TREE_THEMES,
};

use crate::coins::CoinLedger;
use crate::store::LedgerStore;
use crate::{unix_now, LedgerError};

const API_SECRET_KEY: &str = "api_secret";

/// How a dissolving wallet's balance is distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    /// N-way even split, remainder coins to the lowest user ids.
    Even,
    /// Two-party percentage split.
    Percent {
        a_id: UserId,
        b_id: UserId,
        percent_for_a: u8,
    },
}

pub struct FamilyKernel {
    store: LedgerStore,
    coins: Arc<dyn CoinLedger>,
    clock: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl FamilyKernel {
    pub fn new(store: LedgerStore, coins: Arc<dyn CoinLedger>) -> Self {
        Self {
            store,
            coins,
            clock: Arc::new(unix_now),
        }
    }

    /// Test hook: pin the clock so expiry paths are deterministic.
    pub fn with_clock(
        store: LedgerStore,
        coins: Arc<dyn CoinLedger>,
        clock: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            coins,
            clock: Arc::new(clock),
        }
    }

    pub(crate) fn now(&self) -> u64 {
        (self.clock)()
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Guild settings
    // -----------------------------------------------------------------------

    pub fn guild_settings(&self, guild_id: GuildId) -> Result<GuildSettings, LedgerError> {
        Ok(self.store.guild_settings(guild_id)?)
    }

    pub fn set_theme(&mut self, guild_id: GuildId, theme: &str) -> Result<(), LedgerError> {
        if !TREE_THEMES.contains(&theme) {
            return Err(LedgerError::InvalidRequest(format!(
                "unknown theme {theme:?}, valid: {}",
                TREE_THEMES.join(", ")
            )));
        }
        let mut settings = self.store.guild_settings(guild_id)?;
        settings.theme = theme.to_string();
        self.store.upsert_guild_settings(&settings)?;
        Ok(())
    }

    pub fn set_rtl(&mut self, guild_id: GuildId, rtl: bool) -> Result<(), LedgerError> {
        let mut settings = self.store.guild_settings(guild_id)?;
        settings.rtl = rtl;
        self.store.upsert_guild_settings(&settings)?;
        Ok(())
    }

    pub fn set_avatars(&mut self, guild_id: GuildId, avatars: bool) -> Result<(), LedgerError> {
        let mut settings = self.store.guild_settings(guild_id)?;
        settings.avatars = avatars;
        self.store.upsert_guild_settings(&settings)?;
        Ok(())
    }

    pub fn set_log_channel(
        &mut self,
        guild_id: GuildId,
        channel: Option<u64>,
    ) -> Result<(), LedgerError> {
        let mut settings = self.store.guild_settings(guild_id)?;
        settings.log_channel = channel;
        self.store.upsert_guild_settings(&settings)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Owners
    // -----------------------------------------------------------------------

    /// Two independent capability checks: the stored per-guild allowlist OR
    /// the platform-admin bit the presentation layer already resolved.
    pub fn is_owner(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        platform_admin: bool,
    ) -> Result<bool, LedgerError> {
        if platform_admin {
            return Ok(true);
        }
        Ok(self.store.is_listed_owner(guild_id, user_id)?)
    }

    pub fn add_owner(&mut self, guild_id: GuildId, user_id: UserId) -> Result<(), LedgerError> {
        self.store.add_owner(guild_id, user_id)?;
        info!(guild_id, user_id, "owner added");
        Ok(())
    }

    pub fn remove_owner(&mut self, guild_id: GuildId, user_id: UserId) -> Result<(), LedgerError> {
        self.store.remove_owner(guild_id, user_id)?;
        info!(guild_id, user_id, "owner removed");
        Ok(())
    }

    pub fn owners(&self, guild_id: GuildId) -> Result<Vec<UserId>, LedgerError> {
        Ok(self.store.owners(guild_id)?)
    }

    // -----------------------------------------------------------------------
    // API secret
    // -----------------------------------------------------------------------

    /// The durable row is the single source of truth; there is deliberately
    /// no in-process cache, so rotation is visible to every replica at once.
    pub fn api_secret(&self) -> Result<Option<String>, LedgerError> {
        Ok(self.store.get_kv(API_SECRET_KEY)?)
    }

    pub fn rotate_api_secret(&mut self, secret: &str) -> Result<(), LedgerError> {
        if secret.trim().is_empty() {
            return Err(LedgerError::InvalidRequest(
                "api secret must not be empty".to_string(),
            ));
        }
        self.store.set_kv(API_SECRET_KEY, secret)?;
        info!("api secret rotated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Admin
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> Result<LedgerStats, LedgerError> {
        Ok(self.store.stats()?)
    }

    /// Raw-data export surface: the database file backing this kernel, if
    /// any. Copying it is the caller's job.
    pub fn export_path(&self) -> Option<&Path> {
        self.store.path()
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    pub(crate) fn append_event(
        &mut self,
        contract_id: &str,
        kind: ContractKind,
        actor_id: Option<UserId>,
        message: impl Into<String>,
    ) -> Result<(), LedgerError> {
        let event = ContractEvent {
            contract_id: contract_id.to_string(),
            kind,
            actor_id,
            message: message.into(),
            ts: self.now(),
        };
        self.store.append_contract_event(&event)?;
        Ok(())
    }
}

/// Sorted, deduplicated member list; duo ids derive from it.
pub(crate) fn normalize_members(members: &[UserId]) -> Vec<UserId> {
    let mut unique = members.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique
}

pub(crate) fn duo_rel_id(kind: records::RelationKind, a_id: UserId, b_id: UserId) -> String {
    let (x, y) = if a_id <= b_id { (a_id, b_id) } else { (b_id, a_id) };
    format!("{}:{x}:{y}", kind.as_str())
}

pub(crate) fn family_rel_id(members: &[UserId], now: u64) -> String {
    let base = members
        .iter()
        .map(|user_id| user_id.to_string())
        .collect::<Vec<_>>()
        .join(":");
    let suffix: String = base.chars().take(6).collect();
    format!("family:{now}:{suffix}")
}

pub(crate) fn contract_id(prefix: &str, a_id: UserId, b_id: UserId, now: u64) -> String {
    let (x, y) = if a_id <= b_id { (a_id, b_id) } else { (b_id, a_id) };
    format!("{prefix}:{x}:{y}:{now}")
}

pub(crate) fn default_theme_or(theme: &str) -> &str {
    if TREE_THEMES.contains(&theme) {
        theme
    } else {
        DEFAULT_THEME
    }
}
