//! SQLite system of record for relations, wallets, contracts, kinship edges,
//! and guild settings. Every multi-step mutation is one transaction, and the
//! one-marriage-per-person invariant lives here as a storage constraint
//! (`marriage_members` primary key), not as application-level check-then-act.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use records::{
    wallet_id_for, ContractEvent, ContractKind, DivorceContract, DivorceStatus, GuildId,
    GuildSettings, KinEdge, LedgerStats, MarriageContract, MarriageStatus, Penalty, Relation,
    RelationKind, SplitMode, UserId, Wallet,
};

const MIGRATE_SQL: &str = "
CREATE TABLE IF NOT EXISTS relations (
  rel_id    TEXT PRIMARY KEY,
  guild_id  INTEGER NOT NULL,
  kind      TEXT NOT NULL,
  name      TEXT,
  since     INTEGER NOT NULL,
  wallet_id TEXT
);

CREATE TABLE IF NOT EXISTS relation_members (
  rel_id   TEXT NOT NULL,
  user_id  INTEGER NOT NULL,
  PRIMARY KEY (rel_id, user_id)
);

-- Storage-level lock: at most one marriage per (guild, user). Written in the
-- same transaction as the relation insert; the primary key arbitrates races.
CREATE TABLE IF NOT EXISTS marriage_members (
  guild_id INTEGER NOT NULL,
  user_id  INTEGER NOT NULL,
  rel_id   TEXT NOT NULL,
  PRIMARY KEY (guild_id, user_id)
);

CREATE TABLE IF NOT EXISTS wallets (
  wallet_id TEXT PRIMARY KEY,
  balance   INTEGER NOT NULL CHECK (balance >= 0)
);

CREATE TABLE IF NOT EXISTS wallet_members (
  wallet_id TEXT NOT NULL,
  user_id   INTEGER NOT NULL,
  PRIMARY KEY (wallet_id, user_id)
);

-- Settlement-pending payouts: a dissolving wallet's balance is converted to
-- these rows before any external credit is issued.
CREATE TABLE IF NOT EXISTS pending_payouts (
  rel_id  TEXT NOT NULL,
  user_id INTEGER NOT NULL,
  amount  INTEGER NOT NULL,
  PRIMARY KEY (rel_id, user_id)
);

CREATE TABLE IF NOT EXISTS kin_edges (
  parent_id INTEGER NOT NULL,
  child_id  INTEGER NOT NULL,
  PRIMARY KEY (parent_id, child_id)
);

CREATE TABLE IF NOT EXISTS marriage_contracts (
  contract_id TEXT PRIMARY KEY,
  guild_id    INTEGER NOT NULL,
  a_id        INTEGER NOT NULL,
  b_id        INTEGER NOT NULL,
  terms       TEXT NOT NULL,
  status      TEXT NOT NULL,
  created_at  INTEGER NOT NULL,
  accepted_at INTEGER
);

CREATE TABLE IF NOT EXISTS divorce_contracts (
  contract_id   TEXT PRIMARY KEY,
  guild_id      INTEGER NOT NULL,
  a_id          INTEGER NOT NULL,
  b_id          INTEGER NOT NULL,
  split_mode    TEXT NOT NULL,
  percent_for_a INTEGER NOT NULL,
  penalty_from  INTEGER,
  penalty_to    INTEGER,
  penalty_coins INTEGER NOT NULL DEFAULT 0,
  status        TEXT NOT NULL,
  created_at    INTEGER NOT NULL,
  expires_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS contract_events (
  id          INTEGER PRIMARY KEY AUTOINCREMENT,
  contract_id TEXT NOT NULL,
  kind        TEXT NOT NULL,
  actor_id    INTEGER,
  message     TEXT NOT NULL,
  ts          INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS guild_settings (
  guild_id INTEGER PRIMARY KEY,
  theme    TEXT NOT NULL,
  rtl      INTEGER NOT NULL,
  avatars  INTEGER NOT NULL,
  log_chan INTEGER
);

CREATE TABLE IF NOT EXISTS owners (
  guild_id INTEGER NOT NULL,
  user_id  INTEGER NOT NULL,
  PRIMARY KEY (guild_id, user_id)
);

CREATE TABLE IF NOT EXISTS global_kv (
  k TEXT PRIMARY KEY,
  v TEXT NOT NULL
);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("user {user_id} already holds a marriage in guild {guild_id}")]
    MarriageConflict { guild_id: GuildId, user_id: UserId },

    #[error("relation {0} still has unpaid payouts")]
    PayoutsOutstanding(String),
}

fn to_db(id: u64) -> i64 {
    id as i64
}

fn from_db(value: i64) -> u64 {
    value as u64
}

#[derive(Debug)]
pub struct LedgerStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl LedgerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        let mut store = Self {
            conn,
            path: Some(path.as_ref().to_path_buf()),
        };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn, path: None };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    /// On-disk location, for the admin export command. `None` in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn configure(&mut self) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn
            .busy_timeout(std::time::Duration::from_millis(5_000))?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(MIGRATE_SQL)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Relations
    // -----------------------------------------------------------------------

    /// Inserts a relation, its memberships, its marriage locks, and (when
    /// requested) a zero-balance wallet with mirrored membership, all in one
    /// immediate transaction. A `marriage_members` constraint violation is
    /// reported as `MarriageConflict` naming the losing user.
    pub fn insert_relation(
        &mut self,
        relation: &Relation,
        members: &[UserId],
        with_wallet: bool,
    ) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO relations (rel_id, guild_id, kind, name, since, wallet_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                relation.rel_id,
                to_db(relation.guild_id),
                relation.kind.as_str(),
                relation.name,
                relation.since as i64,
                relation.wallet_id,
            ],
        )?;

        for user_id in members {
            tx.execute(
                "INSERT OR IGNORE INTO relation_members (rel_id, user_id) VALUES (?1, ?2)",
                params![relation.rel_id, to_db(*user_id)],
            )?;
        }

        if relation.kind == RelationKind::Marriage {
            for user_id in members {
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO marriage_members (guild_id, user_id, rel_id)
                     VALUES (?1, ?2, ?3)",
                    params![to_db(relation.guild_id), to_db(*user_id), relation.rel_id],
                )?;
                if inserted == 0 {
                    // Rolls back the whole insert on drop.
                    return Err(StoreError::MarriageConflict {
                        guild_id: relation.guild_id,
                        user_id: *user_id,
                    });
                }
            }
        }

        if with_wallet {
            let wallet_id = relation
                .wallet_id
                .clone()
                .unwrap_or_else(|| wallet_id_for(&relation.rel_id));
            tx.execute(
                "INSERT OR IGNORE INTO wallets (wallet_id, balance) VALUES (?1, 0)",
                params![wallet_id],
            )?;
            for user_id in members {
                tx.execute(
                    "INSERT OR IGNORE INTO wallet_members (wallet_id, user_id) VALUES (?1, ?2)",
                    params![wallet_id, to_db(*user_id)],
                )?;
            }
            tx.execute(
                "UPDATE relations SET wallet_id = ?1 WHERE rel_id = ?2",
                params![wallet_id, relation.rel_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn relation(&self, rel_id: &str) -> Result<Option<Relation>, StoreError> {
        let relation = self
            .conn
            .query_row(
                "SELECT rel_id, guild_id, kind, name, since, wallet_id
                 FROM relations WHERE rel_id = ?1",
                params![rel_id],
                read_relation,
            )
            .optional()?;
        Ok(relation)
    }

    /// Members in stable ascending order; split remainders go to the head.
    pub fn relation_members(&self, rel_id: &str) -> Result<Vec<UserId>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id FROM relation_members WHERE rel_id = ?1 ORDER BY user_id ASC",
        )?;
        let members = stmt
            .query_map(params![rel_id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members.into_iter().map(from_db).collect())
    }

    pub fn is_relation_member(&self, rel_id: &str, user_id: UserId) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM relation_members WHERE rel_id = ?1 AND user_id = ?2 LIMIT 1",
                params![rel_id, to_db(user_id)],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn add_family_member(
        &mut self,
        rel_id: &str,
        wallet_id: Option<&str>,
        user_id: UserId,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO relation_members (rel_id, user_id) VALUES (?1, ?2)",
            params![rel_id, to_db(user_id)],
        )?;
        if let Some(wallet_id) = wallet_id {
            tx.execute(
                "INSERT OR IGNORE INTO wallet_members (wallet_id, user_id) VALUES (?1, ?2)",
                params![wallet_id, to_db(user_id)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn marriage_of(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<String>, StoreError> {
        let rel_id = self
            .conn
            .query_row(
                "SELECT rel_id FROM marriage_members WHERE guild_id = ?1 AND user_id = ?2",
                params![to_db(guild_id), to_db(user_id)],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(rel_id)
    }

    pub fn marriage_between(
        &self,
        guild_id: GuildId,
        a_id: UserId,
        b_id: UserId,
    ) -> Result<Option<String>, StoreError> {
        let (a_rel, b_rel) = (
            self.marriage_of(guild_id, a_id)?,
            self.marriage_of(guild_id, b_id)?,
        );
        match (a_rel, b_rel) {
            (Some(a), Some(b)) if a == b => Ok(Some(a)),
            _ => Ok(None),
        }
    }

    pub fn relations_for_user(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Vec<Relation>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT r.rel_id, r.guild_id, r.kind, r.name, r.since, r.wallet_id
             FROM relations r
             JOIN relation_members m ON r.rel_id = m.rel_id
             WHERE r.guild_id = ?1 AND m.user_id = ?2
             ORDER BY r.since ASC, r.rel_id ASC",
        )?;
        let relations = stmt
            .query_map(params![to_db(guild_id), to_db(user_id)], read_relation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(relations)
    }

    /// All pooled wallets the user shares, across guilds, paired with the
    /// owning relation. Deployment-global like the original's wallet listing.
    pub fn wallets_for_user(&self, user_id: UserId) -> Result<Vec<(Relation, Wallet)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT r.rel_id, r.guild_id, r.kind, r.name, r.since, r.wallet_id, w.balance
             FROM relations r
             JOIN relation_members m ON r.rel_id = m.rel_id
             JOIN wallets w ON w.wallet_id = r.wallet_id
             WHERE m.user_id = ?1
             ORDER BY r.since ASC, r.rel_id ASC",
        )?;
        let rows = stmt
            .query_map(params![to_db(user_id)], |row| {
                let relation = read_relation(row)?;
                let balance: i64 = row.get(6)?;
                Ok((relation, balance))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(relation, balance)| {
                let wallet_id = relation.wallet_id.clone()?;
                Some((relation, Wallet { wallet_id, balance }))
            })
            .collect())
    }

    /// Exact id match first, then case-insensitive family-name match.
    pub fn resolve_family(
        &self,
        guild_id: GuildId,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        let key = key.trim();
        let by_id = self
            .conn
            .query_row(
                "SELECT rel_id FROM relations
                 WHERE guild_id = ?1 AND kind = 'family' AND rel_id = ?2 LIMIT 1",
                params![to_db(guild_id), key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        if by_id.is_some() {
            return Ok(by_id);
        }

        let by_name = self
            .conn
            .query_row(
                "SELECT rel_id FROM relations
                 WHERE guild_id = ?1 AND kind = 'family' AND LOWER(name) = LOWER(?2) LIMIT 1",
                params![to_db(guild_id), key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(by_name)
    }

    /// Deletes the relation and everything hanging off it, in one
    /// transaction. Refused while settlement payouts are still unpaid.
    pub fn delete_relation(&mut self, rel_id: &str) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outstanding: i64 = tx.query_row(
            "SELECT COUNT(*) FROM pending_payouts WHERE rel_id = ?1",
            params![rel_id],
            |row| row.get(0),
        )?;
        if outstanding > 0 {
            return Err(StoreError::PayoutsOutstanding(rel_id.to_string()));
        }

        let wallet_id: Option<String> = tx
            .query_row(
                "SELECT wallet_id FROM relations WHERE rel_id = ?1",
                params![rel_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        if let Some(wallet_id) = wallet_id {
            tx.execute(
                "DELETE FROM wallet_members WHERE wallet_id = ?1",
                params![wallet_id],
            )?;
            tx.execute(
                "DELETE FROM wallets WHERE wallet_id = ?1",
                params![wallet_id],
            )?;
        }
        tx.execute(
            "DELETE FROM marriage_members WHERE rel_id = ?1",
            params![rel_id],
        )?;
        tx.execute(
            "DELETE FROM relation_members WHERE rel_id = ?1",
            params![rel_id],
        )?;
        tx.execute("DELETE FROM relations WHERE rel_id = ?1", params![rel_id])?;

        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Wallets & payouts
    // -----------------------------------------------------------------------

    pub fn wallet(&self, wallet_id: &str) -> Result<Option<Wallet>, StoreError> {
        let wallet = self
            .conn
            .query_row(
                "SELECT wallet_id, balance FROM wallets WHERE wallet_id = ?1",
                params![wallet_id],
                |row| {
                    Ok(Wallet {
                        wallet_id: row.get(0)?,
                        balance: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(wallet)
    }

    pub fn credit_wallet(&mut self, wallet_id: &str, amount: i64) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE wallets SET balance = balance + ?1 WHERE wallet_id = ?2",
            params![amount, wallet_id],
        )?;
        if updated == 0 {
            return Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    /// Atomic conditional debit: succeeds only when the balance covers the
    /// amount, so concurrent spends cannot overdraw the pool.
    pub fn try_debit_wallet(&mut self, wallet_id: &str, amount: i64) -> Result<bool, StoreError> {
        let updated = self.conn.execute(
            "UPDATE wallets SET balance = balance - ?1
             WHERE wallet_id = ?2 AND balance >= ?1",
            params![amount, wallet_id],
        )?;
        Ok(updated == 1)
    }

    /// Converts the wallet's balance into persisted payout rows and zeroes
    /// the balance, in one transaction. Idempotent: a relation that already
    /// has payout rows keeps them untouched.
    pub fn begin_dissolution(
        &mut self,
        rel_id: &str,
        wallet_id: &str,
        shares: &[(UserId, i64)],
    ) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outstanding: i64 = tx.query_row(
            "SELECT COUNT(*) FROM pending_payouts WHERE rel_id = ?1",
            params![rel_id],
            |row| row.get(0),
        )?;
        if outstanding == 0 {
            for (user_id, amount) in shares {
                if *amount <= 0 {
                    continue;
                }
                tx.execute(
                    "INSERT INTO pending_payouts (rel_id, user_id, amount) VALUES (?1, ?2, ?3)",
                    params![rel_id, to_db(*user_id), amount],
                )?;
            }
            tx.execute(
                "UPDATE wallets SET balance = 0 WHERE wallet_id = ?1",
                params![wallet_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn pending_payouts(&self, rel_id: &str) -> Result<Vec<(UserId, i64)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, amount FROM pending_payouts
             WHERE rel_id = ?1 ORDER BY user_id ASC",
        )?;
        let payouts = stmt
            .query_map(params![rel_id], |row| {
                Ok((from_db(row.get::<_, i64>(0)?), row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(payouts)
    }

    pub fn mark_payout_paid(&mut self, rel_id: &str, user_id: UserId) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM pending_payouts WHERE rel_id = ?1 AND user_id = ?2",
            params![rel_id, to_db(user_id)],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Kinship
    // -----------------------------------------------------------------------

    pub fn insert_kin_edge(&mut self, edge: KinEdge) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO kin_edges (parent_id, child_id) VALUES (?1, ?2)",
            params![to_db(edge.parent_id), to_db(edge.child_id)],
        )?;
        Ok(())
    }

    pub fn delete_kin_edge(&mut self, edge: KinEdge) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM kin_edges WHERE parent_id = ?1 AND child_id = ?2",
            params![to_db(edge.parent_id), to_db(edge.child_id)],
        )?;
        Ok(())
    }

    pub fn kin_edges(&self) -> Result<Vec<KinEdge>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT parent_id, child_id FROM kin_edges")?;
        let edges = stmt
            .query_map([], |row| {
                Ok(KinEdge {
                    parent_id: from_db(row.get::<_, i64>(0)?),
                    child_id: from_db(row.get::<_, i64>(1)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    pub fn parents_of(&self, child_id: UserId) -> Result<Vec<UserId>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT parent_id FROM kin_edges WHERE child_id = ?1 ORDER BY parent_id")?;
        let parents = stmt
            .query_map(params![to_db(child_id)], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parents.into_iter().map(from_db).collect())
    }

    pub fn children_of(&self, parent_id: UserId) -> Result<Vec<UserId>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT child_id FROM kin_edges WHERE parent_id = ?1 ORDER BY child_id")?;
        let children = stmt
            .query_map(params![to_db(parent_id)], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(children.into_iter().map(from_db).collect())
    }

    // -----------------------------------------------------------------------
    // Contracts
    // -----------------------------------------------------------------------

    pub fn insert_marriage_contract(
        &mut self,
        contract: &MarriageContract,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO marriage_contracts
               (contract_id, guild_id, a_id, b_id, terms, status, created_at, accepted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                contract.contract_id,
                to_db(contract.guild_id),
                to_db(contract.a_id),
                to_db(contract.b_id),
                contract.terms,
                contract.status.as_str(),
                contract.created_at as i64,
                contract.accepted_at.map(|ts| ts as i64),
            ],
        )?;
        Ok(())
    }

    pub fn marriage_contract(
        &self,
        contract_id: &str,
    ) -> Result<Option<MarriageContract>, StoreError> {
        let contract = self
            .conn
            .query_row(
                "SELECT contract_id, guild_id, a_id, b_id, terms, status, created_at, accepted_at
                 FROM marriage_contracts WHERE contract_id = ?1",
                params![contract_id],
                read_marriage_contract,
            )
            .optional()?;
        Ok(contract)
    }

    pub fn update_marriage_status(
        &mut self,
        contract_id: &str,
        status: MarriageStatus,
        accepted_at: Option<u64>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE marriage_contracts
             SET status = ?1, accepted_at = COALESCE(?2, accepted_at)
             WHERE contract_id = ?3",
            params![status.as_str(), accepted_at.map(|ts| ts as i64), contract_id],
        )?;
        Ok(())
    }

    pub fn insert_divorce_contract(
        &mut self,
        contract: &DivorceContract,
    ) -> Result<(), StoreError> {
        let (penalty_from, penalty_to, penalty_coins) = match contract.penalty {
            Some(penalty) => (
                Some(to_db(penalty.from)),
                Some(to_db(penalty.to)),
                penalty.coins,
            ),
            None => (None, None, 0),
        };
        self.conn.execute(
            "INSERT INTO divorce_contracts
               (contract_id, guild_id, a_id, b_id, split_mode, percent_for_a,
                penalty_from, penalty_to, penalty_coins, status, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                contract.contract_id,
                to_db(contract.guild_id),
                to_db(contract.a_id),
                to_db(contract.b_id),
                contract.split_mode.as_str(),
                contract.percent_for_a as i64,
                penalty_from,
                penalty_to,
                penalty_coins,
                contract.status.as_str(),
                contract.created_at as i64,
                contract.expires_at as i64,
            ],
        )?;
        Ok(())
    }

    pub fn divorce_contract(
        &self,
        contract_id: &str,
    ) -> Result<Option<DivorceContract>, StoreError> {
        let contract = self
            .conn
            .query_row(
                "SELECT contract_id, guild_id, a_id, b_id, split_mode, percent_for_a,
                        penalty_from, penalty_to, penalty_coins, status, created_at, expires_at
                 FROM divorce_contracts WHERE contract_id = ?1",
                params![contract_id],
                read_divorce_contract,
            )
            .optional()?;
        Ok(contract)
    }

    pub fn update_divorce_status(
        &mut self,
        contract_id: &str,
        status: DivorceStatus,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE divorce_contracts SET status = ?1 WHERE contract_id = ?2",
            params![status.as_str(), contract_id],
        )?;
        Ok(())
    }

    /// Marriage and divorce contracts touching any of the given members,
    /// newest first. Backs the family history view.
    pub fn contracts_for_members(
        &self,
        guild_id: GuildId,
        members: &[UserId],
    ) -> Result<(Vec<MarriageContract>, Vec<DivorceContract>), StoreError> {
        if members.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let placeholders = members.iter().map(|_| "?").collect::<Vec<_>>().join(",");

        let mut params_vec: Vec<i64> = vec![to_db(guild_id)];
        params_vec.extend(members.iter().map(|user_id| to_db(*user_id)));
        params_vec.extend(members.iter().map(|user_id| to_db(*user_id)));

        let marriage_sql = format!(
            "SELECT contract_id, guild_id, a_id, b_id, terms, status, created_at, accepted_at
             FROM marriage_contracts
             WHERE guild_id = ?1 AND (a_id IN ({placeholders}) OR b_id IN ({placeholders}))
             ORDER BY created_at DESC"
        );
        let mut stmt = self.conn.prepare(&marriage_sql)?;
        let marriages = stmt
            .query_map(rusqlite::params_from_iter(&params_vec), read_marriage_contract)?
            .collect::<Result<Vec<_>, _>>()?;

        let divorce_sql = format!(
            "SELECT contract_id, guild_id, a_id, b_id, split_mode, percent_for_a,
                    penalty_from, penalty_to, penalty_coins, status, created_at, expires_at
             FROM divorce_contracts
             WHERE guild_id = ?1 AND (a_id IN ({placeholders}) OR b_id IN ({placeholders}))
             ORDER BY created_at DESC"
        );
        let mut stmt = self.conn.prepare(&divorce_sql)?;
        let divorces = stmt
            .query_map(rusqlite::params_from_iter(&params_vec), read_divorce_contract)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((marriages, divorces))
    }

    pub fn append_contract_event(&mut self, event: &ContractEvent) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO contract_events (contract_id, kind, actor_id, message, ts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.contract_id,
                event.kind.as_str(),
                event.actor_id.map(to_db),
                event.message,
                event.ts as i64,
            ],
        )?;
        Ok(())
    }

    pub fn contract_events(&self, contract_id: &str) -> Result<Vec<ContractEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT contract_id, kind, actor_id, message, ts
             FROM contract_events WHERE contract_id = ?1 ORDER BY id ASC",
        )?;
        let events = stmt
            .query_map(params![contract_id], |row| {
                let kind: String = row.get(1)?;
                Ok(ContractEvent {
                    contract_id: row.get(0)?,
                    kind: ContractKind::parse(&kind).unwrap_or(ContractKind::Marriage),
                    actor_id: row.get::<_, Option<i64>>(2)?.map(from_db),
                    message: row.get(3)?,
                    ts: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    // -----------------------------------------------------------------------
    // Settings, owners, kv
    // -----------------------------------------------------------------------

    /// Lazily defaulted: a guild with no row gets the default settings
    /// without one being written.
    pub fn guild_settings(&self, guild_id: GuildId) -> Result<GuildSettings, StoreError> {
        let settings = self
            .conn
            .query_row(
                "SELECT guild_id, theme, rtl, avatars, log_chan
                 FROM guild_settings WHERE guild_id = ?1",
                params![to_db(guild_id)],
                |row| {
                    Ok(GuildSettings {
                        guild_id: from_db(row.get::<_, i64>(0)?),
                        theme: row.get(1)?,
                        rtl: row.get::<_, i64>(2)? != 0,
                        avatars: row.get::<_, i64>(3)? != 0,
                        log_channel: row.get::<_, Option<i64>>(4)?.map(from_db),
                    })
                },
            )
            .optional()?;
        Ok(settings.unwrap_or_else(|| GuildSettings::defaults(guild_id)))
    }

    pub fn upsert_guild_settings(&mut self, settings: &GuildSettings) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO guild_settings (guild_id, theme, rtl, avatars, log_chan)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(guild_id) DO UPDATE SET
               theme = excluded.theme,
               rtl = excluded.rtl,
               avatars = excluded.avatars,
               log_chan = excluded.log_chan",
            params![
                to_db(settings.guild_id),
                settings.theme,
                settings.rtl as i64,
                settings.avatars as i64,
                settings.log_channel.map(to_db),
            ],
        )?;
        Ok(())
    }

    pub fn add_owner(&mut self, guild_id: GuildId, user_id: UserId) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO owners (guild_id, user_id) VALUES (?1, ?2)",
            params![to_db(guild_id), to_db(user_id)],
        )?;
        Ok(())
    }

    pub fn remove_owner(&mut self, guild_id: GuildId, user_id: UserId) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM owners WHERE guild_id = ?1 AND user_id = ?2",
            params![to_db(guild_id), to_db(user_id)],
        )?;
        Ok(())
    }

    pub fn owners(&self, guild_id: GuildId) -> Result<Vec<UserId>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM owners WHERE guild_id = ?1 ORDER BY user_id")?;
        let owners = stmt
            .query_map(params![to_db(guild_id)], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(owners.into_iter().map(from_db).collect())
    }

    pub fn is_listed_owner(&self, guild_id: GuildId, user_id: UserId) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM owners WHERE guild_id = ?1 AND user_id = ?2 LIMIT 1",
                params![to_db(guild_id), to_db(user_id)],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn set_kv(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO global_kv (k, v) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_kv(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT v FROM global_kv WHERE k = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn stats(&self) -> Result<LedgerStats, StoreError> {
        let count = |sql: &str| -> Result<u64, StoreError> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok(LedgerStats {
            relations: count("SELECT COUNT(*) FROM relations")?,
            families: count("SELECT COUNT(*) FROM relations WHERE kind = 'family'")?,
            marriages: count("SELECT COUNT(*) FROM relations WHERE kind = 'marriage'")?,
            wallets: count("SELECT COUNT(*) FROM wallets")?,
        })
    }
}

fn read_relation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relation> {
    let kind: String = row.get(2)?;
    Ok(Relation {
        rel_id: row.get(0)?,
        guild_id: from_db(row.get::<_, i64>(1)?),
        kind: RelationKind::parse(&kind).unwrap_or(RelationKind::Family),
        name: row.get(3)?,
        since: row.get::<_, i64>(4)? as u64,
        wallet_id: row.get(5)?,
    })
}

fn read_marriage_contract(row: &rusqlite::Row<'_>) -> rusqlite::Result<MarriageContract> {
    let status: String = row.get(5)?;
    Ok(MarriageContract {
        contract_id: row.get(0)?,
        guild_id: from_db(row.get::<_, i64>(1)?),
        a_id: from_db(row.get::<_, i64>(2)?),
        b_id: from_db(row.get::<_, i64>(3)?),
        terms: row.get(4)?,
        status: MarriageStatus::parse(&status).unwrap_or(MarriageStatus::Pending),
        created_at: row.get::<_, i64>(6)? as u64,
        accepted_at: row.get::<_, Option<i64>>(7)?.map(|ts| ts as u64),
    })
}

fn read_divorce_contract(row: &rusqlite::Row<'_>) -> rusqlite::Result<DivorceContract> {
    let split: String = row.get(4)?;
    let penalty_from: Option<i64> = row.get(6)?;
    let penalty_to: Option<i64> = row.get(7)?;
    let penalty_coins: i64 = row.get(8)?;
    let status: String = row.get(9)?;

    let penalty = match (penalty_from, penalty_to) {
        (Some(from), Some(to)) if penalty_coins > 0 => Some(Penalty {
            from: from_db(from),
            to: from_db(to),
            coins: penalty_coins,
        }),
        _ => None,
    };

    Ok(DivorceContract {
        contract_id: row.get(0)?,
        guild_id: from_db(row.get::<_, i64>(1)?),
        a_id: from_db(row.get::<_, i64>(2)?),
        b_id: from_db(row.get::<_, i64>(3)?),
        split_mode: SplitMode::parse(&split).unwrap_or(SplitMode::Equal),
        percent_for_a: row.get::<_, i64>(5)?.clamp(0, 100) as u8,
        penalty,
        status: DivorceStatus::parse(&status).unwrap_or(DivorceStatus::Pending),
        created_at: row.get::<_, i64>(10)? as u64,
        expires_at: row.get::<_, i64>(11)? as u64,
    })
}
