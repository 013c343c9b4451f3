//! Abstract personal-balance capability backed by the external coins
//! service. Failures are uniform: the caller only learns that an operation
//! was not applied, never whether funds or transport were at fault.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use records::UserId;

#[derive(Debug, Error)]
pub enum CoinError {
    #[error("coin ledger rejected the operation ({0})")]
    NotApplied(String),

    #[error("coin ledger transport failure: {0}")]
    Transport(String),

    #[error("no coin ledger backend is configured")]
    NoBackend,
}

#[async_trait]
pub trait CoinLedger: Send + Sync {
    async fn balance(&self, user_id: UserId) -> Result<i64, CoinError>;

    /// Adds coins to the user's personal balance. `amount` must be > 0.
    async fn credit(&self, user_id: UserId, amount: i64) -> Result<(), CoinError>;

    /// Removes coins from the user's personal balance. `amount` must be > 0.
    /// Not applied when the balance cannot cover it.
    async fn debit(&self, user_id: UserId, amount: i64) -> Result<(), CoinError>;
}

/// Stand-in when no coins backend is configured: balances read as zero,
/// credits are acknowledged and dropped, debits are refused. Mirrors the
/// original adapter's behavior with an empty base URL.
#[derive(Debug, Default)]
pub struct NullCoinLedger;

#[async_trait]
impl CoinLedger for NullCoinLedger {
    async fn balance(&self, _user_id: UserId) -> Result<i64, CoinError> {
        Ok(0)
    }

    async fn credit(&self, _user_id: UserId, _amount: i64) -> Result<(), CoinError> {
        Ok(())
    }

    async fn debit(&self, _user_id: UserId, _amount: i64) -> Result<(), CoinError> {
        Err(CoinError::NoBackend)
    }
}

/// How the backend expects spends to be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendMode {
    /// POST a negative amount to the add endpoint.
    AddNegative,
    /// Read the balance, then POST the reduced value to the set endpoint.
    GetThenSet,
}

#[derive(Debug, Clone)]
pub struct CoinLedgerConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// `true` sends `Authorization: Bearer`, otherwise `X-API-Key`.
    pub bearer_auth: bool,
    pub get_balance_path: String,
    pub add_coins_path: String,
    pub set_coins_path: String,
    pub spend_mode: SpendMode,
}

impl CoinLedgerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            bearer_auth: false,
            get_balance_path: "/users/{user_id}/coins".to_string(),
            add_coins_path: "/users/{user_id}/coins/add".to_string(),
            set_coins_path: "/users/{user_id}/coins/set".to_string(),
            spend_mode: SpendMode::AddNegative,
        }
    }

    /// Reads `COINS_BASE_URL`, `COINS_API_KEY`, `COINS_AUTH_SCHEME`
    /// (`bearer`|`raw`), the `COINS_*_PATH` overrides, and
    /// `COINS_SPEND_MODE` (`add_negative`|`set`). `None` without a base URL.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("COINS_BASE_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        let mut config = Self::new(base_url);
        config.api_key = std::env::var("COINS_API_KEY").ok().filter(|key| !key.is_empty());
        config.bearer_auth = std::env::var("COINS_AUTH_SCHEME")
            .map(|scheme| scheme.eq_ignore_ascii_case("bearer"))
            .unwrap_or(false);
        if let Ok(path) = std::env::var("COINS_GET_BALANCE_PATH") {
            config.get_balance_path = path;
        }
        if let Ok(path) = std::env::var("COINS_ADD_COINS_PATH") {
            config.add_coins_path = path;
        }
        if let Ok(path) = std::env::var("COINS_SET_COINS_PATH") {
            config.set_coins_path = path;
        }
        if let Ok(mode) = std::env::var("COINS_SPEND_MODE") {
            if mode.eq_ignore_ascii_case("set") {
                config.spend_mode = SpendMode::GetThenSet;
            }
        }
        Some(config)
    }
}

pub struct HttpCoinLedger {
    client: reqwest::Client,
    config: CoinLedgerConfig,
}

impl HttpCoinLedger {
    pub fn new(config: CoinLedgerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, template: &str, user_id: UserId) -> String {
        let path = template.replace("{user_id}", &user_id.to_string());
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) if self.config.bearer_auth => request.bearer_auth(key),
            Some(key) => request.header("X-API-Key", key),
            None => request,
        }
    }

    async fn add(&self, user_id: UserId, amount: i64) -> Result<(), CoinError> {
        let url = self.url(&self.config.add_coins_path, user_id);
        let response = self
            .authed(self.client.post(&url).json(&json!({ "amount": amount })))
            .send()
            .await
            .map_err(|err| CoinError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(CoinError::NotApplied(format!(
                "add returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn set(&self, user_id: UserId, balance: i64) -> Result<(), CoinError> {
        let url = self.url(&self.config.set_coins_path, user_id);
        let response = self
            .authed(self.client.post(&url).json(&json!({ "balance": balance })))
            .send()
            .await
            .map_err(|err| CoinError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(CoinError::NotApplied(format!(
                "set returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CoinLedger for HttpCoinLedger {
    async fn balance(&self, user_id: UserId) -> Result<i64, CoinError> {
        let url = self.url(&self.config.get_balance_path, user_id);
        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|err| CoinError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(CoinError::NotApplied(format!(
                "balance returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| CoinError::Transport(err.to_string()))?;
        Ok(body.get("balance").and_then(|value| value.as_i64()).unwrap_or(0))
    }

    async fn credit(&self, user_id: UserId, amount: i64) -> Result<(), CoinError> {
        debug!(user_id, amount, "crediting personal balance");
        self.add(user_id, amount).await
    }

    async fn debit(&self, user_id: UserId, amount: i64) -> Result<(), CoinError> {
        debug!(user_id, amount, mode = ?self.config.spend_mode, "debiting personal balance");
        match self.config.spend_mode {
            SpendMode::AddNegative => self.add(user_id, -amount).await,
            SpendMode::GetThenSet => {
                let current = self.balance(user_id).await?;
                if current < amount {
                    return Err(CoinError::NotApplied(format!(
                        "balance {current} below {amount}"
                    )));
                }
                self.set(user_id, current - amount).await
            }
        }
    }
}
