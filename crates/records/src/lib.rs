//! Cross-boundary records shared by the ledger kernel, the HTTP facade, and
//! the CLI. Every row that leaves the storage layer is materialized into one
//! of these types exactly once.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod serde_u64_string;

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Discord-style snowflake. Serialized as a string because snowflakes exceed
/// the 2^53 range JSON consumers can read losslessly.
pub type UserId = u64;
pub type GuildId = u64;

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Marriage,
    #[serde(rename = "friend")]
    Friendship,
    Sibling,
    Family,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Marriage => "marriage",
            Self::Friendship => "friend",
            Self::Sibling => "sibling",
            Self::Family => "family",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "marriage" => Some(Self::Marriage),
            "friend" => Some(Self::Friendship),
            "sibling" => Some(Self::Sibling),
            "family" => Some(Self::Family),
            _ => None,
        }
    }

    /// Duo kinds require exactly two distinct members; a family takes one or
    /// more and grows over time.
    pub fn is_duo(self) -> bool {
        !matches!(self, Self::Family)
    }

    /// Marriage and family always pool a shared wallet; friendship and
    /// sibling never do.
    pub fn pools_wallet(self) -> bool {
        matches!(self, Self::Marriage | Self::Family)
    }

    /// Preference order used when a spend does not name a kind explicitly.
    pub const SPEND_ORDER: [RelationKind; 4] = [
        RelationKind::Marriage,
        RelationKind::Family,
        RelationKind::Friendship,
        RelationKind::Sibling,
    ];
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Relation {
    pub rel_id: String,
    #[serde(with = "serde_u64_string")]
    pub guild_id: GuildId,
    pub kind: RelationKind,
    /// Display name, family relations only.
    pub name: Option<String>,
    pub since: u64,
    pub wallet_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub wallet_id: String,
    pub balance: i64,
}

/// Wallet id derived from the owning relation.
pub fn wallet_id_for(rel_id: &str) -> String {
    format!("rel:{rel_id}")
}

// ---------------------------------------------------------------------------
// Kinship
// ---------------------------------------------------------------------------

/// Directed parent -> child fact, global per deployment. Used only to derive
/// generation depth for tree display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct KinEdge {
    #[serde(with = "serde_u64_string")]
    pub parent_id: UserId,
    #[serde(with = "serde_u64_string")]
    pub child_id: UserId,
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarriageStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl MarriageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for MarriageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarriageContract {
    pub contract_id: String,
    #[serde(with = "serde_u64_string")]
    pub guild_id: GuildId,
    #[serde(with = "serde_u64_string")]
    pub a_id: UserId,
    #[serde(with = "serde_u64_string")]
    pub b_id: UserId,
    /// Free-text terms summary shown to both parties before acceptance.
    pub terms: String,
    pub status: MarriageStatus,
    pub created_at: u64,
    pub accepted_at: Option<u64>,
}

impl MarriageContract {
    pub fn is_party(&self, user_id: UserId) -> bool {
        user_id == self.a_id || user_id == self.b_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    Equal,
    Percent,
}

impl SplitMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::Percent => "percent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "equal" => Some(Self::Equal),
            "percent" => Some(Self::Percent),
            _ => None,
        }
    }
}

/// Coin transfer from one party's personal balance to the other's, executed
/// once when a divorce contract settles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Penalty {
    #[serde(with = "serde_u64_string")]
    pub from: UserId,
    #[serde(with = "serde_u64_string")]
    pub to: UserId,
    pub coins: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DivorceStatus {
    Pending,
    AAccepted,
    BAccepted,
    Accepted,
    Rejected,
    Expired,
    Completed,
}

impl DivorceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AAccepted => "a_accepted",
            Self::BAccepted => "b_accepted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "a_accepted" => Some(Self::AAccepted),
            "b_accepted" => Some(Self::BAccepted),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Terminal statuses admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Expired | Self::Completed)
    }
}

impl fmt::Display for DivorceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DivorceContract {
    pub contract_id: String,
    #[serde(with = "serde_u64_string")]
    pub guild_id: GuildId,
    #[serde(with = "serde_u64_string")]
    pub a_id: UserId,
    #[serde(with = "serde_u64_string")]
    pub b_id: UserId,
    pub split_mode: SplitMode,
    /// Share of the pooled balance awarded to party A, percent mode only.
    pub percent_for_a: u8,
    pub penalty: Option<Penalty>,
    pub status: DivorceStatus,
    pub created_at: u64,
    pub expires_at: u64,
}

impl DivorceContract {
    pub fn is_party(&self, user_id: UserId) -> bool {
        user_id == self.a_id || user_id == self.b_id
    }

    /// The deadline binds the offer, not the settlement: once both parties
    /// have signed, the contract can no longer lapse.
    pub fn is_expired_at(&self, now: u64) -> bool {
        matches!(
            self.status,
            DivorceStatus::Pending | DivorceStatus::AAccepted | DivorceStatus::BAccepted
        ) && now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Marriage,
    Divorce,
}

impl ContractKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Marriage => "marriage",
            Self::Divorce => "divorce",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "marriage" => Some(Self::Marriage),
            "divorce" => Some(Self::Divorce),
            _ => None,
        }
    }
}

/// Append-only audit row. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractEvent {
    pub contract_id: String,
    pub kind: ContractKind,
    #[serde(default, with = "serde_u64_string::option")]
    pub actor_id: Option<UserId>,
    pub message: String,
    pub ts: u64,
}

// ---------------------------------------------------------------------------
// Guild settings
// ---------------------------------------------------------------------------

pub const TREE_THEMES: [&str; 5] = ["kawaii", "sakura", "royal", "neon", "arabesque"];
pub const DEFAULT_THEME: &str = "kawaii";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuildSettings {
    #[serde(with = "serde_u64_string")]
    pub guild_id: GuildId,
    pub theme: String,
    pub rtl: bool,
    pub avatars: bool,
    #[serde(default, with = "serde_u64_string::option")]
    pub log_channel: Option<u64>,
}

impl GuildSettings {
    pub fn defaults(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            theme: DEFAULT_THEME.to_string(),
            rtl: false,
            avatars: true,
            log_channel: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tree layout
// ---------------------------------------------------------------------------

/// Rendering style resolved from guild settings plus per-request overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeStyle {
    pub theme: String,
    pub rtl: bool,
    pub avatars: bool,
}

/// One generation row of the family tree, shallowest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeLevel {
    pub depth: usize,
    pub members: Vec<String>,
}

/// Everything the external renderer needs to draw a family tree. The kernel
/// never inspects image bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeLayout {
    pub rel_id: String,
    pub family_name: String,
    pub levels: Vec<TreeLevel>,
    pub edges: Vec<KinEdge>,
    pub style: TreeStyle,
}

// ---------------------------------------------------------------------------
// API envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArity,
    DuplicateMarriage,
    NotAFamily,
    NotFound,
    Unauthorized,
    AlreadyFinalized,
    Expired,
    InsufficientFunds,
    ExternalLedgerUnavailable,
    InvalidRequest,
    BadSecret,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletSummary {
    pub rel_id: String,
    pub wallet_id: String,
    pub kind: RelationKind,
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletsResponse {
    pub schema_version: String,
    #[serde(with = "serde_u64_string")]
    pub user_id: UserId,
    pub wallets: Vec<WalletSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationSummary {
    pub rel_id: String,
    pub kind: RelationKind,
    pub name: Option<String>,
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationsResponse {
    pub schema_version: String,
    #[serde(with = "serde_u64_string")]
    pub user_id: UserId,
    pub relations: Vec<RelationSummary>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpendRequest {
    #[serde(with = "serde_u64_string")]
    pub guild_id: GuildId,
    #[serde(with = "serde_u64_string")]
    pub user_id: UserId,
    pub amount: i64,
    #[serde(default)]
    pub prefer_type: Option<String>,
}

/// Where a mixed-source spend was ultimately covered from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "rel_id")]
pub enum SpendSource {
    Shared(String),
    Mixed(String),
    Personal,
}

impl fmt::Display for SpendSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared(rel_id) => write!(f, "shared:{rel_id}"),
            Self::Mixed(rel_id) => write!(f, "mixed:{rel_id}"),
            Self::Personal => f.write_str("personal"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpendResponse {
    pub schema_version: String,
    pub ok: bool,
    pub source: SpendSource,
}

impl SpendResponse {
    pub fn covered(source: SpendSource) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            ok: true,
            source,
        }
    }
}

/// Counters surfaced by the admin stats command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LedgerStats {
    pub relations: u64,
    pub families: u64,
    pub marriages: u64,
    pub wallets: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_kind_round_trips_wire_names() {
        for kind in [
            RelationKind::Marriage,
            RelationKind::Friendship,
            RelationKind::Sibling,
            RelationKind::Family,
        ] {
            assert_eq!(RelationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RelationKind::parse("cousin"), None);
    }

    #[test]
    fn divorce_status_terminality() {
        assert!(DivorceStatus::Completed.is_terminal());
        assert!(DivorceStatus::Rejected.is_terminal());
        assert!(DivorceStatus::Expired.is_terminal());
        assert!(!DivorceStatus::Pending.is_terminal());
        assert!(!DivorceStatus::AAccepted.is_terminal());
        assert!(!DivorceStatus::Accepted.is_terminal());
    }

    #[test]
    fn user_ids_serialize_as_strings() {
        let edge = KinEdge {
            parent_id: 919238479238479238,
            child_id: 42,
        };
        let json = serde_json::to_value(edge).expect("edge serializes");
        assert_eq!(json["parent_id"], "919238479238479238");
        assert_eq!(json["child_id"], "42");

        let back: KinEdge = serde_json::from_value(json).expect("edge deserializes");
        assert_eq!(back, edge);
    }

    #[test]
    fn spend_source_display_matches_wire_format() {
        assert_eq!(
            SpendSource::Shared("marriage:1:2".into()).to_string(),
            "shared:marriage:1:2"
        );
        assert_eq!(
            SpendSource::Mixed("family:9:abc".into()).to_string(),
            "mixed:family:9:abc"
        );
        assert_eq!(SpendSource::Personal.to_string(), "personal");
    }

    #[test]
    fn contract_expiry_is_lazy_and_status_aware() {
        let contract = DivorceContract {
            contract_id: "div:1:2:100".into(),
            guild_id: 7,
            a_id: 1,
            b_id: 2,
            split_mode: SplitMode::Equal,
            percent_for_a: 50,
            penalty: None,
            status: DivorceStatus::AAccepted,
            created_at: 100,
            expires_at: 160,
        };
        assert!(!contract.is_expired_at(160));
        assert!(contract.is_expired_at(161));

        let accepted = DivorceContract {
            status: DivorceStatus::Accepted,
            ..contract.clone()
        };
        assert!(!accepted.is_expired_at(10_000));

        let completed = DivorceContract {
            status: DivorceStatus::Completed,
            ..contract
        };
        assert!(!completed.is_expired_at(10_000));
    }
}
