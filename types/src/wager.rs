use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::amount::{Cents, Multiplier};
use crate::balance::Currency;
use crate::game::{Game, Outcome};
use crate::seed::SeedId;

pub type UserId = String;
pub type WagerId = Uuid;

/// Longest user id accepted from callers.
pub const MAX_USER_ID_LEN: usize = 64;

/// Longest client seed accepted from callers.
pub const MAX_CLIENT_SEED_LEN: usize = 64;

/// A settled bet. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wager {
    pub id: WagerId,
    pub user: UserId,
    pub game: Game,
    pub currency: Currency,
    pub amount: Cents,
    pub target_parameter: String,
    pub result_parameter: String,
    pub outcome: Outcome,
    pub multiplier: Multiplier,
    pub payout: Cents,
    pub profit: Cents,
    /// House edge in force when the wager settled; needed to replay limbo.
    pub house_edge: f64,
    pub nonce: u64,
    pub server_seed_id: SeedId,
    pub server_seed_hash: String,
    pub client_seed: String,
    /// Set when this wager risks the payout of an earlier one.
    pub parent_id: Option<WagerId>,
    pub created_at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Stake,
    Payout,
    Grant,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Stake => "stake",
            EntryKind::Payout => "payout",
            EntryKind::Grant => "grant",
        }
    }
}

impl FromStr for EntryKind {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "stake" => Ok(Self::Stake),
            "payout" => Ok(Self::Payout),
            "grant" => Ok(Self::Grant),
            _ => Err("valid values: stake, payout, grant"),
        }
    }
}

/// Append-only balance movement. Stakes carry a negative amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user: UserId,
    pub wager_id: Option<WagerId>,
    pub kind: EntryKind,
    pub currency: Currency,
    pub amount: Cents,
    pub balance_after: Cents,
    pub created_at_ms: u64,
}

/// Reject empty, oversized or non-printable identifiers.
pub fn valid_identifier(value: &str, max_len: usize) -> bool {
    !value.is_empty()
        && value.len() <= max_len
        && value
            .chars()
            .all(|c| c.is_ascii_graphic())
}
