//! JSON request and response bodies shared by the server and its clients.

use serde::{Deserialize, Serialize};

use crate::amount::{Cents, Multiplier};
use crate::balance::{Balance, Currency};
use crate::game::{DiceDirection, Game, PlinkoRisk};
use crate::wager::{Wager, WagerId};

fn default_currency() -> Currency {
    Currency::Gc
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimboRequest {
    pub bet_amount: Cents,
    #[serde(default = "default_currency")]
    pub currency: Currency,
    pub target_multiplier: Multiplier,
    #[serde(default)]
    pub client_seed: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiceRequest {
    pub bet_amount: Cents,
    #[serde(default = "default_currency")]
    pub currency: Currency,
    /// Roll threshold on the 0.00..=99.99 scale, two decimals.
    pub target: f64,
    pub direction: DiceDirection,
    #[serde(default)]
    pub client_seed: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlinkoRequest {
    pub bet_amount: Cents,
    #[serde(default = "default_currency")]
    pub currency: Currency,
    pub rows: u8,
    pub risk: PlinkoRisk,
    #[serde(default)]
    pub client_seed: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RiskRequest {
    #[serde(default)]
    pub client_seed: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RotateRequest {
    #[serde(default)]
    pub client_seed: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub currency: Currency,
    pub amount: Cents,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseEdgeUpdate {
    /// Fraction in (0, 1), e.g. `0.04` for a 96% RTP game.
    pub house_edge: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WagerResponse {
    pub wager_id: WagerId,
    pub game: Game,
    pub win: bool,
    pub result_parameter: String,
    pub multiplier: Multiplier,
    pub payout: Cents,
    pub profit: Cents,
    /// Hash of the seed the *next* wager will use.
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
    pub currency: Currency,
    pub balance: Cents,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealResponse {
    pub old_server_seed: String,
    pub new_server_seed_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user: String,
    #[serde(flatten)]
    pub balance: Balance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Verified,
    Mismatch,
    PendingReveal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub wager_id: WagerId,
    pub status: VerifyStatus,
    pub stored_result: String,
    pub recomputed_result: Option<String>,
    pub server_seed: Option<String>,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameListing {
    pub game: Game,
    pub house_edge: f64,
    pub rtp_percent: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// A settled wager as announced on the live activity feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub wager_id: WagerId,
    pub user: String,
    pub game: Game,
    pub currency: Currency,
    pub amount: Cents,
    pub multiplier: Multiplier,
    pub payout: Cents,
    pub win: bool,
    pub created_at_ms: u64,
}

impl From<&Wager> for ActivityEvent {
    fn from(wager: &Wager) -> Self {
        Self {
            wager_id: wager.id,
            user: wager.user.clone(),
            game: wager.game,
            currency: wager.currency,
            amount: wager.amount,
            multiplier: wager.multiplier,
            payout: wager.payout,
            win: wager.outcome.is_win(),
            created_at_ms: wager.created_at_ms,
        }
    }
}
