use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::game::Game;
use crate::wager::UserId;

pub type SeedId = Uuid;

/// Seed lifecycle: `Active -> Rotating -> Revealed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeedStatus {
    Active,
    Rotating,
    Revealed,
}

impl SeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeedStatus::Active => "ACTIVE",
            SeedStatus::Rotating => "ROTATING",
            SeedStatus::Revealed => "REVEALED",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: SeedStatus) -> bool {
        matches!(
            (self, next),
            (SeedStatus::Active, SeedStatus::Rotating) | (SeedStatus::Rotating, SeedStatus::Revealed)
        )
    }
}

impl FromStr for SeedStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ACTIVE" => Ok(Self::Active),
            "ROTATING" => Ok(Self::Rotating),
            "REVEALED" => Ok(Self::Revealed),
            _ => Err("valid values: ACTIVE, ROTATING, REVEALED"),
        }
    }
}

/// A committed server seed. One `Active` seed exists per (user, game).
///
/// `secret` is never serialized; it only leaves the engine through
/// `revealed` once the seed has been rotated out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSeed {
    pub id: SeedId,
    pub user: UserId,
    pub game: Game,
    pub hash: String,
    #[serde(skip)]
    pub secret: String,
    pub client_seed: String,
    pub status: SeedStatus,
    pub revealed: Option<String>,
    pub created_at_ms: u64,
    pub rotated_at_ms: Option<u64>,
}

impl ServerSeed {
    pub fn is_active(&self) -> bool {
        self.status == SeedStatus::Active
    }
}

/// What a player sees before wagering: the hash, their client seed and the
/// nonce the next wager will use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
}
