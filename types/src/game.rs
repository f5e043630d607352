use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::amount::Multiplier;

/// Games settled by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Game {
    Limbo,
    Dice,
    Plinko,
}

impl Game {
    pub const ALL: [Game; 3] = [Game::Limbo, Game::Dice, Game::Plinko];

    pub fn as_str(&self) -> &'static str {
        match self {
            Game::Limbo => "limbo",
            Game::Dice => "dice",
            Game::Plinko => "plinko",
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Game {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "limbo" => Ok(Self::Limbo),
            "dice" => Ok(Self::Dice),
            "plinko" => Ok(Self::Plinko),
            _ => Err("valid values: limbo, dice, plinko"),
        }
    }
}

/// Which side of the target a dice roll must land on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiceDirection {
    Under,
    Over,
}

impl DiceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiceDirection::Under => "under",
            DiceDirection::Over => "over",
        }
    }
}

impl FromStr for DiceDirection {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "under" => Ok(Self::Under),
            "over" => Ok(Self::Over),
            _ => Err("valid values: under, over"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlinkoRisk {
    Low,
    Medium,
    High,
}

impl PlinkoRisk {
    pub const ALL: [PlinkoRisk; 3] = [PlinkoRisk::Low, PlinkoRisk::Medium, PlinkoRisk::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlinkoRisk::Low => "low",
            PlinkoRisk::Medium => "medium",
            PlinkoRisk::High => "high",
        }
    }
}

impl FromStr for PlinkoRisk {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err("valid values: low, medium, high"),
        }
    }
}

/// Player-chosen parameters, fixed before any randomness is derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum WagerParams {
    Limbo {
        target: Multiplier,
    },
    /// `target` is in hundredths on the 0.00..=99.99 roll scale.
    Dice {
        target: u32,
        direction: DiceDirection,
    },
    Plinko {
        rows: u8,
        risk: PlinkoRisk,
    },
}

impl WagerParams {
    pub fn game(&self) -> Game {
        match self {
            WagerParams::Limbo { .. } => Game::Limbo,
            WagerParams::Dice { .. } => Game::Dice,
            WagerParams::Plinko { .. } => Game::Plinko,
        }
    }

    /// Compact, stable rendering stored as the wager's target parameter.
    pub fn describe(&self) -> String {
        match self {
            WagerParams::Limbo { target } => format!("{:.2}", target.as_f64()),
            WagerParams::Dice { target, direction } => format!(
                "{}:{}.{:02}",
                direction.as_str(),
                target / 100,
                target % 100
            ),
            WagerParams::Plinko { rows, risk } => format!("{}:{}", rows, risk.as_str()),
        }
    }

    /// Inverse of [`WagerParams::describe`].
    pub fn parse(game: Game, description: &str) -> Option<Self> {
        match game {
            Game::Limbo => Some(WagerParams::Limbo {
                target: Multiplier(parse_hundredths(description)?),
            }),
            Game::Dice => {
                let (direction, target) = description.split_once(':')?;
                Some(WagerParams::Dice {
                    target: u32::try_from(parse_hundredths(target)?).ok()?,
                    direction: direction.parse().ok()?,
                })
            }
            Game::Plinko => {
                let (rows, risk) = description.split_once(':')?;
                Some(WagerParams::Plinko {
                    rows: rows.parse().ok()?,
                    risk: risk.parse().ok()?,
                })
            }
        }
    }
}

/// Parse `"49.50"` into `4950`. Exactly two decimals are required.
fn parse_hundredths(value: &str) -> Option<u64> {
    let (whole, fraction) = value.split_once('.')?;
    if fraction.len() != 2 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: u64 = whole.parse().ok()?;
    let fraction: u64 = fraction.parse().ok()?;
    whole.checked_mul(100)?.checked_add(fraction)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Win,
    Lose,
}

impl Outcome {
    pub fn is_win(&self) -> bool {
        matches!(self, Outcome::Win)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Win => "WIN",
            Outcome::Lose => "LOSE",
        }
    }
}

impl FromStr for Outcome {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "WIN" => Ok(Self::Win),
            "LOSE" => Ok(Self::Lose),
            _ => Err("valid values: WIN, LOSE"),
        }
    }
}
