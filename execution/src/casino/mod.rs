//! Outcome resolvers.
//!
//! Every game follows the same shape: the player's parameters are fixed and
//! validated first, then the resolver turns the wager's [`Fairness`] inputs
//! and the current house edge into a [`Resolution`]. Resolvers never touch
//! balances; settlement is done by [`crate::settlement::Engine`].

use fairbet_types::{Game, Multiplier, Outcome, WagerParams};
use thiserror::Error;

use crate::edge_cache::HouseEdge;
use crate::rng_pipeline::Fairness;

pub mod dice;
pub mod limbo;
pub mod plinko;
pub mod registry;

pub use dice::Dice;
pub use limbo::{Limbo, PayoutBasis};
pub use plinko::{Paytable, PaytableSource, Plinko};
pub use registry::{DiceConfig, GameConfig, GameRegistry, LimboConfig, PlinkoConfig};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("{game} resolver received {got} parameters")]
    ParamsMismatch { game: Game, got: Game },
    #[error("target multiplier {got} outside [{min}, {max}]")]
    TargetMultiplierOutOfRange {
        got: Multiplier,
        min: Multiplier,
        max: Multiplier,
    },
    #[error("dice target {got} gives a win chance outside the allowed range")]
    DiceChanceOutOfRange { got: u32 },
    #[error("dice target {got} exceeds 99.99")]
    DiceTargetOutOfRange { got: u32 },
    #[error("plinko rows {got} outside [{min}, {max}]")]
    PlinkoRowsOutOfRange { got: u8, min: u8, max: u8 },
}

/// The result of resolving one wager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: Outcome,
    /// Multiplier applied to the stake; zero when nothing is paid back.
    pub multiplier: Multiplier,
    /// Game-specific rendering of what the randomness produced.
    pub result_parameter: String,
}

/// Game-specific outcome logic.
pub trait Resolver: Send + Sync {
    fn game(&self) -> Game;

    /// Reject parameters before any balance is touched.
    fn validate(&self, params: &WagerParams) -> Result<(), GameError>;

    /// Map the wager's randomness to a result. Must be pure in its inputs.
    fn resolve(
        &self,
        fairness: &Fairness<'_>,
        params: &WagerParams,
        edge: HouseEdge,
    ) -> Result<Resolution, GameError>;
}

/// Outcome label for a given payout multiplier: a wager wins when it returns
/// more than the stake.
pub(crate) fn outcome_for(multiplier: Multiplier) -> Outcome {
    if multiplier > Multiplier::ONE {
        Outcome::Win
    } else {
        Outcome::Lose
    }
}

pub(crate) fn mismatch(expected: Game, params: &WagerParams) -> GameError {
    GameError::ParamsMismatch {
        game: expected,
        got: params.game(),
    }
}
