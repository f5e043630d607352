//! Common types for fairbet: amounts, games, balances, seeds, wagers and the
//! JSON bodies exchanged with the server.

pub mod amount;
pub mod api;
pub mod balance;
pub mod game;
pub mod seed;
pub mod wager;

pub use amount::{AmountError, Cents, Multiplier, CENTS_PER_UNIT, MULTIPLIER_SCALE};
pub use balance::{Balance, BalanceError, Currency};
pub use game::{DiceDirection, Game, Outcome, PlinkoRisk, WagerParams};
pub use seed::{Commitment, SeedId, SeedStatus, ServerSeed};
pub use wager::{
    valid_identifier, EntryKind, LedgerEntry, UserId, Wager, WagerId, MAX_CLIENT_SEED_LEN,
    MAX_USER_ID_LEN,
};
