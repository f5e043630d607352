//! Fairbet execution layer.
//!
//! This crate turns a wager request into a settled, verifiable record:
//! outcomes are derived from committed server seeds ([`rng_pipeline`]),
//! resolved per game ([`casino`]) and settled atomically against a
//! [`ledger::Ledger`] by [`settlement::Engine`].
//!
//! ## Determinism requirements
//! - Resolvers must be pure in `(server_seed, client_seed, nonce, params, edge)`.
//! - Wall-clock time is only read through [`clock::Clock`], never inside a resolver.
//! - Settlement either commits every row it touched or none of them.
//!
//! ## Placing a wager (example)
//! ```rust,ignore
//! use std::sync::Arc;
//! use fairbet_execution::{Engine, EngineConfig, GameRegistry, MemoryLedger, SystemClock};
//! use fairbet_types::{Cents, Currency, Multiplier, WagerParams};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = Engine::new(
//!     Arc::new(MemoryLedger::default()),
//!     Arc::new(GameRegistry::new()),
//!     Arc::new(SystemClock),
//!     EngineConfig::default(),
//! );
//! engine.grant("alice", Currency::Gc, Cents(10_000)).await?;
//! let settled = engine
//!     .place(
//!         "alice",
//!         Currency::Gc,
//!         Cents(100),
//!         WagerParams::Limbo { target: Multiplier(200) },
//!         None,
//!     )
//!     .await?;
//! println!("{}", settled.wager.result_parameter);
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod casino;
pub mod clock;
pub mod edge_cache;
pub mod ledger;
pub mod rng_pipeline;
pub mod settlement;
pub mod simulation;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use activity::ActivityFeed;
pub use casino::{
    DiceConfig, GameConfig, GameError, GameRegistry, LimboConfig, PayoutBasis, Paytable,
    PaytableSource, PlinkoConfig, Resolution, Resolver,
};
pub use clock::{Clock, SystemClock};
pub use edge_cache::{EdgeError, HouseEdge, HouseEdgeCache};
pub use ledger::{Ledger, LedgerBackend, LedgerTx, MemoryLedger, SqliteLedger, StoreError};
pub use rng_pipeline::{
    compute_commit, derive_float, derive_float_at_round, verify_commit_reveal,
    CommitRevealError, CommitRevealPair, Fairness,
};
pub use settlement::{recompute, seed_matches, Engine, EngineConfig, SettleError, Settled};
pub use simulation::{simulate, Stats};
