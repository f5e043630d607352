//! Balance store and append-only ledger.
//!
//! Every write the engine makes for a user (balance, nonce counters, server
//! seeds, wagers, ledger entries) goes through [`Ledger::transact`]. A
//! transaction is scoped to one user, is serialised against every other
//! transaction for that user, and either commits all of its writes or none.
//!
//! Two backends are provided:
//! - [`MemoryLedger`]: per-user async mutexes over in-process rows.
//! - [`SqliteLedger`]: `BEGIN IMMEDIATE` transactions on a SQLite file.
//!
//! [`LedgerBackend`] picks one at runtime.

use fairbet_types::{Balance, Game, LedgerEntry, SeedId, ServerSeed, Wager, WagerId};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

/// Default bound on lock acquisition and on a transaction's total runtime.
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    /// The user's rows could not be locked, or the transaction ran past its
    /// deadline before commit. Nothing was written.
    #[error("ledger transaction timed out")]
    Timeout,
    /// Another writer holds the database. Safe to retry.
    #[error("ledger busy: {0}")]
    Busy(String),
    #[error("ledger storage error: {0}")]
    Backend(String),
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                Self::Busy(err.to_string())
            }
            _ => Self::Backend(err.to_string()),
        }
    }
}

/// Reads and writes available inside one user-scoped transaction.
///
/// Writes are only visible to the same transaction until it commits.
pub trait LedgerTx {
    fn user(&self) -> &str;

    fn balance(&mut self) -> Result<Balance, StoreError>;
    fn put_balance(&mut self, balance: &Balance) -> Result<(), StoreError>;

    /// Nonce the next wager for `game` will use, without consuming it.
    fn peek_nonce(&mut self, game: Game) -> Result<u64, StoreError>;
    /// Consume and return the next nonce for `game`.
    fn next_nonce(&mut self, game: Game) -> Result<u64, StoreError>;

    fn active_seed(&mut self, game: Game) -> Result<Option<ServerSeed>, StoreError>;
    fn find_seed(&mut self, id: SeedId) -> Result<Option<ServerSeed>, StoreError>;
    fn insert_seed(&mut self, seed: &ServerSeed) -> Result<(), StoreError>;
    /// Overwrite status, revealed value and rotation time of an existing seed.
    fn update_seed(&mut self, seed: &ServerSeed) -> Result<(), StoreError>;

    fn insert_wager(&mut self, wager: &Wager) -> Result<(), StoreError>;
    fn find_wager(&mut self, id: WagerId) -> Result<Option<Wager>, StoreError>;
    /// Whether any wager names `parent` as its parent.
    fn has_child(&mut self, parent: WagerId) -> Result<bool, StoreError>;
    /// Newest first.
    fn wagers(&mut self, game: Option<Game>, limit: usize) -> Result<Vec<Wager>, StoreError>;

    fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;
    /// Newest first.
    fn entries(&mut self, limit: usize) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// A transactional per-user store.
pub trait Ledger: Send + Sync + 'static {
    /// Run `f` inside a transaction over `user`'s rows.
    ///
    /// Commits when `f` returns `Ok` and the deadline has not passed; rolls
    /// back otherwise. Errors from the store itself are converted into `E`.
    fn transact<T, E, F>(&self, user: &str, f: F) -> impl Future<Output = Result<T, E>> + Send
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&mut dyn LedgerTx) -> Result<T, E> + Send + 'static;

    /// Look up a wager by id across all users.
    fn wager(&self, id: WagerId) -> impl Future<Output = Result<Option<Wager>, StoreError>> + Send;

    /// Look up one of `user`'s seeds by id.
    fn seed(
        &self,
        user: &str,
        id: SeedId,
    ) -> impl Future<Output = Result<Option<ServerSeed>, StoreError>> + Send;
}

/// Runtime choice of ledger backend.
pub enum LedgerBackend {
    Memory(MemoryLedger),
    Sqlite(SqliteLedger),
}

impl LedgerBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

impl Ledger for LedgerBackend {
    async fn transact<T, E, F>(&self, user: &str, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&mut dyn LedgerTx) -> Result<T, E> + Send + 'static,
    {
        match self {
            Self::Memory(ledger) => ledger.transact(user, f).await,
            Self::Sqlite(ledger) => ledger.transact(user, f).await,
        }
    }

    async fn wager(&self, id: WagerId) -> Result<Option<Wager>, StoreError> {
        match self {
            Self::Memory(ledger) => ledger.wager(id).await,
            Self::Sqlite(ledger) => ledger.wager(id).await,
        }
    }

    async fn seed(&self, user: &str, id: SeedId) -> Result<Option<ServerSeed>, StoreError> {
        match self {
            Self::Memory(ledger) => ledger.seed(user, id).await,
            Self::Sqlite(ledger) => ledger.seed(user, id).await,
        }
    }
}
