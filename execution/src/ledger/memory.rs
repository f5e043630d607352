use fairbet_types::{Balance, Game, LedgerEntry, SeedId, ServerSeed, UserId, Wager, WagerId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use super::{Ledger, LedgerTx, StoreError, DEFAULT_TX_TIMEOUT};

#[derive(Default)]
struct UserRows {
    balance: Balance,
    nonces: HashMap<Game, u64>,
    seeds: Vec<ServerSeed>,
    wagers: Vec<Wager>,
    entries: Vec<LedgerEntry>,
}

/// Writes made by one transaction, applied to [`UserRows`] on commit.
struct Staged {
    balance: Balance,
    nonces: HashMap<Game, u64>,
    seeds: Vec<ServerSeed>,
    wagers: Vec<Wager>,
    entries: Vec<LedgerEntry>,
}

impl Staged {
    fn apply(self, rows: &mut UserRows) -> Vec<WagerId> {
        rows.balance = self.balance;
        rows.nonces = self.nonces;
        rows.seeds = self.seeds;
        let ids = self.wagers.iter().map(|wager| wager.id).collect();
        rows.wagers.extend(self.wagers);
        rows.entries.extend(self.entries);
        ids
    }
}

struct MemoryTx<'a> {
    user: &'a str,
    rows: &'a UserRows,
    staged: Staged,
}

impl<'a> MemoryTx<'a> {
    fn new(user: &'a str, rows: &'a UserRows) -> Self {
        Self {
            user,
            rows,
            staged: Staged {
                balance: rows.balance,
                nonces: rows.nonces.clone(),
                seeds: rows.seeds.clone(),
                wagers: Vec::new(),
                entries: Vec::new(),
            },
        }
    }

    fn all_wagers(&self) -> impl Iterator<Item = &Wager> {
        self.staged
            .wagers
            .iter()
            .rev()
            .chain(self.rows.wagers.iter().rev())
    }
}

impl LedgerTx for MemoryTx<'_> {
    fn user(&self) -> &str {
        self.user
    }

    fn balance(&mut self) -> Result<Balance, StoreError> {
        Ok(self.staged.balance)
    }

    fn put_balance(&mut self, balance: &Balance) -> Result<(), StoreError> {
        self.staged.balance = *balance;
        Ok(())
    }

    fn peek_nonce(&mut self, game: Game) -> Result<u64, StoreError> {
        Ok(self.staged.nonces.get(&game).copied().unwrap_or(0))
    }

    fn next_nonce(&mut self, game: Game) -> Result<u64, StoreError> {
        let counter = self.staged.nonces.entry(game).or_insert(0);
        let nonce = *counter;
        *counter += 1;
        Ok(nonce)
    }

    fn active_seed(&mut self, game: Game) -> Result<Option<ServerSeed>, StoreError> {
        Ok(self
            .staged
            .seeds
            .iter()
            .find(|seed| seed.game == game && seed.is_active())
            .cloned())
    }

    fn find_seed(&mut self, id: SeedId) -> Result<Option<ServerSeed>, StoreError> {
        Ok(self.staged.seeds.iter().find(|seed| seed.id == id).cloned())
    }

    fn insert_seed(&mut self, seed: &ServerSeed) -> Result<(), StoreError> {
        if self.staged.seeds.iter().any(|existing| existing.id == seed.id) {
            return Err(StoreError::Backend(format!("duplicate seed id {}", seed.id)));
        }
        self.staged.seeds.push(seed.clone());
        Ok(())
    }

    fn update_seed(&mut self, seed: &ServerSeed) -> Result<(), StoreError> {
        let existing = self
            .staged
            .seeds
            .iter_mut()
            .find(|existing| existing.id == seed.id)
            .ok_or_else(|| StoreError::Backend(format!("unknown seed id {}", seed.id)))?;
        existing.status = seed.status;
        existing.revealed = seed.revealed.clone();
        existing.rotated_at_ms = seed.rotated_at_ms;
        Ok(())
    }

    fn insert_wager(&mut self, wager: &Wager) -> Result<(), StoreError> {
        if self.all_wagers().any(|existing| existing.id == wager.id) {
            return Err(StoreError::Backend(format!("duplicate wager id {}", wager.id)));
        }
        self.staged.wagers.push(wager.clone());
        Ok(())
    }

    fn find_wager(&mut self, id: WagerId) -> Result<Option<Wager>, StoreError> {
        Ok(self.all_wagers().find(|wager| wager.id == id).cloned())
    }

    fn has_child(&mut self, parent: WagerId) -> Result<bool, StoreError> {
        Ok(self
            .all_wagers()
            .any(|wager| wager.parent_id == Some(parent)))
    }

    fn wagers(&mut self, game: Option<Game>, limit: usize) -> Result<Vec<Wager>, StoreError> {
        Ok(self
            .all_wagers()
            .filter(|wager| game.map_or(true, |game| wager.game == game))
            .take(limit)
            .cloned()
            .collect())
    }

    fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.staged.entries.push(entry.clone());
        Ok(())
    }

    fn entries(&mut self, limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .staged
            .entries
            .iter()
            .rev()
            .chain(self.rows.entries.iter().rev())
            .take(limit)
            .cloned()
            .collect())
    }
}

/// In-process ledger. One async mutex per user serialises transactions;
/// writes are staged and applied only on commit.
pub struct MemoryLedger {
    users: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<UserRows>>>>,
    owners: RwLock<HashMap<WagerId, UserId>>,
    timeout: Duration,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_TX_TIMEOUT)
    }
}

impl MemoryLedger {
    pub fn new(timeout: Duration) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    fn rows_for(&self, user: &str) -> Arc<tokio::sync::Mutex<UserRows>> {
        let mut users = match self.users.lock() {
            Ok(users) => users,
            Err(poisoned) => {
                tracing::warn!("memory ledger lock poisoned; recovering");
                poisoned.into_inner()
            }
        };
        users.entry(user.to_string()).or_default().clone()
    }

    fn owner_of(&self, id: WagerId) -> Option<UserId> {
        let owners = match self.owners.read() {
            Ok(owners) => owners,
            Err(poisoned) => poisoned.into_inner(),
        };
        owners.get(&id).cloned()
    }

    fn record_owner(&self, user: &str, ids: Vec<WagerId>) {
        if ids.is_empty() {
            return;
        }
        let mut owners = match self.owners.write() {
            Ok(owners) => owners,
            Err(poisoned) => poisoned.into_inner(),
        };
        for id in ids {
            owners.insert(id, user.to_string());
        }
    }

    async fn lock_rows(
        &self,
        user: &str,
    ) -> Result<tokio::sync::OwnedMutexGuard<UserRows>, StoreError> {
        let cell = self.rows_for(user);
        match tokio::time::timeout(self.timeout, cell.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!(user, timeout_ms = self.timeout.as_millis() as u64, "ledger lock timed out");
                Err(StoreError::Timeout)
            }
        }
    }
}

impl Ledger for MemoryLedger {
    async fn transact<T, E, F>(&self, user: &str, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&mut dyn LedgerTx) -> Result<T, E> + Send + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let mut guard = self.lock_rows(user).await?;

        let mut tx = MemoryTx::new(user, &guard);
        let value = f(&mut tx)?;
        let staged = tx.staged;

        if Instant::now() > deadline {
            tracing::warn!(user, "ledger transaction passed its deadline; rolled back");
            return Err(StoreError::Timeout.into());
        }
        let ids = staged.apply(&mut guard);
        self.record_owner(user, ids);
        Ok(value)
    }

    async fn wager(&self, id: WagerId) -> Result<Option<Wager>, StoreError> {
        let Some(user) = self.owner_of(id) else {
            return Ok(None);
        };
        let guard = self.lock_rows(&user).await?;
        Ok(guard.wagers.iter().find(|wager| wager.id == id).cloned())
    }

    async fn seed(&self, user: &str, id: SeedId) -> Result<Option<ServerSeed>, StoreError> {
        let guard = self.lock_rows(user).await?;
        Ok(guard.seeds.iter().find(|seed| seed.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairbet_types::{Cents, Currency};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Store(String),
        Rejected,
    }

    impl From<StoreError> for TestError {
        fn from(err: StoreError) -> Self {
            Self::Store(err.to_string())
        }
    }

    async fn balance_of(ledger: &MemoryLedger, user: &str) -> Balance {
        ledger
            .transact(user, |tx| tx.balance().map_err(TestError::from))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn commit_applies_writes() {
        let ledger = MemoryLedger::default();
        let nonce = ledger
            .transact("alice", |tx| {
                let mut balance = tx.balance()?;
                balance.credit(Currency::Gc, Cents(500)).unwrap();
                tx.put_balance(&balance)?;
                Ok::<_, TestError>(tx.next_nonce(Game::Dice)?)
            })
            .await
            .unwrap();
        assert_eq!(nonce, 0);
        assert_eq!(balance_of(&ledger, "alice").await.available_gc, Cents(500));
        assert_eq!(balance_of(&ledger, "bob").await, Balance::default());

        let next = ledger
            .transact("alice", |tx| Ok::<_, TestError>(tx.next_nonce(Game::Dice)?))
            .await
            .unwrap();
        assert_eq!(next, 1);
    }

    #[tokio::test]
    async fn error_rolls_back() {
        let ledger = MemoryLedger::default();
        let result: Result<(), _> = ledger
            .transact("alice", |tx| {
                let mut balance = tx.balance()?;
                balance.credit(Currency::Sc, Cents(500)).unwrap();
                tx.put_balance(&balance)?;
                tx.next_nonce(Game::Limbo)?;
                Err(TestError::Rejected)
            })
            .await;
        assert_eq!(result, Err(TestError::Rejected));
        assert_eq!(balance_of(&ledger, "alice").await, Balance::default());
        let nonce = ledger
            .transact("alice", |tx| Ok::<_, TestError>(tx.peek_nonce(Game::Limbo)?))
            .await
            .unwrap();
        assert_eq!(nonce, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deadline_fails_closed() {
        let ledger = MemoryLedger::new(Duration::from_millis(20));
        let result: Result<(), _> = ledger
            .transact("alice", |tx| {
                let mut balance = tx.balance()?;
                balance.credit(Currency::Gc, Cents(100)).unwrap();
                tx.put_balance(&balance)?;
                std::thread::sleep(Duration::from_millis(50));
                Ok::<_, TestError>(())
            })
            .await;
        assert_eq!(
            result,
            Err(TestError::Store(StoreError::Timeout.to_string()))
        );
        assert_eq!(balance_of(&ledger, "alice").await, Balance::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn lock_wait_times_out() {
        let ledger = Arc::new(MemoryLedger::new(Duration::from_millis(50)));
        let holder = ledger.rows_for("alice").lock_owned().await;

        let result: Result<(), TestError> = ledger
            .transact("alice", |_tx| Ok(()))
            .await;
        assert_eq!(
            result,
            Err(TestError::Store(StoreError::Timeout.to_string()))
        );

        // Other users are unaffected.
        assert_eq!(balance_of(&ledger, "bob").await, Balance::default());
        drop(holder);
        assert_eq!(balance_of(&ledger, "alice").await, Balance::default());
    }
}
