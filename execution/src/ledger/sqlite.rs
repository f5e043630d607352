use fairbet_types::{
    Balance, Cents, Game, LedgerEntry, Multiplier, SeedId, ServerSeed, Wager, WagerId,
};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{Ledger, LedgerTx, StoreError};

/// Idle connections kept for reuse.
const MAX_IDLE_CONNECTIONS: usize = 8;

const SEED_COLUMNS: &str = "id, user, game, hash, secret, client_seed, status, revealed, \
                            created_at_ms, rotated_at_ms";

const WAGER_COLUMNS: &str = "id, user, game, currency, amount, target_parameter, \
                             result_parameter, outcome, multiplier, payout, profit, \
                             house_edge, nonce, server_seed_id, server_seed_hash, \
                             client_seed, parent_id, created_at_ms";

const ENTRY_COLUMNS: &str = "id, user, wager_id, kind, currency, amount, balance_after, \
                             created_at_ms";

/// SQLite-backed ledger.
///
/// Each transaction runs on a blocking thread as `BEGIN IMMEDIATE`, so
/// writers are serialised by the database. A writer that cannot get the lock
/// within the busy timeout fails with [`StoreError::Busy`].
#[derive(Clone)]
pub struct SqliteLedger {
    path: PathBuf,
    idle: Arc<Mutex<Vec<Connection>>>,
    timeout: Duration,
}

impl SqliteLedger {
    pub fn open(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        let conn = connect(path, timeout)?;
        init_schema(&conn)?;
        tracing::info!(path = %path.display(), "sqlite ledger opened");
        Ok(Self {
            path: path.to_path_buf(),
            idle: Arc::new(Mutex::new(vec![conn])),
            timeout,
        })
    }

    fn checkout(&self) -> Result<Connection, StoreError> {
        let pooled = {
            let mut idle = match self.idle.lock() {
                Ok(idle) => idle,
                Err(poisoned) => poisoned.into_inner(),
            };
            idle.pop()
        };
        match pooled {
            Some(conn) => Ok(conn),
            None => connect(&self.path, self.timeout),
        }
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = match self.idle.lock() {
            Ok(idle) => idle,
            Err(poisoned) => poisoned.into_inner(),
        };
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }

    async fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = ledger.checkout()?;
            let result = f(&conn);
            ledger.checkin(conn);
            result
        })
        .await
        .map_err(|err| StoreError::Backend(format!("ledger task failed: {err}")))?
    }
}

fn connect(path: &Path, timeout: Duration) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;",
    )?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS balances (
             user TEXT PRIMARY KEY,
             available_gc INTEGER NOT NULL,
             locked_gc INTEGER NOT NULL,
             total_sc INTEGER NOT NULL,
             redeemable_sc INTEGER NOT NULL,
             CHECK (redeemable_sc <= total_sc)
         );
         CREATE TABLE IF NOT EXISTS nonces (
             user TEXT NOT NULL,
             game TEXT NOT NULL,
             next INTEGER NOT NULL,
             PRIMARY KEY (user, game)
         );
         CREATE TABLE IF NOT EXISTS server_seeds (
             id TEXT PRIMARY KEY,
             user TEXT NOT NULL,
             game TEXT NOT NULL,
             hash TEXT NOT NULL,
             secret TEXT NOT NULL,
             client_seed TEXT NOT NULL,
             status TEXT NOT NULL,
             revealed TEXT,
             created_at_ms INTEGER NOT NULL,
             rotated_at_ms INTEGER
         );
         CREATE UNIQUE INDEX IF NOT EXISTS server_seeds_one_active
             ON server_seeds(user, game) WHERE status = 'ACTIVE';
         CREATE TABLE IF NOT EXISTS wagers (
             seq INTEGER PRIMARY KEY,
             id TEXT NOT NULL UNIQUE,
             user TEXT NOT NULL,
             game TEXT NOT NULL,
             currency TEXT NOT NULL,
             amount INTEGER NOT NULL,
             target_parameter TEXT NOT NULL,
             result_parameter TEXT NOT NULL,
             outcome TEXT NOT NULL,
             multiplier INTEGER NOT NULL,
             payout INTEGER NOT NULL,
             profit INTEGER NOT NULL,
             house_edge REAL NOT NULL,
             nonce INTEGER NOT NULL,
             server_seed_id TEXT NOT NULL REFERENCES server_seeds(id),
             server_seed_hash TEXT NOT NULL,
             client_seed TEXT NOT NULL,
             parent_id TEXT,
             created_at_ms INTEGER NOT NULL
         );
         CREATE UNIQUE INDEX IF NOT EXISTS wagers_user_game_nonce ON wagers(user, game, nonce);
         CREATE UNIQUE INDEX IF NOT EXISTS wagers_parent
             ON wagers(parent_id) WHERE parent_id IS NOT NULL;
         CREATE INDEX IF NOT EXISTS wagers_user ON wagers(user, seq);
         CREATE TABLE IF NOT EXISTS ledger_entries (
             seq INTEGER PRIMARY KEY,
             id TEXT NOT NULL UNIQUE,
             user TEXT NOT NULL,
             wager_id TEXT,
             kind TEXT NOT NULL,
             currency TEXT NOT NULL,
             amount INTEGER NOT NULL,
             balance_after INTEGER NOT NULL,
             created_at_ms INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS ledger_entries_user ON ledger_entries(user, seq);",
    )?;
    Ok(())
}

fn parse_column<T>(value: &str, column: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|err| StoreError::Corrupt(format!("{column}={value}: {err}")))
}

fn parse_uuid(value: &str, column: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|err| StoreError::Corrupt(format!("{column}={value}: {err}")))
}

fn read_seed(row: &Row<'_>) -> Result<ServerSeed, StoreError> {
    Ok(ServerSeed {
        id: parse_uuid(&row.get::<_, String>(0)?, "id")?,
        user: row.get(1)?,
        game: parse_column(&row.get::<_, String>(2)?, "game")?,
        hash: row.get(3)?,
        secret: row.get(4)?,
        client_seed: row.get(5)?,
        status: parse_column(&row.get::<_, String>(6)?, "status")?,
        revealed: row.get(7)?,
        created_at_ms: row.get(8)?,
        rotated_at_ms: row.get(9)?,
    })
}

fn read_wager(row: &Row<'_>) -> Result<Wager, StoreError> {
    let parent_id = match row.get::<_, Option<String>>(16)? {
        Some(parent) => Some(parse_uuid(&parent, "parent_id")?),
        None => None,
    };
    Ok(Wager {
        id: parse_uuid(&row.get::<_, String>(0)?, "id")?,
        user: row.get(1)?,
        game: parse_column(&row.get::<_, String>(2)?, "game")?,
        currency: parse_column(&row.get::<_, String>(3)?, "currency")?,
        amount: Cents(row.get(4)?),
        target_parameter: row.get(5)?,
        result_parameter: row.get(6)?,
        outcome: parse_column(&row.get::<_, String>(7)?, "outcome")?,
        multiplier: Multiplier(row.get(8)?),
        payout: Cents(row.get(9)?),
        profit: Cents(row.get(10)?),
        house_edge: row.get(11)?,
        nonce: row.get(12)?,
        server_seed_id: parse_uuid(&row.get::<_, String>(13)?, "server_seed_id")?,
        server_seed_hash: row.get(14)?,
        client_seed: row.get(15)?,
        parent_id,
        created_at_ms: row.get(17)?,
    })
}

fn read_entry(row: &Row<'_>) -> Result<LedgerEntry, StoreError> {
    let wager_id = match row.get::<_, Option<String>>(2)? {
        Some(wager) => Some(parse_uuid(&wager, "wager_id")?),
        None => None,
    };
    Ok(LedgerEntry {
        id: parse_uuid(&row.get::<_, String>(0)?, "id")?,
        user: row.get(1)?,
        wager_id,
        kind: parse_column(&row.get::<_, String>(3)?, "kind")?,
        currency: parse_column(&row.get::<_, String>(4)?, "currency")?,
        amount: Cents(row.get(5)?),
        balance_after: Cents(row.get(6)?),
        created_at_ms: row.get(7)?,
    })
}

fn query_wagers(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Wager>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut wagers = Vec::new();
    while let Some(row) = rows.next()? {
        wagers.push(read_wager(row)?);
    }
    Ok(wagers)
}

struct SqliteTx<'a> {
    conn: &'a Connection,
    user: &'a str,
}

impl LedgerTx for SqliteTx<'_> {
    fn user(&self) -> &str {
        self.user
    }

    fn balance(&mut self) -> Result<Balance, StoreError> {
        let balance = self
            .conn
            .query_row(
                "SELECT available_gc, locked_gc, total_sc, redeemable_sc FROM balances WHERE user = ?",
                params![self.user],
                |row| {
                    Ok(Balance {
                        available_gc: Cents(row.get(0)?),
                        locked_gc: Cents(row.get(1)?),
                        total_sc: Cents(row.get(2)?),
                        redeemable_sc: Cents(row.get(3)?),
                    })
                },
            )
            .optional()?;
        Ok(balance.unwrap_or_default())
    }

    fn put_balance(&mut self, balance: &Balance) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO balances (user, available_gc, locked_gc, total_sc, redeemable_sc)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user) DO UPDATE SET
                 available_gc = excluded.available_gc,
                 locked_gc = excluded.locked_gc,
                 total_sc = excluded.total_sc,
                 redeemable_sc = excluded.redeemable_sc",
            params![
                self.user,
                balance.available_gc.0,
                balance.locked_gc.0,
                balance.total_sc.0,
                balance.redeemable_sc.0
            ],
        )?;
        Ok(())
    }

    fn peek_nonce(&mut self, game: Game) -> Result<u64, StoreError> {
        let next = self
            .conn
            .query_row(
                "SELECT next FROM nonces WHERE user = ? AND game = ?",
                params![self.user, game.as_str()],
                |row| row.get::<_, u64>(0),
            )
            .optional()?;
        Ok(next.unwrap_or(0))
    }

    fn next_nonce(&mut self, game: Game) -> Result<u64, StoreError> {
        let nonce = self.peek_nonce(game)?;
        self.conn.execute(
            "INSERT INTO nonces (user, game, next) VALUES (?1, ?2, ?3)
             ON CONFLICT(user, game) DO UPDATE SET next = excluded.next",
            params![self.user, game.as_str(), nonce + 1],
        )?;
        Ok(nonce)
    }

    fn active_seed(&mut self, game: Game) -> Result<Option<ServerSeed>, StoreError> {
        let sql = format!(
            "SELECT {SEED_COLUMNS} FROM server_seeds WHERE user = ? AND game = ? AND status = 'ACTIVE'"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![self.user, game.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_seed(row)?)),
            None => Ok(None),
        }
    }

    fn find_seed(&mut self, id: SeedId) -> Result<Option<ServerSeed>, StoreError> {
        find_seed(self.conn, self.user, id)
    }

    fn insert_seed(&mut self, seed: &ServerSeed) -> Result<(), StoreError> {
        self.conn.execute(
            &format!(
                "INSERT INTO server_seeds ({SEED_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                seed.id.to_string(),
                seed.user,
                seed.game.as_str(),
                seed.hash,
                seed.secret,
                seed.client_seed,
                seed.status.as_str(),
                seed.revealed,
                seed.created_at_ms,
                seed.rotated_at_ms
            ],
        )?;
        Ok(())
    }

    fn update_seed(&mut self, seed: &ServerSeed) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE server_seeds SET status = ?, revealed = ?, rotated_at_ms = ?
             WHERE id = ? AND user = ?",
            params![
                seed.status.as_str(),
                seed.revealed,
                seed.rotated_at_ms,
                seed.id.to_string(),
                self.user
            ],
        )?;
        if changed != 1 {
            return Err(StoreError::Backend(format!("unknown seed id {}", seed.id)));
        }
        Ok(())
    }

    fn insert_wager(&mut self, wager: &Wager) -> Result<(), StoreError> {
        self.conn.execute(
            &format!(
                "INSERT INTO wagers ({WAGER_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                wager.id.to_string(),
                wager.user,
                wager.game.as_str(),
                wager.currency.as_str(),
                wager.amount.0,
                wager.target_parameter,
                wager.result_parameter,
                wager.outcome.as_str(),
                wager.multiplier.0,
                wager.payout.0,
                wager.profit.0,
                wager.house_edge,
                wager.nonce,
                wager.server_seed_id.to_string(),
                wager.server_seed_hash,
                wager.client_seed,
                wager.parent_id.map(|parent| parent.to_string()),
                wager.created_at_ms
            ],
        )?;
        Ok(())
    }

    fn find_wager(&mut self, id: WagerId) -> Result<Option<Wager>, StoreError> {
        let sql = format!("SELECT {WAGER_COLUMNS} FROM wagers WHERE id = ? AND user = ?");
        let mut wagers = query_wagers(self.conn, &sql, params![id.to_string(), self.user])?;
        Ok(wagers.pop())
    }

    fn has_child(&mut self, parent: WagerId) -> Result<bool, StoreError> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM wagers WHERE parent_id = ?)",
            params![parent.to_string()],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(exists)
    }

    fn wagers(&mut self, game: Option<Game>, limit: usize) -> Result<Vec<Wager>, StoreError> {
        let sql = format!(
            "SELECT {WAGER_COLUMNS} FROM wagers
             WHERE user = ?1 AND (?2 IS NULL OR game = ?2)
             ORDER BY seq DESC LIMIT ?3"
        );
        query_wagers(
            self.conn,
            &sql,
            params![self.user, game.map(|game| game.as_str()), limit as u64],
        )
    }

    fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.conn.execute(
            &format!("INSERT INTO ledger_entries ({ENTRY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                entry.id.to_string(),
                entry.user,
                entry.wager_id.map(|wager| wager.to_string()),
                entry.kind.as_str(),
                entry.currency.as_str(),
                entry.amount.0,
                entry.balance_after.0,
                entry.created_at_ms
            ],
        )?;
        Ok(())
    }

    fn entries(&mut self, limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE user = ? ORDER BY seq DESC LIMIT ?"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![self.user, limit as u64])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(read_entry(row)?);
        }
        Ok(entries)
    }
}

fn find_seed(conn: &Connection, user: &str, id: SeedId) -> Result<Option<ServerSeed>, StoreError> {
    let sql = format!("SELECT {SEED_COLUMNS} FROM server_seeds WHERE id = ? AND user = ?");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![id.to_string(), user])?;
    match rows.next()? {
        Some(row) => Ok(Some(read_seed(row)?)),
        None => Ok(None),
    }
}

fn run_transaction<T, E, F>(
    conn: &mut Connection,
    user: &str,
    deadline: Instant,
    f: F,
) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(&mut dyn LedgerTx) -> Result<T, E>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(StoreError::from)?;
    let value = {
        let mut ledger_tx = SqliteTx { conn: &tx, user };
        f(&mut ledger_tx)?
    };
    if Instant::now() > deadline {
        tracing::warn!(user, "ledger transaction passed its deadline; rolled back");
        return Err(StoreError::Timeout.into());
    }
    tx.commit().map_err(StoreError::from)?;
    Ok(value)
}

impl Ledger for SqliteLedger {
    async fn transact<T, E, F>(&self, user: &str, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&mut dyn LedgerTx) -> Result<T, E> + Send + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let ledger = self.clone();
        let user = user.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = ledger.checkout()?;
            let result = run_transaction(&mut conn, &user, deadline, f);
            ledger.checkin(conn);
            result
        })
        .await
        .map_err(|err| StoreError::Backend(format!("ledger task failed: {err}")))?
    }

    async fn wager(&self, id: WagerId) -> Result<Option<Wager>, StoreError> {
        self.read(move |conn| {
            let sql = format!("SELECT {WAGER_COLUMNS} FROM wagers WHERE id = ?");
            let mut wagers = query_wagers(conn, &sql, params![id.to_string()])?;
            Ok(wagers.pop())
        })
        .await
    }

    async fn seed(&self, user: &str, id: SeedId) -> Result<Option<ServerSeed>, StoreError> {
        let user = user.to_string();
        self.read(move |conn| find_seed(conn, &user, id)).await
    }
}
