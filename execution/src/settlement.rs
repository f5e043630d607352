//! Atomic wager settlement.
//!
//! [`Engine`] ties the pieces together: parameters are validated up front,
//! then a single ledger transaction locks the user's rows, makes sure a
//! server seed is committed, debits the stake, consumes the nonce, resolves
//! the outcome, credits any payout and appends the wager and its ledger
//! entries. Either all of that commits or none of it does.
//!
//! Seeds are scoped per `(user, game)`. A wager that arrives with no active
//! seed commits one inside its own transaction, so callers never see a
//! missing-seed error.

use fairbet_types::api::{RevealResponse, VerifyResponse, VerifyStatus, WagerResponse};
use fairbet_types::{
    valid_identifier, Balance, BalanceError, Cents, Commitment, Currency, DiceDirection,
    EntryKind, Game, LedgerEntry, SeedStatus, ServerSeed, Wager, WagerId, WagerParams,
    MAX_CLIENT_SEED_LEN, MAX_USER_ID_LEN,
};
use rand::rngs::OsRng;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::activity::ActivityFeed;
use crate::casino::dice::double_or_nothing_target;
use crate::casino::{GameError, GameRegistry, Resolution, Resolver};
use crate::clock::Clock;
use crate::edge_cache::{EdgeError, HouseEdge, HouseEdgeCache};
use crate::ledger::{Ledger, LedgerTx, StoreError};
use crate::rng_pipeline::{
    compute_commit, generate_client_seed, verify_commit_reveal, CommitRevealPair, Fairness,
};

pub const DEFAULT_MIN_STAKE: Cents = Cents(1);
pub const DEFAULT_MAX_STAKE: Cents = Cents(100_000_000);
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 500;
pub const DEFAULT_EDGE_CACHE_TTL_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum SettleError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("insufficient {currency} balance (needed={needed}, available={available})")]
    InsufficientBalance {
        currency: Currency,
        needed: Cents,
        available: Cents,
    },
    #[error("concurrent update, retry: {0}")]
    ConcurrencyConflict(String),
    #[error("settlement timed out")]
    Timeout,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("house edge unavailable: {0}")]
    HouseEdge(#[from] EdgeError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl SettleError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::ConcurrencyConflict(_) => "concurrency_conflict",
            Self::Timeout => "timeout",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::HouseEdge(_) => "house_edge_unavailable",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<StoreError> for SettleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout => Self::Timeout,
            StoreError::Busy(message) => Self::ConcurrencyConflict(message),
            StoreError::Backend(message) | StoreError::Corrupt(message) => Self::Storage(message),
        }
    }
}

impl From<GameError> for SettleError {
    fn from(err: GameError) -> Self {
        Self::InvalidParameter(err.to_string())
    }
}

impl From<BalanceError> for SettleError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::Insufficient {
                currency,
                needed,
                available,
            } => Self::InsufficientBalance {
                currency,
                needed,
                available,
            },
            other => Self::InvalidParameter(other.to_string()),
        }
    }
}

/// Engine-wide limits.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub min_stake: Cents,
    pub max_stake: Cents,
    pub edge_cache_ttl_ms: u64,
    pub activity_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_stake: DEFAULT_MIN_STAKE,
            max_stake: DEFAULT_MAX_STAKE,
            edge_cache_ttl_ms: DEFAULT_EDGE_CACHE_TTL_MS,
            activity_capacity: crate::activity::DEFAULT_ACTIVITY_CAPACITY,
        }
    }
}

/// A committed wager plus the state the caller needs to render it.
#[derive(Clone, Debug, PartialEq)]
pub struct Settled {
    pub wager: Wager,
    pub balance: Balance,
    /// Hash of the active seed, which the next wager will also use.
    pub server_seed_hash: String,
}

impl Settled {
    pub fn response(&self) -> WagerResponse {
        WagerResponse {
            wager_id: self.wager.id,
            game: self.wager.game,
            win: self.wager.outcome.is_win(),
            result_parameter: self.wager.result_parameter.clone(),
            multiplier: self.wager.multiplier,
            payout: self.wager.payout,
            profit: self.wager.profit,
            server_seed_hash: self.server_seed_hash.clone(),
            client_seed: self.wager.client_seed.clone(),
            nonce: self.wager.nonce,
            currency: self.wager.currency,
            balance: self.balance.available(self.wager.currency),
        }
    }
}

/// Everything a settlement transaction needs, owned so it can move into the
/// ledger closure.
struct WagerTicket {
    user: String,
    currency: Currency,
    stake: Cents,
    params: WagerParams,
    client_seed: Option<String>,
    parent: Option<WagerId>,
    resolver: Arc<dyn Resolver>,
    edge: HouseEdge,
    now_ms: u64,
}

pub struct Engine<L: Ledger> {
    ledger: Arc<L>,
    registry: Arc<GameRegistry>,
    edges: Arc<HouseEdgeCache>,
    clock: Arc<dyn Clock>,
    feed: ActivityFeed,
    config: EngineConfig,
}

impl<L: Ledger> Clone for Engine<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            registry: self.registry.clone(),
            edges: self.edges.clone(),
            clock: self.clock.clone(),
            feed: self.feed.clone(),
            config: self.config.clone(),
        }
    }
}

fn check_user(user: &str) -> Result<(), SettleError> {
    if !valid_identifier(user, MAX_USER_ID_LEN) {
        return Err(SettleError::InvalidParameter(format!(
            "user id must be 1..={MAX_USER_ID_LEN} printable ASCII characters"
        )));
    }
    Ok(())
}

fn check_client_seed(client_seed: Option<&str>) -> Result<(), SettleError> {
    match client_seed {
        Some(seed) if !valid_identifier(seed, MAX_CLIENT_SEED_LEN) => {
            Err(SettleError::InvalidParameter(format!(
                "client seed must be 1..={MAX_CLIENT_SEED_LEN} printable ASCII characters"
            )))
        }
        _ => Ok(()),
    }
}

/// Commit a fresh server seed for `(user, game)` and store it as active.
fn commit_seed(
    tx: &mut dyn LedgerTx,
    game: Game,
    client_seed: Option<String>,
    now_ms: u64,
) -> Result<ServerSeed, SettleError> {
    let pair = CommitRevealPair::generate(&mut OsRng);
    let seed = ServerSeed {
        id: Uuid::new_v4(),
        user: tx.user().to_string(),
        game,
        hash: pair.commit,
        secret: pair.reveal,
        client_seed: client_seed.unwrap_or_else(|| generate_client_seed(&mut OsRng)),
        status: SeedStatus::Active,
        revealed: None,
        created_at_ms: now_ms,
        rotated_at_ms: None,
    };
    tx.insert_seed(&seed)?;
    tracing::info!(user = tx.user(), %game, seed_id = %seed.id, "server seed committed");
    Ok(seed)
}

fn active_or_commit(
    tx: &mut dyn LedgerTx,
    game: Game,
    now_ms: u64,
) -> Result<ServerSeed, SettleError> {
    match tx.active_seed(game)? {
        Some(seed) => Ok(seed),
        None => commit_seed(tx, game, None, now_ms),
    }
}

/// Move `seed` to `next` and persist it. Refuses any step the seed lifecycle
/// does not allow, leaving the stored row untouched.
fn advance_seed(
    tx: &mut dyn LedgerTx,
    seed: &mut ServerSeed,
    next: SeedStatus,
) -> Result<(), SettleError> {
    if !seed.status.can_transition_to(next) {
        return Err(SettleError::Storage(format!(
            "seed {} cannot move from {} to {}",
            seed.id,
            seed.status.as_str(),
            next.as_str()
        )));
    }
    seed.status = next;
    tx.update_seed(seed)?;
    Ok(())
}

/// Check the risk preconditions against the transaction's view of `parent`.
fn check_riskable(tx: &mut dyn LedgerTx, parent: WagerId) -> Result<(), SettleError> {
    let wager = tx
        .find_wager(parent)?
        .ok_or_else(|| SettleError::NotFound(format!("wager {parent}")))?;
    if !wager.outcome.is_win() {
        return Err(SettleError::InvalidParameter(
            "only winning wagers can be risked".to_string(),
        ));
    }
    if tx.has_child(parent)? {
        return Err(SettleError::InvalidParameter(format!(
            "wager {parent} has already been risked"
        )));
    }
    Ok(())
}

fn settle_in_tx(tx: &mut dyn LedgerTx, ticket: WagerTicket) -> Result<Settled, SettleError> {
    let game = ticket.params.game();
    if let Some(parent) = ticket.parent {
        check_riskable(tx, parent)?;
    }

    let seed = active_or_commit(tx, game, ticket.now_ms)?;
    let client_seed = ticket
        .client_seed
        .unwrap_or_else(|| seed.client_seed.clone());

    let mut balance = tx.balance()?;
    balance.debit(ticket.currency, ticket.stake)?;
    let after_stake = balance.available(ticket.currency);

    let nonce = tx.next_nonce(game)?;
    let fairness = Fairness::new(&seed.secret, &client_seed, nonce);
    let Resolution {
        outcome,
        multiplier,
        result_parameter,
    } = ticket
        .resolver
        .resolve(&fairness, &ticket.params, ticket.edge)?;

    let payout = multiplier.payout(ticket.stake);
    if payout.is_positive() {
        balance.credit(ticket.currency, payout)?;
    }

    let wager = Wager {
        id: Uuid::new_v4(),
        user: ticket.user.clone(),
        game,
        currency: ticket.currency,
        amount: ticket.stake,
        target_parameter: ticket.params.describe(),
        result_parameter,
        outcome,
        multiplier,
        payout,
        profit: Cents(payout.0 - ticket.stake.0),
        house_edge: ticket.edge.value(),
        nonce,
        server_seed_id: seed.id,
        server_seed_hash: seed.hash.clone(),
        client_seed,
        parent_id: ticket.parent,
        created_at_ms: ticket.now_ms,
    };
    tx.insert_wager(&wager)?;
    tx.append_entry(&LedgerEntry {
        id: Uuid::new_v4(),
        user: ticket.user.clone(),
        wager_id: Some(wager.id),
        kind: EntryKind::Stake,
        currency: ticket.currency,
        amount: Cents(-ticket.stake.0),
        balance_after: after_stake,
        created_at_ms: ticket.now_ms,
    })?;
    if payout.is_positive() {
        tx.append_entry(&LedgerEntry {
            id: Uuid::new_v4(),
            user: ticket.user,
            wager_id: Some(wager.id),
            kind: EntryKind::Payout,
            currency: ticket.currency,
            amount: payout,
            balance_after: balance.available(ticket.currency),
            created_at_ms: ticket.now_ms,
        })?;
    }
    tx.put_balance(&balance)?;

    Ok(Settled {
        wager,
        balance,
        server_seed_hash: seed.hash,
    })
}

/// Replay a wager from its revealed server seed.
pub fn recompute(
    resolver: &dyn Resolver,
    wager: &Wager,
    server_seed: &str,
) -> Result<Resolution, SettleError> {
    let params = WagerParams::parse(wager.game, &wager.target_parameter).ok_or_else(|| {
        SettleError::Storage(format!(
            "unparseable target parameter {:?} on wager {}",
            wager.target_parameter, wager.id
        ))
    })?;
    let edge = HouseEdge::new(wager.house_edge)?;
    let fairness = Fairness::new(server_seed, &wager.client_seed, wager.nonce);
    Ok(resolver.resolve(&fairness, &params, edge)?)
}

impl<L: Ledger> Engine<L> {
    pub fn new(
        ledger: Arc<L>,
        registry: Arc<GameRegistry>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let edges = Arc::new(HouseEdgeCache::new(
            registry.clone(),
            clock.clone(),
            config.edge_cache_ttl_ms,
        ));
        Self {
            ledger,
            registry,
            edges,
            clock,
            feed: ActivityFeed::new(config.activity_capacity),
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<GameRegistry> {
        &self.registry
    }

    pub fn edges(&self) -> &Arc<HouseEdgeCache> {
        &self.edges
    }

    pub fn feed(&self) -> &ActivityFeed {
        &self.feed
    }

    fn check_stake(&self, stake: Cents) -> Result<(), SettleError> {
        if stake < self.config.min_stake || stake > self.config.max_stake {
            return Err(SettleError::InvalidParameter(format!(
                "bet amount must be in [{}, {}] (got {stake})",
                self.config.min_stake, self.config.max_stake
            )));
        }
        Ok(())
    }

    /// Place and settle a wager.
    pub async fn place(
        &self,
        user: &str,
        currency: Currency,
        stake: Cents,
        params: WagerParams,
        client_seed: Option<String>,
    ) -> Result<Settled, SettleError> {
        check_user(user)?;
        check_client_seed(client_seed.as_deref())?;
        self.check_stake(stake)?;
        let game = params.game();
        let resolver = self.registry.resolver(game);
        resolver.validate(&params)?;
        let edge = self.edges.get(game)?;

        let ticket = WagerTicket {
            user: user.to_string(),
            currency,
            stake,
            params,
            client_seed,
            parent: None,
            resolver,
            edge,
            now_ms: self.clock.now_ms(),
        };
        self.settle(ticket).await
    }

    /// Double-or-nothing on a won wager: stake its payout on a dice roll
    /// under the target that pays exactly 2.00x.
    pub async fn risk(
        &self,
        user: &str,
        wager_id: WagerId,
        client_seed: Option<String>,
    ) -> Result<Settled, SettleError> {
        check_user(user)?;
        check_client_seed(client_seed.as_deref())?;
        let parent = self
            .ledger
            .wager(wager_id)
            .await?
            .ok_or_else(|| SettleError::NotFound(format!("wager {wager_id}")))?;
        if parent.user != user {
            tracing::warn!(user, %wager_id, "risk attempted on another user's wager");
            return Err(SettleError::Forbidden(format!(
                "wager {wager_id} belongs to another user"
            )));
        }
        if !parent.outcome.is_win() {
            return Err(SettleError::InvalidParameter(
                "only winning wagers can be risked".to_string(),
            ));
        }
        self.check_stake(parent.payout)?;

        let edge = self.edges.get(Game::Dice)?;
        let params = WagerParams::Dice {
            target: double_or_nothing_target(edge),
            direction: DiceDirection::Under,
        };
        let resolver = self.registry.resolver(Game::Dice);
        resolver.validate(&params)?;

        let ticket = WagerTicket {
            user: user.to_string(),
            currency: parent.currency,
            stake: parent.payout,
            params,
            client_seed,
            parent: Some(wager_id),
            resolver,
            edge,
            now_ms: self.clock.now_ms(),
        };
        self.settle(ticket).await
    }

    async fn settle(&self, ticket: WagerTicket) -> Result<Settled, SettleError> {
        let user = ticket.user.clone();
        let game = ticket.params.game();
        let settled = match self
            .ledger
            .transact(&user, move |tx| settle_in_tx(tx, ticket))
            .await
        {
            Ok(settled) => settled,
            Err(err) => {
                tracing::debug!(user = %user, %game, error = %err, "wager rejected");
                return Err(err);
            }
        };
        let wager = &settled.wager;
        tracing::info!(
            wager_id = %wager.id,
            user = %wager.user,
            game = %wager.game,
            nonce = wager.nonce,
            outcome = wager.outcome.as_str(),
            multiplier = %wager.multiplier,
            payout = wager.payout.0,
            "wager settled"
        );
        self.feed.publish(wager);
        Ok(settled)
    }

    /// Current commitment for `(user, game)`, committing a seed if needed.
    pub async fn commitment(&self, user: &str, game: Game) -> Result<Commitment, SettleError> {
        check_user(user)?;
        let now_ms = self.clock.now_ms();
        self.ledger
            .transact(user, move |tx| {
                let seed = active_or_commit(tx, game, now_ms)?;
                Ok(Commitment {
                    server_seed_hash: seed.hash,
                    client_seed: seed.client_seed,
                    nonce: tx.peek_nonce(game)?,
                })
            })
            .await
    }

    /// Reveal the active seed for `(user, game)` and activate a new one in the
    /// same transaction.
    pub async fn rotate(
        &self,
        user: &str,
        game: Game,
        client_seed: Option<String>,
    ) -> Result<RevealResponse, SettleError> {
        check_user(user)?;
        check_client_seed(client_seed.as_deref())?;
        let now_ms = self.clock.now_ms();
        let response = self
            .ledger
            .transact(user, move |tx| {
                let mut old = active_or_commit(tx, game, now_ms)?;
                let next_client_seed = client_seed.unwrap_or_else(|| old.client_seed.clone());

                old.rotated_at_ms = Some(now_ms);
                advance_seed(tx, &mut old, SeedStatus::Rotating)?;

                let new = commit_seed(tx, game, Some(next_client_seed), now_ms)?;

                old.revealed = Some(old.secret.clone());
                advance_seed(tx, &mut old, SeedStatus::Revealed)?;

                Ok::<_, SettleError>(RevealResponse {
                    old_server_seed: old.secret,
                    new_server_seed_hash: new.hash,
                })
            })
            .await?;
        tracing::info!(user, %game, "server seed revealed and rotated");
        Ok(response)
    }

    /// Recompute a stored wager. Reports `PendingReveal` until its seed has
    /// been rotated out.
    pub async fn verify(&self, wager_id: WagerId) -> Result<VerifyResponse, SettleError> {
        let wager = self
            .ledger
            .wager(wager_id)
            .await?
            .ok_or_else(|| SettleError::NotFound(format!("wager {wager_id}")))?;
        let seed = self
            .ledger
            .seed(&wager.user, wager.server_seed_id)
            .await?
            .ok_or_else(|| SettleError::Storage(format!("missing seed for wager {wager_id}")))?;

        let mut response = VerifyResponse {
            wager_id,
            status: VerifyStatus::PendingReveal,
            stored_result: wager.result_parameter.clone(),
            recomputed_result: None,
            server_seed: None,
            server_seed_hash: wager.server_seed_hash.clone(),
            client_seed: wager.client_seed.clone(),
            nonce: wager.nonce,
        };
        let Some(revealed) = seed.revealed else {
            return Ok(response);
        };

        let resolver = self.registry.resolver(wager.game);
        let recomputed = match recompute(resolver.as_ref(), &wager, &revealed) {
            Ok(resolution) => Some(resolution.result_parameter),
            Err(err) => {
                tracing::warn!(%wager_id, error = %err, "wager could not be replayed");
                None
            }
        };
        let consistent = verify_commit_reveal(&wager.server_seed_hash, &revealed)
            && recomputed.as_deref() == Some(wager.result_parameter.as_str());
        response.status = if consistent {
            VerifyStatus::Verified
        } else {
            tracing::error!(%wager_id, "wager failed verification");
            VerifyStatus::Mismatch
        };
        response.recomputed_result = recomputed;
        response.server_seed = Some(revealed);
        Ok(response)
    }

    /// Settled wagers for `user`, newest first.
    pub async fn history(
        &self,
        user: &str,
        game: Option<Game>,
        limit: Option<usize>,
    ) -> Result<Vec<Wager>, SettleError> {
        check_user(user)?;
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        self.ledger
            .transact(user, move |tx| Ok(tx.wagers(game, limit)?))
            .await
    }

    pub async fn balance(&self, user: &str) -> Result<Balance, SettleError> {
        check_user(user)?;
        self.ledger
            .transact(user, |tx| Ok(tx.balance()?))
            .await
    }

    /// Credit `amount` to `user` outside of any wager.
    pub async fn grant(
        &self,
        user: &str,
        currency: Currency,
        amount: Cents,
    ) -> Result<Balance, SettleError> {
        check_user(user)?;
        if !amount.is_positive() {
            return Err(SettleError::InvalidParameter(format!(
                "grant amount must be positive (got {amount})"
            )));
        }
        let now_ms = self.clock.now_ms();
        let user_id = user.to_string();
        let balance = self
            .ledger
            .transact(user, move |tx| {
                let mut balance = tx.balance()?;
                balance.credit(currency, amount)?;
                tx.append_entry(&LedgerEntry {
                    id: Uuid::new_v4(),
                    user: user_id,
                    wager_id: None,
                    kind: EntryKind::Grant,
                    currency,
                    amount,
                    balance_after: balance.available(currency),
                    created_at_ms: now_ms,
                })?;
                tx.put_balance(&balance)?;
                Ok::<_, SettleError>(balance)
            })
            .await?;
        tracing::info!(user, %currency, amount = amount.0, "balance granted");
        Ok(balance)
    }

    /// Update a game's house edge and drop its cached value.
    pub fn set_house_edge(&self, game: Game, value: f64) -> Result<HouseEdge, SettleError> {
        let edge = self
            .registry
            .set_house_edge(game, value)
            .map_err(|err| SettleError::InvalidParameter(err.to_string()))?;
        self.edges.invalidate(Some(game));
        Ok(edge)
    }
}

/// Hash check used by offline tooling.
pub fn seed_matches(server_seed_hash: &str, server_seed: &str) -> bool {
    compute_commit(server_seed).eq_ignore_ascii_case(server_seed_hash)
}
