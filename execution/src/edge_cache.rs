//! Cached house-edge lookups.
//!
//! Settlement asks for the house edge on every wager. The configured value
//! lives in an [`EdgeSource`] (the game registry, or anything else that can
//! answer per game) and is cached here for a short TTL. Time comes from an
//! injected [`Clock`] and entries can be dropped explicitly through
//! [`HouseEdgeCache::invalidate`] when an operator changes a game's RTP.

use fairbet_types::Game;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::clock::Clock;

/// Upper bound accepted for a house edge. Anything higher is a config mistake.
pub const MAX_HOUSE_EDGE: f64 = 0.5;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EdgeError {
    #[error("house edge must be in (0, 0.5] (got {0})")]
    OutOfRange(f64),
    #[error("no house edge configured for {0}")]
    Missing(Game),
    #[error("house edge source unavailable: {0}")]
    Unavailable(String),
}

/// A validated house edge fraction.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct HouseEdge(f64);

impl HouseEdge {
    pub fn new(value: f64) -> Result<Self, EdgeError> {
        if !value.is_finite() || value <= 0.0 || value > MAX_HOUSE_EDGE {
            return Err(EdgeError::OutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Return to player as a fraction, `1 - e`.
    pub fn rtp(&self) -> f64 {
        1.0 - self.0
    }
}

/// Where configured house edges come from.
pub trait EdgeSource: Send + Sync {
    fn house_edge(&self, game: Game) -> Result<HouseEdge, EdgeError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

#[derive(Clone, Copy)]
struct CachedEdge {
    edge: HouseEdge,
    expires_at_ms: u64,
}

pub struct HouseEdgeCache {
    source: Arc<dyn EdgeSource>,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
    entries: RwLock<HashMap<Game, CachedEdge>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl HouseEdgeCache {
    pub fn new(source: Arc<dyn EdgeSource>, clock: Arc<dyn Clock>, ttl_ms: u64) -> Self {
        Self {
            source,
            clock,
            ttl_ms,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Cached edge for `game`, refreshed from the source once the TTL lapses.
    pub fn get(&self, game: Game) -> Result<HouseEdge, EdgeError> {
        let now = self.clock.now_ms();
        {
            let entries = match self.entries.read() {
                Ok(entries) => entries,
                Err(poisoned) => {
                    tracing::warn!("house edge cache lock poisoned; recovering");
                    poisoned.into_inner()
                }
            };
            if let Some(cached) = entries.get(&game) {
                if now < cached.expires_at_ms {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(cached.edge);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let edge = self.source.house_edge(game)?;
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => {
                tracing::warn!("house edge cache lock poisoned; recovering");
                poisoned.into_inner()
            }
        };
        entries.insert(
            game,
            CachedEdge {
                edge,
                expires_at_ms: now.saturating_add(self.ttl_ms),
            },
        );
        tracing::debug!(%game, house_edge = edge.value(), "house edge refreshed");
        Ok(edge)
    }

    /// Drop one game's entry, or every entry when `game` is `None`.
    pub fn invalidate(&self, game: Option<Game>) {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        match game {
            Some(game) => {
                entries.remove(&game);
            }
            None => entries.clear(),
        }
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
