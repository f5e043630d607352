//! Game registry for the games the engine settles and their configurations.
//!
//! The registry provides:
//! - Centralized listing of supported games with their current RTP
//! - Per-game configuration (house edge plus game-specific rules)
//! - Resolver construction from the current configuration
//!
//! It is also the default [`EdgeSource`] behind the house-edge cache, so an
//! operator changing an edge through [`GameRegistry::set_house_edge`] only
//! needs to invalidate the cache for the new value to take effect.
//!
//! # Example
//! ```rust
//! use fairbet_execution::casino::registry::GameRegistry;
//! use fairbet_execution::edge_cache::EdgeSource;
//! use fairbet_types::Game;
//!
//! let registry = GameRegistry::default();
//! registry.set_house_edge(Game::Limbo, 0.04).unwrap();
//! assert_eq!(registry.house_edge(Game::Limbo).unwrap().value(), 0.04);
//! ```

use fairbet_types::api::GameListing;
use fairbet_types::{Game, Multiplier};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::dice::{DEFAULT_MAX_CHANCE, DEFAULT_MIN_CHANCE};
use super::limbo::DEFAULT_MAX_MULTIPLIER;
use super::{Dice, Limbo, PayoutBasis, PaytableSource, Plinko, Resolver};
use crate::edge_cache::{EdgeError, EdgeSource, HouseEdge};

/// House edge every game starts with.
pub const DEFAULT_HOUSE_EDGE: f64 = 0.01;

/// Per-game configuration values.
#[derive(Clone, Debug, PartialEq)]
pub enum GameConfig {
    Limbo(LimboConfig),
    Dice(DiceConfig),
    Plinko(PlinkoConfig),
}

impl GameConfig {
    /// Create a default configuration for a game.
    pub fn default_for(game: Game) -> Self {
        match game {
            Game::Limbo => Self::Limbo(LimboConfig::default()),
            Game::Dice => Self::Dice(DiceConfig::default()),
            Game::Plinko => Self::Plinko(PlinkoConfig::default()),
        }
    }

    pub fn game(&self) -> Game {
        match self {
            Self::Limbo(_) => Game::Limbo,
            Self::Dice(_) => Game::Dice,
            Self::Plinko(_) => Game::Plinko,
        }
    }

    pub fn house_edge(&self) -> f64 {
        match self {
            Self::Limbo(c) => c.house_edge,
            Self::Dice(c) => c.house_edge,
            Self::Plinko(c) => c.house_edge,
        }
    }

    fn set_house_edge(&mut self, edge: HouseEdge) {
        match self {
            Self::Limbo(c) => c.house_edge = edge.value(),
            Self::Dice(c) => c.house_edge = edge.value(),
            Self::Plinko(c) => c.house_edge = edge.value(),
        }
    }

    /// Build the resolver for this configuration.
    pub fn resolver(&self) -> Arc<dyn Resolver> {
        match self {
            Self::Limbo(c) => Arc::new(Limbo {
                max_multiplier: c.max_multiplier,
                payout_basis: c.payout_basis,
            }),
            Self::Dice(c) => Arc::new(Dice {
                min_chance: c.min_chance,
                max_chance: c.max_chance,
            }),
            Self::Plinko(c) => Arc::new(Plinko {
                source: c.paytable_source,
                ..Plinko::default()
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LimboConfig {
    pub house_edge: f64,
    /// Ceiling for targets and hit multipliers.
    pub max_multiplier: Multiplier,
    pub payout_basis: PayoutBasis,
}

impl Default for LimboConfig {
    fn default() -> Self {
        Self {
            house_edge: DEFAULT_HOUSE_EDGE,
            max_multiplier: DEFAULT_MAX_MULTIPLIER,
            payout_basis: PayoutBasis::Target,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiceConfig {
    pub house_edge: f64,
    /// Win-chance bounds in hundredths of a percent.
    pub min_chance: u32,
    pub max_chance: u32,
}

impl Default for DiceConfig {
    fn default() -> Self {
        Self {
            house_edge: DEFAULT_HOUSE_EDGE,
            min_chance: DEFAULT_MIN_CHANCE,
            max_chance: DEFAULT_MAX_CHANCE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlinkoConfig {
    pub house_edge: f64,
    pub paytable_source: PaytableSource,
}

impl Default for PlinkoConfig {
    fn default() -> Self {
        Self {
            house_edge: DEFAULT_HOUSE_EDGE,
            paytable_source: PaytableSource::Curated,
        }
    }
}

/// Registry of games and their configurations, shared across requests.
#[derive(Debug)]
pub struct GameRegistry {
    configs: RwLock<HashMap<Game, GameConfig>>,
}

impl Default for GameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GameRegistry {
    /// Create a registry with every game at its default configuration.
    pub fn new() -> Self {
        Self::with_configs(Vec::new())
    }

    /// Create a registry, overriding the defaults with `configs`.
    pub fn with_configs(configs: impl IntoIterator<Item = GameConfig>) -> Self {
        let mut map: HashMap<Game, GameConfig> = Game::ALL
            .iter()
            .map(|&game| (game, GameConfig::default_for(game)))
            .collect();
        for config in configs {
            map.insert(config.game(), config);
        }
        Self {
            configs: RwLock::new(map),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Game, GameConfig>> {
        match self.configs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("game registry lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Game, GameConfig>> {
        match self.configs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("game registry lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn get_config(&self, game: Game) -> GameConfig {
        self.read()
            .get(&game)
            .cloned()
            .unwrap_or_else(|| GameConfig::default_for(game))
    }

    pub fn set_config(&self, config: GameConfig) {
        self.write().insert(config.game(), config);
    }

    /// Validate and store a new house edge for `game`.
    pub fn set_house_edge(&self, game: Game, value: f64) -> Result<HouseEdge, EdgeError> {
        let edge = HouseEdge::new(value)?;
        self.write()
            .entry(game)
            .or_insert_with(|| GameConfig::default_for(game))
            .set_house_edge(edge);
        tracing::info!(%game, house_edge = value, "house edge updated");
        Ok(edge)
    }

    /// Resolver built from the current configuration of `game`.
    pub fn resolver(&self, game: Game) -> Arc<dyn Resolver> {
        self.get_config(game).resolver()
    }

    /// Every game with its configured edge and RTP percentage.
    pub fn listing(&self) -> Vec<GameListing> {
        let configs = self.read();
        Game::ALL
            .iter()
            .map(|game| {
                let house_edge = configs
                    .get(game)
                    .map(GameConfig::house_edge)
                    .unwrap_or(DEFAULT_HOUSE_EDGE);
                GameListing {
                    game: *game,
                    house_edge,
                    rtp_percent: ((1.0 - house_edge) * 10_000.0).round() / 100.0,
                }
            })
            .collect()
    }
}

impl EdgeSource for GameRegistry {
    fn house_edge(&self, game: Game) -> Result<HouseEdge, EdgeError> {
        let configs = self.read();
        let config = configs.get(&game).ok_or(EdgeError::Missing(game))?;
        HouseEdge::new(config.house_edge())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairbet_types::WagerParams;

    #[test]
    fn test_registry_default() {
        let registry = GameRegistry::default();
        for game in Game::ALL {
            assert_eq!(registry.get_config(game).game(), game);
            assert_eq!(
                registry.house_edge(game).unwrap().value(),
                DEFAULT_HOUSE_EDGE
            );
            assert_eq!(registry.resolver(game).game(), game);
        }
    }

    #[test]
    fn test_set_house_edge() {
        let registry = GameRegistry::new();
        registry.set_house_edge(Game::Dice, 0.04).unwrap();
        assert_eq!(registry.house_edge(Game::Dice).unwrap().value(), 0.04);
        assert_eq!(registry.house_edge(Game::Limbo).unwrap().value(), 0.01);

        assert_eq!(
            registry.set_house_edge(Game::Dice, 0.9),
            Err(EdgeError::OutOfRange(0.9))
        );
        assert_eq!(registry.house_edge(Game::Dice).unwrap().value(), 0.04);
    }

    #[test]
    fn test_listing() {
        let registry = GameRegistry::new();
        registry.set_house_edge(Game::Plinko, 0.035).unwrap();
        let listing = registry.listing();
        assert_eq!(listing.len(), 3);
        assert_eq!(listing[0].game, Game::Limbo);
        assert_eq!(listing[0].rtp_percent, 99.0);
        assert_eq!(listing[2].game, Game::Plinko);
        assert_eq!(listing[2].rtp_percent, 96.5);
    }

    #[test]
    fn test_config_drives_resolver() {
        let registry = GameRegistry::with_configs([GameConfig::Limbo(LimboConfig {
            max_multiplier: Multiplier(1_000),
            ..LimboConfig::default()
        })]);
        let resolver = registry.resolver(Game::Limbo);
        let over_max = WagerParams::Limbo {
            target: Multiplier(1_001),
        };
        assert!(resolver.validate(&over_max).is_err());

        registry.set_config(GameConfig::default_for(Game::Limbo));
        assert!(registry.resolver(Game::Limbo).validate(&over_max).is_ok());
    }
}
