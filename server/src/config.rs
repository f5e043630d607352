//! Server configuration: an optional YAML file layered under CLI flags.

use fairbet_execution::casino::registry::DEFAULT_HOUSE_EDGE;
use fairbet_execution::casino::{
    DiceConfig, GameConfig, LimboConfig, PayoutBasis, PaytableSource, PlinkoConfig,
};
use fairbet_execution::edge_cache::{HouseEdge, MAX_HOUSE_EDGE};
use fairbet_execution::EngineConfig;
use fairbet_types::{Cents, Multiplier};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 16 * 1024;
pub const DEFAULT_WS_OUTBOUND_BUFFER: usize = 256;
pub const DEFAULT_FANOUT_CHANNEL: &str = "fairbet.activity";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must be in (0, {max}] (got {value})")]
    InvalidHouseEdge {
        field: &'static str,
        value: f64,
        max: f64,
    },
    #[error("{field} must be exact to the cent: {value}")]
    InvalidAmount { field: &'static str, value: f64 },
    #[error("min_stake ({min}) must not exceed max_stake ({max})")]
    StakeRange { min: f64, max: f64 },
    #[error("dice chance bounds must satisfy 0 < min_chance <= max_chance < 100 (got {min}..{max})")]
    DiceChance { min: f64, max: f64 },
    #[error("limbo max_multiplier must be above 1.00 (got {value})")]
    LimboCeiling { value: f64 },
    #[error("{field} must be a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("{field} URL scheme must be {expected}: {value}")]
    InvalidUrlScheme {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

fn default_house_edge() -> f64 {
    DEFAULT_HOUSE_EDGE
}

fn default_min_stake() -> f64 {
    0.01
}

fn default_max_stake() -> f64 {
    1_000_000.0
}

fn default_tx_timeout_ms() -> u64 {
    5_000
}

fn default_edge_cache_ttl_ms() -> u64 {
    30_000
}

fn default_activity_buffer() -> usize {
    1_024
}

fn default_http_body_limit_bytes() -> usize {
    DEFAULT_HTTP_BODY_LIMIT_BYTES
}

fn default_ws_outbound_buffer() -> usize {
    DEFAULT_WS_OUTBOUND_BUFFER
}

fn default_fanout_channel() -> String {
    DEFAULT_FANOUT_CHANNEL.to_string()
}

fn default_limbo_max_multiplier() -> f64 {
    1_000_000.0
}

fn default_dice_min_chance() -> f64 {
    1.0
}

fn default_dice_max_chance() -> f64 {
    98.0
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutBasisSetting {
    #[default]
    Target,
    Hit,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaytableSetting {
    #[default]
    Curated,
    Generated,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimboSection {
    #[serde(default = "default_house_edge")]
    pub house_edge: f64,
    #[serde(default = "default_limbo_max_multiplier")]
    pub max_multiplier: f64,
    #[serde(default)]
    pub payout_basis: PayoutBasisSetting,
}

impl Default for LimboSection {
    fn default() -> Self {
        Self {
            house_edge: default_house_edge(),
            max_multiplier: default_limbo_max_multiplier(),
            payout_basis: PayoutBasisSetting::default(),
        }
    }
}

/// Dice chances are given in percent, e.g. `49.5`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiceSection {
    #[serde(default = "default_house_edge")]
    pub house_edge: f64,
    #[serde(default = "default_dice_min_chance")]
    pub min_chance: f64,
    #[serde(default = "default_dice_max_chance")]
    pub max_chance: f64,
}

impl Default for DiceSection {
    fn default() -> Self {
        Self {
            house_edge: default_house_edge(),
            min_chance: default_dice_min_chance(),
            max_chance: default_dice_max_chance(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlinkoSection {
    #[serde(default = "default_house_edge")]
    pub house_edge: f64,
    #[serde(default)]
    pub paytable: PaytableSetting,
}

impl Default for PlinkoSection {
    fn default() -> Self {
        Self {
            house_edge: default_house_edge(),
            paytable: PaytableSetting::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GamesSection {
    #[serde(default)]
    pub limbo: LimboSection,
    #[serde(default)]
    pub dice: DiceSection,
    #[serde(default)]
    pub plinko: PlinkoSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// SQLite ledger path. The in-memory ledger is used when unset.
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default = "default_min_stake")]
    pub min_stake: f64,
    #[serde(default = "default_max_stake")]
    pub max_stake: f64,
    #[serde(default = "default_tx_timeout_ms")]
    pub tx_timeout_ms: u64,
    #[serde(default = "default_edge_cache_ttl_ms")]
    pub edge_cache_ttl_ms: u64,
    #[serde(default = "default_activity_buffer")]
    pub activity_buffer: usize,

    #[serde(default)]
    pub http_rate_limit_per_second: Option<u64>,
    #[serde(default)]
    pub http_rate_limit_burst: Option<u32>,
    #[serde(default = "default_http_body_limit_bytes")]
    pub http_body_limit_bytes: usize,
    #[serde(default = "default_ws_outbound_buffer")]
    pub ws_outbound_buffer: usize,
    #[serde(default)]
    pub ws_max_connections: Option<usize>,
    #[serde(default)]
    pub ws_max_connections_per_ip: Option<usize>,

    #[serde(default)]
    pub fanout_redis_url: Option<String>,
    #[serde(default = "default_fanout_channel")]
    pub fanout_channel: String,
    #[serde(default)]
    pub fanout_origin: Option<String>,
    #[serde(default)]
    pub fanout_subscribe: bool,

    #[serde(default)]
    pub games: GamesSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database: None,
            min_stake: default_min_stake(),
            max_stake: default_max_stake(),
            tx_timeout_ms: default_tx_timeout_ms(),
            edge_cache_ttl_ms: default_edge_cache_ttl_ms(),
            activity_buffer: default_activity_buffer(),
            http_rate_limit_per_second: None,
            http_rate_limit_burst: None,
            http_body_limit_bytes: default_http_body_limit_bytes(),
            ws_outbound_buffer: default_ws_outbound_buffer(),
            ws_max_connections: None,
            ws_max_connections_per_ip: None,
            fanout_redis_url: None,
            fanout_channel: default_fanout_channel(),
            fanout_origin: None,
            fanout_subscribe: false,
            games: GamesSection::default(),
        }
    }
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

fn ensure_house_edge(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    HouseEdge::new(value)
        .map(|edge| edge.value())
        .map_err(|_| ConfigError::InvalidHouseEdge {
            field,
            value,
            max: MAX_HOUSE_EDGE,
        })
}

fn cents(field: &'static str, value: f64) -> Result<Cents, ConfigError> {
    Cents::from_decimal(value).map_err(|_| ConfigError::InvalidAmount { field, value })
}

/// Percent with at most two decimals, as hundredths of a percent.
fn chance(field: &'static str, value: f64) -> Result<u32, ConfigError> {
    let hundredths = cents(field, value)?;
    u32::try_from(hundredths.0).map_err(|_| ConfigError::InvalidAmount { field, value })
}

fn validate_redis_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|_| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
    })?;
    match url.scheme() {
        "redis" | "rediss" => Ok(()),
        _ => Err(ConfigError::InvalidUrlScheme {
            field,
            expected: "redis or rediss",
            value: value.to_string(),
        }),
    }
}

impl ServerConfig {
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_nonzero("tx_timeout_ms", self.tx_timeout_ms)?;
        ensure_nonzero("activity_buffer", self.activity_buffer as u64)?;
        ensure_nonzero("ws_outbound_buffer", self.ws_outbound_buffer as u64)?;
        let min = cents("min_stake", self.min_stake)?;
        let max = cents("max_stake", self.max_stake)?;
        if !min.is_positive() || min > max {
            return Err(ConfigError::StakeRange {
                min: self.min_stake,
                max: self.max_stake,
            });
        }
        if let Some(url) = &self.fanout_redis_url {
            validate_redis_url("fanout_redis_url", url)?;
        }
        self.game_configs()?;
        Ok(())
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        Ok(EngineConfig {
            min_stake: cents("min_stake", self.min_stake)?,
            max_stake: cents("max_stake", self.max_stake)?,
            edge_cache_ttl_ms: self.edge_cache_ttl_ms,
            activity_capacity: self.activity_buffer,
        })
    }

    /// Registry configuration for every game.
    pub fn game_configs(&self) -> Result<Vec<GameConfig>, ConfigError> {
        let games = &self.games;

        let max_multiplier = Multiplier::from_decimal(games.limbo.max_multiplier).map_err(|_| {
            ConfigError::InvalidAmount {
                field: "games.limbo.max_multiplier",
                value: games.limbo.max_multiplier,
            }
        })?;
        if max_multiplier <= Multiplier::ONE {
            return Err(ConfigError::LimboCeiling {
                value: games.limbo.max_multiplier,
            });
        }
        let limbo = LimboConfig {
            house_edge: ensure_house_edge("games.limbo.house_edge", games.limbo.house_edge)?,
            max_multiplier,
            payout_basis: match games.limbo.payout_basis {
                PayoutBasisSetting::Target => PayoutBasis::Target,
                PayoutBasisSetting::Hit => PayoutBasis::Hit,
            },
        };

        let min_chance = chance("games.dice.min_chance", games.dice.min_chance)?;
        let max_chance = chance("games.dice.max_chance", games.dice.max_chance)?;
        if min_chance == 0 || min_chance > max_chance || max_chance >= 10_000 {
            return Err(ConfigError::DiceChance {
                min: games.dice.min_chance,
                max: games.dice.max_chance,
            });
        }
        let dice = DiceConfig {
            house_edge: ensure_house_edge("games.dice.house_edge", games.dice.house_edge)?,
            min_chance,
            max_chance,
        };

        let plinko = PlinkoConfig {
            house_edge: ensure_house_edge("games.plinko.house_edge", games.plinko.house_edge)?,
            paytable_source: match games.plinko.paytable {
                PaytableSetting::Curated => PaytableSource::Curated,
                PaytableSetting::Generated => PaytableSource::Generated,
            },
        };

        Ok(vec![
            GameConfig::Limbo(limbo),
            GameConfig::Dice(dice),
            GameConfig::Plinko(plinko),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ServerConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        config.validate().unwrap();
        let engine = config.engine_config().unwrap();
        assert_eq!(engine.min_stake, Cents(1));
        assert_eq!(engine.max_stake, Cents(100_000_000));
    }

    #[test]
    fn game_sections_map_to_registry_configs() {
        let config = ServerConfig::from_yaml(
            r#"
games:
  limbo:
    house_edge: 0.04
    payout_basis: hit
  dice:
    min_chance: 2.5
  plinko:
    paytable: generated
"#,
        )
        .unwrap();
        config.validate().unwrap();
        let configs = config.game_configs().unwrap();
        assert_eq!(
            configs[0],
            GameConfig::Limbo(LimboConfig {
                house_edge: 0.04,
                max_multiplier: Multiplier(100_000_000),
                payout_basis: PayoutBasis::Hit,
            })
        );
        assert_eq!(
            configs[1],
            GameConfig::Dice(DiceConfig {
                house_edge: DEFAULT_HOUSE_EDGE,
                min_chance: 250,
                max_chance: 9_800,
            })
        );
        assert_eq!(
            configs[2],
            GameConfig::Plinko(PlinkoConfig {
                house_edge: DEFAULT_HOUSE_EDGE,
                paytable_source: PaytableSource::Generated,
            })
        );
    }

    #[test]
    fn rejects_bad_house_edge() {
        let config = ServerConfig::from_yaml("games:\n  dice:\n    house_edge: 0.0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("games.dice.house_edge"), "{err}");
    }

    #[test]
    fn rejects_inverted_stakes() {
        let config = ServerConfig::from_yaml("min_stake: 10.0\nmax_stake: 1.0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::StakeRange { .. })
        ));
        let config = ServerConfig::from_yaml("min_stake: 0.001\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn rejects_non_redis_fanout_url() {
        let config =
            ServerConfig::from_yaml("fanout_redis_url: \"http://localhost:6379\"\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrlScheme { .. })
        ));
        let config =
            ServerConfig::from_yaml("fanout_redis_url: \"redis://localhost:6379\"\n").unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = ServerConfig::from_yaml("tx_timeout_ms: 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tx_timeout_ms"), "{err}");
    }
}
