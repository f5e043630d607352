//! HTTP and WebSocket front end for the fairbet settlement engine.

use fairbet_execution::casino::GameRegistry;
use fairbet_execution::clock::SystemClock;
use fairbet_execution::ledger::{LedgerBackend, MemoryLedger, SqliteLedger};
use fairbet_execution::{Engine, SettleError, Settled};
use fairbet_types::api::ActivityEvent;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

mod api;
pub use api::Api;

pub mod config;
pub use config::{ConfigError, ServerConfig};

mod fanout;
pub use fanout::Fanout;

mod metrics;
pub use metrics::{
    HttpMetrics, HttpMetricsSnapshot, LatencySnapshot, WagerMetrics, WagerMetricsSnapshot,
    WsMetrics, WsMetricsSnapshot,
};

fn parse_env_usize(var: &str) -> Option<usize> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

#[derive(Default)]
struct WsConnectionTracker {
    total: usize,
    per_ip: HashMap<IpAddr, usize>,
}

pub enum WsConnectionRejection {
    GlobalLimit,
    PerIpLimit,
}

pub struct WsConnectionGuard {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl Drop for WsConnectionGuard {
    fn drop(&mut self) {
        self.state.release_ws_connection(self.ip);
    }
}

/// Open the ledger named by `config`: SQLite when a database path is set,
/// in-memory otherwise.
pub fn open_ledger(config: &ServerConfig) -> Result<LedgerBackend, SettleError> {
    match &config.database {
        Some(path) => Ok(LedgerBackend::Sqlite(SqliteLedger::open(
            path,
            config.tx_timeout(),
        )?)),
        None => Ok(LedgerBackend::Memory(MemoryLedger::new(config.tx_timeout()))),
    }
}

/// Build an engine from a validated config.
pub fn build_engine(config: &ServerConfig) -> anyhow::Result<Engine<LedgerBackend>> {
    let ledger = open_ledger(config)?;
    let registry = GameRegistry::with_configs(config.game_configs()?);
    let engine = Engine::new(
        Arc::new(ledger),
        Arc::new(registry),
        Arc::new(SystemClock),
        config.engine_config()?,
    );
    tracing::info!(ledger = engine.ledger().kind(), "settlement engine ready");
    Ok(engine)
}

/// Shared state behind every request handler.
pub struct AppState {
    pub config: ServerConfig,
    engine: Engine<LedgerBackend>,
    fanout: Option<Arc<Fanout>>,
    http_metrics: HttpMetrics,
    wager_metrics: WagerMetrics,
    ws_metrics: WsMetrics,
    ws_connections: Mutex<WsConnectionTracker>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        engine: Engine<LedgerBackend>,
        fanout: Option<Arc<Fanout>>,
    ) -> Self {
        Self {
            config,
            engine,
            fanout,
            http_metrics: HttpMetrics::default(),
            wager_metrics: WagerMetrics::default(),
            ws_metrics: WsMetrics::default(),
            ws_connections: Mutex::new(WsConnectionTracker::default()),
        }
    }

    pub fn engine(&self) -> &Engine<LedgerBackend> {
        &self.engine
    }

    pub fn start_fanout(&self) {
        if let Some(fanout) = &self.fanout {
            fanout.start(self.engine.feed().clone());
        }
    }

    pub(crate) fn on_settled(&self, settled: &Settled) {
        self.wager_metrics.record_settled(&settled.wager);
        if let Some(fanout) = &self.fanout {
            let fanout = Arc::clone(fanout);
            let event = ActivityEvent::from(&settled.wager);
            tokio::spawn(async move { fanout.publish(event).await });
        }
    }

    pub(crate) fn on_rejected(&self, err: &SettleError) {
        match err {
            SettleError::ConcurrencyConflict(_) => self.wager_metrics.inc_conflict(),
            SettleError::Timeout => self.wager_metrics.inc_timeout(),
            _ => self.wager_metrics.inc_rejected(),
        }
    }

    pub(crate) fn http_metrics(&self) -> &HttpMetrics {
        &self.http_metrics
    }

    pub(crate) fn ws_metrics(&self) -> &WsMetrics {
        &self.ws_metrics
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.http_metrics.snapshot()
    }

    pub fn wager_metrics_snapshot(&self) -> WagerMetricsSnapshot {
        self.wager_metrics.snapshot()
    }

    pub fn ws_metrics_snapshot(&self) -> WsMetricsSnapshot {
        self.ws_metrics.snapshot()
    }

    pub fn ws_connection_count(&self) -> usize {
        self.lock_ws_connections().total
    }

    fn lock_ws_connections(&self) -> std::sync::MutexGuard<'_, WsConnectionTracker> {
        match self.ws_connections.lock() {
            Ok(tracker) => tracker,
            Err(poisoned) => {
                tracing::warn!("WebSocket connection tracker lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    pub(crate) fn try_acquire_ws_connection(
        self: &Arc<Self>,
        ip: IpAddr,
    ) -> Result<WsConnectionGuard, WsConnectionRejection> {
        // Environment variables override config
        let max_total =
            parse_env_usize("RATE_LIMIT_WS_CONNECTIONS").or(self.config.ws_max_connections);
        let max_per_ip = parse_env_usize("RATE_LIMIT_WS_CONNECTIONS_PER_IP")
            .or(self.config.ws_max_connections_per_ip);
        let mut tracker = self.lock_ws_connections();

        if let Some(limit) = max_total {
            if tracker.total >= limit {
                self.ws_metrics.inc_connection_reject_global();
                return Err(WsConnectionRejection::GlobalLimit);
            }
        }

        let current_ip = tracker.per_ip.get(&ip).copied().unwrap_or(0);
        if let Some(limit) = max_per_ip {
            if current_ip >= limit {
                self.ws_metrics.inc_connection_reject_per_ip();
                return Err(WsConnectionRejection::PerIpLimit);
            }
        }

        tracker.total = tracker.total.saturating_add(1);
        tracker.per_ip.insert(ip, current_ip.saturating_add(1));
        Ok(WsConnectionGuard {
            state: Arc::clone(self),
            ip,
        })
    }

    fn release_ws_connection(&self, ip: IpAddr) {
        let mut tracker = self.lock_ws_connections();
        tracker.total = tracker.total.saturating_sub(1);
        match tracker.per_ip.get_mut(&ip) {
            Some(count) if *count > 1 => {
                *count -= 1;
            }
            Some(_) => {
                tracker.per_ip.remove(&ip);
            }
            None => {}
        }
    }
}
