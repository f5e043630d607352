use fairbet_types::{Game, Wager};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_BUCKET_COUNT: usize = 12;
const LATENCY_BUCKETS_MS: [u64; LATENCY_BUCKET_COUNT] =
    [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

#[derive(Clone, Debug, Serialize)]
pub struct LatencySnapshot {
    pub buckets_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub overflow: u64,
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

#[derive(Default)]
struct LatencyMetrics {
    buckets: [AtomicU64; LATENCY_BUCKET_COUNT],
    overflow: AtomicU64,
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyMetrics {
    fn record(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.update_max(ms);

        if let Some((idx, _)) = LATENCY_BUCKETS_MS
            .iter()
            .enumerate()
            .find(|(_, bucket)| ms <= **bucket)
        {
            self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        } else {
            self.overflow.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        let avg_ms = if count > 0 {
            total_ms as f64 / count as f64
        } else {
            0.0
        };
        let counts = self
            .buckets
            .iter()
            .map(|bucket| bucket.load(Ordering::Relaxed))
            .collect::<Vec<_>>();

        LatencySnapshot {
            buckets_ms: LATENCY_BUCKETS_MS.to_vec(),
            counts,
            overflow: self.overflow.load(Ordering::Relaxed),
            count,
            avg_ms,
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }

    fn update_max(&self, value: u64) {
        let mut current = self.max_ms.load(Ordering::Relaxed);
        while value > current {
            match self.max_ms.compare_exchange_weak(
                current,
                value,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(next) => current = next,
            }
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HttpMetricsSnapshot {
    pub wager: LatencySnapshot,
    pub query: LatencySnapshot,
    pub reject_rate_limit: u64,
    pub reject_body_limit: u64,
    pub reject_unauthorized: u64,
}

#[derive(Default)]
pub struct HttpMetrics {
    wager: LatencyMetrics,
    query: LatencyMetrics,
    reject_rate_limit: AtomicU64,
    reject_body_limit: AtomicU64,
    reject_unauthorized: AtomicU64,
}

impl HttpMetrics {
    pub fn record_wager(&self, duration: Duration) {
        self.wager.record(duration);
    }

    pub fn record_query(&self, duration: Duration) {
        self.query.record(duration);
    }

    pub fn inc_reject_rate_limit(&self) {
        self.reject_rate_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_body_limit(&self) {
        self.reject_body_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_unauthorized(&self) {
        self.reject_unauthorized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HttpMetricsSnapshot {
        HttpMetricsSnapshot {
            wager: self.wager.snapshot(),
            query: self.query.snapshot(),
            reject_rate_limit: self.reject_rate_limit.load(Ordering::Relaxed),
            reject_body_limit: self.reject_body_limit.load(Ordering::Relaxed),
            reject_unauthorized: self.reject_unauthorized.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct GameCounters {
    settled: AtomicU64,
    wins: AtomicU64,
    staked_cents: AtomicU64,
    paid_cents: AtomicU64,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct GameCountersSnapshot {
    pub settled: u64,
    pub wins: u64,
    pub staked_cents: u64,
    pub paid_cents: u64,
}

impl GameCounters {
    fn snapshot(&self) -> GameCountersSnapshot {
        GameCountersSnapshot {
            settled: self.settled.load(Ordering::Relaxed),
            wins: self.wins.load(Ordering::Relaxed),
            staked_cents: self.staked_cents.load(Ordering::Relaxed),
            paid_cents: self.paid_cents.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct WagerMetricsSnapshot {
    pub limbo: GameCountersSnapshot,
    pub dice: GameCountersSnapshot,
    pub plinko: GameCountersSnapshot,
    pub rejected: u64,
    pub conflicts: u64,
    pub timeouts: u64,
}

/// Settlement counters. Staked and paid totals mix currencies; they track
/// volume, not balances.
#[derive(Default)]
pub struct WagerMetrics {
    limbo: GameCounters,
    dice: GameCounters,
    plinko: GameCounters,
    rejected: AtomicU64,
    conflicts: AtomicU64,
    timeouts: AtomicU64,
}

impl WagerMetrics {
    fn counters(&self, game: Game) -> &GameCounters {
        match game {
            Game::Limbo => &self.limbo,
            Game::Dice => &self.dice,
            Game::Plinko => &self.plinko,
        }
    }

    pub fn record_settled(&self, wager: &Wager) {
        let counters = self.counters(wager.game);
        counters.settled.fetch_add(1, Ordering::Relaxed);
        if wager.outcome.is_win() {
            counters.wins.fetch_add(1, Ordering::Relaxed);
        }
        counters
            .staked_cents
            .fetch_add(wager.amount.0.max(0) as u64, Ordering::Relaxed);
        counters
            .paid_cents
            .fetch_add(wager.payout.0.max(0) as u64, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WagerMetricsSnapshot {
        WagerMetricsSnapshot {
            limbo: self.limbo.snapshot(),
            dice: self.dice.snapshot(),
            plinko: self.plinko.snapshot(),
            rejected: self.rejected.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
pub struct WsMetrics {
    lagged: AtomicU64,
    queue_full: AtomicU64,
    send_errors: AtomicU64,
    send_timeouts: AtomicU64,
    connection_reject_global: AtomicU64,
    connection_reject_per_ip: AtomicU64,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct WsMetricsSnapshot {
    pub lagged: u64,
    pub queue_full: u64,
    pub send_errors: u64,
    pub send_timeouts: u64,
    pub connection_reject_global: u64,
    pub connection_reject_per_ip: u64,
}

impl WsMetrics {
    pub fn add_lagged(&self, skipped: u64) {
        self.lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn inc_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_timeout(&self) {
        self.send_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connection_reject_global(&self) {
        self.connection_reject_global
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connection_reject_per_ip(&self) {
        self.connection_reject_per_ip
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WsMetricsSnapshot {
        WsMetricsSnapshot {
            lagged: self.lagged.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            send_timeouts: self.send_timeouts.load(Ordering::Relaxed),
            connection_reject_global: self.connection_reject_global.load(Ordering::Relaxed),
            connection_reject_per_ip: self.connection_reject_per_ip.load(Ordering::Relaxed),
        }
    }
}
