//! Test helpers: a hand-driven clock and ready-made engines.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::casino::GameRegistry;
use crate::clock::Clock;
use crate::ledger::{Ledger, MemoryLedger};
use crate::settlement::{Engine, EngineConfig};

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Engine over `ledger` with default games and a manual clock at t=1s.
pub fn test_engine_with<L: Ledger>(ledger: L) -> Engine<L> {
    Engine::new(
        Arc::new(ledger),
        Arc::new(GameRegistry::new()),
        Arc::new(ManualClock::new(1_000)),
        EngineConfig::default(),
    )
}

/// Engine over a fresh in-memory ledger.
pub fn test_engine() -> Engine<MemoryLedger> {
    test_engine_with(MemoryLedger::default())
}
