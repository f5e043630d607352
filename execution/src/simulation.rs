//! Monte Carlo house-edge estimates.
//!
//! Plays a fixed set of parameters across a range of nonces with a fixed
//! seed pair, exactly as settlement would, and reports the observed edge.
//! With the `parallel` feature the nonce range is spread across rayon's pool.

use fairbet_types::{Cents, WagerParams};
use std::ops::Range;

use crate::casino::{GameError, Resolver};
use crate::edge_cache::HouseEdge;
use crate::rng_pipeline::Fairness;

pub const SIMULATION_CLIENT_SEED: &str = "simulation";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stats {
    pub trials: u64,
    pub total_net: f64,
    pub total_net_sq: f64,
    pub total_wagered: f64,
}

impl Stats {
    pub fn add(&mut self, net: i64, wagered: i64) {
        let n = net as f64;
        self.trials += 1;
        self.total_net += n;
        self.total_net_sq += n * n;
        self.total_wagered += wagered as f64;
    }

    pub fn merge(&mut self, other: &Stats) {
        self.trials += other.trials;
        self.total_net += other.total_net;
        self.total_net_sq += other.total_net_sq;
        self.total_wagered += other.total_wagered;
    }

    pub fn mean_net(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.total_net / self.trials as f64
        }
    }

    pub fn mean_wagered(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.total_wagered / self.trials as f64
        }
    }

    /// Observed edge: the share of each unit wagered the house kept.
    pub fn house_edge(&self) -> f64 {
        let mw = self.mean_wagered();
        if mw == 0.0 {
            0.0
        } else {
            -self.mean_net() / mw
        }
    }

    pub fn rtp(&self) -> f64 {
        1.0 - self.house_edge()
    }

    /// Standard error of the mean net result per trial.
    pub fn stderr(&self) -> f64 {
        if self.trials <= 1 {
            return 0.0;
        }
        let mean = self.mean_net();
        let var = (self.total_net_sq / self.trials as f64) - mean * mean;
        let var = if var < 0.0 { 0.0 } else { var };
        (var / self.trials as f64).sqrt()
    }
}

/// Net result in cents of one wager at `nonce`.
fn play(
    resolver: &dyn Resolver,
    params: &WagerParams,
    edge: HouseEdge,
    stake: Cents,
    server_seed: &str,
    nonce: u64,
) -> Result<i64, GameError> {
    let fairness = Fairness::new(server_seed, SIMULATION_CLIENT_SEED, nonce);
    let resolution = resolver.resolve(&fairness, params, edge)?;
    Ok(resolution.multiplier.payout(stake).0 - stake.0)
}

/// Play `params` once for every nonce in `nonces`.
pub fn simulate(
    resolver: &dyn Resolver,
    params: &WagerParams,
    edge: HouseEdge,
    stake: Cents,
    server_seed: &str,
    nonces: Range<u64>,
) -> Result<Stats, GameError> {
    resolver.validate(params)?;

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        nonces
            .into_par_iter()
            .try_fold(Stats::default, |mut stats, nonce| {
                let net = play(resolver, params, edge, stake, server_seed, nonce)?;
                stats.add(net, stake.0);
                Ok::<_, GameError>(stats)
            })
            .try_reduce(Stats::default, |mut left, right| {
                left.merge(&right);
                Ok(left)
            })
    }

    #[cfg(not(feature = "parallel"))]
    {
        let mut stats = Stats::default();
        for nonce in nonces {
            let net = play(resolver, params, edge, stake, server_seed, nonce)?;
            stats.add(net, stake.0);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casino::{Dice, Limbo, Plinko};
    use fairbet_types::{DiceDirection, Multiplier, PlinkoRisk};

    const SEED: &str = "simulation-seed";

    fn edge(value: f64) -> HouseEdge {
        HouseEdge::new(value).unwrap()
    }

    #[test]
    fn test_stats_merge() {
        let mut a = Stats::default();
        a.add(-100, 100);
        a.add(98, 100);
        let mut b = Stats::default();
        b.add(-100, 100);
        a.merge(&b);
        assert_eq!(a.trials, 3);
        assert!((a.house_edge() - 102.0 / 300.0).abs() < 1e-12);
        assert_eq!(Stats::default().house_edge(), 0.0);
    }

    #[test]
    fn test_dice_conserves_edge() {
        let params = WagerParams::Dice {
            target: 5_000,
            direction: DiceDirection::Under,
        };
        let stats = simulate(&Dice::default(), &params, edge(0.01), Cents(100), SEED, 0..100_000)
            .unwrap();
        assert_eq!(stats.trials, 100_000);
        assert!((stats.rtp() - 0.99).abs() < 0.01, "rtp {}", stats.rtp());
    }

    #[test]
    fn test_limbo_conserves_edge() {
        let params = WagerParams::Limbo {
            target: Multiplier(200),
        };
        let stats = simulate(&Limbo::default(), &params, edge(0.01), Cents(100), SEED, 0..100_000)
            .unwrap();
        assert!((stats.rtp() - 0.99).abs() < 0.01, "rtp {}", stats.rtp());
    }

    #[test]
    fn test_plinko_tracks_paytable() {
        let plinko = Plinko::default();
        let params = WagerParams::Plinko {
            rows: 8,
            risk: PlinkoRisk::Low,
        };
        let expected = plinko.paytable(8, PlinkoRisk::Low, edge(0.01)).rtp();
        let stats = simulate(&plinko, &params, edge(0.01), Cents(100), SEED, 0..20_000).unwrap();
        assert!((stats.rtp() - expected).abs() < 0.02, "rtp {}", stats.rtp());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = WagerParams::Limbo {
            target: Multiplier(100),
        };
        assert!(simulate(&Limbo::default(), &params, edge(0.01), Cents(100), SEED, 0..10).is_err());
    }
}
