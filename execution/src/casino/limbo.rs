//! Limbo: a multiplier-threshold game.
//!
//! The player fixes a target multiplier. The hit multiplier is
//! `(1 - e) / r` floored to two decimals and clamped to `[1.00, max]`; the
//! wager wins when `hit >= target`.

use fairbet_types::{Game, Multiplier, Outcome, WagerParams};

use super::{mismatch, GameError, Resolution, Resolver};
use crate::edge_cache::HouseEdge;
use crate::rng_pipeline::Fairness;

/// Smallest target a player may pick.
pub const MIN_TARGET: Multiplier = Multiplier(101);

/// Default ceiling for both targets and hit multipliers (1,000,000.00x).
pub const DEFAULT_MAX_MULTIPLIER: Multiplier = Multiplier(100_000_000);

/// Which multiplier a winning limbo wager is paid at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayoutBasis {
    /// Pay the pre-committed target. Expected return is exactly `1 - e`.
    Target,
    /// Pay the hit multiplier. Kept for operators migrating legacy tables.
    Hit,
}

#[derive(Clone, Copy, Debug)]
pub struct Limbo {
    pub max_multiplier: Multiplier,
    pub payout_basis: PayoutBasis,
}

impl Default for Limbo {
    fn default() -> Self {
        Self {
            max_multiplier: DEFAULT_MAX_MULTIPLIER,
            payout_basis: PayoutBasis::Target,
        }
    }
}

impl Limbo {
    /// Hit multiplier for a float `r` in (0, 1].
    pub fn hit_multiplier(&self, r: f64, edge: HouseEdge) -> Multiplier {
        let raw = edge.rtp() / r;
        Multiplier::floor_from_f64(raw).clamp(Multiplier::ONE, self.max_multiplier)
    }
}

impl Resolver for Limbo {
    fn game(&self) -> Game {
        Game::Limbo
    }

    fn validate(&self, params: &WagerParams) -> Result<(), GameError> {
        let WagerParams::Limbo { target } = params else {
            return Err(mismatch(Game::Limbo, params));
        };
        if *target < MIN_TARGET || *target > self.max_multiplier {
            return Err(GameError::TargetMultiplierOutOfRange {
                got: *target,
                min: MIN_TARGET,
                max: self.max_multiplier,
            });
        }
        Ok(())
    }

    fn resolve(
        &self,
        fairness: &Fairness<'_>,
        params: &WagerParams,
        edge: HouseEdge,
    ) -> Result<Resolution, GameError> {
        self.validate(params)?;
        let WagerParams::Limbo { target } = params else {
            return Err(mismatch(Game::Limbo, params));
        };

        // The target was fixed above; only now is the randomness consulted.
        let hit = self.hit_multiplier(fairness.float(), edge);
        let (outcome, multiplier) = if hit >= *target {
            let paid = match self.payout_basis {
                PayoutBasis::Target => *target,
                PayoutBasis::Hit => hit,
            };
            (Outcome::Win, paid)
        } else {
            (Outcome::Lose, Multiplier::ZERO)
        };

        Ok(Resolution {
            outcome,
            multiplier,
            result_parameter: format!("{:.2}", hit.as_f64()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairbet_types::Cents;
    use proptest::prelude::*;

    fn edge(value: f64) -> HouseEdge {
        HouseEdge::new(value).unwrap()
    }

    #[test]
    fn worked_example_pays_hit_multiplier() {
        // stake 1.00, e = 4%, r = 0.5 -> 0.96 / 0.5 = 1.92
        let limbo = Limbo {
            payout_basis: PayoutBasis::Hit,
            ..Default::default()
        };
        let hit = limbo.hit_multiplier(0.5, edge(0.04));
        assert_eq!(hit, Multiplier(192));
        assert!(hit >= Multiplier(150));
        let payout = hit.payout(Cents(100));
        assert_eq!(payout, Cents(192));
        assert_eq!(Cents(payout.0 - 100), Cents(92));
    }

    #[test]
    fn hit_is_clamped() {
        let limbo = Limbo::default();
        // r = 1 gives 0.96, below the 1.00 floor
        assert_eq!(limbo.hit_multiplier(1.0, edge(0.04)), Multiplier::ONE);
        let tiny = 1.0 / (1u64 << 52) as f64;
        assert_eq!(limbo.hit_multiplier(tiny, edge(0.04)), DEFAULT_MAX_MULTIPLIER);
    }

    #[test]
    fn validate_rejects_bad_targets() {
        let limbo = Limbo::default();
        assert!(limbo
            .validate(&WagerParams::Limbo {
                target: Multiplier(100)
            })
            .is_err());
        assert!(limbo
            .validate(&WagerParams::Limbo {
                target: Multiplier(100_000_001)
            })
            .is_err());
        assert!(limbo
            .validate(&WagerParams::Limbo {
                target: Multiplier(101)
            })
            .is_ok());
        let dice = WagerParams::Dice {
            target: 5_000,
            direction: fairbet_types::DiceDirection::Under,
        };
        assert_eq!(
            limbo.validate(&dice),
            Err(GameError::ParamsMismatch {
                game: Game::Limbo,
                got: Game::Dice
            })
        );
    }

    #[test]
    fn resolve_reports_hit_and_target_payout() {
        let limbo = Limbo::default();
        let fairness = Fairness::new("server-seed", "client-seed", 1);
        // r = 0.48814..., hit = floor2(0.96 / r) = 1.96
        let params = WagerParams::Limbo {
            target: Multiplier(150),
        };
        let resolution = limbo.resolve(&fairness, &params, edge(0.04)).unwrap();
        assert_eq!(resolution.result_parameter, "1.96");
        assert_eq!(resolution.outcome, Outcome::Win);
        assert_eq!(resolution.multiplier, Multiplier(150));

        let params = WagerParams::Limbo {
            target: Multiplier(197),
        };
        let resolution = limbo.resolve(&fairness, &params, edge(0.04)).unwrap();
        assert_eq!(resolution.outcome, Outcome::Lose);
        assert_eq!(resolution.multiplier, Multiplier::ZERO);
    }

    proptest! {
        #[test]
        fn hit_never_exceeds_raw_multiplier(bits in 0u64..(1u64 << 52), e in 0.001f64..0.2) {
            let r = (bits + 1) as f64 / (1u64 << 52) as f64;
            let edge = edge(e);
            let hit = Limbo::default().hit_multiplier(r, edge);
            prop_assert!(hit >= Multiplier::ONE);
            prop_assert!(hit <= DEFAULT_MAX_MULTIPLIER);
            let raw = edge.rtp() / r;
            if raw >= 1.0 && raw < DEFAULT_MAX_MULTIPLIER.as_f64() {
                prop_assert!(hit.as_f64() <= raw + 1e-6);
                prop_assert!(raw - hit.as_f64() < 0.01 + 1e-6);
            }
        }
    }
}
