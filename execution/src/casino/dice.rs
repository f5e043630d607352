//! Dice: roll a number on 0.00..=99.99 and land under or over a target.
//!
//! Rolls and targets are integer hundredths. The win chance follows directly
//! from the target, and the multiplier is `(1 - e) / chance` floored to two
//! decimals, so the expected return never exceeds `1 - e`.

use fairbet_types::{DiceDirection, Game, Multiplier, Outcome, WagerParams};

use super::{mismatch, GameError, Resolution, Resolver};
use crate::edge_cache::HouseEdge;
use crate::rng_pipeline::Fairness;

/// Number of distinct rolls (0.00 through 99.99).
pub const ROLL_SPACE: u32 = 10_000;

/// Highest roll, 99.99.
pub const MAX_ROLL: u32 = ROLL_SPACE - 1;

/// Default bounds on the win chance, in hundredths of a percent.
pub const DEFAULT_MIN_CHANCE: u32 = 100;
pub const DEFAULT_MAX_CHANCE: u32 = 9_800;

#[derive(Clone, Copy, Debug)]
pub struct Dice {
    pub min_chance: u32,
    pub max_chance: u32,
}

impl Default for Dice {
    fn default() -> Self {
        Self {
            min_chance: DEFAULT_MIN_CHANCE,
            max_chance: DEFAULT_MAX_CHANCE,
        }
    }
}

/// Roll in hundredths for a float `r` in (0, 1].
pub fn roll(r: f64) -> u32 {
    ((r * ROLL_SPACE as f64).floor() as u32).min(MAX_ROLL)
}

/// Number of winning rolls out of [`ROLL_SPACE`].
pub fn winning_rolls(target: u32, direction: DiceDirection) -> u32 {
    match direction {
        DiceDirection::Under => target,
        DiceDirection::Over => MAX_ROLL.saturating_sub(target),
    }
}

/// Under-target for a double-or-nothing follow-up: the largest chance that
/// still keeps a 2.00x payout within the house edge.
pub fn double_or_nothing_target(edge: HouseEdge) -> u32 {
    (edge.rtp() * (ROLL_SPACE / 2) as f64).floor() as u32
}

fn format_roll(value: u32) -> String {
    format!("{}.{:02}", value / 100, value % 100)
}

impl Dice {
    pub fn multiplier(&self, chance: u32, edge: HouseEdge) -> Multiplier {
        if chance == 0 {
            return Multiplier::ZERO;
        }
        Multiplier::floor_from_f64(edge.rtp() * ROLL_SPACE as f64 / chance as f64)
    }
}

impl Resolver for Dice {
    fn game(&self) -> Game {
        Game::Dice
    }

    fn validate(&self, params: &WagerParams) -> Result<(), GameError> {
        let WagerParams::Dice { target, direction } = params else {
            return Err(mismatch(Game::Dice, params));
        };
        if *target > MAX_ROLL {
            return Err(GameError::DiceTargetOutOfRange { got: *target });
        }
        let chance = winning_rolls(*target, *direction);
        if chance < self.min_chance || chance > self.max_chance {
            return Err(GameError::DiceChanceOutOfRange { got: *target });
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
        let WagerParams::Dice { target, direction } = params else {
            return Err(mismatch(Game::Dice, params));
        };

        let rolled = roll(fairness.float());
        let won = match direction {
            DiceDirection::Under => rolled < *target,
            DiceDirection::Over => rolled > *target,
        };
        let (outcome, multiplier) = if won {
            (
                Outcome::Win,
                self.multiplier(winning_rolls(*target, *direction), edge),
            )
        } else {
            (Outcome::Lose, Multiplier::ZERO)
        };

        Ok(Resolution {
            outcome,
            multiplier,
            result_parameter: format_roll(rolled),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(value: f64) -> HouseEdge {
        HouseEdge::new(value).unwrap()
    }

    #[test]
    fn roll_covers_full_range() {
        assert_eq!(roll(1.0 / (1u64 << 52) as f64), 0);
        assert_eq!(roll(0.5), 5_000);
        assert_eq!(roll(1.0), MAX_ROLL);
    }

    #[test]
    fn winning_rolls_are_symmetric() {
        assert_eq!(winning_rolls(5_000, DiceDirection::Under), 5_000);
        assert_eq!(winning_rolls(4_999, DiceDirection::Over), 5_000);
        assert_eq!(winning_rolls(MAX_ROLL, DiceDirection::Over), 0);
    }

    #[test]
    fn multiplier_floors() {
        let dice = Dice::default();
        // 0.99 / 0.5 = 1.98
        assert_eq!(dice.multiplier(5_000, edge(0.01)), Multiplier(198));
        // 0.99 / 0.33 = 3.0
        assert_eq!(dice.multiplier(3_300, edge(0.01)), Multiplier(300));
        // 0.96 / 0.07 = 13.714..
        assert_eq!(dice.multiplier(700, edge(0.04)), Multiplier(1_371));
    }

    #[test]
    fn validate_enforces_chance_bounds() {
        let dice = Dice::default();
        let under = |target| WagerParams::Dice {
            target,
            direction: DiceDirection::Under,
        };
        let over = |target| WagerParams::Dice {
            target,
            direction: DiceDirection::Over,
        };
        assert!(dice.validate(&under(99)).is_err());
        assert!(dice.validate(&under(100)).is_ok());
        assert!(dice.validate(&under(9_800)).is_ok());
        assert!(dice.validate(&under(9_801)).is_err());
        assert!(dice.validate(&over(9_899)).is_ok());
        assert!(dice.validate(&over(9_900)).is_err());
        assert!(dice.validate(&over(198)).is_err());
        assert_eq!(
            dice.validate(&under(10_000)),
            Err(GameError::DiceTargetOutOfRange { got: 10_000 })
        );
    }

    #[test]
    fn resolve_uses_roll_direction() {
        let dice = Dice::default();
        // nonce 1 -> r = 0.48814..., roll 48.81
        let fairness = Fairness::new("server-seed", "client-seed", 1);
        let under = WagerParams::Dice {
            target: 5_000,
            direction: DiceDirection::Under,
        };
        let resolution = dice.resolve(&fairness, &under, edge(0.01)).unwrap();
        assert_eq!(resolution.result_parameter, "48.81");
        assert_eq!(resolution.outcome, Outcome::Win);
        assert_eq!(resolution.multiplier, Multiplier(198));

        let over = WagerParams::Dice {
            target: 5_000,
            direction: DiceDirection::Over,
        };
        let resolution = dice.resolve(&fairness, &over, edge(0.01)).unwrap();
        assert_eq!(resolution.outcome, Outcome::Lose);
        assert_eq!(resolution.multiplier, Multiplier::ZERO);
    }

    #[test]
    fn double_or_nothing_pays_two_x() {
        let dice = Dice::default();
        for e in [0.01, 0.02, 0.03, 0.04, 0.05, 0.1] {
            let target = double_or_nothing_target(edge(e));
            assert_eq!(
                dice.multiplier(winning_rolls(target, DiceDirection::Under), edge(e)),
                Multiplier(200),
                "edge {e}"
            );
            assert!(dice
                .validate(&WagerParams::Dice {
                    target,
                    direction: DiceDirection::Under
                })
                .is_ok());
        }
    }
}
