//! Plinko: a ball falls through `rows` pegs, bouncing left or right at each.
//!
//! Row `i` consumes round `i` of the wager's randomness and moves right when
//! the derived float exceeds 0.5. The landing bucket is the number of rights,
//! and the payout multiplier is read from the paytable for `(rows, risk)`.
//!
//! Paytables come in two flavours:
//! - curated: hand-tuned tables for 8, 12 and 16 rows at roughly a 1% edge.
//! - generated: a symmetric shape `w_k = growth^(|2k - n| / 2)` scaled so the
//!   binomial-weighted expected return is `1 - e`, then floored per bucket.

use fairbet_types::{Game, Multiplier, PlinkoRisk, WagerParams};

use super::{mismatch, outcome_for, GameError, Resolution, Resolver};
use crate::edge_cache::HouseEdge;
use crate::rng_pipeline::Fairness;

pub const MIN_ROWS: u8 = 8;
pub const MAX_ROWS: u8 = 16;

const CURATED_8_LOW: [u64; 9] = [560, 210, 110, 100, 50, 100, 110, 210, 560];
const CURATED_8_MEDIUM: [u64; 9] = [1300, 300, 130, 70, 40, 70, 130, 300, 1300];
const CURATED_8_HIGH: [u64; 9] = [2900, 400, 150, 30, 20, 30, 150, 400, 2900];
const CURATED_12_LOW: [u64; 13] = [1000, 300, 160, 140, 110, 100, 50, 100, 110, 140, 160, 300, 1000];
const CURATED_12_MEDIUM: [u64; 13] = [3300, 1100, 400, 200, 110, 60, 30, 60, 110, 200, 400, 1100, 3300];
const CURATED_12_HIGH: [u64; 13] = [17000, 2400, 810, 200, 70, 20, 20, 20, 70, 200, 810, 2400, 17000];
const CURATED_16_LOW: [u64; 17] = [
    1600, 900, 200, 140, 140, 120, 110, 100, 50, 100, 110, 120, 140, 140, 200, 900, 1600,
];
const CURATED_16_MEDIUM: [u64; 17] = [
    11000, 4100, 1000, 500, 300, 150, 100, 50, 30, 50, 100, 150, 300, 500, 1000, 4100, 11000,
];
const CURATED_16_HIGH: [u64; 17] = [
    100000, 13000, 2600, 900, 400, 200, 20, 20, 20, 20, 20, 200, 400, 900, 2600, 13000, 100000,
];

fn curated(rows: u8, risk: PlinkoRisk) -> Option<&'static [u64]> {
    let table: &'static [u64] = match (rows, risk) {
        (8, PlinkoRisk::Low) => &CURATED_8_LOW,
        (8, PlinkoRisk::Medium) => &CURATED_8_MEDIUM,
        (8, PlinkoRisk::High) => &CURATED_8_HIGH,
        (12, PlinkoRisk::Low) => &CURATED_12_LOW,
        (12, PlinkoRisk::Medium) => &CURATED_12_MEDIUM,
        (12, PlinkoRisk::High) => &CURATED_12_HIGH,
        (16, PlinkoRisk::Low) => &CURATED_16_LOW,
        (16, PlinkoRisk::Medium) => &CURATED_16_MEDIUM,
        (16, PlinkoRisk::High) => &CURATED_16_HIGH,
        _ => return None,
    };
    Some(table)
}

/// Shape steepness per risk level for generated tables.
fn growth(risk: PlinkoRisk) -> f64 {
    match risk {
        PlinkoRisk::Low => 1.35,
        PlinkoRisk::Medium => 1.7,
        PlinkoRisk::High => 2.2,
    }
}

/// Probability of landing in `bucket` after `rows` fair bounces.
pub fn bucket_probability(rows: u8, bucket: u8) -> f64 {
    if bucket > rows {
        return 0.0;
    }
    let n = rows as u32;
    let k = bucket.min(rows - bucket) as u32;
    let mut ways = 1.0f64;
    for i in 0..k {
        ways = ways * (n - i) as f64 / (i + 1) as f64;
    }
    ways / 2f64.powi(n as i32)
}

/// Where paytables come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaytableSource {
    /// Prefer curated tables; fall back to generated ones when no curated
    /// table exists for the row count or it would pay more than `1 - e`.
    #[default]
    Curated,
    /// Always generate from the configured house edge.
    Generated,
}

/// Bucket multipliers for one `(rows, risk)` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paytable {
    rows: u8,
    multipliers: Vec<Multiplier>,
}

impl Paytable {
    fn from_hundredths(rows: u8, values: &[u64]) -> Self {
        Self {
            rows,
            multipliers: values.iter().copied().map(Multiplier).collect(),
        }
    }

    /// Build a table from the growth shape, normalised to `rtp`.
    pub fn generate(rows: u8, risk: PlinkoRisk, rtp: f64) -> Self {
        let g = growth(risk);
        let weights: Vec<f64> = (0..=rows)
            .map(|k| g.powf((2 * k as i32 - rows as i32).unsigned_abs() as f64 / 2.0))
            .collect();
        let scale: f64 = weights
            .iter()
            .enumerate()
            .map(|(k, w)| bucket_probability(rows, k as u8) * w)
            .sum();
        let multipliers = weights
            .iter()
            .map(|w| Multiplier::floor_from_f64(rtp * w / scale))
            .collect();
        Self { rows, multipliers }
    }

    pub fn rows(&self) -> u8 {
        self.rows
    }

    pub fn multipliers(&self) -> &[Multiplier] {
        &self.multipliers
    }

    pub fn multiplier(&self, bucket: u8) -> Multiplier {
        self.multipliers
            .get(bucket as usize)
            .copied()
            .unwrap_or(Multiplier::ZERO)
    }

    /// Expected return of one unit staked.
    pub fn rtp(&self) -> f64 {
        self.multipliers
            .iter()
            .enumerate()
            .map(|(k, m)| bucket_probability(self.rows, k as u8) * m.as_f64())
            .sum()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Plinko {
    pub min_rows: u8,
    pub max_rows: u8,
    pub source: PaytableSource,
}

impl Default for Plinko {
    fn default() -> Self {
        Self {
            min_rows: MIN_ROWS,
            max_rows: MAX_ROWS,
            source: PaytableSource::Curated,
        }
    }
}

impl Plinko {
    /// Paytable in force for `(rows, risk)` under house edge `edge`.
    pub fn paytable(&self, rows: u8, risk: PlinkoRisk, edge: HouseEdge) -> Paytable {
        if self.source == PaytableSource::Curated {
            if let Some(values) = curated(rows, risk) {
                let table = Paytable::from_hundredths(rows, values);
                if table.rtp() <= edge.rtp() + 1e-9 {
                    return table;
                }
                tracing::debug!(
                    rows,
                    risk = risk.as_str(),
                    house_edge = edge.value(),
                    "curated paytable exceeds target rtp; generating"
                );
            }
        }
        Paytable::generate(rows, risk, edge.rtp())
    }
}

/// Bounce `rows` times; returns the bucket and the L/R path.
pub fn drop_ball(fairness: &Fairness<'_>, rows: u8) -> (u8, String) {
    let mut bucket = 0u8;
    let mut path = String::with_capacity(rows as usize);
    for row in 0..rows {
        if fairness.float_at(row as u32) > 0.5 {
            bucket += 1;
            path.push('R');
        } else {
            path.push('L');
        }
    }
    (bucket, path)
}

impl Resolver for Plinko {
    fn game(&self) -> Game {
        Game::Plinko
    }

    fn validate(&self, params: &WagerParams) -> Result<(), GameError> {
        let WagerParams::Plinko { rows, .. } = params else {
            return Err(mismatch(Game::Plinko, params));
        };
        if *rows < self.min_rows || *rows > self.max_rows {
            return Err(GameError::PlinkoRowsOutOfRange {
                got: *rows,
                min: self.min_rows,
                max: self.max_rows,
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
        let WagerParams::Plinko { rows, risk } = params else {
            return Err(mismatch(Game::Plinko, params));
        };

        let (bucket, path) = drop_ball(fairness, *rows);
        let multiplier = self.paytable(*rows, *risk, edge).multiplier(bucket);
        Ok(Resolution {
            outcome: outcome_for(multiplier),
            multiplier,
            result_parameter: format!("{bucket}:{path}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairbet_types::Outcome;
    use proptest::prelude::*;

    fn edge(value: f64) -> HouseEdge {
        HouseEdge::new(value).unwrap()
    }

    #[test]
    fn probabilities_sum_to_one() {
        for rows in MIN_ROWS..=MAX_ROWS {
            let total: f64 = (0..=rows).map(|k| bucket_probability(rows, k)).sum();
            assert!((total - 1.0).abs() < 1e-12, "rows {rows}");
        }
        assert_eq!(bucket_probability(8, 9), 0.0);
        assert!((bucket_probability(8, 4) - 70.0 / 256.0).abs() < 1e-15);
    }

    #[test]
    fn curated_tables_hold_one_percent_edge() {
        for rows in [8, 12, 16] {
            for risk in PlinkoRisk::ALL {
                let table = Paytable::from_hundredths(rows, curated(rows, risk).unwrap());
                assert_eq!(table.multipliers().len(), rows as usize + 1);
                let rtp = table.rtp();
                assert!(rtp > 0.985 && rtp < 0.992, "{rows} {risk:?}: {rtp}");
                let reversed: Vec<_> = table.multipliers().iter().rev().copied().collect();
                assert_eq!(reversed, table.multipliers());
            }
        }
    }

    #[test]
    fn generated_table_matches_shape() {
        let table = Paytable::generate(8, PlinkoRisk::Medium, 0.99);
        let expected: Vec<Multiplier> = [408, 240, 141, 83, 48, 83, 141, 240, 408]
            .into_iter()
            .map(Multiplier)
            .collect();
        assert_eq!(table.multipliers(), expected.as_slice());
    }

    #[test]
    fn curated_falls_back_when_edge_is_tighter() {
        let plinko = Plinko::default();
        let curated_table = plinko.paytable(8, PlinkoRisk::Medium, edge(0.01));
        assert_eq!(curated_table.multiplier(0), Multiplier(1300));

        // 8/high returns 0.9906, just over a 1% edge.
        let high = plinko.paytable(8, PlinkoRisk::High, edge(0.01));
        assert_eq!(high, Paytable::generate(8, PlinkoRisk::High, 0.99));
        let high = plinko.paytable(8, PlinkoRisk::High, edge(0.005));
        assert_eq!(high.multiplier(0), Multiplier(2900));

        let generated = plinko.paytable(10, PlinkoRisk::Medium, edge(0.01));
        assert_eq!(generated, Paytable::generate(10, PlinkoRisk::Medium, 0.99));

        // A 4% edge is tighter than the curated 1% tables.
        let tight = plinko.paytable(8, PlinkoRisk::Medium, edge(0.04));
        assert_eq!(tight, Paytable::generate(8, PlinkoRisk::Medium, 0.96));
        assert!(tight.rtp() <= 0.96 + 1e-9);
    }

    #[test]
    fn drop_ball_follows_rounds() {
        let fairness = Fairness::new("server-seed", "client-seed", 1);
        assert_eq!(drop_ball(&fairness, 8), (4, "RLLRLRRL".to_string()));
        assert_eq!(drop_ball(&fairness, 16), (6, "RLLRLRRLLRLLLLLR".to_string()));
    }

    #[test]
    fn partial_return_is_a_loss() {
        let plinko = Plinko::default();
        let fairness = Fairness::new("server-seed", "client-seed", 1);
        let params = WagerParams::Plinko {
            rows: 8,
            risk: PlinkoRisk::Medium,
        };
        let resolution = plinko.resolve(&fairness, &params, edge(0.01)).unwrap();
        assert_eq!(resolution.result_parameter, "4:RLLRLRRL");
        assert_eq!(resolution.multiplier, Multiplier(40));
        assert_eq!(resolution.outcome, Outcome::Lose);
    }

    #[test]
    fn validate_rows() {
        let plinko = Plinko::default();
        for rows in [7, 17] {
            assert_eq!(
                plinko.validate(&WagerParams::Plinko {
                    rows,
                    risk: PlinkoRisk::Low
                }),
                Err(GameError::PlinkoRowsOutOfRange {
                    got: rows,
                    min: MIN_ROWS,
                    max: MAX_ROWS
                })
            );
        }
        assert!(plinko
            .validate(&WagerParams::Plinko {
                rows: 13,
                risk: PlinkoRisk::High
            })
            .is_ok());
    }

    proptest! {
        #[test]
        fn generated_rtp_within_a_cent(rows in MIN_ROWS..=MAX_ROWS, risk in 0usize..3, e in 0.001f64..0.5) {
            let rtp = 1.0 - e;
            let table = Paytable::generate(rows, PlinkoRisk::ALL[risk], rtp);
            let actual = table.rtp();
            prop_assert!(actual <= rtp + 1e-9);
            prop_assert!(actual >= rtp - 0.01 - 1e-9);
        }
    }
}
