//! Observed house edge for a spread of wager parameters.
//!
//! Run with `cargo run --release -p fairbet-server --example house_edge`.
//! Prints CSV: one row per game, bet and configured edge.

use fairbet_execution::casino::{Dice, Limbo, Plinko};
use fairbet_execution::{simulate, HouseEdge, Resolver};
use fairbet_types::{Cents, DiceDirection, Multiplier, PlinkoRisk, WagerParams};
use rayon::prelude::*;

const TRIALS: u64 = 200_000;
const BASE_BET: Cents = Cents(10_000);
const SERVER_SEED: &str = "house-edge-simulation";
const EDGES: [f64; 3] = [0.01, 0.02, 0.04];

#[derive(Clone)]
struct ResultRow {
    game: String,
    bet: String,
    configured_edge: f64,
    trials: u64,
    avg_wagered: f64,
    avg_net: f64,
    edge: f64,
    stderr: f64,
}

fn cases() -> Vec<WagerParams> {
    let mut cases = Vec::new();
    for target in [101, 150, 200, 1_000, 10_000] {
        cases.push(WagerParams::Limbo {
            target: Multiplier(target),
        });
    }
    for (target, direction) in [
        (5_000, DiceDirection::Under),
        (9_800, DiceDirection::Under),
        (200, DiceDirection::Over),
        (9_000, DiceDirection::Over),
    ] {
        cases.push(WagerParams::Dice { target, direction });
    }
    for rows in [8, 12, 16] {
        for risk in [PlinkoRisk::Low, PlinkoRisk::Medium, PlinkoRisk::High] {
            cases.push(WagerParams::Plinko { rows, risk });
        }
    }
    cases
}

fn resolver_for(params: &WagerParams) -> Box<dyn Resolver> {
    match params {
        WagerParams::Limbo { .. } => Box::new(Limbo::default()),
        WagerParams::Dice { .. } => Box::new(Dice::default()),
        WagerParams::Plinko { .. } => Box::new(Plinko::default()),
    }
}

fn main() {
    let jobs: Vec<(WagerParams, f64)> = cases()
        .into_iter()
        .flat_map(|params| EDGES.iter().map(move |edge| (params, *edge)))
        .collect();

    let results: Vec<ResultRow> = jobs
        .par_iter()
        .filter_map(|(params, configured_edge)| {
            let edge = match HouseEdge::new(*configured_edge) {
                Ok(edge) => edge,
                Err(err) => {
                    eprintln!("skipping edge {configured_edge}: {err}");
                    return None;
                }
            };
            let resolver = resolver_for(params);
            match simulate(
                resolver.as_ref(),
                params,
                edge,
                BASE_BET,
                SERVER_SEED,
                0..TRIALS,
            ) {
                Ok(stats) => Some(ResultRow {
                    game: params.game().to_string(),
                    bet: params.describe(),
                    configured_edge: *configured_edge,
                    trials: stats.trials,
                    avg_wagered: stats.mean_wagered(),
                    avg_net: stats.mean_net(),
                    edge: stats.house_edge(),
                    stderr: stats.stderr(),
                }),
                Err(err) => {
                    eprintln!("skipping {}: {err}", params.describe());
                    None
                }
            }
        })
        .collect();

    println!("game,bet,configured_edge,trials,avg_wagered,avg_net,house_edge,stderr");
    for row in results {
        println!(
            "{},{},{:.2},{},{:.4},{:.4},{:.6},{:.6}",
            row.game,
            row.bet,
            row.configured_edge,
            row.trials,
            row.avg_wagered,
            row.avg_net,
            row.edge,
            row.stderr
        );
    }
}
