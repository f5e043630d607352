//! Offline wager verification.
//!
//! Given a revealed server seed and the public inputs of a wager, replays the
//! outcome without touching any ledger and checks the seed against its
//! published hash.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use fairbet_execution::{seed_matches, Fairness, GameConfig, HouseEdge, PayoutBasis};
use fairbet_types::{Game, WagerParams};
use serde::Serialize;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Basis {
    Target,
    Hit,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a fairbet wager from its revealed seed")]
struct Args {
    /// limbo, dice or plinko.
    #[arg(long)]
    game: Game,

    /// Revealed server seed.
    #[arg(long)]
    server_seed: String,

    #[arg(long)]
    client_seed: String,

    #[arg(long)]
    nonce: u64,

    /// Target parameter as stored on the wager, e.g. `2.00`, `under:49.50`, `8:low`.
    #[arg(long)]
    target: String,

    /// House edge in force when the wager settled.
    #[arg(long, default_value_t = 0.01)]
    house_edge: f64,

    /// Limbo payout basis the server was configured with.
    #[arg(long, value_enum, default_value_t = Basis::Target)]
    payout_basis: Basis,

    /// Published server seed hash to check the revealed seed against.
    #[arg(long)]
    hash: Option<String>,

    /// Stored result parameter to compare the replay against.
    #[arg(long)]
    expect: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    game: Game,
    target_parameter: String,
    result_parameter: String,
    outcome: String,
    multiplier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash_matches: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result_matches: Option<bool>,
}

impl Report {
    fn verified(&self) -> bool {
        self.hash_matches.unwrap_or(true) && self.result_matches.unwrap_or(true)
    }
}

fn replay(args: &Args) -> Result<Report> {
    let params = WagerParams::parse(args.game, &args.target)
        .with_context(|| format!("invalid {} target parameter {:?}", args.game, args.target))?;
    let edge = HouseEdge::new(args.house_edge).context("invalid house edge")?;

    let mut config = GameConfig::default_for(args.game);
    if let GameConfig::Limbo(limbo) = &mut config {
        limbo.payout_basis = match args.payout_basis {
            Basis::Target => PayoutBasis::Target,
            Basis::Hit => PayoutBasis::Hit,
        };
    }
    let resolver = config.resolver();
    resolver.validate(&params).context("wager parameters rejected")?;

    let fairness = Fairness::new(&args.server_seed, &args.client_seed, args.nonce);
    let resolution = resolver
        .resolve(&fairness, &params, edge)
        .context("replay failed")?;

    Ok(Report {
        game: args.game,
        target_parameter: params.describe(),
        outcome: resolution.outcome.as_str().to_string(),
        multiplier: resolution.multiplier.to_string(),
        hash_matches: args
            .hash
            .as_deref()
            .map(|hash| seed_matches(hash, &args.server_seed)),
        result_matches: args
            .expect
            .as_deref()
            .map(|expected| expected == resolution.result_parameter),
        result_parameter: resolution.result_parameter,
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    let report = replay(&args)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.verified() {
        std::process::exit(1);
    }
    Ok(())
}
