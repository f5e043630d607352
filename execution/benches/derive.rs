use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fairbet_execution::casino::{Dice, Limbo, Plinko, Resolver};
use fairbet_execution::{derive_float, Fairness, HouseEdge};
use fairbet_types::{DiceDirection, Multiplier, PlinkoRisk, WagerParams};

const SERVER: &str = "5f3c0b8e2d1a4f6b9c7e0a1d2b3c4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0c1d";
const CLIENT: &str = "bench-client";

fn derive(c: &mut Criterion) {
    c.bench_function("derive_float", |b| {
        let mut nonce = 0u64;
        b.iter(|| {
            nonce += 1;
            black_box(derive_float(SERVER, CLIENT, nonce))
        })
    });
}

fn resolve(c: &mut Criterion) {
    let edge = match HouseEdge::new(0.01) {
        Ok(edge) => edge,
        Err(err) => panic!("bench edge: {err}"),
    };
    let mut group = c.benchmark_group("resolve");

    let limbo = Limbo::default();
    let params = WagerParams::Limbo {
        target: Multiplier(200),
    };
    group.bench_function("limbo", |b| {
        b.iter(|| black_box(limbo.resolve(&Fairness::new(SERVER, CLIENT, 7), &params, edge)))
    });

    let dice = Dice::default();
    let params = WagerParams::Dice {
        target: 5_000,
        direction: DiceDirection::Under,
    };
    group.bench_function("dice", |b| {
        b.iter(|| black_box(dice.resolve(&Fairness::new(SERVER, CLIENT, 7), &params, edge)))
    });

    let plinko = Plinko::default();
    for rows in [8u8, 12, 16] {
        let params = WagerParams::Plinko {
            rows,
            risk: PlinkoRisk::High,
        };
        group.bench_function(BenchmarkId::new("plinko", rows), |b| {
            b.iter(|| black_box(plinko.resolve(&Fairness::new(SERVER, CLIENT, 7), &params, edge)))
        });
    }
    group.finish();
}

criterion_group!(benches, derive, resolve);
criterion_main!(benches);
