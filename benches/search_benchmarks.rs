use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use solspace::{
    parser::{parse_predicate, parse_relation, ParsedConstraints},
    solver::{domain::IntDomain, search::Direction, store::Store},
    space::{SolutionSpace, Utility},
};

/// A chain of soft predicates over `n` variables with domains 0..4:
/// each consecutive pair contributes |x_i - x_{i+1}| to the cost, and the
/// endpoints are tied by an extensional preference table.
fn chain_space(n: usize) -> SolutionSpace {
    let mut store = Store::new();
    let names: Vec<String> = (0..n).map(|i| format!("x{}", i)).collect();
    for name in &names {
        let _ = store.new_variable(name.clone(), IntDomain::bounds(0, 4));
    }

    let mut parsed = ParsedConstraints::new();
    for i in 0..n - 1 {
        parse_predicate(
            &mut store,
            &format!("dist{}", i),
            &format!("{} {}", names[i], names[i + 1]),
            "int X0 int X1",
            "abs(sub(X0,X1))",
            &mut parsed,
        )
        .unwrap();
    }
    parse_relation(
        &mut store,
        "pref",
        &[names[0].as_str(), names[n - 1].as_str()],
        "soft",
        Some("3"),
        "0: 0 4|1: 4 0",
        &mut parsed,
    )
    .unwrap();

    let scope: Vec<&str> = names.iter().map(String::as_str).collect();
    SolutionSpace::from_parsed("chain", &store, &parsed, &scope, Direction::Minimize)
}

fn bench_best_first(c: &mut Criterion) {
    let mut group = c.benchmark_group("best_first");
    for n in [3usize, 4, 5] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let space = chain_space(n);
            b.iter(|| {
                let mut iter = space.iter_best_first();
                black_box(iter.next())
            });
        });
    }
    group.finish();
}

fn bench_utility_queries(c: &mut Criterion) {
    let space = chain_space(4);
    c.bench_function("utility_query", |b| {
        let mut work = space.clone();
        b.iter(|| black_box(work.utility(&[0, 1, 2, 3])));
    });
}

fn bench_resolve(c: &mut Criterion) {
    let space = chain_space(3);
    c.bench_function("resolve", |b| {
        b.iter(|| {
            let resolved = space.resolve(true);
            black_box(resolved.default_utility() == Utility::Finite(0))
        });
    });
}

criterion_group!(benches, bench_best_first, bench_utility_queries, bench_resolve);
criterion_main!(benches);
