//! Resolution and comparison benchmark
//!
//! Lookups are served from an immutable `Arc<Snapshot>` with no locking,
//! so a resolve should cost a few ordered-map probes. Comparison walks
//! every (domain, symbol) of two snapshots.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench resolve_lookup
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use uapi_registry::manifest::Domain;
use uapi_registry::registry::Registry;
use uapi_registry::resolve::Resolver;
use uapi_registry::snapshot::{Snapshot, SnapshotBuilder, SnapshotId};
use uapi_registry::target::Target;
use uapi_registry::validate::{self, VariancePolicy};
use uapi_registry::value::Value;

const TRIPLES: [&str; 4] = [
    "x86_64-unknown-linux-gnu",
    "i686-unknown-linux-gnu",
    "aarch64-unknown-linux-gnu",
    "mips64el-unknown-linux-gnuabi64",
];

/// `symbols_per_domain` integer constants in every domain, for every target
fn synthetic_snapshot(id: &str, symbols_per_domain: usize) -> Snapshot {
    let targets: Vec<Target> = TRIPLES.iter().map(|t| Target::parse(t).unwrap()).collect();
    let mut builder = SnapshotBuilder::new();
    for domain in Domain::ALL {
        for i in 0..symbols_per_domain {
            let symbol = format!("{}_SYM_{}", domain.name().to_uppercase(), i);
            for (t, target) in targets.iter().enumerate() {
                // Every tenth symbol differs on mips
                let value = if i % 10 == 0 && t == 3 { i + 1000 } else { i };
                builder
                    .insert(domain, &symbol, target, Value::Integer(value as i64))
                    .unwrap();
            }
        }
    }
    builder.with_id(SnapshotId::new(id).unwrap()).build().unwrap()
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    for size in [100, 1_000] {
        let resolver = Resolver::from(synthetic_snapshot("bench", size));
        let target = Target::parse("aarch64-unknown-linux-gnu").unwrap();
        let hit = format!("FCNTL_SYM_{}", size / 2);

        group.bench_with_input(BenchmarkId::new("hit", size), &size, |b, _| {
            b.iter(|| resolver.resolve_int(black_box(Domain::Fcntl), black_box(&hit), &target))
        });
        group.bench_with_input(BenchmarkId::new("miss", size), &size, |b, _| {
            b.iter(|| resolver.resolve(black_box(Domain::Fcntl), black_box("O_NOPE"), &target))
        });
    }
    group.finish();
}

fn bench_registry_get(c: &mut Criterion) {
    let registry = Registry::new();
    let snapshot = registry.insert(synthetic_snapshot("registry", 1_000)).unwrap();
    let id = snapshot.id().clone();
    let target = Target::parse("x86_64-unknown-linux-gnu").unwrap();

    c.bench_function("registry_get", |b| {
        b.iter(|| registry.get(black_box(&id), Domain::Errno, black_box("ERRNO_SYM_500"), &target))
    });
}

fn bench_compare(c: &mut Criterion) {
    let a = synthetic_snapshot("a", 1_000);
    let b = synthetic_snapshot("b", 1_000);
    let policy = VariancePolicy::default_policy().unwrap();

    c.bench_function("compare_9000_symbols", |bench| {
        bench.iter(|| validate::compare(black_box(&a), black_box(&b), &policy))
    });
}

criterion_group!(benches, bench_resolve, bench_registry_get, bench_compare);
criterion_main!(benches);
