use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use relink_core::{BatchCoordinator, CandidateEdge, EngineConfig};

const SIZES: [usize; 3] = [50, 250, 1000];

/// Mostly disjoint pairs with every tenth row bridging into the previous
/// pair, so merges and fan-in show up at a steady rate.
fn synthetic_batch(rows: usize) -> Vec<CandidateEdge> {
    (0..rows)
        .map(|i| {
            if i % 10 == 9 {
                CandidateEdge::new(&format!("O{i}"), &format!("R{}", i - 1))
            } else {
                CandidateEdge::new(&format!("O{i}"), &format!("R{i}"))
            }
        })
        .collect()
}

fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch.submit");

    for size in SIZES {
        let rows = synthetic_batch(size);
        let config = EngineConfig {
            max_batch_size: size,
            ..EngineConfig::default()
        };
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("fresh", size), &rows, |b, rows| {
            b.iter(|| {
                let mut coordinator = BatchCoordinator::new(config.clone());
                black_box(coordinator.submit_batch(rows))
            });
        });
    }

    group.finish();
}

fn bench_resubmit(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch.resubmit");

    for size in SIZES {
        let rows = synthetic_batch(size);
        let config = EngineConfig {
            max_batch_size: size,
            ..EngineConfig::default()
        };
        let mut seeded = BatchCoordinator::new(config.clone());
        if seeded.submit_batch(&rows).is_err() {
            continue;
        }
        let snapshot = seeded.snapshot();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("duplicates", size), &rows, |b, rows| {
            b.iter(|| {
                let Ok(mut coordinator) =
                    BatchCoordinator::hydrate(config.clone(), snapshot.clone())
                else {
                    return None;
                };
                Some(black_box(coordinator.submit_batch(rows)))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_submit, bench_resubmit);
criterion_main!(benches);
