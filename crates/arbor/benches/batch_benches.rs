// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(
    clippy::arithmetic_side_effects,
    reason = "it is fine to let our guard down in benchmark/test code"
)]

use std::hint::black_box;

use arbor::{Branch, Job};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

fn criterion_benchmark(c: &mut Criterion) {
    group_batch_amortization(c);
}

/// Compare submitting `count` trivial jobs one by one against packaging them into a single
/// sequential batch.
///
/// The batch class exists because per-job queue synchronization dominates cost for trivial job
/// bodies; the batch pays it once per `count` jobs, which this group makes measurable.
fn group_batch_amortization(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_amortization");

    for count in &[16_u64, 64, 256] {
        group.throughput(criterion::Throughput::Elements(*count));

        group.bench_with_input(BenchmarkId::new("individual", count), count, |b, count| {
            let branch = Branch::named("bench-individual", 1);

            b.iter(|| {
                for index in 0..*count {
                    branch
                        .post(move || {
                            _ = black_box(index);
                        })
                        .unwrap();
                }
                branch.wait_idle(None);
            });
        });

        group.bench_with_input(BenchmarkId::new("batch", count), count, |b, count| {
            let branch = Branch::named("bench-batch", 1);

            b.iter(|| {
                let jobs: Vec<Job> = (0..*count)
                    .map(|index| {
                        Box::new(move || {
                            _ = black_box(index);
                        }) as Job
                    })
                    .collect();
                branch.post_batch(jobs).unwrap();
                branch.wait_idle(None);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
