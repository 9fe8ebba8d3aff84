use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, SamplingMode};
use nanorand::{Rng, WyRand};

use maxtree_algos::pool::{PoolConfig, ThreadPool};
use maxtree_algos::radix_sort::{radix_sort_parallel, radix_sort_seq, RadixItem};

#[derive(Clone, Copy)]
struct Item(u64);

impl RadixItem for Item {
    fn unsigned_value(&self) -> u64 {
        self.0
    }
}

fn random_items(n: usize, seed: u64) -> Vec<Item> {
    let mut rng = WyRand::new_seed(seed);
    (0..n).map(|_| Item(rng.generate::<u32>() as u64)).collect()
}

fn radix_sort(c: &mut Criterion) {
    // Scaled down from the reference engine's 33M-float sort benchmark to a
    // size that finishes a criterion run in a reasonable time.
    let n = 2_000_000;
    let mut group = c.benchmark_group("radix_sort");
    group.sample_size(10).measurement_time(Duration::from_secs(20)).sampling_mode(SamplingMode::Flat);

    group.bench_function("seq", |b| {
        b.iter_batched(
            || random_items(n, 42),
            |mut items| {
                radix_sort_seq(&mut items, 32);
                black_box(items);
            },
            criterion::BatchSize::LargeInput,
        )
    });

    let pool = ThreadPool::new(PoolConfig::default());
    group.bench_function("parallel", |b| {
        b.iter_batched(
            || (random_items(n, 7), vec![Item(0); n]),
            |(mut items, mut scratch)| {
                let sorted_in_items = radix_sort_parallel(&pool, &mut items, &mut scratch, 32);
                black_box(if sorted_in_items { items } else { scratch });
            },
            criterion::BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(benches, radix_sort);
criterion_main!(benches);
