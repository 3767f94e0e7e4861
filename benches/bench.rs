use criterion::{black_box, criterion_group, criterion_main, Criterion};

use jujube::HashMap;

const SIZE: usize = 10_000;

// A pseudo-random key iterator.
#[derive(Clone, Copy)]
struct RandomKeys {
    state: usize,
}

impl RandomKeys {
    fn new() -> Self {
        RandomKeys { state: 0 }
    }
}

impl Iterator for RandomKeys {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        // Add 1 then multiply by some 32 bit prime.
        self.state = self.state.wrapping_add(1).wrapping_mul(3_787_392_781);
        Some(self.state)
    }
}

fn insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    group.bench_function("sequential", |b| {
        b.iter(|| {
            let map = HashMap::with_capacity(SIZE);
            let guard = map.guard();
            for i in 0..SIZE {
                map.insert(i, i, &guard);
            }
            black_box(&map);
        })
    });

    group.bench_function("random", |b| {
        b.iter(|| {
            let map = HashMap::with_capacity(SIZE);
            let guard = map.guard();
            for i in RandomKeys::new().take(SIZE) {
                map.insert(i, i, &guard);
            }
            black_box(&map);
        })
    });

    group.finish();
}

fn get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    let map = HashMap::with_capacity(SIZE);
    {
        let guard = map.guard();
        for i in RandomKeys::new().take(SIZE) {
            map.insert(i, i, &guard);
        }
    }

    group.bench_function("hit", |b| {
        let guard = map.guard();
        b.iter(|| {
            for i in RandomKeys::new().take(SIZE) {
                black_box(map.get(&i, &guard));
            }
        })
    });

    group.bench_function("miss", |b| {
        let guard = map.guard();
        b.iter(|| {
            for i in 0..SIZE {
                black_box(map.get(&i, &guard));
            }
        })
    });

    group.finish();
}

fn mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed");

    group.bench_function("churn", |b| {
        let map = HashMap::with_capacity(SIZE);
        b.iter(|| {
            let guard = map.guard();
            for i in RandomKeys::new().take(SIZE) {
                if i % 8 == 0 {
                    map.remove(&i, &guard);
                } else {
                    map.insert(i, i, &guard);
                }
            }
        })
    });

    group.finish();
}

criterion_group!(benches, insert, get, mixed);
criterion_main!(benches);
