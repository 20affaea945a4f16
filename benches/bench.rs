// This benchmark suite covers basic functionality along two dimensions:
//   Threads: a single thread, and one thread per core inserting disjoint or shared keys.
//   Task: insert, insert_or_visit, lookup, lookup_fail, erase, visit_all.

use cflat::ConcurrentFlatMap;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use std::thread;

const SIZE: u64 = 100_000;

fn random_keys(size: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..size).map(|_| rng.gen()).collect()
}

fn filled(keys: &[u64]) -> ConcurrentFlatMap<u64, u64> {
    let map = ConcurrentFlatMap::with_capacity(keys.len());
    for &k in keys {
        map.insert(k, k);
    }
    map
}

fn threads() -> usize {
    thread::available_parallelism().map_or(4, |n| n.get())
}

fn single_thread(c: &mut Criterion) {
    let keys = random_keys(SIZE);
    let missing = random_keys(SIZE * 2).split_off(SIZE as usize);

    c.bench_function("insert", |b| {
        b.iter(|| {
            let map = ConcurrentFlatMap::new();
            for &k in &keys {
                map.insert(k, k);
            }
            black_box(map.len())
        })
    });

    c.bench_function("insert_reserved", |b| {
        b.iter(|| {
            let map = ConcurrentFlatMap::new();
            map.reserve(keys.len());
            for &k in &keys {
                map.insert(k, k);
            }
            black_box(map.len())
        })
    });

    let map = filled(&keys);

    c.bench_function("lookup", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for k in &keys {
                map.cvisit(k, |_, v| sum = sum.wrapping_add(*v));
            }
            black_box(sum)
        })
    });

    c.bench_function("lookup_fail", |b| {
        b.iter(|| {
            let mut found = 0;
            for k in &missing {
                found += map.count(k);
            }
            black_box(found)
        })
    });

    c.bench_function("insert_or_visit", |b| {
        b.iter(|| {
            for &k in &keys {
                map.insert_or_visit(k, 0, |_, v| *v = v.wrapping_add(1));
            }
        })
    });

    c.bench_function("visit_all", |b| {
        b.iter(|| {
            map.cvisit_all(|_, v| {
                black_box(v);
            })
        })
    });

    c.bench_function("insert_erase", |b| {
        b.iter(|| {
            let map = filled(&keys);
            for k in &keys {
                map.erase(k);
            }
            black_box(map.len())
        })
    });
}

fn multi_thread(c: &mut Criterion) {
    let keys = random_keys(SIZE);
    let threads = threads();
    let chunk = (keys.len() + threads - 1) / threads;

    c.bench_function("multi_insert_disjoint", |b| {
        b.iter(|| {
            let map = ConcurrentFlatMap::new();
            thread::scope(|s| {
                for part in keys.chunks(chunk) {
                    let map = &map;
                    s.spawn(move || {
                        for &k in part {
                            map.insert(k, k);
                        }
                    });
                }
            });
            black_box(map.len())
        })
    });

    c.bench_function("multi_insert_or_visit_shared", |b| {
        b.iter(|| {
            let map = ConcurrentFlatMap::new();
            thread::scope(|s| {
                for _ in 0..threads {
                    s.spawn(|| {
                        for &k in keys.iter().take(10_000) {
                            map.insert_or_visit(k, 1u64, |_, v| *v += 1);
                        }
                    });
                }
            });
            black_box(map.len())
        })
    });

    let map = filled(&keys);

    c.bench_function("multi_lookup", |b| {
        b.iter(|| {
            thread::scope(|s| {
                for part in keys.chunks(chunk) {
                    let map = &map;
                    s.spawn(move || {
                        let mut found = 0;
                        for k in part {
                            found += map.count(k);
                        }
                        black_box(found)
                    });
                }
            });
        })
    });
}

criterion_group!(benches, single_thread, multi_thread);
criterion_main!(benches);
