//! Insertion while clones, comparisons and hashing randomly panic.

mod common;

use cflat::ConcurrentFlatMap;
use common::{
    catch_injected, counts, disable_panics, enable_panics, on_every_thread, reset_counts,
    thread_runner, thread_runner_ref, FaultyHash, Raii, NUM_THREADS,
};
use rand::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

type Map = ConcurrentFlatMap<Raii, Raii, FaultyHash>;

const NUM_VALUES: usize = 16384;

#[derive(Copy, Clone, Debug)]
enum Keys {
    Random,
    Sequential,
    LimitedRange,
}

fn value_for(k: i32) -> i32 {
    k ^ 0x5555
}

fn make_values(keys: Keys, rng: &mut StdRng) -> Vec<(Raii, Raii)> {
    (0..NUM_VALUES as i32)
        .map(|i| {
            let k = match keys {
                Keys::Random => rng.gen(),
                Keys::Sequential => i,
                Keys::LimitedRange => rng.gen_range(0..100),
            };
            (Raii::new(k), Raii::new(value_for(k)))
        })
        .collect()
}

/// Every element of the map must be one of the inputs, unmodified.
fn check_fuzzy(map: &Map, reference: &HashMap<i32, i32>) {
    let visited = map.cvisit_all(|k, v| {
        assert_eq!(reference.get(&k.x), Some(&v.x));
    });
    assert_eq!(visited, map.len());
}

/// Runs `inserter` on a fresh map for every key distribution, with panics
/// enabled, then checks that every `Raii` created was dropped exactly once.
fn insert_test(inserter: impl Fn(Vec<(Raii, Raii)>, &Map)) {
    let _serial = common::serial();

    for keys in [Keys::Random, Keys::Sequential, Keys::LimitedRange] {
        let mut rng = StdRng::seed_from_u64(73987);
        reset_counts();

        let values = make_values(keys, &mut rng);
        let reference: HashMap<i32, i32> = values.iter().map(|(k, v)| (k.x, v.x)).collect();

        {
            let map = Map::default();
            enable_panics();
            inserter(values, &map);
            disable_panics();

            check_fuzzy(&map, &reference);
        }

        let counts = counts();
        assert!(counts.drop > 0, "{:?}", keys);
        assert_eq!(counts.constructed(), counts.drop, "{:?}", keys);
    }
}

#[test]
fn insert_cloned() {
    insert_test(|values, map| {
        let inserted = AtomicUsize::new(0);
        thread_runner_ref(&values, |part| {
            for value in part {
                if catch_injected(|| map.insert_cloned(value)) == Some(true) {
                    inserted.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        disable_panics();
        assert_eq!(map.len(), inserted.load(Ordering::Relaxed));
        assert!(map.len() > 0);
        assert!(counts().clone > 0);
        assert_eq!(counts().clone_from, 0);
    });
}

#[test]
fn insert_cloned_reserved() {
    insert_test(|values, map| {
        disable_panics();
        map.reserve(values.len());
        let generation = map.generation();
        enable_panics();

        thread_runner_ref(&values, |part| {
            for value in part {
                catch_injected(|| map.insert_cloned(value));
            }
        });

        disable_panics();
        assert_eq!(map.generation(), generation);
        assert_eq!(counts().clone_from, 0);
    });
}

#[test]
fn insert_moved() {
    insert_test(|values, map| {
        let inserted = AtomicUsize::new(0);
        thread_runner(values, |part| {
            for (k, v) in part {
                if catch_injected(|| map.insert(k, v)) == Some(true) {
                    inserted.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        disable_panics();
        assert_eq!(map.len(), inserted.load(Ordering::Relaxed));
        assert!(map.len() > 0);
        assert_eq!(counts().clone, 0);
        assert_eq!(counts().clone_from, 0);
    });
}

#[test]
fn insert_moved_reserved() {
    insert_test(|values, map| {
        disable_panics();
        map.reserve(values.len());
        let generation = map.generation();
        enable_panics();

        thread_runner(values, |part| {
            for (k, v) in part {
                catch_injected(|| map.insert(k, v));
            }
        });

        disable_panics();
        assert_eq!(map.generation(), generation);
        assert_eq!(counts().clone, 0);
        assert_eq!(counts().clone_from, 0);
    });
}

#[test]
fn insert_iter() {
    insert_test(|values, map| {
        thread_runner(values, |part| {
            // A panic drops the rest of the part.
            catch_injected(|| map.insert_iter(part));
        });

        disable_panics();
        assert!(map.len() > 0);
        assert_eq!(counts().clone, 0);
        assert_eq!(counts().clone_from, 0);
    });
}

#[test]
fn insert_or_assign_moved() {
    insert_test(|values, map| {
        let inserted = AtomicUsize::new(0);
        thread_runner(values, |part| {
            for (k, v) in part {
                if catch_injected(|| map.insert_or_assign(k, v)) == Some(true) {
                    inserted.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        disable_panics();
        assert_eq!(map.len(), inserted.load(Ordering::Relaxed));
        assert_eq!(counts().clone, 0);
        assert_eq!(counts().clone_from, 0);
    });
}

#[test]
fn insert_or_assign_cloned() {
    insert_test(|values, map| {
        thread_runner_ref(&values, |part| {
            for (k, v) in part {
                catch_injected(|| map.insert_or_assign_cloned(k, v));
            }
        });

        disable_panics();
        assert!(map.len() > 0);
        assert!(counts().clone > 0);
    });
}

#[test]
fn insert_or_visit() {
    insert_test(|values, map| {
        let inserted = AtomicUsize::new(0);
        let visits = AtomicUsize::new(0);
        thread_runner(values, |part| {
            for (k, v) in part {
                let result = catch_injected(|| {
                    map.insert_or_visit(k, v, |_, _| {
                        visits.fetch_add(1, Ordering::Relaxed);
                    })
                });
                if result == Some(true) {
                    inserted.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        disable_panics();
        assert_eq!(map.len(), inserted.load(Ordering::Relaxed));
        assert!(inserted.load(Ordering::Relaxed) + visits.load(Ordering::Relaxed) <= NUM_VALUES);
        assert_eq!(counts().clone, 0);
        assert_eq!(counts().clone_from, 0);
    });
}

#[test]
fn insert_or_cvisit() {
    insert_test(|values, map| {
        let inserted = AtomicUsize::new(0);
        thread_runner(values, |part| {
            for (k, v) in part {
                if catch_injected(|| map.insert_or_cvisit(k, v, |_, _| {})) == Some(true) {
                    inserted.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        disable_panics();
        assert_eq!(map.len(), inserted.load(Ordering::Relaxed));
        assert_eq!(counts().clone, 0);
        assert_eq!(counts().clone_from, 0);
    });
}

#[test]
fn insert_or_visit_iter() {
    insert_test(|values, map| {
        thread_runner(values, |part| {
            catch_injected(|| map.insert_or_visit_iter(part, |_, _| {}));
        });

        disable_panics();
        assert!(map.len() > 0);
        assert_eq!(counts().clone, 0);
        assert_eq!(counts().clone_from, 0);
    });
}

#[test]
fn insert_or_cvisit_iter() {
    insert_test(|values, map| {
        thread_runner(values, |part| {
            catch_injected(|| map.insert_or_cvisit_iter(part, |_, _| {}));
        });

        disable_panics();
        assert!(map.len() > 0);
        assert_eq!(counts().clone, 0);
        assert_eq!(counts().clone_from, 0);
    });
}

#[test]
fn insert_or_assign_counts_assignments() {
    let _serial = common::serial();

    let mut rng = StdRng::seed_from_u64(12);
    let values = make_values(Keys::LimitedRange, &mut rng);
    let unique = values
        .iter()
        .map(|(k, _)| k.x)
        .collect::<std::collections::HashSet<_>>()
        .len();
    reset_counts();

    {
        let map = Map::default();
        let mut inserted = 0;
        for (k, v) in &values {
            if map.insert_or_assign_cloned(k, v) {
                inserted += 1;
            }
        }

        assert_eq!(inserted, unique);
        assert_eq!(map.len(), unique);
        // A key and a value are cloned for each pair inserted.
        assert_eq!(counts().clone, 2 * unique);
        assert_eq!(counts().clone_from, values.len() - unique);
    }
    assert_eq!(counts().drop, counts().clone);
}

fn literal_values() -> Vec<(Raii, Raii)> {
    [
        (0, 0),
        (1, 1),
        (2, 2),
        (3, 3),
        (4, 4),
        (5, 5),
        (6, 6),
        (6, 6),
        (7, 7),
        (8, 8),
        (9, 9),
        (10, 10),
        (9, 9),
        (8, 8),
        (7, 7),
        (6, 6),
        (5, 5),
        (4, 4),
        (3, 3),
        (2, 2),
        (1, 1),
        (0, 0),
    ]
    .into_iter()
    .map(|(k, v)| (Raii::new(k), Raii::new(v)))
    .collect()
}

#[test]
fn insert_literal_list_from_every_thread() {
    let _serial = common::serial();

    let values = literal_values();
    let reference: HashMap<i32, i32> = values.iter().map(|(k, v)| (k.x, v.x)).collect();
    assert_eq!(reference.len(), 11);

    {
        let map: Map = Map::default();
        on_every_thread(|| {
            for value in &values {
                map.insert_cloned(value);
            }
        });
        assert_eq!(map.len(), reference.len());
        check_fuzzy(&map, &reference);

        let num_invokes = AtomicUsize::new(0);
        let map = Map::default();
        on_every_thread(|| {
            map.insert_or_visit_iter(values.iter().cloned(), |_, _| {
                num_invokes.fetch_add(1, Ordering::Relaxed);
            });
            map.insert_or_cvisit_iter(values.iter().cloned(), |_, _| {
                num_invokes.fetch_add(1, Ordering::Relaxed);
            });
        });

        let n = values.len();
        let s = reference.len();
        assert_eq!(
            num_invokes.load(Ordering::Relaxed),
            (n - s) + (NUM_THREADS - 1) * n + NUM_THREADS * n
        );
        assert_eq!(map.len(), s);
        check_fuzzy(&map, &reference);
        assert_eq!(counts().clone_from, 0);
    }

    drop(values);
    let counts = counts();
    assert_eq!(counts.constructed(), counts.drop);
}
