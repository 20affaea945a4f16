#![allow(dead_code)]

use parking_lot::{const_mutex, Mutex, MutexGuard};
use std::{
    collections::hash_map::DefaultHasher,
    hash::{BuildHasher, Hash, Hasher},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Once,
    },
    thread,
};

pub const NUM_THREADS: usize = 8;

static SERIAL: Mutex<()> = const_mutex(());

/// Serializes tests which look at the global counters, and sets up logging
/// and the panic hook.
pub fn serial() -> MutexGuard<'static, ()> {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();

        // Injected panics are expected, keep them out of the output.
        let default_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !info.payload().is::<InjectedPanic>() {
                default_hook(info)
            }
        }));
    });

    let guard = SERIAL.lock();
    disable_panics();
    reset_counts();
    guard
}

/// The payload of every panic raised on purpose.
#[derive(Debug)]
pub struct InjectedPanic;

struct Fault {
    calls: AtomicUsize,
    every: usize,
}

impl Fault {
    const fn new(every: usize) -> Self {
        Fault {
            calls: AtomicUsize::new(0),
            every,
        }
    }

    fn check(&self) {
        if PANICS_ENABLED.load(Ordering::Relaxed)
            && (self.calls.fetch_add(1, Ordering::Relaxed) + 1) % self.every == 0
        {
            panic::panic_any(InjectedPanic);
        }
    }
}

static PANICS_ENABLED: AtomicBool = AtomicBool::new(false);

static CLONE_FAULT: Fault = Fault::new(10);
static EQ_FAULT: Fault = Fault::new(100);
// Rarer than the largest rehash the tests do, so a retried resize succeeds.
static HASH_FAULT: Fault = Fault::new(50_000);

pub fn enable_panics() {
    PANICS_ENABLED.store(true, Ordering::Relaxed);
}

pub fn disable_panics() {
    PANICS_ENABLED.store(false, Ordering::Relaxed);
}

/// Runs `f`, swallowing an injected panic. Any other panic keeps unwinding.
pub fn catch_injected<R>(f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Some(result),
        Err(payload) if payload.is::<InjectedPanic>() => None,
        Err(payload) => panic::resume_unwind(payload),
    }
}

static NEW: AtomicUsize = AtomicUsize::new(0);
static CLONE: AtomicUsize = AtomicUsize::new(0);
static CLONE_FROM: AtomicUsize = AtomicUsize::new(0);
static DROP: AtomicUsize = AtomicUsize::new(0);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Counts {
    pub new: usize,
    pub clone: usize,
    pub clone_from: usize,
    pub drop: usize,
}

impl Counts {
    /// Every `Raii` ever created, whichever way.
    pub fn constructed(&self) -> usize {
        self.new + self.clone
    }
}

pub fn counts() -> Counts {
    Counts {
        new: NEW.load(Ordering::SeqCst),
        clone: CLONE.load(Ordering::SeqCst),
        clone_from: CLONE_FROM.load(Ordering::SeqCst),
        drop: DROP.load(Ordering::SeqCst),
    }
}

pub fn reset_counts() {
    NEW.store(0, Ordering::SeqCst);
    CLONE.store(0, Ordering::SeqCst);
    CLONE_FROM.store(0, Ordering::SeqCst);
    DROP.store(0, Ordering::SeqCst);
}

/// An instrumented value. Cloning and comparing may panic while injected
/// panics are enabled.
#[derive(Debug)]
pub struct Raii {
    pub x: i32,
}

impl Raii {
    pub fn new(x: i32) -> Self {
        NEW.fetch_add(1, Ordering::SeqCst);
        Raii { x }
    }
}

impl Clone for Raii {
    fn clone(&self) -> Self {
        CLONE_FAULT.check();
        CLONE.fetch_add(1, Ordering::SeqCst);
        Raii { x: self.x }
    }

    fn clone_from(&mut self, source: &Self) {
        CLONE_FAULT.check();
        CLONE_FROM.fetch_add(1, Ordering::SeqCst);
        self.x = source.x;
    }
}

impl Drop for Raii {
    fn drop(&mut self) {
        DROP.fetch_add(1, Ordering::SeqCst);
    }
}

impl PartialEq for Raii {
    fn eq(&self, other: &Self) -> bool {
        EQ_FAULT.check();
        self.x == other.x
    }
}

impl Eq for Raii {}

impl Hash for Raii {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.x.hash(state);
    }
}

/// A deterministic hash builder which may panic while injected panics are
/// enabled.
#[derive(Clone, Default)]
pub struct FaultyHash;

impl BuildHasher for FaultyHash {
    type Hasher = DefaultHasher;

    fn build_hasher(&self) -> DefaultHasher {
        HASH_FAULT.check();
        DefaultHasher::new()
    }
}

/// Splits `values` into `NUM_THREADS` parts and hands one to each thread.
pub fn thread_runner<T: Send>(mut values: Vec<T>, f: impl Fn(Vec<T>) + Sync) {
    let chunk = values.len().div_ceil(NUM_THREADS).max(1);
    let mut parts = Vec::new();
    while values.len() > chunk {
        let rest = values.split_off(chunk);
        parts.push(values);
        values = rest;
    }
    parts.push(values);

    let f = &f;
    thread::scope(|s| {
        for part in parts {
            s.spawn(move || f(part));
        }
    });
}

/// Like `thread_runner`, but the values stay with the caller.
pub fn thread_runner_ref<T: Sync>(values: &[T], f: impl Fn(&[T]) + Sync) {
    let chunk = values.len().div_ceil(NUM_THREADS).max(1);

    let f = &f;
    thread::scope(|s| {
        for part in values.chunks(chunk) {
            s.spawn(move || f(part));
        }
    });
}

/// Runs `f` on `NUM_THREADS` threads at once.
pub fn on_every_thread(f: impl Fn() + Sync) {
    let f = &f;
    thread::scope(|s| {
        for _ in 0..NUM_THREADS {
            s.spawn(f);
        }
    });
}
