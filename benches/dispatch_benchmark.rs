//! Benchmarks for the dispatch hot paths: submit, promote, complete.
//!
//! All benches pump the FIFO policy on the bench thread so the numbers
//! measure the dependency machinery, not worker wakeup latency.

#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use stardep::data::{Arbiter, DataHandle, DataLayout};
use stardep::policy::{FifoPolicy, SchedPolicy};
use stardep::task::Task;
use stardep::types::AccessMode;
use stardep::Dispatcher;
use std::sync::Arc;

fn harness() -> (Dispatcher, Arc<FifoPolicy>) {
    let policy = Arc::new(FifoPolicy::new());
    let dispatcher = Dispatcher::new(Arc::clone(&policy) as Arc<dyn SchedPolicy>);
    (dispatcher, policy)
}

/// Submit N independent single-buffer tasks and run them to completion.
fn independent_tasks(n: usize) {
    let (dispatcher, policy) = harness();
    let handles: Vec<_> = (0..n)
        .map(|_| DataHandle::register(DataLayout::bytes(64)))
        .collect();
    for h in &handles {
        dispatcher
            .submit(Task::new().buffer(h, AccessMode::read_write()))
            .unwrap();
    }
    while let Some(task) = policy.pop_for_worker(0) {
        dispatcher.execute(task);
    }
}

/// Submit N writers on one handle: every completion promotes the next.
fn serialized_writers(n: usize) {
    let (dispatcher, policy) = harness();
    let h = DataHandle::register(DataLayout::bytes(64));
    for _ in 0..n {
        dispatcher
            .submit(Task::new().buffer(&h, AccessMode::write()))
            .unwrap();
    }
    while let Some(task) = policy.pop_for_worker(0) {
        dispatcher.execute(task);
    }
}

/// Submit N readers on one handle: one cohort, all concurrent.
fn reader_cohort(n: usize) {
    let (dispatcher, policy) = harness();
    let h = DataHandle::register(DataLayout::bytes(64));
    for _ in 0..n {
        dispatcher
            .submit(Task::new().buffer(&h, AccessMode::read()))
            .unwrap();
    }
    while let Some(task) = policy.pop_for_worker(0) {
        dispatcher.execute(task);
    }
}

/// Submit N two-handle tasks over an arbitered pair.
fn arbitered_pairs(n: usize) {
    let (dispatcher, policy) = harness();
    let arbiter = Arbiter::create();
    let h1 = DataHandle::register(DataLayout::bytes(64));
    let h2 = DataHandle::register(DataLayout::bytes(64));
    h1.assign_arbiter(&arbiter);
    h2.assign_arbiter(&arbiter);
    for _ in 0..n {
        dispatcher
            .submit(
                Task::new()
                    .buffer(&h1, AccessMode::write())
                    .buffer(&h2, AccessMode::write()),
            )
            .unwrap();
    }
    while let Some(task) = policy.pop_for_worker(0) {
        dispatcher.execute(task);
    }
}

fn bench_dispatch(c: &mut Criterion) {
    const N: usize = 256;

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(N as u64));

    group.bench_function("independent", |b| {
        b.iter_batched(|| (), |()| independent_tasks(N), BatchSize::SmallInput);
    });
    group.bench_function("serialized_writers", |b| {
        b.iter_batched(|| (), |()| serialized_writers(N), BatchSize::SmallInput);
    });
    group.bench_function("reader_cohort", |b| {
        b.iter_batched(|| (), |()| reader_cohort(N), BatchSize::SmallInput);
    });
    group.bench_function("arbitered_pairs", |b| {
        b.iter_batched(|| (), |()| arbitered_pairs(N), BatchSize::SmallInput);
    });
    group.finish();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
