#![allow(missing_docs)]
//! End-to-end dependency scenarios on a single handle.
//!
//! The deterministic tests pump a FIFO policy by hand (zero workers) so
//! readiness ordering can be asserted exactly; the stress test runs a real
//! worker pool and checks that every submitted task drains, emitting a
//! JSON artifact with the dispatch counters when an artifacts dir is set.

use stardep::data::{DataHandle, DataLayout};
use stardep::policy::{FifoPolicy, SchedPolicy};
use stardep::task::{ReadyTask, Task};
use stardep::types::AccessMode;
use stardep::{CoreConfig, CoreProfile, Dispatcher, Runtime};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const ARTIFACTS_DIR_ENV: &str = "STARDEP_ARTIFACTS_DIR";

fn harness() -> (Dispatcher, Arc<FifoPolicy>) {
    stardep::test_utils::init_test_logging();
    let policy = Arc::new(FifoPolicy::new());
    let dispatcher = Dispatcher::new(Arc::clone(&policy) as Arc<dyn SchedPolicy>);
    (dispatcher, policy)
}

fn pop(policy: &FifoPolicy) -> Option<ReadyTask> {
    policy.pop_for_worker(0)
}

fn drain(policy: &FifoPolicy) -> Vec<ReadyTask> {
    std::iter::from_fn(|| pop(policy)).collect()
}

fn write_artifact(name: &str, json: &serde_json::Value) {
    let Ok(dir) = std::env::var(ARTIFACTS_DIR_ENV) else {
        tracing::info!(artifact = %name, payload = %json, "artifact (no dir)");
        return;
    };
    let dir = std::path::PathBuf::from(dir);
    if std::fs::create_dir_all(&dir).is_ok() {
        let _ = std::fs::write(
            dir.join(format!("{name}.json")),
            serde_json::to_vec_pretty(json).expect("artifact serializes"),
        );
    }
}

#[test]
fn write_after_write_is_strictly_serial() {
    let (dispatcher, policy) = harness();
    let h = DataHandle::register(DataLayout::bytes(64));

    let t1 = dispatcher
        .submit(Task::new().buffer(&h, AccessMode::write()))
        .unwrap();
    let t2 = dispatcher
        .submit(Task::new().buffer(&h, AccessMode::write()))
        .unwrap();

    let ready = drain(&policy);
    assert_eq!(ready.len(), 1, "second writer must be parked");
    assert_eq!(ready[0].id(), t1);

    for task in ready {
        dispatcher.execute(task);
    }
    let promoted = drain(&policy);
    assert_eq!(promoted.len(), 1);
    assert_eq!(promoted[0].id(), t2);
}

#[test]
fn read_cohort_is_fully_parallel() {
    let (dispatcher, policy) = harness();
    let h = DataHandle::register(DataLayout::bytes(64));

    let ids: Vec<_> = (0..3)
        .map(|_| {
            dispatcher
                .submit(Task::new().buffer(&h, AccessMode::read()))
                .unwrap()
        })
        .collect();

    // All three are ready before any completes, holding three references.
    let ready = drain(&policy);
    let ready_ids: Vec<_> = ready.iter().map(ReadyTask::id).collect();
    assert_eq!(ready_ids, ids);
    assert_eq!(h.stats().ref_count, 3);

    for task in ready {
        dispatcher.execute(task);
    }
    assert_eq!(h.stats().ref_count, 0);
}

#[test]
fn serialization_order_survives_real_workers() {
    stardep::test_utils::init_test_logging();
    let runtime = Runtime::with_fifo(CoreConfig::from_profile(CoreProfile::Development)).unwrap();
    let h = runtime.register(DataLayout::bytes(64));

    let order = Arc::new(exec_log::Log::new());
    let mut submitted = Vec::new();
    for i in 0..24u64 {
        let log = Arc::clone(&order);
        let id = runtime
            .submit(
                Task::new()
                    .named(format!("writer-{i}"))
                    .buffer(&h, AccessMode::write())
                    .kernel(move || log.push(i)),
            )
            .unwrap();
        submitted.push(id);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while order.len() < 24 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    let seen = order.take();
    assert_eq!(seen, (0..24).collect::<Vec<_>>(), "writers ran out of order");

    runtime.unregister(&h);
    runtime.shutdown();
}

/// Tiny append-only log; `std::sync::Mutex` keeps the test self-contained.
mod exec_log {
    use std::sync::Mutex;

    pub struct Log(Mutex<Vec<u64>>);

    impl Log {
        pub fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }

        pub fn push(&self, value: u64) {
            self.0.lock().unwrap().push(value);
        }

        pub fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }

        pub fn take(&self) -> Vec<u64> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }
}

#[test]
fn mixed_read_write_chain_respects_dependencies() {
    let (dispatcher, policy) = harness();
    let h = DataHandle::register(DataLayout::bytes(64));

    let r1 = dispatcher
        .submit(Task::new().buffer(&h, AccessMode::read()))
        .unwrap();
    let w = dispatcher
        .submit(Task::new().buffer(&h, AccessMode::write()))
        .unwrap();
    let r2 = dispatcher
        .submit(Task::new().buffer(&h, AccessMode::read()))
        .unwrap();
    let r3 = dispatcher
        .submit(Task::new().buffer(&h, AccessMode::read()))
        .unwrap();

    let first_wave: Vec<_> = drain(&policy).into_iter().collect();
    assert_eq!(first_wave.iter().map(ReadyTask::id).collect::<Vec<_>>(), vec![r1]);
    for task in first_wave {
        dispatcher.execute(task);
    }

    let second_wave = drain(&policy);
    assert_eq!(second_wave.iter().map(ReadyTask::id).collect::<Vec<_>>(), vec![w]);
    for task in second_wave {
        dispatcher.execute(task);
    }

    // Both trailing readers are promoted as one cohort behind the writer.
    let third_wave = drain(&policy);
    assert_eq!(
        third_wave.iter().map(ReadyTask::id).collect::<Vec<_>>(),
        vec![r2, r3]
    );
    assert_eq!(h.stats().ref_count, 2);
    for task in third_wave {
        dispatcher.execute(task);
    }
}

#[test]
fn user_acquire_from_another_thread_waits_its_turn() {
    stardep::test_utils::init_test_logging();
    let runtime = Runtime::with_fifo(CoreConfig::from_profile(CoreProfile::Development)).unwrap();
    let h = runtime.register(DataLayout::bytes(64));
    let writes = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let counter = Arc::clone(&writes);
        runtime
            .submit(
                Task::new()
                    .buffer(&h, AccessMode::write())
                    .kernel(move || {
                        counter.fetch_add(1, Ordering::AcqRel);
                        std::thread::sleep(Duration::from_millis(2));
                    }),
            )
            .unwrap();
    }

    // The synchronous acquisition queues behind all four writers.
    let guard = runtime.acquire(&h, AccessMode::read()).unwrap();
    assert_eq!(writes.load(Ordering::Acquire), 4);
    drop(guard);

    runtime.unregister(&h);
    runtime.shutdown();
}

#[test]
fn unregister_waits_for_inflight_tasks() {
    stardep::test_utils::init_test_logging();
    let runtime = Runtime::with_fifo(CoreConfig::from_profile(CoreProfile::Development)).unwrap();
    let h = runtime.register(DataLayout::bytes(64));
    let completed = Arc::new(AtomicUsize::new(0));

    for _ in 0..8 {
        let counter = Arc::clone(&completed);
        runtime
            .submit(
                Task::new()
                    .buffer(&h, AccessMode::read_write())
                    .kernel(move || {
                        std::thread::sleep(Duration::from_millis(1));
                        counter.fetch_add(1, Ordering::AcqRel);
                    }),
            )
            .unwrap();
    }

    // Blocks until the busy barrier drains.
    runtime.unregister(&h);
    assert_eq!(completed.load(Ordering::Acquire), 8);
    runtime.shutdown();
}

#[test]
fn stress_many_tasks_many_handles_all_drain() {
    stardep::test_utils::init_test_logging();
    let runtime = Runtime::with_fifo(CoreConfig {
        workers: Some(4),
        ..CoreConfig::from_profile(CoreProfile::Development)
    })
    .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| runtime.register(DataLayout::bytes(128)))
        .collect();
    let completed = Arc::new(AtomicUsize::new(0));
    let total = 400usize;

    // Deterministic pseudo-random mix of readers and writers over handle
    // pairs; the exact interleaving is up to the workers.
    let mut seed = 0x5eed_cafe_u64;
    let mut next = move || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) as usize
    };

    let start = Instant::now();
    for _ in 0..total {
        let a = &handles[next() % handles.len()];
        let b = &handles[next() % handles.len()];
        let mode_a = if next() % 3 == 0 {
            AccessMode::write()
        } else {
            AccessMode::read()
        };
        let mode_b = if next() % 4 == 0 {
            AccessMode::write()
        } else {
            AccessMode::read()
        };
        let counter = Arc::clone(&completed);
        runtime
            .submit(
                Task::new()
                    .buffer(a, mode_a)
                    .buffer(b, mode_b)
                    .on_complete(move || {
                        counter.fetch_add(1, Ordering::AcqRel);
                    }),
            )
            .unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    while completed.load(Ordering::Acquire) < total && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    let done = completed.load(Ordering::Acquire);
    assert_eq!(done, total, "stress tasks stranded: {done}/{total}");

    for h in &handles {
        let stats = h.stats();
        assert_eq!(stats.ref_count, 0);
        assert_eq!(stats.busy_count, 0);
    }

    let snapshot = runtime.metrics();
    write_artifact(
        "dependency_stress",
        &serde_json::json!({
            "total_tasks": total,
            "elapsed_ms": start.elapsed().as_millis() as u64,
            "submitted": snapshot.tasks_submitted,
            "completed": snapshot.tasks_completed,
            "parked": snapshot.requesters_parked,
            "promotions": snapshot.promotions,
            "cohort_promotions": snapshot.cohort_promotions,
        }),
    );

    for h in &handles {
        runtime.unregister(h);
    }
    runtime.shutdown();
}
