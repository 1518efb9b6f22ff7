// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end scenarios from spec.md §8 (S1-S6), exercised against the
//! crate's public API only.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use rsketch_modest::{Engine, EngineConfig, Guard, Operation, OperationCollection, PoolConfig, Semaphore, WorkerPool};

fn engine_with(pool: PoolConfig) -> Arc<Engine> {
    let engine = Engine::new(&EngineConfig::builder().name("scenario").pool(pool).build());
    engine.start();
    engine
}

/// S1 — unguarded fanout: ten operations on a four-worker engine never
/// exceed four concurrently running, and all ten complete exactly once.
#[test]
fn s1_unguarded_fanout_stays_within_worker_cap() {
    let engine = engine_with(PoolConfig::builder().max_workers(4).expire_timeout(Duration::from_secs(5)).build());

    let running = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let ops: Vec<Operation> = (0..10)
        .map(|i| {
            let running = running.clone();
            let max_seen = max_seen.clone();
            let order = order.clone();
            Operation::new(
                move |_op: &Operation| {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    order.lock().unwrap().push(i);
                    running.fetch_sub(1, Ordering::SeqCst);
                },
                None,
                None,
            )
        })
        .collect();

    for op in &ops {
        engine.queue(op.clone()).unwrap();
    }
    for op in &ops {
        assert!(op.wait_for(None));
    }

    assert!(max_seen.load(Ordering::SeqCst) <= 4);
    let mut seen = order.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());

    engine.stop();
}

/// S2 — a guard that admits one operation at a time, paired with
/// pre/post mutators flipping a shared counter, so every admitted
/// runnable observes the counter at exactly 1.
struct OnlyOneAtATime {
    counter: Arc<AtomicUsize>,
}

impl Guard for OnlyOneAtATime {
    fn can_execute(&self, _op: &Operation) -> bool { self.counter.load(Ordering::SeqCst) == 0 }
}

struct FlipCounter {
    counter: Arc<AtomicUsize>,
}

impl rsketch_modest::StateMutator for FlipCounter {
    fn mutate_pre(&self, _op: &Operation) { self.counter.store(1, Ordering::SeqCst); }

    fn mutate_post(&self, _op: &Operation) { self.counter.store(0, Ordering::SeqCst); }
}

#[test]
fn s2_guard_admits_one_at_a_time_in_submission_order() {
    let engine = engine_with(PoolConfig::builder().max_workers(4).expire_timeout(Duration::from_secs(5)).build());

    let counter = Arc::new(AtomicUsize::new(0));
    let guard = Arc::new(OnlyOneAtATime { counter: counter.clone() });
    let mutator = Arc::new(FlipCounter { counter: counter.clone() });
    let saw_zero = Arc::new(AtomicBool::new(false));
    let completion_order = Arc::new(Mutex::new(Vec::new()));

    let ops: Vec<Operation> = (0..5)
        .map(|i| {
            let counter = counter.clone();
            let saw_zero = saw_zero.clone();
            let completion_order = completion_order.clone();
            Operation::new(
                move |_op: &Operation| {
                    if counter.load(Ordering::SeqCst) != 1 {
                        saw_zero.store(true, Ordering::SeqCst);
                    }
                    std::thread::sleep(Duration::from_millis(10));
                    completion_order.lock().unwrap().push(i);
                },
                Some(guard.clone() as Arc<dyn Guard>),
                Some(mutator.clone() as Arc<dyn rsketch_modest::StateMutator>),
            )
        })
        .collect();

    let start = Instant::now();
    for op in &ops {
        engine.queue(op.clone()).unwrap();
    }
    for op in &ops {
        assert!(op.wait_for(None));
    }
    let elapsed = start.elapsed();

    assert!(!saw_zero.load(Ordering::SeqCst));
    assert_eq!(*completion_order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert!(elapsed >= Duration::from_millis(50));

    engine.stop();
}

/// S3 — a guard that never admits and cancels only once interrupted:
/// the interrupted operation reaches `stopped=true` without its
/// runnable ever executing; the others are left pending for engine
/// shutdown to cancel.
struct NeverExecuteCancelOnInterrupt;

impl Guard for NeverExecuteCancelOnInterrupt {
    fn can_execute(&self, _op: &Operation) -> bool { false }

    fn must_cancel(&self, op: &Operation) -> bool { op.is_interrupted() }
}

#[test]
fn s3_guard_cancels_interrupted_operation_before_it_runs() {
    let engine = engine_with(PoolConfig::builder().expire_timeout(Duration::from_secs(5)).build());
    let guard: Arc<dyn Guard> = Arc::new(NeverExecuteCancelOnInterrupt);

    let ran = Arc::new(AtomicBool::new(false));
    let ran2 = ran.clone();
    let op1 = Operation::new(|_op: &Operation| {}, Some(guard.clone()), None);
    let op2 = Operation::new(move |_op: &Operation| ran2.store(true, Ordering::SeqCst), Some(guard.clone()), None);
    let op3 = Operation::new(|_op: &Operation| {}, Some(guard), None);

    engine.queue(op1.clone()).unwrap();
    engine.queue(op2.clone()).unwrap();
    engine.queue(op3.clone()).unwrap();

    std::thread::sleep(Duration::from_millis(30));
    op2.interrupt();
    assert!(op2.wait_for(None));
    assert!(op2.is_interrupted());
    assert!(!ran.load(Ordering::SeqCst));

    assert!(!op1.is_stopped());
    assert!(!op3.is_stopped());

    engine.stop();
    assert!(op1.is_stopped());
    assert!(op3.is_stopped());
}

/// S4 — a fair semaphore wakes waiters in arrival order.
#[test]
fn s4_fair_semaphore_wakes_in_arrival_order() {
    let sem = Arc::new(Semaphore::new(1, true));
    let order = Arc::new(Mutex::new(Vec::new()));
    let flag_a = AtomicBool::new(false);
    assert!(sem.acquire(1, &flag_a));

    let sem_b = sem.clone();
    let order_b = order.clone();
    let b = std::thread::spawn(move || {
        let flag = AtomicBool::new(false);
        assert!(sem_b.acquire(1, &flag));
        order_b.lock().unwrap().push('B');
    });
    std::thread::sleep(Duration::from_millis(20));

    let sem_c = sem.clone();
    let order_c = order.clone();
    let c = std::thread::spawn(move || {
        let flag = AtomicBool::new(false);
        assert!(sem_c.acquire(1, &flag));
        order_c.lock().unwrap().push('C');
    });
    std::thread::sleep(Duration::from_millis(20));

    sem.release(1);
    std::thread::sleep(Duration::from_millis(40));
    sem.release(1);

    b.join().unwrap();
    c.join().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!['B', 'C']);
}

/// S5 — destroying an `OperationCollection` interrupts and drains every
/// contained operation promptly, even if each is blocked indefinitely
/// on a semaphore that is never released.
#[test]
fn s5_collection_terminate_unblocks_long_waits_quickly() {
    let engine = engine_with(PoolConfig::builder().max_workers(8).expire_timeout(Duration::from_secs(5)).build());
    let never_released = Arc::new(Semaphore::new(0, false));

    let collection = OperationCollection::new();
    for _ in 0..8 {
        let sem = never_released.clone();
        let op = Operation::new(
            move |op: &Operation| {
                sem.acquire(1, op.interrupt_flag());
            },
            None,
            None,
        );
        collection.add(op);
    }

    for result in collection.queue_all(&engine) {
        result.unwrap();
    }
    std::thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    drop(collection);
    let elapsed = start.elapsed();

    assert!(elapsed < Duration::from_secs(1), "terminate took {elapsed:?}, expected well under a second");

    engine.stop();
}

/// S6 — idle workers self-expire and the pool's live-worker count
/// converges back to zero shortly after the last completion.
#[test]
fn s6_idle_workers_expire_and_are_reaped() {
    let pool = WorkerPool::new("scenario-pool", &PoolConfig::builder().max_workers(10).expire_timeout(Duration::from_millis(100)).build());
    let flag = AtomicBool::new(false);
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let done = done.clone();
        assert!(pool.run(move || { done.fetch_add(1, Ordering::SeqCst); }, &flag));
    }

    while done.load(Ordering::SeqCst) < 10 {
        std::thread::sleep(Duration::from_millis(5));
    }

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(pool.live_count(), 0, "pool should have reaped all idle workers within 300ms of the last completion");
}
