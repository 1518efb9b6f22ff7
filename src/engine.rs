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

//! The guarded operation engine (spec §4.7): queues [`Operation`]s, walks
//! them in FIFO order on a dedicated dispatcher thread, and admits each to
//! a [`WorkerPool`] once its [`Guard`] allows it and a worker slot is
//! free.
//!
//! Grounded in `original_source/cpp/modest/Engine.cpp`'s `dispatchJobs`:
//! one pass over the pending queue, admitting (`canExecute`), cancelling
//! (`isInterrupted` or `mustCancel` when the guard currently refuses), or
//! leaving in place (waiting for a future pass) every operation in turn.
//!
//! # Capacity-before-`mutate_pre` (spec §9)
//!
//! The original calls `tryRunJob` *after* `mutatePreExecutionState`, so a
//! guard can see the mutation applied even when the pool turns out to be
//! full, leaving the operation mutated but not actually running until a
//! later pass re-admits it. This port checks pool capacity first via
//! [`WorkerPool::try_reserve`] and only runs `mutate_pre` once admission is
//! certain, so `mutate_pre` runs exactly once, immediately before the
//! operation is handed to a worker.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use snafu::ensure;
use tracing::{debug, trace};

use crate::{
    config::EngineConfig,
    dispatcher::DispatchLoop,
    error::{EngineNotRunningSnafu, Result},
    metrics,
    operation::Operation,
    pool::WorkerPool,
    worker::CURRENT_OPERATION,
};

/// A FIFO of guarded operations dispatched onto a self-sizing worker pool.
pub struct Engine {
    name:             String,
    pool:             Arc<WorkerPool>,
    dispatch:         Arc<DispatchLoop>,
    pending:          std::sync::Mutex<VecDeque<Operation>>,
    running:          AtomicBool,
    total:            AtomicU64,
    shutdown_timeout: Duration,
}

impl Engine {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            name:             config.name.clone(),
            pool:             WorkerPool::new(config.name.clone(), &config.pool),
            dispatch:         Arc::new(DispatchLoop::new()),
            pending:          std::sync::Mutex::new(VecDeque::new()),
            running:          AtomicBool::new(false),
            total:            AtomicU64::new(0),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, VecDeque<Operation>> {
        self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Starts the dispatcher thread. Idempotent: calling `start` while
    /// already running has no effect.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::Release);
        let me = self.clone();
        self.dispatch.start(format!("modest-engine-{}", self.name), move || me.dispatch_once());
        debug!(engine = %self.name, "engine started");
    }

    /// Stops dispatching, cancels every still-pending operation, then
    /// interrupts and joins every worker. Running operations are given
    /// `shutdown_timeout` (spec §6) to notice interruption cooperatively;
    /// this call itself blocks until every worker thread has returned.
    pub fn stop(self: &Arc<Self>) {
        self.running.store(false, Ordering::Release);
        self.dispatch.stop();

        let cancelled: Vec<Operation> = self.pending().drain(..).collect();
        for op in &cancelled {
            op.clear_wakeup();
            op.cancel();
        }
        if !cancelled.is_empty() {
            metrics::OPERATIONS_CANCELLED
                .with_label_values(&[&self.name])
                .inc_by(u64::try_from(cancelled.len()).unwrap_or(u64::MAX));
        }

        self.pool.interrupt_all();

        // Workers are interrupted cooperatively (spec §1: no preemption), so
        // `terminate_all` can only wait for running operations to notice and
        // return on their own. `shutdown_timeout` bounds how long we stay
        // quiet about that wait before logging that something is overrunning
        // it; it does not and cannot cut the join short.
        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        let name = self.name.clone();
        let timeout = self.shutdown_timeout;
        let watcher = std::thread::spawn(move || {
            std::thread::sleep(timeout);
            if !done2.load(Ordering::Acquire) {
                tracing::warn!(engine = %name, ?timeout, "workers still running past shutdown_timeout");
            }
        });

        self.pool.terminate_all();
        done.store(true, Ordering::Release);
        let _ = watcher.join();

        debug!(engine = %self.name, "engine stopped");
    }

    /// Queues `op` for dispatch. Fails if the engine is not currently
    /// running (between construction/`stop` and the next `start`).
    pub fn queue(&self, op: Operation) -> Result<()> {
        ensure!(self.running.load(Ordering::Acquire), EngineNotRunningSnafu);
        self.total.fetch_add(1, Ordering::Relaxed);
        let dispatch = self.dispatch.clone();
        op.attach_wakeup(Arc::new(move || dispatch.wakeup()));
        let depth = {
            let mut q = self.pending();
            q.push_back(op);
            q.len()
        };
        metrics::OPERATIONS_QUEUED.with_label_values(&[&self.name]).inc();
        metrics::QUEUE_DEPTH.with_label_values(&[&self.name]).set(i64::try_from(depth).unwrap_or(i64::MAX));
        self.dispatch.wakeup();
        Ok(())
    }

    /// The operation currently executing on the calling thread, if the
    /// calling thread is a worker thread running one.
    #[must_use]
    pub fn current_operation() -> Option<Operation> { CURRENT_OPERATION.with(|cell| cell.borrow().clone()) }

    #[must_use]
    pub fn queued_count(&self) -> usize { self.pending().len() }

    #[must_use]
    pub fn total_count(&self) -> u64 { self.total.load(Ordering::Relaxed) }

    pub fn set_max_workers(&self, max: usize) -> Result<()> { self.pool.set_max_workers(max) }

    pub fn set_worker_expire_timeout(&self, timeout: Duration) { self.pool.set_expire_timeout(timeout); }

    /// One pass over the pending FIFO: admits every operation whose guard
    /// currently allows it and for which pool capacity is available,
    /// cancels every operation whose guard refuses it while it is
    /// interrupted (or the guard says it must be cancelled outright), and
    /// leaves everything else in place for the next pass. Returns `true`
    /// if anything was admitted or cancelled, so the caller knows to run
    /// another pass immediately rather than park.
    fn dispatch_once(self: &Arc<Self>) -> bool {
        let mut progressed = false;
        let mut q = self.pending();
        let mut i = 0;
        while i < q.len() {
            let op = q[i].clone();
            let guard = op.guard();

            if guard.can_execute(&op) {
                if !self.pool.try_reserve() {
                    // Capacity unavailable: leave queued, checked again
                    // next pass, before any state mutation has run.
                    i += 1;
                    continue;
                }

                let _ = q.remove(i);
                op.clear_wakeup();
                op.run_mutate_pre();
                progressed = true;
                metrics::OPERATIONS_ADMITTED.with_label_values(&[&self.name]).inc();
                metrics::QUEUE_DEPTH.with_label_values(&[&self.name]).set(i64::try_from(q.len()).unwrap_or(i64::MAX));

                let engine = self.clone();
                let running = op.clone();
                self.pool.run_reserved(move || {
                    CURRENT_OPERATION.with(|cell| *cell.borrow_mut() = Some(running.clone()));
                    running.run_body();
                    CURRENT_OPERATION.with(|cell| *cell.borrow_mut() = None);
                    // `mutate_post` must serialize with `mutate_pre` and with
                    // every other operation's completion through the same
                    // engine lock that guards the FIFO (spec §4.6, §5) —
                    // take it here, exactly as `dispatch_once` does above for
                    // `mutate_pre`, rather than letting two workers run their
                    // `mutate_post` concurrently.
                    {
                        let _guard = engine.pending();
                        running.finish();
                    }
                    metrics::OPERATIONS_COMPLETED.with_label_values(&[&engine.name]).inc();
                    engine.dispatch.wakeup();
                });
            } else if op.is_interrupted() || guard.must_cancel(&op) {
                let _ = q.remove(i);
                op.clear_wakeup();
                op.cancel();
                progressed = true;
                metrics::OPERATIONS_CANCELLED.with_label_values(&[&self.name]).inc();
                metrics::QUEUE_DEPTH.with_label_values(&[&self.name]).set(i64::try_from(q.len()).unwrap_or(i64::MAX));
            } else {
                trace!(engine = %self.name, "operation waiting on guard");
                i += 1;
            }
        }
        progressed
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.dispatch.stop();
        self.pool.terminate_all();
    }
}
