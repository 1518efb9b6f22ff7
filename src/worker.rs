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

//! A long-lived executor bound to a single runnable at a time (spec §4.5).

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use derive_more::Debug as MoreDebug;
use uuid::Uuid;

use crate::monitor::{ExclusiveMonitor, WaitOutcome};

/// A unit of work handed to a worker. Consuming `Box<Self>` communicates
/// that it runs exactly once.
pub trait Job: Send + 'static {
    fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send + 'static> Job for F {
    fn run(self: Box<Self>) { (*self)(); }
}

type BoxedJob = Box<dyn Job>;

/// Unique identifier for a worker, for logging and pool bookkeeping.
#[derive(Clone, Copy, PartialEq, Eq, Hash, MoreDebug)]
#[debug("WorkerId({_0})")]
pub struct WorkerId(Uuid);

impl WorkerId {
    fn new() -> Self { Self(Uuid::new_v4()) }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// Lifecycle states a worker moves through (spec §3, Worker invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Fresh,
    Running,
    Idle,
    Expired,
    Joined,
}

struct Inner {
    assignment: Option<BoxedJob>,
    lifecycle:  Lifecycle,
}

/// A worker: one dedicated OS thread, one runnable at a time.
pub struct Worker {
    id:             WorkerId,
    monitor:        ExclusiveMonitor<Inner>,
    interrupted:    AtomicBool,
    expire_ms:      AtomicU64,
    thread:         std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawns a worker thread. `on_idle_expired` is called (on the pool's
    /// side, not the worker's thread) once the worker has self-expired, so
    /// the pool can remove it from the roster; `on_completed` is called
    /// after each job returns, before the worker goes idle, so the pool can
    /// return it to the free-list and release a capacity permit.
    pub fn spawn(
        expire_timeout: Duration,
        on_completed: impl Fn(&Arc<Worker>) + Send + Sync + 'static,
        on_expired: impl Fn(&Arc<Worker>) + Send + Sync + 'static,
    ) -> Arc<Worker> {
        let worker = Arc::new(Worker {
            id:          WorkerId::new(),
            monitor:     ExclusiveMonitor::new(Inner {
                assignment: None,
                lifecycle:  Lifecycle::Fresh,
            }),
            interrupted: AtomicBool::new(false),
            expire_ms:   AtomicU64::new(u64::try_from(expire_timeout.as_millis()).unwrap_or(u64::MAX)),
            thread:      std::sync::Mutex::new(None),
        });

        let loop_worker = worker.clone();
        let handle = std::thread::Builder::new()
            .name(format!("modest-worker-{}", worker.id))
            .spawn(move || loop_worker.run_loop(&on_completed, &on_expired))
            .expect("failed to spawn worker thread");
        *worker.thread.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);

        worker
    }

    #[must_use]
    pub fn id(&self) -> WorkerId { self.id }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.monitor.lock().lifecycle
    }

    /// Publishes a job to this worker and wakes it. Caller must have
    /// already verified (e.g. via the pool's free-list) that the worker is
    /// idle; assigning over a running job is a logic error.
    pub fn assign(self: &Arc<Self>, job: BoxedJob) {
        let mut g = self.monitor.lock();
        debug_assert!(g.assignment.is_none(), "worker double-assigned");
        g.assignment = Some(job);
        drop(g);
        self.monitor.notify_all();
    }

    /// Sets the interrupt flag and wakes the worker, so a blocking wait
    /// inside the currently running job (or the idle wait) notices
    /// promptly. Sticky until the worker is reused for a new job.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.monitor.notify_all();
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool { self.interrupted.load(Ordering::Acquire) }

    pub fn clear_interrupted(&self) { self.interrupted.store(false, Ordering::Release); }

    pub fn set_expire_timeout(&self, timeout: Duration) {
        self.expire_ms
            .store(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), Ordering::Release);
    }

    fn expire_timeout(&self) -> Duration { Duration::from_millis(self.expire_ms.load(Ordering::Acquire)) }

    fn run_loop(
        self: Arc<Self>,
        on_completed: &(impl Fn(&Arc<Worker>) + Send + Sync + 'static),
        on_expired: &(impl Fn(&Arc<Worker>) + Send + Sync + 'static),
    ) {
        loop {
            let job = {
                let mut g = self.monitor.lock();
                loop {
                    if let Some(job) = g.assignment.take() {
                        g.lifecycle = Lifecycle::Running;
                        break Some(job);
                    }
                    g.lifecycle = Lifecycle::Idle;
                    let (g2, outcome) =
                        self.monitor.wait_bounded(g, self.expire_timeout(), &self.interrupted);
                    g = g2;
                    match outcome {
                        WaitOutcome::Notified => continue,
                        // `wait_bounded` checks the interrupt flag before the
                        // deadline on every call (monitor.rs), so once this
                        // worker is idle and interrupted (the shutdown path:
                        // `WorkerPool::interrupt_all`/`terminate_all`), every
                        // further wait returns `Interrupted` instantly with
                        // no sleep at all. Looping back to idle-wait again
                        // (as if merely spuriously woken) would spin this
                        // thread at 100% CPU forever and never reach
                        // `Expired`/`Joined`. Treat it the same as a timeout:
                        // an idle, interrupted worker has nothing left to
                        // wait for and should expire now.
                        WaitOutcome::Interrupted | WaitOutcome::TimedOut => {
                            g.lifecycle = Lifecycle::Expired;
                            break None;
                        }
                    }
                }
            };

            match job {
                Some(job) => {
                    job.run();
                    on_completed(&self);
                }
                None => {
                    on_expired(&self);
                    break;
                }
            }
        }

        self.monitor.lock().lifecycle = Lifecycle::Joined;
    }

    /// Blocks until the worker's OS thread has returned. Only meaningful
    /// after the worker has been told to expire or interrupted with no
    /// further assignment coming.
    pub fn join(&self) {
        let handle = self.thread.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

thread_local! {
    /// The operation currently executing on this worker's thread, if any.
    /// Set by the engine immediately before handing a job to the pool and
    /// cleared immediately after it returns (spec §9, "worker-bound
    /// thread-local").
    pub(crate) static CURRENT_OPERATION: std::cell::RefCell<Option<crate::operation::Operation>> =
        const { std::cell::RefCell::new(None) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_assigned_job_and_reports_completion() {
        let completed = Arc::new(AtomicUsize::new(0));
        let completed2 = completed.clone();
        let worker = Worker::spawn(
            Duration::from_millis(200),
            move |_w| {
                completed2.fetch_add(1, Ordering::SeqCst);
            },
            |_w| {},
        );

        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        worker.assign(Box::new(move || {
            ran2.store(true, Ordering::SeqCst);
        }));

        std::thread::sleep(Duration::from_millis(50));
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        worker.join();
    }

    #[test]
    fn expires_after_idle_timeout() {
        let expired = Arc::new(AtomicBool::new(false));
        let expired2 = expired.clone();
        let worker = Worker::spawn(Duration::from_millis(30), |_w| {}, move |_w| {
            expired2.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(150));
        assert!(expired.load(Ordering::SeqCst));
        assert_eq!(worker.lifecycle(), Lifecycle::Joined);
        worker.join();
    }
}
