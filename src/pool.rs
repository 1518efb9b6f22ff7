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

//! A self-sizing pool of [`Worker`]s with idle expiry and an optional
//! capacity bound (spec §4.5).

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::{
    config::PoolConfig,
    metrics,
    semaphore::Semaphore,
    worker::{Job, Worker, WorkerId},
};

struct Roster {
    live: Vec<Arc<Worker>>,
    idle: VecDeque<Arc<Worker>>,
}

/// A pool of workers, grown lazily up to an optional maximum and shrunk
/// automatically as workers sit idle past their expiry timeout.
pub struct WorkerPool {
    name:           String,
    roster:         std::sync::Mutex<Roster>,
    capacity:       Option<Semaphore>,
    expire_timeout: std::sync::atomic::AtomicU64,
    stopped:        AtomicBool,
}

impl WorkerPool {
    #[must_use]
    pub fn new(name: impl Into<String>, config: &PoolConfig) -> Arc<Self> {
        let capacity = config.max_workers.map(|max| Semaphore::new(u32::try_from(max).unwrap_or(u32::MAX), false));
        Arc::new(Self {
            name:           name.into(),
            roster:         std::sync::Mutex::new(Roster {
                live: Vec::new(),
                idle: VecDeque::new(),
            }),
            capacity,
            expire_timeout: std::sync::atomic::AtomicU64::new(
                u64::try_from(config.expire_timeout.as_millis()).unwrap_or(u64::MAX),
            ),
            stopped:        AtomicBool::new(false),
        })
    }

    fn expire_timeout(&self) -> Duration {
        Duration::from_millis(self.expire_timeout.load(Ordering::Acquire))
    }

    pub fn set_expire_timeout(&self, timeout: Duration) {
        self.expire_timeout
            .store(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), Ordering::Release);
        for w in &self.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner).live {
            w.set_expire_timeout(timeout);
        }
    }

    /// Changes the worker cap. A pool created without one (`max_workers:
    /// None`) stays unbounded; this only resizes an existing bound. `max ==
    /// 0` is rejected: it would permanently starve every future submission
    /// rather than express "unbounded" (spec §7, invalid argument).
    pub fn set_max_workers(&self, max: usize) -> crate::error::Result<()> {
        snafu::ensure!(max > 0, crate::error::InvalidArgumentSnafu { message: "max_workers must be greater than zero" });
        if let Some(sem) = &self.capacity {
            sem.set_max_permits(u32::try_from(max).unwrap_or(u32::MAX));
        }
        Ok(())
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner).live.len()
    }

    fn reap_expired(&self, roster: &mut Roster) {
        let before = roster.live.len();
        roster.live.retain(|w| w.lifecycle() != crate::worker::Lifecycle::Joined);
        roster.idle.retain(|w| w.lifecycle() != crate::worker::Lifecycle::Joined);
        let reaped = before - roster.live.len();
        if reaped > 0 {
            metrics::POOL_WORKERS_EXPIRED
                .with_label_values(&[&self.name])
                .inc_by(u64::try_from(reaped).unwrap_or(u64::MAX));
        }
    }

    fn spawn_worker(self: &Arc<Self>) -> Arc<Worker> {
        let pool = self.clone();
        let pool_expired = self.clone();
        let worker = Worker::spawn(
            self.expire_timeout(),
            move |w| pool.on_completed(w),
            move |w| pool_expired.on_expired(w),
        );
        self.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner).live.push(worker.clone());
        metrics::POOL_WORKERS_LIVE
            .with_label_values(&[&self.name])
            .set(i64::try_from(self.live_count()).unwrap_or(i64::MAX));
        worker
    }

    fn on_completed(self: &Arc<Self>, worker: &Arc<Worker>) {
        let mut roster = self.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        worker.clear_interrupted();
        roster.idle.push_back(worker.clone());
        if let Some(sem) = &self.capacity {
            sem.release(1);
        }
    }

    fn on_expired(&self, worker: &Arc<Worker>) {
        let mut roster = self.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        roster.live.retain(|w| w.id() != worker.id());
        roster.idle.retain(|w| w.id() != worker.id());
        metrics::POOL_WORKERS_EXPIRED.with_label_values(&[&self.name]).inc();
        metrics::POOL_WORKERS_LIVE
            .with_label_values(&[&self.name])
            .set(i64::try_from(roster.live.len()).unwrap_or(i64::MAX));
        if let Some(sem) = &self.capacity {
            sem.release(1);
        }
    }

    fn checkout_idle(&self) -> Option<Arc<Worker>> {
        let mut roster = self.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.reap_expired(&mut roster);
        while let Some(w) = roster.idle.pop_front() {
            if w.lifecycle() != crate::worker::Lifecycle::Joined {
                return Some(w);
            }
        }
        None
    }

    /// Runs `job` on a worker, blocking until one is available if the pool
    /// is at capacity. Returns `false` (without running the job) if
    /// `interrupted` becomes set first, or the pool has been terminated.
    pub fn run(self: &Arc<Self>, job: impl Job, interrupted: &AtomicBool) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        if let Some(sem) = &self.capacity {
            if !sem.acquire(1, interrupted) {
                return false;
            }
        }
        let worker = self.checkout_idle().unwrap_or_else(|| self.spawn_worker());
        worker.assign(Box::new(job));
        true
    }

    /// Non-blocking variant of [`run`](Self::run): fails immediately if the
    /// pool is at capacity rather than waiting for a worker to free up.
    pub fn try_run(self: &Arc<Self>, job: impl Job) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        if let Some(sem) = &self.capacity {
            if !sem.try_acquire(1) {
                return false;
            }
        }
        let worker = self.checkout_idle().unwrap_or_else(|| self.spawn_worker());
        worker.assign(Box::new(job));
        true
    }

    /// Reserves one unit of capacity without running anything, succeeding
    /// immediately if the pool is unbounded or has room. Paired with
    /// [`run_reserved`](Self::run_reserved) so a caller can confirm
    /// capacity *before* doing pre-admission work it would have to unwind
    /// on failure (spec §9: capacity is checked before `mutate_pre`).
    #[must_use]
    pub fn try_reserve(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.capacity.as_ref().is_none_or(|sem| sem.try_acquire(1))
    }

    /// Runs `job` using a capacity unit already obtained via
    /// [`try_reserve`](Self::try_reserve). Never blocks.
    pub fn run_reserved(self: &Arc<Self>, job: impl Job) {
        let worker = self.checkout_idle().unwrap_or_else(|| self.spawn_worker());
        worker.assign(Box::new(job));
    }

    /// Sets the interrupt flag on every live worker, so any operation
    /// currently running (or about to idle-wait) notices promptly.
    pub fn interrupt_all(&self) {
        let roster = self.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for w in &roster.live {
            w.interrupt();
        }
    }

    /// Interrupts every worker, marks the pool stopped so no further job is
    /// accepted, and blocks until every worker thread has joined.
    pub fn terminate_all(&self) {
        self.stopped.store(true, Ordering::Release);
        let workers: Vec<_> = {
            let mut roster = self.roster.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            for w in &roster.live {
                w.set_expire_timeout(Duration::ZERO);
                w.interrupt();
            }
            roster.live.drain(..).collect()
        };
        for w in &workers {
            w.join();
        }
    }

    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.roster
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .live
            .iter()
            .map(|w| w.id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_jobs_and_reuses_idle_workers() {
        let pool = WorkerPool::new("test", &PoolConfig::builder().expire_timeout(Duration::from_secs(5)).build());
        let flag = AtomicBool::new(false);
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count2 = count.clone();
            assert!(pool.run(move || { count2.fetch_add(1, Ordering::SeqCst); }, &flag));
            std::thread::sleep(Duration::from_millis(20));
        }

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(pool.live_count(), 1, "idle worker should have been reused, not respawned");
        pool.terminate_all();
    }

    #[test]
    fn bounded_pool_blocks_try_run_at_capacity() {
        let pool = WorkerPool::new(
            "bounded",
            &PoolConfig::builder().max_workers(1).expire_timeout(Duration::from_secs(5)).build(),
        );
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let flag = AtomicBool::new(false);
        assert!(pool.run(
            move || {
                rx.recv().ok();
            },
            &flag
        ));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!pool.try_run(|| {}));
        tx.send(()).unwrap();
        pool.terminate_all();
    }

    #[test]
    fn idle_worker_self_expires_and_is_reaped() {
        let pool = WorkerPool::new("expiring", &PoolConfig::builder().expire_timeout(Duration::from_millis(30)).build());
        let flag = AtomicBool::new(false);
        assert!(pool.run(|| {}, &flag));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(pool.live_count(), 0);
    }
}
